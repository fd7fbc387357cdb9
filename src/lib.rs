//! CCTV monitor client
//!
//! Operator-side pipeline for a monitored camera: acquire the live feed, poll a
//! remote person classifier, flag suspicious activity, burn timestamps and
//! detection boxes into a recording and upload it to the backend.
//!
//! # Architecture
//!
//! A `SessionController` owns one live session at a time. While streaming it
//! runs independent timers on their own threads:
//!
//! 1. **Detection polling**: frame -> JPEG -> classifier -> `ClassificationPolicy`
//!    -> `DetectionStore` (sequence-fenced, replaced wholesale).
//! 2. **State polling**: backend alerts and uptime merged into the store.
//! 3. **Geometry probe**: letterbox rect once the video size is known.
//! 4. **Recording**: overlay draw loop feeding an encoder, chunked, uploaded on stop.
//!
//! # Module Structure
//!
//! - `session`: lifecycle and teardown
//! - `detect`: classification rule, store, poller
//! - `overlay`: burned-in text and boxes
//! - `recording`: codec negotiation, ffmpeg capture, upload state machine
//! - `geometry`: "contain" fit of the video inside its display container
//! - `ingest`: camera sources (synthetic, HTTP MJPEG/JPEG)
//! - `api`: backend REST client
//! - `schedule`: cancellable timer threads
//! - `config`: file + env configuration

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod overlay;
pub mod recording;
pub mod schedule;
pub mod session;

pub use api::{ApiError, BackendClient, RemoteState, SessionService, UploadReceipt};
pub use detect::{
    format_uptime, ActivityStatus, Alert, ClassificationPolicy, Classifier, DetectionBox,
    DetectionPoller, DetectionSnapshot, DetectionStatus, DetectionStore, FrameClassification,
    PollOutcome, PollSettings, RawDetection, Stats,
};
pub use geometry::{contain_rect, BoxPlacement, GeometryMapper, GeometryTrigger, VideoDisplayRect};
pub use ingest::{open_camera, CameraSource, CameraStream, CaptureConstraints, SyntheticCamera};
pub use overlay::{format_elapsed, OverlayRenderer};
pub use recording::{
    ActiveRecorder, FfmpegRecorder, MediaRecorder, RecorderSpec, RecordingBlob, RecordingError,
    RecordingMeta, RecordingPipeline, RecordingSettings, RecordingSink, RecordingState,
};
pub use schedule::{FirstFire, TaskControl, TaskHandle};
pub use session::{SessionController, SessionDeps, SessionError, SessionSettings, SessionState};
