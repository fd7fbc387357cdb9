//! Recording pipeline: overlay frames in, one uploaded recording out.
//!
//! `Idle -> Recording -> Stopping -> Uploading -> Uploaded | Error`. The terminal
//! outcome is kept until `acknowledge` returns the pipeline to `Idle`; a new
//! `start` also supersedes it.
//!
//! While recording, an overlay task composites camera frame + text + boxes at the
//! recorder's frame rate and feeds the capture. Chunks flushed by the capture are
//! accumulated in arrival order. `stop` ends the overlay task and hands the
//! session to a finalizer thread that assembles and uploads the chunks. The
//! capture is released when the finalizer is done with it, whatever the outcome.

pub mod codec;
pub mod ffmpeg;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use image::RgbImage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::api::UploadReceipt;
use crate::detect::DetectionStore;
use crate::ingest::CameraStream;
use crate::overlay::OverlayRenderer;
use crate::schedule::{FirstFire, TaskControl, TaskHandle};

pub use codec::{negotiate, NegotiatedCodec, CODEC_CANDIDATES};
pub use ffmpeg::{FfmpegRecorder, DEFAULT_FFMPEG};

pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_CHUNK_INTERVAL: Duration = Duration::from_secs(1);

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What a capture is asked to produce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecorderSpec {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub chunk_interval: Duration,
}

/// Encoder capability: reports supported media types and opens captures.
pub trait MediaRecorder: Send + Sync {
    fn is_type_supported(&self, mime_type: &str) -> bool;
    fn start(&self, spec: &RecorderSpec) -> Result<Box<dyn ActiveRecorder>>;
}

/// One running capture.
pub trait ActiveRecorder: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;
    /// Chunks flushed since the last call, oldest first.
    fn drain_chunks(&mut self) -> Vec<Vec<u8>>;
    /// Flush the encoder and return whatever chunks remain.
    fn finish(&mut self) -> Result<Vec<Vec<u8>>>;
    /// Release the capture. Idempotent.
    fn release(&mut self);
}

/// Assembled recording, tagged with the negotiated media type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub extension: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordingMeta {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Destination for finished recordings.
pub trait RecordingSink: Send + Sync {
    fn upload(&self, blob: &RecordingBlob, meta: &RecordingMeta) -> Result<UploadReceipt>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecordingState {
    Idle,
    Recording,
    Stopping,
    Uploading,
    Uploaded(UploadReceipt),
    Error(String),
}

impl RecordingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordingState::Uploaded(_) | RecordingState::Error(_))
    }
}

/// Reasons `start` refuses. Each leaves the pipeline as it was.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordingError {
    NotStreaming,
    AlreadyRecording,
    Finalizing,
    SurfaceNotReady,
    NoSupportedCodec,
    Capture(String),
}

impl std::fmt::Display for RecordingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingError::NotStreaming => write!(f, "camera is not streaming"),
            RecordingError::AlreadyRecording => write!(f, "already recording"),
            RecordingError::Finalizing => write!(f, "previous recording is still being finalized"),
            RecordingError::SurfaceNotReady => {
                write!(f, "video surface not ready; dimensions unknown")
            }
            RecordingError::NoSupportedCodec => write!(f, "no supported recording codec"),
            RecordingError::Capture(msg) => write!(f, "capture failed: {}", msg),
        }
    }
}

impl std::error::Error for RecordingError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordingSettings {
    pub fps: u32,
    pub chunk_interval: Duration,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            chunk_interval: DEFAULT_CHUNK_INTERVAL,
        }
    }
}

/// Releases the capture on drop.
struct CaptureGuard(Box<dyn ActiveRecorder>);

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

struct ActiveSession {
    started_at: DateTime<Utc>,
    started: Instant,
    codec: NegotiatedCodec,
    chunks: Vec<Vec<u8>>,
    capture: CaptureGuard,
    renderer: OverlayRenderer,
    stream: Arc<dyn CameraStream>,
    write_failures: u64,
}

enum Phase {
    Idle,
    Recording(ActiveSession),
    Stopping,
    Uploading,
    Uploaded(UploadReceipt),
    Error(String),
}

impl Phase {
    fn view(&self) -> RecordingState {
        match self {
            Phase::Idle => RecordingState::Idle,
            Phase::Recording(_) => RecordingState::Recording,
            Phase::Stopping => RecordingState::Stopping,
            Phase::Uploading => RecordingState::Uploading,
            Phase::Uploaded(receipt) => RecordingState::Uploaded(receipt.clone()),
            Phase::Error(msg) => RecordingState::Error(msg.clone()),
        }
    }
}

struct Shared {
    recorder: Arc<dyn MediaRecorder>,
    sink: Arc<dyn RecordingSink>,
    store: Arc<DetectionStore>,
    settings: RecordingSettings,
    phase: Mutex<Phase>,
}

impl Shared {
    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct RecordingPipeline {
    shared: Arc<Shared>,
    overlay: Mutex<Option<TaskHandle>>,
    finalizer: Mutex<Option<JoinHandle<()>>>,
}

impl RecordingPipeline {
    pub fn new(
        recorder: Arc<dyn MediaRecorder>,
        sink: Arc<dyn RecordingSink>,
        store: Arc<DetectionStore>,
        settings: RecordingSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                recorder,
                sink,
                store,
                settings,
                phase: Mutex::new(Phase::Idle),
            }),
            overlay: Mutex::new(None),
            finalizer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RecordingState {
        self.shared.phase().view()
    }

    pub fn is_recording(&self) -> bool {
        matches!(*self.shared.phase(), Phase::Recording(_))
    }

    /// Start instant of the active recording.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &*self.shared.phase() {
            Phase::Recording(session) => Some(session.started_at),
            _ => None,
        }
    }

    /// Begin recording `stream` at its native resolution.
    pub fn start(&self, stream: Arc<dyn CameraStream>) -> Result<(), RecordingError> {
        if !stream.is_live() {
            return Err(RecordingError::NotStreaming);
        }
        let mut phase = self.shared.phase();
        match &*phase {
            Phase::Recording(_) => return Err(RecordingError::AlreadyRecording),
            Phase::Stopping | Phase::Uploading => return Err(RecordingError::Finalizing),
            Phase::Uploaded(_) | Phase::Error(_) => {
                log::info!("previous recording outcome superseded by new recording");
            }
            Phase::Idle => {}
        }
        self.reap_finalizer();

        let (width, height) = stream
            .native_size()
            .filter(|(w, h)| *w > 0 && *h > 0)
            .ok_or(RecordingError::SurfaceNotReady)?;
        let codec = negotiate(|mime| self.shared.recorder.is_type_supported(mime))
            .ok_or(RecordingError::NoSupportedCodec)?;

        let started_at = Utc::now();
        let started = Instant::now();
        let fps = self.shared.settings.fps.max(1);
        let spec = RecorderSpec {
            mime_type: codec.mime_type.clone(),
            width,
            height,
            fps,
            chunk_interval: self.shared.settings.chunk_interval,
        };
        let capture = self
            .shared
            .recorder
            .start(&spec)
            .map_err(|err| RecordingError::Capture(format!("{:#}", err)))?;

        *phase = Phase::Recording(ActiveSession {
            started_at,
            started,
            codec,
            chunks: Vec::new(),
            capture: CaptureGuard(capture),
            renderer: OverlayRenderer::new(width, height),
            stream,
            write_failures: 0,
        });
        drop(phase);

        let shared = Arc::clone(&self.shared);
        let period = Duration::from_secs(1) / fps;
        match TaskHandle::every("overlay-draw", period, FirstFire::Immediate, move || {
            overlay_step(&shared)
        }) {
            Ok(task) => {
                *self.overlay.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
            }
            Err(err) => {
                *self.shared.phase() = Phase::Idle;
                return Err(RecordingError::Capture(format!("{:#}", err)));
            }
        }
        log::info!(
            "recording started: {}x{} @ {} fps, {}",
            width,
            height,
            fps,
            spec.mime_type
        );
        Ok(())
    }

    /// Stop recording and hand the session to the finalizer. No-op unless recording.
    pub fn stop(&self) {
        let session = {
            let mut phase = self.shared.phase();
            match std::mem::replace(&mut *phase, Phase::Stopping) {
                Phase::Recording(session) => session,
                other => {
                    *phase = other;
                    return;
                }
            }
        };
        if let Some(mut task) = self
            .overlay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.cancel();
        }
        let ended_at = Utc::now();
        log::info!(
            "recording stopped after {:.1}s; finalizing",
            session.started.elapsed().as_secs_f64()
        );

        let slot = Arc::new(Mutex::new(Some(session)));
        let shared = Arc::clone(&self.shared);
        let worker_slot = Arc::clone(&slot);
        let spawned = std::thread::Builder::new()
            .name("recording-finalizer".to_string())
            .spawn(move || {
                let taken = worker_slot
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(session) = taken {
                    finalize(&shared, session, ended_at);
                }
            });
        match spawned {
            Ok(join) => {
                self.reap_finalizer();
                *self.finalizer.lock().unwrap_or_else(PoisonError::into_inner) = Some(join);
            }
            Err(err) => {
                log::warn!("finalizer spawn failed ({}); finalizing inline", err);
                let taken = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(session) = taken {
                    finalize(&self.shared, session, ended_at);
                }
            }
        }
    }

    /// Block until the last finalizer has reached a terminal state.
    pub fn wait_finalized(&self) {
        self.reap_finalizer();
    }

    /// Take a terminal outcome and return to `Idle`. `None` when not terminal.
    pub fn acknowledge(&self) -> Option<RecordingState> {
        let mut phase = self.shared.phase();
        match &*phase {
            Phase::Uploaded(_) | Phase::Error(_) => {
                let outcome = phase.view();
                *phase = Phase::Idle;
                Some(outcome)
            }
            _ => None,
        }
    }

    fn reap_finalizer(&self) {
        let join = self
            .finalizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            if join.join().is_err() {
                log::error!("recording finalizer panicked");
            }
        }
    }
}

impl Drop for RecordingPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn overlay_step(shared: &Shared) -> TaskControl {
    let (renderer, stream, started) = match &*shared.phase() {
        Phase::Recording(session) => (
            session.renderer.clone(),
            Arc::clone(&session.stream),
            session.started,
        ),
        _ => return TaskControl::Stop,
    };

    let snapshot = shared.store.snapshot();
    let frame = stream.current_frame();
    let wall_clock = Local::now().format(TIMESTAMP_FORMAT).to_string();
    let canvas = renderer.compose(frame.as_deref(), &snapshot, &wall_clock, started.elapsed());

    let mut phase = shared.phase();
    let Phase::Recording(session) = &mut *phase else {
        return TaskControl::Stop;
    };
    if let Err(err) = session.capture.0.write_frame(&canvas) {
        if session.write_failures == 0 {
            log::warn!("recording frame write failed: {:#}", err);
        }
        session.write_failures += 1;
    }
    let flushed = session.capture.0.drain_chunks();
    session.chunks.extend(flushed);
    TaskControl::Continue
}

fn finalize(shared: &Shared, session: ActiveSession, ended_at: DateTime<Utc>) {
    let ActiveSession {
        started_at,
        codec,
        mut chunks,
        mut capture,
        write_failures,
        ..
    } = session;
    if write_failures > 0 {
        log::warn!("{} recording frames were dropped", write_failures);
    }
    match capture.0.finish() {
        Ok(tail) => chunks.extend(tail),
        Err(err) => log::warn!("recorder finalize failed: {:#}", err),
    }

    let outcome = if chunks.is_empty() {
        log::warn!("recording produced no data; nothing uploaded");
        Phase::Error("recording produced no data".to_string())
    } else {
        let blob = RecordingBlob {
            bytes: chunks.concat(),
            mime_type: codec.mime_type.clone(),
            extension: codec.extension,
        };
        let meta = RecordingMeta {
            started_at,
            ended_at,
        };
        *shared.phase() = Phase::Uploading;
        log::info!(
            "uploading recording: {} chunks, {} bytes",
            chunks.len(),
            blob.bytes.len()
        );
        match shared.sink.upload(&blob, &meta) {
            Ok(receipt) => {
                log::info!("recording uploaded as {}", receipt.filename);
                Phase::Uploaded(receipt)
            }
            Err(err) => {
                log::warn!("recording upload failed: {:#}", err);
                Phase::Error(format!("{:#}", err))
            }
        }
    };
    drop(capture);
    *shared.phase() = outcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_read_as_user_messages() {
        assert_eq!(
            RecordingError::NoSupportedCodec.to_string(),
            "no supported recording codec"
        );
        assert_eq!(
            RecordingError::Capture("ffmpeg missing".into()).to_string(),
            "capture failed: ffmpeg missing"
        );
    }

    #[test]
    fn terminal_states() {
        assert!(RecordingState::Error("x".into()).is_terminal());
        assert!(!RecordingState::Stopping.is_terminal());
        assert!(!RecordingState::Idle.is_terminal());
    }
}
