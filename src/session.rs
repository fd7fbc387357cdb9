//! Session lifecycle: `Idle -> Starting -> Streaming -> Idle`.
//!
//! `start` acquires the camera, then runs detection polling, state polling, the
//! geometry dimension probe and (optionally) a warm-up auto-record, each as its
//! own `TaskHandle`. Everything a live session owns sits in one `LiveSession`
//! value and is torn down in one place, whether the session ends through
//! `stop`, `reset` or drop.
//!
//! `stop` may race a `start` that is still acquiring the camera. The start
//! attempt re-checks its attempt number before going live and releases the
//! camera itself if the session was stopped meanwhile, so the device is
//! released exactly once either way.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::api::SessionService;
use crate::detect::{
    Classifier, DetectionPoller, DetectionStore, PollSettings, DEFAULT_ALERT_CAPACITY,
};
use crate::geometry::{GeometryMapper, GeometryTrigger, VideoDisplayRect};
use crate::ingest::{CameraSource, CameraStream, CaptureConstraints};
use crate::recording::{
    MediaRecorder, RecordingError, RecordingPipeline, RecordingSettings, RecordingSink,
};
use crate::schedule::{FirstFire, TaskControl, TaskHandle};

pub const DEFAULT_DETECTION_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_STATE_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_WARMUP: Duration = Duration::from_millis(500);
pub const GEOMETRY_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Probes before a camera that has not reported its size is logged as slow.
pub const GEOMETRY_POLL_ATTEMPTS: u32 = 50;

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub constraints: CaptureConstraints,
    pub detection_interval: Duration,
    pub state_interval: Duration,
    pub auto_record: bool,
    pub warmup: Duration,
    pub poll: PollSettings,
    pub recording: RecordingSettings,
    pub alert_capacity: usize,
    /// Display container size, in pixels.
    pub display: (f64, f64),
    pub geometry_poll_interval: Duration,
    /// The probe keeps running until the size is known; this only sets when it warns.
    pub geometry_poll_attempts: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            constraints: CaptureConstraints::default(),
            detection_interval: DEFAULT_DETECTION_INTERVAL,
            state_interval: DEFAULT_STATE_INTERVAL,
            auto_record: true,
            warmup: DEFAULT_WARMUP,
            poll: PollSettings::default(),
            recording: RecordingSettings::default(),
            alert_capacity: DEFAULT_ALERT_CAPACITY,
            display: (640.0, 480.0),
            geometry_poll_interval: GEOMETRY_POLL_INTERVAL,
            geometry_poll_attempts: GEOMETRY_POLL_ATTEMPTS,
        }
    }
}

/// External collaborators of a session.
pub struct SessionDeps {
    pub camera: Arc<dyn CameraSource>,
    pub services: Arc<dyn SessionService>,
    pub classifier: Arc<dyn Classifier>,
    pub recorder: Arc<dyn MediaRecorder>,
    pub sink: Arc<dyn RecordingSink>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionError {
    /// A session is already starting or streaming.
    AlreadyActive,
    /// Camera acquisition failed; nothing was started.
    Camera(String),
    /// `stop` was called while the camera was being acquired.
    Cancelled,
    NotStreaming,
    Recording(RecordingError),
    /// A session task could not be spawned.
    Task(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::AlreadyActive => write!(f, "session already active"),
            SessionError::Camera(msg) => write!(f, "unable to access camera: {}", msg),
            SessionError::Cancelled => write!(f, "session start cancelled by stop"),
            SessionError::NotStreaming => write!(f, "camera is not streaming"),
            SessionError::Recording(err) => write!(f, "recording: {}", err),
            SessionError::Task(msg) => write!(f, "session task failed to start: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<RecordingError> for SessionError {
    fn from(err: RecordingError) -> Self {
        SessionError::Recording(err)
    }
}

struct LiveSession {
    stream: Arc<dyn CameraStream>,
    detection: TaskHandle,
    state_poll: TaskHandle,
    geometry_poll: TaskHandle,
    warmup: Option<TaskHandle>,
}

enum Phase {
    Idle,
    Starting { attempt: u64 },
    Streaming(Box<LiveSession>),
}

pub struct SessionController {
    camera: Arc<dyn CameraSource>,
    services: Arc<dyn SessionService>,
    store: Arc<DetectionStore>,
    poller: Arc<DetectionPoller>,
    recording: Arc<RecordingPipeline>,
    geometry: Arc<GeometryMapper>,
    settings: SessionSettings,
    phase: Mutex<Phase>,
    attempts: AtomicU64,
}

impl SessionController {
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> Self {
        let store = Arc::new(DetectionStore::new(settings.alert_capacity));
        let poller = Arc::new(DetectionPoller::new(
            deps.classifier,
            Arc::clone(&store),
            settings.poll,
        ));
        let recording = Arc::new(RecordingPipeline::new(
            deps.recorder,
            deps.sink,
            Arc::clone(&store),
            settings.recording,
        ));
        let (width, height) = settings.display;
        Self {
            camera: deps.camera,
            services: deps.services,
            store,
            poller,
            recording,
            geometry: Arc::new(GeometryMapper::new(width, height)),
            settings,
            phase: Mutex::new(Phase::Idle),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<DetectionStore> {
        &self.store
    }

    pub fn recording(&self) -> &Arc<RecordingPipeline> {
        &self.recording
    }

    pub fn geometry(&self) -> &Arc<GeometryMapper> {
        &self.geometry
    }

    pub fn state(&self) -> SessionState {
        match &*self.phase() {
            Phase::Idle => SessionState::Idle,
            Phase::Starting { .. } => SessionState::Starting,
            Phase::Streaming(_) => SessionState::Streaming,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    pub fn stream(&self) -> Option<Arc<dyn CameraStream>> {
        match &*self.phase() {
            Phase::Streaming(live) => Some(Arc::clone(&live.stream)),
            _ => None,
        }
    }

    pub fn start(&self) -> Result<(), SessionError> {
        let attempt = {
            let mut phase = self.phase();
            if !matches!(*phase, Phase::Idle) {
                return Err(SessionError::AlreadyActive);
            }
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            *phase = Phase::Starting { attempt };
            attempt
        };

        let stream = match self.camera.acquire(&self.settings.constraints) {
            Ok(stream) => stream,
            Err(err) => {
                let mut phase = self.phase();
                if matches!(*phase, Phase::Starting { attempt: a } if a == attempt) {
                    *phase = Phase::Idle;
                }
                log::warn!("camera access failed: {:#}", err);
                return Err(SessionError::Camera(format!("{:#}", err)));
            }
        };
        log::info!("camera {} acquired", stream.label());

        if let Err(err) = self.services.start_session() {
            log::warn!("session start notification failed: {:#}", err);
        }

        let mut phase = self.phase();
        if !matches!(*phase, Phase::Starting { attempt: a } if a == attempt) {
            drop(phase);
            stream.stop_tracks();
            if let Err(err) = self.services.stop_session() {
                log::warn!("session stop notification failed: {:#}", err);
            }
            log::info!("session start #{} cancelled; camera released", attempt);
            return Err(SessionError::Cancelled);
        }

        match self.spawn_tasks(&stream) {
            Ok(live) => {
                self.geometry
                    .recompute(GeometryTrigger::PlaybackStarted, stream.native_size());
                *phase = Phase::Streaming(Box::new(live));
                log::info!("session #{} streaming", attempt);
                Ok(())
            }
            Err(err) => {
                *phase = Phase::Idle;
                drop(phase);
                stream.stop_tracks();
                log::warn!("session start failed: {:#}", err);
                Err(SessionError::Task(format!("{:#}", err)))
            }
        }
    }

    /// End the session. Idempotent; safe while `start` is still acquiring the camera.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.phase(), Phase::Idle);
        match previous {
            Phase::Idle => {
                log::debug!("stop: session already idle");
            }
            Phase::Starting { attempt } => {
                log::info!("stop requested while session #{} is starting", attempt);
                self.store.clear_detections();
            }
            Phase::Streaming(live) => self.teardown(*live),
        }
    }

    /// Stop, then clear alerts and stats locally and on the backend.
    pub fn reset(&self) {
        self.stop();
        self.clear_history();
        if let Err(err) = self.services.reset_session() {
            log::warn!("session reset notification failed: {:#}", err);
        }
    }

    /// Clear alerts and stats without touching the camera or the timers.
    /// Alerts the backend raised before the clear stay cleared.
    pub fn clear_history(&self) {
        self.store.reset();
        log::info!("alerts and stats cleared");
    }

    pub fn dismiss_alert(&self, id: u64) -> bool {
        self.store.dismiss_alert(id)
    }

    pub fn start_recording(&self) -> Result<(), SessionError> {
        let stream = self.stream().ok_or(SessionError::NotStreaming)?;
        self.recording.start(stream)?;
        Ok(())
    }

    pub fn stop_recording(&self) {
        self.recording.stop();
    }

    /// Container resized; recompute the letterboxed video rect.
    pub fn resize_display(&self, width: f64, height: f64) -> Option<VideoDisplayRect> {
        self.refresh_geometry(GeometryTrigger::WindowResized { width, height })
    }

    pub fn refresh_geometry(&self, trigger: GeometryTrigger) -> Option<VideoDisplayRect> {
        let native = self.stream().and_then(|stream| stream.native_size());
        self.geometry.recompute(trigger, native)
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_tasks(&self, stream: &Arc<dyn CameraStream>) -> anyhow::Result<LiveSession> {
        let poller = Arc::clone(&self.poller);
        let frames = Arc::clone(stream);
        let detection = TaskHandle::every(
            "detection-poll",
            self.settings.detection_interval,
            FirstFire::AfterPeriod,
            move || {
                poller.dispatch(Arc::clone(&frames));
                TaskControl::Continue
            },
        )?;

        let services = Arc::clone(&self.services);
        let store = Arc::clone(&self.store);
        let state_poll = TaskHandle::every(
            "state-poll",
            self.settings.state_interval,
            FirstFire::Immediate,
            move || {
                match services.fetch_state() {
                    Ok(state) => {
                        let uptime = state.uptime_secs();
                        store.merge_remote(state.alerts, uptime);
                    }
                    Err(err) => log::warn!("state poll failed: {:#}", err),
                }
                TaskControl::Continue
            },
        )?;

        let geometry = Arc::clone(&self.geometry);
        let probe = Arc::clone(stream);
        let warn_after = self.settings.geometry_poll_attempts.max(1);
        let mut attempts: u32 = 0;
        let geometry_poll = TaskHandle::every(
            "geometry-poll",
            self.settings.geometry_poll_interval,
            FirstFire::Immediate,
            move || {
                attempts = attempts.saturating_add(1);
                if let Some(native) = probe.native_size() {
                    let trigger = if attempts > warn_after {
                        GeometryTrigger::MetadataLoaded
                    } else {
                        GeometryTrigger::DimensionPoll
                    };
                    geometry.recompute(trigger, Some(native));
                    return TaskControl::Stop;
                }
                if attempts == warn_after {
                    log::warn!(
                        "video dimensions unknown after {} probes; still waiting",
                        attempts
                    );
                }
                TaskControl::Continue
            },
        )?;

        let warmup = if self.settings.auto_record {
            let recording = Arc::clone(&self.recording);
            let target = Arc::clone(stream);
            Some(TaskHandle::after(
                "auto-record",
                self.settings.warmup,
                move || {
                    if let Err(err) = recording.start(target) {
                        log::warn!("auto-record did not start: {}", err);
                    }
                },
            )?)
        } else {
            None
        };

        Ok(LiveSession {
            stream: Arc::clone(stream),
            detection,
            state_poll,
            geometry_poll,
            warmup,
        })
    }

    fn teardown(&self, live: LiveSession) {
        let LiveSession {
            stream,
            mut detection,
            mut state_poll,
            mut geometry_poll,
            warmup,
        } = live;
        // A pending auto-record must not fire after the recording is stopped.
        if let Some(mut warmup) = warmup {
            warmup.cancel();
        }
        self.recording.stop();
        detection.cancel();
        state_poll.cancel();
        geometry_poll.cancel();
        stream.stop_tracks();
        self.geometry.detach();
        if let Err(err) = self.services.stop_session() {
            log::warn!("session stop notification failed: {:#}", err);
        }
        self.store.clear_detections();
        log::info!("session stopped; camera {} released", stream.label());
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}
