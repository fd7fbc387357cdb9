mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use cctv_monitor::{
    ActivityStatus, Alert, RawDetection, RecordingState, SessionController, SessionDeps,
    SessionError, SessionSettings, SessionState, Stats,
};

use common::{wait_until, FakeCamera, FakeClassifier, FakeRecorder, FakeServices, FakeSink};

struct Rig {
    camera: Arc<FakeCamera>,
    services: Arc<FakeServices>,
    classifier: Arc<FakeClassifier>,
    recorder: Arc<FakeRecorder>,
    sink: Arc<FakeSink>,
}

impl Rig {
    fn new(camera: Arc<FakeCamera>) -> Self {
        Self {
            camera,
            services: Arc::new(FakeServices::default()),
            classifier: FakeClassifier::returning(vec![RawDetection::new(
                30.0, 30.0, 10.0, 20.0, 90.0,
            )]),
            recorder: FakeRecorder::webm(1),
            sink: Arc::new(FakeSink::default()),
        }
    }

    fn controller(&self, settings: SessionSettings) -> SessionController {
        SessionController::new(
            SessionDeps {
                camera: self.camera.clone(),
                services: self.services.clone(),
                classifier: self.classifier.clone(),
                recorder: self.recorder.clone(),
                sink: self.sink.clone(),
            },
            settings,
        )
    }
}

fn fast_settings(auto_record: bool) -> SessionSettings {
    let mut settings = SessionSettings {
        detection_interval: Duration::from_millis(20),
        state_interval: Duration::from_millis(20),
        auto_record,
        warmup: Duration::from_millis(30),
        geometry_poll_interval: Duration::from_millis(5),
        ..SessionSettings::default()
    };
    settings.recording.fps = 50;
    settings
}

#[test]
fn double_stop_releases_camera_once() {
    let rig = Rig::new(FakeCamera::new(Some((640, 480))));
    let controller = rig.controller(fast_settings(false));

    controller.start().expect("start");
    assert_eq!(controller.state(), SessionState::Streaming);
    assert_eq!(rig.services.starts.load(Ordering::SeqCst), 1);

    controller.stop();
    controller.stop();

    assert_eq!(controller.state(), SessionState::Idle);
    let stream = rig.camera.last_stream();
    assert_eq!(stream.releases(), 1);
    assert_eq!(rig.services.stops.load(Ordering::SeqCst), 1);
    assert!(controller.store().snapshot().boxes.is_empty());
}

#[test]
fn stop_before_start_is_harmless() {
    let rig = Rig::new(FakeCamera::new(Some((640, 480))));
    let controller = rig.controller(fast_settings(false));
    controller.stop();
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(rig.services.stops.load(Ordering::SeqCst), 0);
}

#[test]
fn camera_failure_leaves_session_idle() {
    let rig = Rig::new(FakeCamera::failing());
    let controller = rig.controller(fast_settings(true));

    let err = controller.start().unwrap_err();
    assert!(matches!(err, SessionError::Camera(ref msg) if msg.contains("permission denied")));
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(rig.services.starts.load(Ordering::SeqCst), 0);

    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(rig.classifier.calls.load(Ordering::SeqCst), 0);
    assert_eq!(rig.services.state_polls.load(Ordering::SeqCst), 0);
    assert_eq!(rig.recorder.log.starts.load(Ordering::SeqCst), 0);
}

#[test]
fn stop_while_starting_releases_camera_once() {
    let (camera, entered, open) = FakeCamera::gated(Some((640, 480)));
    let rig = Rig::new(camera);
    let controller = Arc::new(rig.controller(fast_settings(true)));

    let starter = {
        let controller = Arc::clone(&controller);
        std::thread::spawn(move || controller.start())
    };
    entered.recv().expect("acquire entered");
    assert_eq!(controller.state(), SessionState::Starting);
    controller.stop();
    open.send(()).expect("open gate");

    assert_eq!(starter.join().expect("join"), Err(SessionError::Cancelled));
    controller.stop();

    assert_eq!(controller.state(), SessionState::Idle);
    let stream = rig.camera.last_stream();
    assert_eq!(stream.releases(), 1);
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(rig.recorder.log.starts.load(Ordering::SeqCst), 0);
    assert_eq!(rig.classifier.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn second_start_is_refused_while_streaming() {
    let rig = Rig::new(FakeCamera::new(Some((640, 480))));
    let controller = rig.controller(fast_settings(false));
    controller.start().expect("start");
    assert_eq!(controller.start(), Err(SessionError::AlreadyActive));
    assert_eq!(rig.camera.acquisitions.load(Ordering::SeqCst), 1);
    controller.stop();
}

#[test]
fn notification_failures_are_not_fatal() {
    let mut rig = Rig::new(FakeCamera::new(Some((640, 480))));
    rig.services = FakeServices::failing();
    let controller = rig.controller(fast_settings(false));

    controller.start().expect("start despite backend");
    assert!(wait_until(|| rig.classifier.calls.load(Ordering::SeqCst) > 0));
    controller.stop();
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(rig.camera.last_stream().releases(), 1);
}

#[test]
fn polling_fills_store_and_clear_history_keeps_stream() {
    let mut rig = Rig::new(FakeCamera::new(Some((640, 480))));
    rig.classifier = FakeClassifier::scripted(vec![
        (
            Duration::ZERO,
            Ok(vec![RawDetection::new(30.0, 30.0, 10.0, 20.0, 90.0)]),
        ),
        (Duration::ZERO, Ok(Vec::new())),
    ]);
    let controller = rig.controller(fast_settings(false));
    controller.start().expect("start");

    assert!(wait_until(|| controller.store().stats().total_detections > 0));
    assert_eq!(controller.store().stats().normal_count, 1);
    // Later polls see an empty frame and add nothing.
    assert!(wait_until(|| rig.classifier.calls.load(Ordering::SeqCst) >= 3));
    assert!(wait_until(
        || controller.store().activity() == ActivityStatus::Idle
    ));

    controller.clear_history();
    let stats = controller.store().stats();
    assert_eq!(
        Stats {
            uptime: 0,
            ..stats
        },
        Stats::default()
    );
    assert!(controller.store().alerts().is_empty());
    assert!(controller.is_streaming());
    assert_eq!(rig.camera.last_stream().releases(), 0);

    controller.stop();
}

#[test]
fn reset_stops_and_clears() {
    let rig = Rig::new(FakeCamera::new(Some((640, 480))));
    let controller = rig.controller(fast_settings(false));
    controller.start().expect("start");
    assert!(wait_until(|| controller.store().stats().total_detections > 0));

    controller.reset();

    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(controller.store().stats(), Stats::default());
    assert_eq!(rig.services.resets.load(Ordering::SeqCst), 1);
    assert_eq!(rig.camera.last_stream().releases(), 1);
}

#[test]
fn state_feed_merges_alerts_and_uptime() {
    let rig = Rig::new(FakeCamera::new(Some((640, 480))));
    *rig.services.state.lock().unwrap() = Some((
        vec![Alert {
            id: 7,
            message: "Suspicious activity detected".to_string(),
            time: "12:00:00".to_string(),
            confidence: 88.0,
        }],
        42.9,
    ));
    let controller = rig.controller(fast_settings(false));
    controller.start().expect("start");

    assert!(wait_until(|| controller.store().stats().uptime == 42));
    assert!(controller.store().alerts().iter().any(|a| a.id == 7));
    assert!(controller.dismiss_alert(7));
    controller.stop();
}

#[test]
fn auto_record_runs_after_warmup_and_uploads_on_stop() {
    let rig = Rig::new(FakeCamera::new(Some((640, 480))));
    let controller = rig.controller(fast_settings(true));
    controller.start().expect("start");

    assert!(wait_until(|| controller.recording().is_recording()));
    assert!(wait_until(|| rig.recorder.log.frames.load(Ordering::SeqCst) >= 3));
    controller.stop();
    controller.recording().wait_finalized();

    assert!(matches!(
        controller.recording().state(),
        RecordingState::Uploaded(_)
    ));
    assert_eq!(rig.sink.upload_count(), 1);
    assert_eq!(rig.recorder.log.releases.load(Ordering::SeqCst), 1);
    assert_eq!(rig.camera.last_stream().releases(), 1);
}

#[test]
fn stop_during_warmup_never_records() {
    let rig = Rig::new(FakeCamera::new(Some((640, 480))));
    let mut settings = fast_settings(true);
    settings.warmup = Duration::from_secs(30);
    let controller = rig.controller(settings);

    controller.start().expect("start");
    controller.stop();

    assert_eq!(rig.recorder.log.starts.load(Ordering::SeqCst), 0);
    assert_eq!(controller.recording().state(), RecordingState::Idle);
}

#[test]
fn manual_recording_requires_streaming() {
    let rig = Rig::new(FakeCamera::new(Some((640, 480))));
    let controller = rig.controller(fast_settings(false));
    assert_eq!(controller.start_recording(), Err(SessionError::NotStreaming));

    controller.start().expect("start");
    controller.start_recording().expect("record");
    assert!(controller.recording().is_recording());
    controller.stop_recording();
    controller.recording().wait_finalized();
    assert_eq!(rig.sink.upload_count(), 1);
    controller.stop();
}

#[test]
fn drop_tears_down_everything() {
    let rig = Rig::new(FakeCamera::new(Some((640, 480))));
    let controller = rig.controller(fast_settings(true));
    controller.start().expect("start");
    assert!(wait_until(|| controller.recording().is_recording()));

    drop(controller);

    assert_eq!(rig.camera.last_stream().releases(), 1);
    assert!(wait_until(
        || rig.recorder.log.releases.load(Ordering::SeqCst) == 1
    ));
    std::thread::sleep(Duration::from_millis(30));
    let calls = rig.classifier.calls.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(rig.classifier.calls.load(Ordering::SeqCst), calls);
}

#[test]
fn geometry_follows_video_and_resize() {
    let rig = Rig::new(FakeCamera::new(Some((1280, 720))));
    let controller = rig.controller(fast_settings(false));
    controller.start().expect("start");

    assert!(wait_until(|| controller.geometry().current().is_some()));
    let rect = controller.geometry().current().unwrap();
    assert!(rect.offset_x.abs() < 1e-9);
    assert!((rect.offset_y - 60.0).abs() < 1e-6);

    let resized = controller.resize_display(1000.0, 400.0).expect("rect");
    assert!((resized.height - 400.0).abs() < 1e-6);
    assert!(resized.offset_x > 0.0);

    controller.stop();
    assert!(controller.geometry().current().is_none());
}

#[test]
fn cleared_alerts_stay_cleared_while_backend_still_holds_them() {
    let rig = Rig::new(FakeCamera::new(Some((640, 480))));
    *rig.services.state.lock().unwrap() = Some((
        vec![Alert {
            id: 7,
            message: "Suspicious activity detected".to_string(),
            time: "12:00:00".to_string(),
            confidence: 88.0,
        }],
        5.0,
    ));
    let controller = rig.controller(fast_settings(false));
    controller.start().expect("start");
    assert!(wait_until(|| !controller.store().alerts().is_empty()));

    controller.clear_history();
    let polls = rig.services.state_polls.load(Ordering::SeqCst);
    assert!(wait_until(
        || rig.services.state_polls.load(Ordering::SeqCst) >= polls + 3
    ));
    assert!(controller.store().alerts().is_empty());
    assert!(controller.is_streaming());

    controller.stop();
}

#[test]
fn late_video_size_still_yields_display_rect() {
    let rig = Rig::new(FakeCamera::slow_metadata(
        (1280, 720),
        Duration::from_millis(150),
    ));
    let mut settings = fast_settings(false);
    settings.geometry_poll_attempts = 5;
    let controller = rig.controller(settings);
    controller.start().expect("start");
    assert!(controller.geometry().current().is_none());

    assert!(wait_until(|| controller.geometry().current().is_some()));
    let rect = controller.geometry().current().unwrap();
    assert!((rect.offset_y - 60.0).abs() < 1e-6);

    controller.stop();
}
