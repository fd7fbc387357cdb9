use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use cctv_monitor::config::MonitorConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CCTV_CONFIG",
        "CCTV_API_BASE_URL",
        "CCTV_CAMERA_URL",
        "CCTV_AUTO_RECORD",
        "CCTV_ALERT_CAPACITY",
        "CCTV_FFMPEG_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api": { "base_url": "http://backend.local:9000", "timeout_ms": 2500 },
        "camera": { "url": "http://cam-1/stream", "ideal_width": 1920, "ideal_height": 1080 },
        "display": { "width": 800, "height": 450 },
        "detection": { "interval_ms": 750, "confidence_threshold": 0.6, "jpeg_quality": 70, "max_in_flight": 2 },
        "state": { "interval_ms": 3000 },
        "recording": { "auto_start": false, "warmup_ms": 800, "fps": 25, "chunk_ms": 2000 },
        "alerts": { "capacity": 5 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("CCTV_CONFIG", file.path());
    std::env::set_var("CCTV_CAMERA_URL", "stub://lobby");
    std::env::set_var("CCTV_FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.api.base_url, "http://backend.local:9000");
    assert_eq!(cfg.api.timeout, Duration::from_millis(2500));
    assert_eq!(cfg.camera.url, "stub://lobby");
    assert_eq!((cfg.camera.ideal_width, cfg.camera.ideal_height), (1920, 1080));
    assert_eq!(cfg.display, (800.0, 450.0));
    assert_eq!(cfg.detection.interval, Duration::from_millis(750));
    assert_eq!(cfg.detection.confidence_threshold, 0.6);
    assert_eq!(cfg.detection.jpeg_quality, 70);
    assert_eq!(cfg.detection.max_in_flight, 2);
    assert_eq!(cfg.state_interval, Duration::from_secs(3));
    assert!(!cfg.recording.auto_start);
    assert_eq!(cfg.recording.warmup, Duration::from_millis(800));
    assert_eq!(cfg.recording.fps, 25);
    assert_eq!(cfg.recording.chunk_interval, Duration::from_secs(2));
    assert_eq!(cfg.recording.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
    assert_eq!(cfg.alert_capacity, 5);

    let session = cfg.session_settings();
    assert_eq!(session.detection_interval, Duration::from_millis(750));
    assert_eq!(session.alert_capacity, 5);
    assert_eq!(session.recording.fps, 25);
    assert!(!session.auto_record);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
[api]
base_url = "http://10.0.0.5:8000"

[detection]
interval_ms = 400
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("CCTV_CONFIG", file.path());

    let cfg = MonitorConfig::load().expect("load config");
    assert_eq!(cfg.api.base_url, "http://10.0.0.5:8000");
    assert_eq!(cfg.detection.interval, Duration::from_millis(400));
    assert_eq!(cfg.detection.confidence_threshold, 0.5);
    assert_eq!(cfg.state_interval, Duration::from_secs(2));

    clear_env();
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MonitorConfig::load().expect("load config");
    assert_eq!(cfg.api.base_url, "http://127.0.0.1:8000");
    assert_eq!(cfg.camera.url, "stub://front_camera");
    assert_eq!(cfg.recording.warmup, Duration::from_millis(500));
    assert!(cfg.recording.auto_start);
}

#[test]
fn rejects_bad_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CCTV_AUTO_RECORD", "sometimes");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("CCTV_ALERT_CAPACITY", "0");
    let err = MonitorConfig::load().unwrap_err();
    assert!(err.to_string().contains("capacity"));
    clear_env();

    std::env::set_var("CCTV_AUTO_RECORD", "off");
    let cfg = MonitorConfig::load().expect("load config");
    assert!(!cfg.recording.auto_start);
    clear_env();
}

#[test]
fn rejects_invalid_file_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"detection": {"jpeg_quality": 0}}"#)
        .expect("write config");
    std::env::set_var("CCTV_CONFIG", file.path());
    assert!(MonitorConfig::load().is_err());

    std::env::set_var("CCTV_CONFIG", "/nonexistent/cctv.json");
    let err = MonitorConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
