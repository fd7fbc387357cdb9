use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::DEFAULT_BASE_URL;
use crate::detect::{
    PollSettings, DEFAULT_ALERT_CAPACITY, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_JPEG_QUALITY,
    DEFAULT_MAX_IN_FLIGHT,
};
use crate::ingest::CaptureConstraints;
use crate::recording::{RecordingSettings, DEFAULT_CHUNK_INTERVAL, DEFAULT_FFMPEG, DEFAULT_FPS};
use crate::session::{
    SessionSettings, DEFAULT_DETECTION_INTERVAL, DEFAULT_STATE_INTERVAL, DEFAULT_WARMUP,
};

const DEFAULT_API_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CAMERA_URL: &str = "stub://front_camera";
const DEFAULT_DISPLAY_WIDTH: f64 = 640.0;
const DEFAULT_DISPLAY_HEIGHT: f64 = 480.0;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    display: Option<DisplayConfigFile>,
    detection: Option<DetectionConfigFile>,
    state: Option<StateConfigFile>,
    recording: Option<RecordingConfigFile>,
    alerts: Option<AlertsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    ideal_width: Option<u32>,
    ideal_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<f64>,
    height: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    interval_ms: Option<u64>,
    confidence_threshold: Option<f32>,
    jpeg_quality: Option<u8>,
    max_in_flight: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StateConfigFile {
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    auto_start: Option<bool>,
    warmup_ms: Option<u64>,
    fps: Option<u32>,
    chunk_ms: Option<u64>,
    ffmpeg_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    capacity: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub api: ApiSettings,
    pub camera: CameraSettings,
    /// Size of the on-screen container the video is letterboxed into.
    pub display: (f64, f64),
    pub detection: DetectionSettings,
    pub state_interval: Duration,
    pub recording: RecordingConfig,
    pub alert_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub interval: Duration,
    pub confidence_threshold: f32,
    pub jpeg_quality: u8,
    pub max_in_flight: usize,
}

#[derive(Debug, Clone)]
pub struct RecordingConfig {
    pub auto_start: bool,
    pub warmup: Duration,
    pub fps: u32,
    pub chunk_interval: Duration,
    pub ffmpeg_path: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        // Defaults cannot fail to build.
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CCTV_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let display = file.display.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let state = file.state.unwrap_or_default();
        let recording = file.recording.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let constraints = CaptureConstraints::default();
        Self {
            api: ApiSettings {
                base_url: api.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                timeout: Duration::from_millis(api.timeout_ms.unwrap_or(DEFAULT_API_TIMEOUT_MS)),
            },
            camera: CameraSettings {
                url: camera.url.unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
                ideal_width: camera.ideal_width.unwrap_or(constraints.ideal_width),
                ideal_height: camera.ideal_height.unwrap_or(constraints.ideal_height),
            },
            display: (
                display.width.unwrap_or(DEFAULT_DISPLAY_WIDTH),
                display.height.unwrap_or(DEFAULT_DISPLAY_HEIGHT),
            ),
            detection: DetectionSettings {
                interval: detection
                    .interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_DETECTION_INTERVAL),
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                jpeg_quality: detection.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                max_in_flight: detection.max_in_flight.unwrap_or(DEFAULT_MAX_IN_FLIGHT),
            },
            state_interval: state
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_STATE_INTERVAL),
            recording: RecordingConfig {
                auto_start: recording.auto_start.unwrap_or(true),
                warmup: recording
                    .warmup_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_WARMUP),
                fps: recording.fps.unwrap_or(DEFAULT_FPS),
                chunk_interval: recording
                    .chunk_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_CHUNK_INTERVAL),
                ffmpeg_path: recording
                    .ffmpeg_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG)),
            },
            alert_capacity: alerts.capacity.unwrap_or(DEFAULT_ALERT_CAPACITY),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("CCTV_API_BASE_URL") {
            if !url.trim().is_empty() {
                self.api.base_url = url;
            }
        }
        if let Ok(url) = std::env::var("CCTV_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(flag) = std::env::var("CCTV_AUTO_RECORD") {
            self.recording.auto_start = parse_bool(&flag)
                .ok_or_else(|| anyhow!("CCTV_AUTO_RECORD must be true/false, got '{}'", flag))?;
        }
        if let Ok(capacity) = std::env::var("CCTV_ALERT_CAPACITY") {
            self.alert_capacity = capacity
                .trim()
                .parse()
                .map_err(|_| anyhow!("CCTV_ALERT_CAPACITY must be a positive integer"))?;
        }
        if let Ok(path) = std::env::var("CCTV_FFMPEG_PATH") {
            if !path.trim().is_empty() {
                self.recording.ffmpeg_path = PathBuf::from(path);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(anyhow!("api.base_url must not be empty"));
        }
        if self.api.timeout.is_zero() {
            return Err(anyhow!("api.timeout_ms must be greater than zero"));
        }
        if self.detection.interval.is_zero() || self.state_interval.is_zero() {
            return Err(anyhow!("polling intervals must be greater than zero"));
        }
        let threshold = self.detection.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(anyhow!(
                "detection.confidence_threshold must be in (0, 1], got {}",
                threshold
            ));
        }
        if !(1..=100).contains(&self.detection.jpeg_quality) {
            return Err(anyhow!("detection.jpeg_quality must be 1..=100"));
        }
        if self.detection.max_in_flight == 0 {
            return Err(anyhow!("detection.max_in_flight must be at least 1"));
        }
        if self.recording.fps == 0 {
            return Err(anyhow!("recording.fps must be greater than zero"));
        }
        if self.recording.chunk_interval.is_zero() {
            return Err(anyhow!("recording.chunk_ms must be greater than zero"));
        }
        if self.alert_capacity == 0 {
            return Err(anyhow!("alerts.capacity must be at least 1"));
        }
        let (width, height) = self.display;
        if !(width > 0.0 && height > 0.0) {
            return Err(anyhow!("display size must be positive"));
        }
        Ok(())
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            confidence_threshold: self.detection.confidence_threshold,
            jpeg_quality: self.detection.jpeg_quality,
            max_in_flight: self.detection.max_in_flight,
        }
    }

    pub fn recording_settings(&self) -> RecordingSettings {
        RecordingSettings {
            fps: self.recording.fps,
            chunk_interval: self.recording.chunk_interval,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            constraints: CaptureConstraints {
                ideal_width: self.camera.ideal_width,
                ideal_height: self.camera.ideal_height,
                audio: false,
            },
            detection_interval: self.detection.interval,
            state_interval: self.state_interval,
            auto_record: self.recording.auto_start,
            warmup: self.recording.warmup,
            poll: self.poll_settings(),
            recording: self.recording_settings(),
            alert_capacity: self.alert_capacity,
            display: self.display,
            ..SessionSettings::default()
        }
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
