//! Backend REST client.
//!
//! Blocking `ureq` client for the surveillance backend: session notifications,
//! the state feed, the person classifier and recording storage. Every non-2xx
//! answer becomes an `ApiError` carrying the status and response body.

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

use crate::detect::{ActivityStatus, Alert, Classifier, RawDetection};
use crate::recording::{RecordingBlob, RecordingMeta, RecordingSink};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// Non-2xx response from the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub body: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "API {}: {}", self.status, self.body)
    }
}

impl std::error::Error for ApiError {}

/// Backend view of the session, as served by `GET /api/state/`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteState {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub activity_status: Option<ActivityStatus>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub stats: RemoteStats,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RemoteStats {
    #[serde(default)]
    pub uptime: f64,
}

impl RemoteState {
    pub fn uptime_secs(&self) -> u64 {
        if self.stats.uptime.is_finite() && self.stats.uptime > 0.0 {
            self.stats.uptime as u64
        } else {
            0
        }
    }
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    detections: Vec<RawDetection>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    image: &'a str,
    confidence: f32,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    #[serde(default)]
    pub saved: bool,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub ended_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEntry {
    pub filename: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RecordingList {
    #[serde(default)]
    recordings: Vec<RecordingEntry>,
}

/// Session lifecycle notifications and the state feed.
pub trait SessionService: Send + Sync {
    fn start_session(&self) -> Result<()>;
    fn stop_session(&self) -> Result<()>;
    fn reset_session(&self) -> Result<()>;
    fn fetch_state(&self) -> Result<RemoteState>;
}

#[derive(Clone, Debug)]
pub struct BackendClient {
    base: Url,
    agent: ureq::Agent,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base = Url::parse(trimmed).with_context(|| format!("parse api base url {}", trimmed))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!("api base url must be http(s), got '{}'", base.scheme()));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { base, agent })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    fn endpoint(&self, path: &str) -> Result<String> {
        Ok(self
            .base
            .join(path)
            .with_context(|| format!("build url for {}", path))?
            .to_string())
    }

    pub fn health(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct Health {
            status: String,
        }
        let health: Health = self.get_json("/api/health/")?;
        Ok(health.status)
    }

    pub fn list_recordings(&self) -> Result<Vec<RecordingEntry>> {
        let list: RecordingList = self.get_json("/api/recordings/")?;
        Ok(list.recordings)
    }

    pub fn upload_recording(
        &self,
        blob: &RecordingBlob,
        meta: &RecordingMeta,
    ) -> Result<UploadReceipt> {
        let url = self.endpoint("/api/recordings/upload/")?;
        let boundary = multipart_boundary();
        let filename = format!("recording_{}.{}", epoch_millis(), blob.extension);
        let started_at = meta.started_at.to_rfc3339();
        let ended_at = meta.ended_at.to_rfc3339();
        let body = multipart_body(
            &boundary,
            &[("startedAt", started_at.as_str()), ("endedAt", ended_at.as_str())],
            MultipartFile {
                field: "file",
                filename: &filename,
                content_type: &blob.mime_type,
                bytes: &blob.bytes,
            },
        );
        let response = self
            .agent
            .post(&url)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body);
        let text = read_response(response, &url)?;
        serde_json::from_str(&text).with_context(|| format!("parse upload receipt from {}", url))
    }

    pub fn detect_humans(&self, image: &str, confidence: f32) -> Result<Vec<RawDetection>> {
        let response: DetectResponse =
            self.post_json("/api/detect/", &DetectRequest { image, confidence })?;
        if !response.success {
            return Err(anyhow!(
                "classifier reported failure: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        Ok(response.detections)
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self.agent.get(&url).call();
        let text = read_response(response, &url)?;
        serde_json::from_str(&text).with_context(|| format!("parse response from {}", url))
    }

    fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.endpoint(path)?;
        let payload = serde_json::to_string(body)?;
        let response = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&payload);
        let text = read_response(response, &url)?;
        serde_json::from_str(&text).with_context(|| format!("parse response from {}", url))
    }

    fn post_empty(&self, path: &str) -> Result<()> {
        let url = self.endpoint(path)?;
        let response = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string("{}");
        read_response(response, &url)?;
        Ok(())
    }
}

impl SessionService for BackendClient {
    fn start_session(&self) -> Result<()> {
        self.post_empty("/api/session/start/")
    }

    fn stop_session(&self) -> Result<()> {
        self.post_empty("/api/session/stop/")
    }

    fn reset_session(&self) -> Result<()> {
        self.post_empty("/api/session/reset/")
    }

    fn fetch_state(&self) -> Result<RemoteState> {
        self.get_json("/api/state/")
    }
}

impl Classifier for BackendClient {
    fn name(&self) -> &str {
        self.base_url()
    }

    fn detect(&self, image: &str, confidence: f32) -> Result<Vec<RawDetection>> {
        self.detect_humans(image, confidence)
    }
}

impl RecordingSink for BackendClient {
    fn upload(&self, blob: &RecordingBlob, meta: &RecordingMeta) -> Result<UploadReceipt> {
        self.upload_recording(blob, meta)
    }
}

fn read_response(response: Result<ureq::Response, ureq::Error>, url: &str) -> Result<String> {
    match response {
        Ok(response) => read_body(response).with_context(|| format!("read response from {}", url)),
        Err(ureq::Error::Status(status, response)) => {
            let body = read_body(response).unwrap_or_default();
            Err(ApiError { status, body }.into())
        }
        Err(err) => Err(anyhow::Error::new(err).context(format!("request {}", url))),
    }
}

fn read_body(response: ureq::Response) -> Result<String> {
    use std::io::Read;
    let mut text = String::new();
    response
        .into_reader()
        .take(MAX_BODY_BYTES)
        .read_to_string(&mut text)?;
    Ok(text)
}

struct MultipartFile<'a> {
    field: &'a str,
    filename: &'a str,
    content_type: &'a str,
    bytes: &'a [u8],
}

fn multipart_boundary() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    let suffix: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("----cctv-monitor-{suffix}")
}

fn multipart_body(boundary: &str, fields: &[(&str, &str)], file: MultipartFile<'_>) -> Vec<u8> {
    let mut body = Vec::with_capacity(file.bytes.len() + 512);
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            file.field, file.filename, file.content_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(file.bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
