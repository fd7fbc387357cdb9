//! HTTP camera source.
//!
//! Reads either a `multipart/x-mixed-replace` MJPEG stream or, for servers that
//! answer with a single JPEG, repeatedly fetches snapshots at the target rate.
//! A background reader thread decodes frames in-memory and keeps only the latest.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use url::Url;

use super::{CameraSource, CameraStream, CaptureConstraints};
use crate::frame::decode_jpeg;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpCamera {
    url: String,
    target_fps: u32,
}

impl HttpCamera {
    pub fn new(url: &str, target_fps: u32) -> Result<Self> {
        let parsed = Url::parse(url).context("parse camera url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                parsed.scheme()
            ));
        }
        Ok(Self {
            url: url.to_string(),
            target_fps,
        })
    }
}

impl CameraSource for HttpCamera {
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Arc<dyn CameraStream>> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .build();
        let response = agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to camera {}", self.url))?;
        log::debug!(
            "HttpCamera: {} ignores requested {}x{}; using native size",
            self.url,
            constraints.ideal_width,
            constraints.ideal_height
        );

        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        let feed = if content_type.contains("multipart") {
            Feed::Mjpeg(MjpegReader::new(response.into_reader()))
        } else {
            let mut first = Vec::new();
            response
                .into_reader()
                .take(MAX_JPEG_BYTES as u64)
                .read_to_end(&mut first)
                .context("read first camera snapshot")?;
            Feed::Snapshot {
                agent,
                pending: Some(first),
            }
        };

        let shared = Arc::new(SharedFrame::default());
        let worker = FrameReader {
            url: self.url.clone(),
            interval: frame_interval(self.target_fps),
            feed,
            shared: Arc::clone(&shared),
        };
        let join = std::thread::Builder::new()
            .name("camera-reader".to_string())
            .spawn(move || worker.run())
            .context("spawn camera reader")?;
        log::info!("HttpCamera: connected to {}", self.url);

        Ok(Arc::new(HttpStream {
            label: self.url.clone(),
            shared,
            reader: Mutex::new(Some(join)),
        }))
    }
}

#[derive(Default)]
struct SharedFrame {
    latest: Mutex<Option<Arc<RgbImage>>>,
    stopped: AtomicBool,
}

struct HttpStream {
    label: String,
    shared: Arc<SharedFrame>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl CameraStream for HttpStream {
    fn label(&self) -> &str {
        &self.label
    }

    fn native_size(&self) -> Option<(u32, u32)> {
        self.current_frame().map(|frame| frame.dimensions())
    }

    fn current_frame(&self) -> Option<Arc<RgbImage>> {
        if !self.is_live() {
            return None;
        }
        self.shared
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_live(&self) -> bool {
        !self.shared.stopped.load(Ordering::SeqCst)
    }

    fn stop_tracks(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // The reader may be parked in a socket read; it exits on its next wakeup
        // and drops the connection, so it is detached rather than joined.
        drop(
            self.reader
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        log::info!("HttpCamera: released {}", self.label);
    }
}

impl Drop for HttpStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

enum Feed {
    Mjpeg(MjpegReader),
    Snapshot {
        agent: ureq::Agent,
        pending: Option<Vec<u8>>,
    },
}

struct FrameReader {
    url: String,
    interval: Duration,
    feed: Feed,
    shared: Arc<SharedFrame>,
}

impl FrameReader {
    fn run(mut self) {
        let mut last_frame_at: Option<Instant> = None;
        while !self.shared.stopped.load(Ordering::SeqCst) {
            let jpeg = match &mut self.feed {
                Feed::Mjpeg(reader) => reader.read_next_jpeg(),
                Feed::Snapshot { agent, pending } => match pending.take() {
                    Some(bytes) => Ok(bytes),
                    None => {
                        std::thread::sleep(self.interval);
                        fetch_single_jpeg(agent, &self.url)
                    }
                },
            };
            let jpeg = match jpeg {
                Ok(bytes) => bytes,
                Err(err) => {
                    log::warn!(
                        "HttpCamera: {} stopped delivering frames: {:#}",
                        self.url,
                        err
                    );
                    break;
                }
            };

            let now = Instant::now();
            if let Some(last) = last_frame_at {
                if now.duration_since(last) < self.interval {
                    continue;
                }
            }
            match decode_jpeg(&jpeg) {
                Ok(frame) => {
                    last_frame_at = Some(now);
                    *self
                        .shared
                        .latest
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(frame));
                }
                Err(err) => log::debug!("HttpCamera: skipping undecodable frame: {:#}", err),
            }
        }
    }
}

struct MjpegReader {
    reader: Box<dyn Read + Send + Sync + 'static>,
    buffer: Vec<u8>,
}

impl MjpegReader {
    fn new(reader: Box<dyn Read + Send + Sync + 'static>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Locate the first complete SOI..EOI JPEG in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}
