//! Camera sources.
//!
//! This module provides the live-video side of a session:
//! - Synthetic cameras (`stub://`) for tests and demos
//! - HTTP MJPEG/JPEG-snapshot cameras (`http://`, `https://`)
//!
//! A `CameraSource` is acquired once per session and yields a `CameraStream`.
//! The stream exposes the latest decoded frame and its native resolution, and
//! owns the device "tracks". `stop_tracks` releases them; it is idempotent and
//! the stream reports no frames afterwards.
//!
//! Sources MUST NOT:
//! - Store decoded frames to disk
//! - Keep frames beyond the latest one

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::Arc;

pub mod mjpeg;
pub mod synthetic;

pub use mjpeg::HttpCamera;
pub use synthetic::SyntheticCamera;

/// Requested capture characteristics. Sources treat the sizes as a preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            audio: false,
        }
    }
}

/// A device that can be opened for one live session.
pub trait CameraSource: Send + Sync {
    /// Open the device. Failure (no device, permission, unreachable) is fatal to
    /// the session start attempt and must not leave anything running.
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Arc<dyn CameraStream>>;
}

/// A live, acquired camera.
pub trait CameraStream: Send + Sync {
    /// Human-readable source label, for logs.
    fn label(&self) -> &str;

    /// Native frame size, once known.
    fn native_size(&self) -> Option<(u32, u32)>;

    /// The most recent frame at native resolution.
    fn current_frame(&self) -> Option<Arc<RgbImage>>;

    fn is_live(&self) -> bool;

    /// Release the device. Safe to call more than once.
    fn stop_tracks(&self);
}

/// Pick a camera implementation from the URL scheme.
pub fn open_camera(url: &str, target_fps: u32) -> Result<Arc<dyn CameraSource>> {
    if let Some(name) = url.strip_prefix("stub://") {
        return Ok(Arc::new(SyntheticCamera::new(name)));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Arc::new(HttpCamera::new(url, target_fps)?));
    }
    Err(anyhow!(
        "unsupported camera url '{}'; expected stub:// or http(s)://",
        url
    ))
}
