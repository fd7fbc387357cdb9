//! Synthetic camera (`stub://<name>`).
//!
//! Produces a moving test pattern at the requested ideal resolution. Frames are
//! generated on demand from the time since acquisition, so no capture thread runs.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CameraSource, CameraStream, CaptureConstraints};

const FRAME_PERIOD: Duration = Duration::from_millis(33);

pub struct SyntheticCamera {
    name: String,
    acquisitions: AtomicU64,
}

impl SyntheticCamera {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            acquisitions: AtomicU64::new(0),
        }
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl CameraSource for SyntheticCamera {
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Arc<dyn CameraStream>> {
        if constraints.ideal_width == 0 || constraints.ideal_height == 0 {
            return Err(anyhow!("synthetic camera needs a non-zero frame size"));
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "SyntheticCamera: acquired stub://{} at {}x{}",
            self.name,
            constraints.ideal_width,
            constraints.ideal_height
        );
        Ok(Arc::new(SyntheticStream {
            label: format!("stub://{}", self.name),
            width: constraints.ideal_width,
            height: constraints.ideal_height,
            started: Instant::now(),
            live: AtomicBool::new(true),
        }))
    }
}

struct SyntheticStream {
    label: String,
    width: u32,
    height: u32,
    started: Instant,
    live: AtomicBool,
}

impl SyntheticStream {
    /// Static gradient background with one bright block sweeping left to right.
    fn render(&self, frame_index: u64) -> RgbImage {
        let (w, h) = (self.width, self.height);
        let block_w = (w / 8).max(1);
        let block_h = (h / 3).max(1);
        let travel = u64::from(w.saturating_sub(block_w).max(1));
        let block_x = ((frame_index * 4) % travel) as u32;
        let block_y = h / 3;
        RgbImage::from_fn(w, h, |x, y| {
            if x >= block_x && x < block_x + block_w && y >= block_y && y < block_y + block_h {
                Rgb([230, 220, 200])
            } else {
                let shade = ((x + y + frame_index as u32) % 64) as u8;
                Rgb([20 + shade, 30 + shade, 40 + shade])
            }
        })
    }
}

impl CameraStream for SyntheticStream {
    fn label(&self) -> &str {
        &self.label
    }

    fn native_size(&self) -> Option<(u32, u32)> {
        self.is_live().then_some((self.width, self.height))
    }

    fn current_frame(&self) -> Option<Arc<RgbImage>> {
        if !self.is_live() {
            return None;
        }
        let index = (self.started.elapsed().as_millis() / FRAME_PERIOD.as_millis()) as u64;
        Some(Arc::new(self.render(index)))
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop_tracks(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            log::info!("SyntheticCamera: released {}", self.label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_frames_until_released() {
        let camera = SyntheticCamera::new("front");
        let stream = camera
            .acquire(&CaptureConstraints {
                ideal_width: 64,
                ideal_height: 36,
                audio: false,
            })
            .expect("acquire");
        assert_eq!(stream.native_size(), Some((64, 36)));
        assert_eq!(stream.current_frame().map(|f| f.dimensions()), Some((64, 36)));

        stream.stop_tracks();
        stream.stop_tracks();
        assert!(!stream.is_live());
        assert!(stream.current_frame().is_none());
        assert_eq!(camera.acquisitions(), 1);
    }
}
