//! On-screen placement of the letterboxed ("contain") video.
//!
//! `contain_rect` is the pure computation; `GeometryMapper` keeps the latest
//! rect for the display and recomputes it on metadata, playback and resize
//! triggers.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};

use crate::detect::DetectionBox;

/// Pixel rectangle the video occupies inside its container.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDisplayRect {
    pub offset_x: f64,
    pub offset_y: f64,
    pub width: f64,
    pub height: f64,
}

/// Fit `native` inside `container` preserving aspect ratio.
///
/// Wider-than-container video fills the width and is banded top/bottom;
/// otherwise it fills the height and is banded left/right. Returns `None` while
/// any dimension is still unknown (zero).
pub fn contain_rect(native: (u32, u32), container: (f64, f64)) -> Option<VideoDisplayRect> {
    let (video_w, video_h) = (f64::from(native.0), f64::from(native.1));
    let (box_w, box_h) = container;
    if video_w <= 0.0 || video_h <= 0.0 || box_w <= 0.0 || box_h <= 0.0 {
        return None;
    }
    let video_aspect = video_w / video_h;
    let box_aspect = box_w / box_h;
    let rect = if video_aspect > box_aspect {
        let height = box_w / video_aspect;
        VideoDisplayRect {
            offset_x: 0.0,
            offset_y: (box_h - height) / 2.0,
            width: box_w,
            height,
        }
    } else {
        let width = box_h * video_aspect;
        VideoDisplayRect {
            offset_x: (box_w - width) / 2.0,
            offset_y: 0.0,
            width,
            height: box_h,
        }
    };
    Some(rect)
}

/// A detection box positioned in container pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScreenBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Where to draw a box: mapped pixels, or raw percentages of the container when
/// no display rect is known yet (boxes may be misaligned until then).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum BoxPlacement {
    Pixels(ScreenBox),
    Percent {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

impl VideoDisplayRect {
    pub fn place(&self, det: &DetectionBox) -> ScreenBox {
        ScreenBox {
            left: self.offset_x + f64::from(det.x) / 100.0 * self.width,
            top: self.offset_y + f64::from(det.y) / 100.0 * self.height,
            width: f64::from(det.width) / 100.0 * self.width,
            height: f64::from(det.height) / 100.0 * self.height,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GeometryTrigger {
    MetadataLoaded,
    PlaybackStarted,
    WindowResized { width: f64, height: f64 },
    DimensionPoll,
}

#[derive(Debug, Default)]
struct GeometryState {
    container: Option<(f64, f64)>,
    native: Option<(u32, u32)>,
    rect: Option<VideoDisplayRect>,
}

#[derive(Debug, Default)]
pub struct GeometryMapper {
    state: Mutex<GeometryState>,
}

impl GeometryMapper {
    pub fn new(container_width: f64, container_height: f64) -> Self {
        Self {
            state: Mutex::new(GeometryState {
                container: Some((container_width, container_height)),
                ..GeometryState::default()
            }),
        }
    }

    /// Recompute the rect for `trigger`. `native` is the video's reported size,
    /// if any; a previously known size is kept when `native` is `None`.
    pub fn recompute(
        &self,
        trigger: GeometryTrigger,
        native: Option<(u32, u32)>,
    ) -> Option<VideoDisplayRect> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let GeometryTrigger::WindowResized { width, height } = trigger {
            state.container = Some((width, height));
        }
        if let Some(size) = native.filter(|(w, h)| *w > 0 && *h > 0) {
            state.native = Some(size);
        }
        state.rect = match (state.native, state.container) {
            (Some(native), Some(container)) => contain_rect(native, container),
            _ => None,
        };
        log::debug!("display geometry {:?} -> {:?}", trigger, state.rect);
        state.rect
    }

    pub fn current(&self) -> Option<VideoDisplayRect> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rect
    }

    pub fn place(&self, det: &DetectionBox) -> BoxPlacement {
        match self.current() {
            Some(rect) => BoxPlacement::Pixels(rect.place(det)),
            None => BoxPlacement::Percent {
                x: det.x,
                y: det.y,
                width: det.width,
                height: det.height,
            },
        }
    }

    /// Forget the video (surface detached). The container size is kept.
    pub fn detach(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.native = None;
        state.rect = None;
    }
}
