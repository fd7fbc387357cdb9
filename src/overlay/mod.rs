//! Burned-in overlay: composites the live frame, a timestamp, the recording
//! elapsed time and the current detection boxes onto a fixed-size surface.
//!
//! Box coordinates arrive as percentages of the video and are scaled to the
//! surface on every step, so the surface size never has to match the camera.

pub mod font;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::time::Duration;

use crate::detect::{DetectionBox, DetectionSnapshot, DetectionStatus};
use crate::frame::fit_to_surface;

pub const NORMAL_COLOR: Rgb<u8> = Rgb([34, 197, 94]);
pub const SUSPICIOUS_COLOR: Rgb<u8> = Rgb([239, 68, 68]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const OUTLINE_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const FILL_ALPHA: f32 = 0.2;
const MARGIN: i32 = 12;

pub fn status_color(status: DetectionStatus) -> Rgb<u8> {
    match status {
        DetectionStatus::Normal => NORMAL_COLOR,
        DetectionStatus::Suspicious => SUSPICIOUS_COLOR,
    }
}

/// `MM:SS` below an hour, `H:MM:SS` from then on.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Box rectangle on the surface, in whole pixels, clipped to the surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Scale a percentage box to a `width` x `height` surface. `None` when nothing is visible.
pub fn scale_box(det: &DetectionBox, width: u32, height: u32) -> Option<PixelRect> {
    let to_px = |pct: f32, extent: u32| ((pct as f64 / 100.0) * extent as f64).round();
    let left = to_px(det.x, width).clamp(0.0, width as f64);
    let top = to_px(det.y, height).clamp(0.0, height as f64);
    let right = to_px(det.x + det.width, width).clamp(0.0, width as f64);
    let bottom = to_px(det.y + det.height, height).clamp(0.0, height as f64);
    if right - left < 1.0 || bottom - top < 1.0 {
        return None;
    }
    Some(PixelRect {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

/// Chip text for a box, e.g. `SUSPICIOUS 87%`.
pub fn box_label(det: &DetectionBox) -> String {
    format!(
        "{} {}%",
        det.status.label().to_uppercase(),
        det.confidence.round() as i64
    )
}

#[derive(Clone, Debug)]
pub struct OverlayRenderer {
    width: u32,
    height: u32,
    text_scale: u32,
    border: u32,
}

impl OverlayRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            text_scale: (height / 360).max(1),
            border: (height / 240).max(2),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Render one step. A missing frame leaves the video area black.
    pub fn compose(
        &self,
        frame: Option<&RgbImage>,
        snapshot: &DetectionSnapshot,
        wall_clock: &str,
        elapsed: Duration,
    ) -> RgbImage {
        let mut canvas = match frame {
            Some(frame) => fit_to_surface(frame, self.width, self.height),
            None => RgbImage::new(self.width, self.height),
        };
        self.draw_header(&mut canvas, wall_clock, elapsed);
        for det in &snapshot.boxes {
            self.draw_box(&mut canvas, det);
        }
        canvas
    }

    fn draw_header(&self, canvas: &mut RgbImage, wall_clock: &str, elapsed: Duration) {
        let line = (font::text_height(self.text_scale) + 4 * self.text_scale) as i32;
        font::draw_text_outlined(
            canvas,
            wall_clock,
            MARGIN,
            MARGIN,
            self.text_scale,
            TEXT_COLOR,
            OUTLINE_COLOR,
        );
        font::draw_text_outlined(
            canvas,
            &format!("REC {}", format_elapsed(elapsed)),
            MARGIN,
            MARGIN + line,
            self.text_scale,
            SUSPICIOUS_COLOR,
            OUTLINE_COLOR,
        );
    }

    fn draw_box(&self, canvas: &mut RgbImage, det: &DetectionBox) {
        let Some(rect) = scale_box(det, self.width, self.height) else {
            return;
        };
        let color = status_color(det.status);
        blend_rect(canvas, rect, color, FILL_ALPHA);
        for inset in 0..self.border.min(rect.width / 2).min(rect.height / 2).max(1) {
            let w = rect.width.saturating_sub(2 * inset);
            let h = rect.height.saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            draw_hollow_rect_mut(
                canvas,
                Rect::at((rect.x + inset) as i32, (rect.y + inset) as i32).of_size(w, h),
                color,
            );
        }
        self.draw_label(canvas, rect, det, color);
    }

    fn draw_label(
        &self,
        canvas: &mut RgbImage,
        rect: PixelRect,
        det: &DetectionBox,
        color: Rgb<u8>,
    ) {
        let label = box_label(det);
        let pad = 2 * self.text_scale;
        let chip_w = font::text_width(&label, self.text_scale) + 2 * pad;
        let chip_h = font::text_height(self.text_scale) + 2 * pad;
        // Above the box when there is room, otherwise tucked inside its top edge.
        let chip_y = if rect.y >= chip_h {
            rect.y - chip_h
        } else {
            rect.y
        };
        draw_filled_rect_mut(
            canvas,
            Rect::at(rect.x as i32, chip_y as i32).of_size(chip_w, chip_h),
            color,
        );
        font::draw_text(
            canvas,
            &label,
            (rect.x + pad) as i32,
            (chip_y + pad) as i32,
            self.text_scale,
            TEXT_COLOR,
        );
    }
}

fn blend_rect(canvas: &mut RgbImage, rect: PixelRect, color: Rgb<u8>, alpha: f32) {
    let x_end = (rect.x + rect.width).min(canvas.width());
    let y_end = (rect.y + rect.height).min(canvas.height());
    for y in rect.y..y_end {
        for x in rect.x..x_end {
            let px = canvas.get_pixel_mut(x, y);
            for c in 0..3 {
                let mixed = px[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha;
                px[c] = mixed.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
