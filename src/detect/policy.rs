//! Suspicious-activity classification.
//!
//! A pure mapping from the classifier's raw detections for one frame to a set of
//! `DetectionBox` values plus a frame verdict. All thresholds are in percentage
//! units (0..=100).
//!
//! The classifier's response order is taken as-is. It is not guaranteed to be
//! sorted by confidence or index, so "first suspicious detection" means first in
//! the order the classifier returned.

use super::result::{ActivityStatus, DetectionBox, DetectionStatus, RawDetection};

/// Boxes starting within this margin of the left/top edge, or ending past
/// `100 - EDGE_MARGIN` on the right, count as edge boxes.
pub const EDGE_MARGIN: f32 = 5.0;
/// Edge boxes are suspicious only above this confidence.
pub const EDGE_CONFIDENCE: f32 = 70.0;
pub const LARGE_WIDTH: f32 = 40.0;
pub const LARGE_HEIGHT: f32 = 60.0;
/// More than this many people in one frame flags every detection.
pub const CROWD_SIZE: usize = 3;

/// Summary of a suspicious frame, used to raise exactly one alert.
#[derive(Clone, Debug, PartialEq)]
pub struct SuspiciousSummary {
    pub suspicious_count: usize,
    pub total_count: usize,
    /// Confidence of the first suspicious detection in classifier order.
    pub lead_confidence: f32,
}

/// Output of classifying one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameClassification {
    pub boxes: Vec<DetectionBox>,
    pub activity: ActivityStatus,
    pub summary: Option<SuspiciousSummary>,
}

impl FrameClassification {
    pub fn normal_count(&self) -> usize {
        self.boxes
            .iter()
            .filter(|b| b.status == DetectionStatus::Normal)
            .count()
    }

    pub fn suspicious_count(&self) -> usize {
        self.boxes.len() - self.normal_count()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ClassificationPolicy;

impl ClassificationPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Classify one frame. `id_prefix` is used for detections the classifier left unnamed.
    pub fn classify(&self, raw: &[RawDetection], id_prefix: &str) -> FrameClassification {
        let many_people = raw.len() > CROWD_SIZE;
        let boxes: Vec<DetectionBox> = raw
            .iter()
            .enumerate()
            .map(|(index, det)| {
                let status = if is_suspicious(det, many_people) {
                    DetectionStatus::Suspicious
                } else {
                    DetectionStatus::Normal
                };
                DetectionBox {
                    id: det
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("{id_prefix}-{index}")),
                    x: det.x,
                    y: det.y,
                    width: det.width,
                    height: det.height,
                    confidence: det.confidence,
                    status,
                }
            })
            .collect();

        let activity = ActivityStatus::from_boxes(&boxes);
        let summary = match activity {
            ActivityStatus::Suspicious => {
                let mut suspicious = boxes
                    .iter()
                    .filter(|b| b.status == DetectionStatus::Suspicious);
                suspicious.next().map(|lead| SuspiciousSummary {
                    suspicious_count: 1 + suspicious.count(),
                    total_count: boxes.len(),
                    lead_confidence: lead.confidence,
                })
            }
            _ => None,
        };

        FrameClassification {
            boxes,
            activity,
            summary,
        }
    }
}

fn is_suspicious(det: &RawDetection, many_people: bool) -> bool {
    let is_edge = det.x < EDGE_MARGIN
        || det.x + det.width > 100.0 - EDGE_MARGIN
        || det.y < EDGE_MARGIN;
    let is_large = det.width > LARGE_WIDTH || det.height > LARGE_HEIGHT;
    many_people || (is_edge && det.confidence > EDGE_CONFIDENCE) || is_large
}
