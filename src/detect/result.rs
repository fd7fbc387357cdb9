use serde::{Deserialize, Serialize};

/// One detection as returned by the classifier for a single frame.
///
/// Coordinates are percentage-of-frame (0..=100, origin top-left).
/// `confidence` is also on a 0..=100 scale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub id: Option<String>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            id: None,
            x,
            y,
            width,
            height,
            confidence,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStatus {
    Normal,
    Suspicious,
}

impl DetectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            DetectionStatus::Normal => "normal",
            DetectionStatus::Suspicious => "suspicious",
        }
    }
}

/// A classified detection box. Immutable once built; a poll cycle replaces the whole set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub status: DetectionStatus,
}

/// Frame-level verdict.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    #[default]
    Idle,
    Normal,
    Suspicious,
}

impl ActivityStatus {
    /// Derive the verdict from a box set: idle if empty, suspicious if any box is.
    pub fn from_boxes(boxes: &[DetectionBox]) -> Self {
        if boxes.is_empty() {
            ActivityStatus::Idle
        } else if boxes
            .iter()
            .any(|b| b.status == DetectionStatus::Suspicious)
        {
            ActivityStatus::Suspicious
        } else {
            ActivityStatus::Normal
        }
    }
}
