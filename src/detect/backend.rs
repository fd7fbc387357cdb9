use anyhow::Result;

use super::result::RawDetection;

/// Remote person classifier.
///
/// # Contract
///
/// - `image` is a `data:image/jpeg;base64,...` URL of one video frame.
/// - `confidence` is the minimum score (0..=1) the classifier should report.
/// - Returned boxes are in percentage space with confidence on a 0..=100 scale.
///
/// Implementations are called from polling threads and may block on I/O.
pub trait Classifier: Send + Sync {
    /// Classifier identifier, for logs.
    fn name(&self) -> &str;

    fn detect(&self, image: &str, confidence: f32) -> Result<Vec<RawDetection>>;
}
