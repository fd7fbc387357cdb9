mod backend;
mod policy;
mod poller;
mod result;
mod store;

pub use backend::Classifier;
pub use policy::{ClassificationPolicy, FrameClassification, SuspiciousSummary};
pub use poller::{
    DetectionPoller, PollOutcome, PollSettings, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_JPEG_QUALITY, DEFAULT_MAX_IN_FLIGHT,
};
pub use result::{ActivityStatus, DetectionBox, DetectionStatus, RawDetection};
pub use store::{
    format_uptime, Alert, ApplyOutcome, DetectionSnapshot, DetectionStore, Stats,
    DEFAULT_ALERT_CAPACITY,
};
