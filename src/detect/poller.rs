//! Periodic detection polling.
//!
//! Each tick grabs the current camera frame, submits it to the classifier and
//! offers the classified result to the `DetectionStore`. Ticks do not wait for
//! the previous request, so every request carries a store-issued sequence number
//! and late responses are discarded by the store.

use anyhow::{Context, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::backend::Classifier;
use super::policy::ClassificationPolicy;
use super::result::ActivityStatus;
use super::store::{Alert, ApplyOutcome, DetectionStore};
use crate::frame::encode_jpeg_data_url;
use crate::ingest::CameraStream;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    /// Minimum classifier score, 0..=1.
    pub confidence_threshold: f32,
    pub jpeg_quality: u8,
    /// Upper bound on concurrently outstanding classifier requests.
    pub max_in_flight: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    /// The camera has not produced a frame yet.
    NoFrame,
    /// Too many requests outstanding; this tick was dropped.
    Skipped,
    /// Request handed to a worker thread.
    Dispatched,
    Applied {
        sequence: u64,
        activity: ActivityStatus,
        alert: Option<Alert>,
    },
    Stale {
        sequence: u64,
        latest: u64,
    },
}

pub struct DetectionPoller {
    classifier: Arc<dyn Classifier>,
    store: Arc<DetectionStore>,
    policy: ClassificationPolicy,
    settings: PollSettings,
    in_flight: AtomicUsize,
}

impl DetectionPoller {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        store: Arc<DetectionStore>,
        settings: PollSettings,
    ) -> Self {
        Self {
            classifier,
            store,
            policy: ClassificationPolicy::new(),
            settings,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run one complete poll on the calling thread.
    pub fn poll_once(&self, stream: &dyn CameraStream) -> Result<PollOutcome> {
        let Some(frame) = stream.current_frame() else {
            return Ok(PollOutcome::NoFrame);
        };
        let sequence = self.store.next_sequence();
        self.classify_frame(sequence, &frame)
    }

    fn classify_frame(&self, sequence: u64, frame: &RgbImage) -> Result<PollOutcome> {
        let image = encode_jpeg_data_url(frame, self.settings.jpeg_quality)?;
        let raw = self
            .classifier
            .detect(&image, self.settings.confidence_threshold)
            .with_context(|| {
                format!(
                    "classifier {} request #{}",
                    self.classifier.name(),
                    sequence
                )
            })?;

        let classified = self.policy.classify(&raw, &format!("det-{sequence}"));
        let activity = classified.activity;
        match self.store.apply(sequence, classified) {
            ApplyOutcome::Applied { alert } => {
                log::debug!(
                    "detection #{}: {} boxes, activity={:?}",
                    sequence,
                    raw.len(),
                    activity
                );
                if let Some(alert) = &alert {
                    log::warn!(
                        "alert {}: {} (conf={:.1})",
                        alert.id,
                        alert.message,
                        alert.confidence
                    );
                }
                Ok(PollOutcome::Applied {
                    sequence,
                    activity,
                    alert,
                })
            }
            ApplyOutcome::Stale { sequence, latest } => {
                log::debug!(
                    "detection #{} arrived after #{}; discarded",
                    sequence,
                    latest
                );
                Ok(PollOutcome::Stale { sequence, latest })
            }
        }
    }

    /// Timer entry point: grab the frame and issue its sequence number on the
    /// calling thread, then classify it on a worker thread so a slow classifier
    /// never delays the next tick. Failures are logged and leave the store untouched.
    ///
    /// Every sequence is issued before `dispatch` returns, so a
    /// `clear_detections` after the timer is joined fences all of them.
    pub fn dispatch(self: &Arc<Self>, stream: Arc<dyn CameraStream>) -> PollOutcome {
        let Some(frame) = stream.current_frame() else {
            return PollOutcome::NoFrame;
        };
        let max = self.settings.max_in_flight.max(1);
        if self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_err()
        {
            log::debug!("detection tick skipped: {} requests in flight", max);
            return PollOutcome::Skipped;
        }

        let sequence = self.store.next_sequence();
        let poller = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("detect-request".to_string())
            .spawn(move || {
                if let Err(err) = poller.classify_frame(sequence, &frame) {
                    log::warn!("detection poll failed: {:#}", err);
                }
                poller.in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        match spawned {
            Ok(_) => PollOutcome::Dispatched,
            Err(err) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                log::warn!("detection worker spawn failed: {}", err);
                PollOutcome::Skipped
            }
        }
    }
}
