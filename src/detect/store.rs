//! Detection store: the current classified box set plus accumulated stats and alerts.
//!
//! The current set is published as an `Arc<DetectionSnapshot>` and replaced
//! wholesale on every applied poll, so a reader holding a snapshot never sees a
//! partial update. Poll results carry a sequence number issued by the store;
//! results older than the newest applied (or fenced) sequence are dropped.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use super::policy::FrameClassification;
use super::result::{ActivityStatus, DetectionBox};

pub const DEFAULT_ALERT_CAPACITY: usize = 50;

const SUSPICIOUS_MESSAGE: &str = "Suspicious activity detected";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub message: String,
    /// Local wall-clock time of day, `HH:MM:SS`.
    pub time: String,
    #[serde(deserialize_with = "number_or_string")]
    pub confidence: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_detections: u64,
    pub normal_count: u64,
    pub suspicious_count: u64,
    /// Seconds; owned by the backend state feed.
    pub uptime: u64,
}

/// Render an uptime the way the dashboard shows it: `1h 2m 3s`, `2m 3s`, `3s`.
pub fn format_uptime(seconds: u64) -> String {
    let hrs = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hrs > 0 {
        format!("{hrs}h {mins}m {secs}s")
    } else if mins > 0 {
        format!("{mins}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

/// Immutable view of the latest applied detection cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSnapshot {
    pub sequence: u64,
    pub boxes: Vec<DetectionBox>,
    pub activity: ActivityStatus,
}

/// Result of offering a poll result to the store.
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyOutcome {
    Applied { alert: Option<Alert> },
    Stale { sequence: u64, latest: u64 },
}

#[derive(Debug, Default)]
struct Ledger {
    issued: u64,
    applied: u64,
    stats: Stats,
    alerts: Vec<Alert>,
    dismissed: HashSet<u64>,
    last_alert_id: u64,
    /// Alerts with ids at or below this were cleared and are not merged back.
    cleared_through: u64,
}

#[derive(Debug)]
pub struct DetectionStore {
    current: RwLock<Arc<DetectionSnapshot>>,
    ledger: Mutex<Ledger>,
    alert_capacity: usize,
}

impl Default for DetectionStore {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_CAPACITY)
    }
}

impl DetectionStore {
    pub fn new(alert_capacity: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(DetectionSnapshot::default())),
            ledger: Mutex::new(Ledger::default()),
            alert_capacity: alert_capacity.max(1),
        }
    }

    /// Issue the sequence number for a new poll request.
    pub fn next_sequence(&self) -> u64 {
        let mut ledger = self.lock_ledger();
        ledger.issued += 1;
        ledger.issued
    }

    /// Latest applied set. Cheap; clones an `Arc`.
    pub fn snapshot(&self) -> Arc<DetectionSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn activity(&self) -> ActivityStatus {
        self.snapshot().activity
    }

    /// Apply a classified frame if it is newer than anything applied so far.
    pub fn apply(&self, sequence: u64, frame: FrameClassification) -> ApplyOutcome {
        let mut ledger = self.lock_ledger();
        if sequence <= ledger.applied {
            return ApplyOutcome::Stale {
                sequence,
                latest: ledger.applied,
            };
        }
        ledger.applied = sequence;
        ledger.issued = ledger.issued.max(sequence);

        ledger.stats.total_detections += frame.boxes.len() as u64;
        ledger.stats.normal_count += frame.normal_count() as u64;
        ledger.stats.suspicious_count += frame.suspicious_count() as u64;

        let alert = frame.summary.as_ref().map(|summary| {
            let id = next_alert_id(&mut ledger);
            Alert {
                id,
                message: format!(
                    "{SUSPICIOUS_MESSAGE}: {} of {} people flagged",
                    summary.suspicious_count, summary.total_count
                ),
                time: chrono::Local::now().format("%H:%M:%S").to_string(),
                confidence: summary.lead_confidence,
            }
        });
        if let Some(alert) = &alert {
            ledger.alerts.insert(0, alert.clone());
            ledger.alerts.truncate(self.alert_capacity);
        }

        let snapshot = Arc::new(DetectionSnapshot {
            sequence,
            boxes: frame.boxes,
            activity: frame.activity,
        });
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        ApplyOutcome::Applied { alert }
    }

    /// Drop the current set and fence off every request issued so far.
    pub fn clear_detections(&self) {
        let mut ledger = self.lock_ledger();
        ledger.applied = ledger.issued;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(DetectionSnapshot {
                sequence: ledger.applied,
                ..DetectionSnapshot::default()
            });
    }

    pub fn stats(&self) -> Stats {
        self.lock_ledger().stats
    }

    /// Alerts, newest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.lock_ledger().alerts.clone()
    }

    pub fn dismiss_alert(&self, id: u64) -> bool {
        let mut ledger = self.lock_ledger();
        let before = ledger.alerts.len();
        ledger.alerts.retain(|alert| alert.id != id);
        if id > ledger.cleared_through {
            ledger.dismissed.insert(id);
        }
        ledger.alerts.len() != before
    }

    /// Merge the backend state feed: alerts by id, and the authoritative uptime.
    pub fn merge_remote(&self, alerts: Vec<Alert>, uptime: u64) {
        let mut ledger = self.lock_ledger();
        ledger.stats.uptime = uptime;
        for alert in alerts {
            if alert.id <= ledger.cleared_through
                || ledger.dismissed.contains(&alert.id)
                || ledger.alerts.iter().any(|known| known.id == alert.id)
            {
                continue;
            }
            ledger.last_alert_id = ledger.last_alert_id.max(alert.id);
            ledger.alerts.push(alert);
        }
        ledger.alerts.sort_by(|a, b| b.id.cmp(&a.id));
        ledger.alerts.truncate(self.alert_capacity);
        prune_dismissed(&mut ledger, self.alert_capacity);
    }

    /// Zero the stats and empty the alert list. Detections and sequencing are untouched.
    ///
    /// Every alert id seen so far is fenced off, so a state feed still holding
    /// them does not bring them back.
    pub fn reset(&self) {
        let mut ledger = self.lock_ledger();
        ledger.stats = Stats::default();
        ledger.alerts.clear();
        ledger.dismissed.clear();
        ledger.cleared_through = ledger.last_alert_id;
    }

    fn lock_ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// A full list only takes alerts newer than its oldest entry, so older
// dismissals can no longer resurface.
fn prune_dismissed(ledger: &mut Ledger, capacity: usize) {
    let floor = ledger.cleared_through;
    let oldest_kept = if ledger.alerts.len() >= capacity {
        ledger.alerts.last().map(|alert| alert.id)
    } else {
        None
    };
    ledger
        .dismissed
        .retain(|id| *id > floor && oldest_kept.map_or(true, |oldest| *id > oldest));
}

fn next_alert_id(ledger: &mut Ledger) -> u64 {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    ledger.last_alert_id = now_ms.max(ledger.last_alert_id + 1);
    ledger.last_alert_id
}

// The backend serializes alert confidence as a formatted string ("87.3").
fn number_or_string<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f32),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
