//! Cancellable background timers.
//!
//! Every repeating activity of a session (polls, warm-up, dimension probe) runs
//! on its own named thread behind a `TaskHandle`. Cancelling drops the stop
//! channel, which wakes the thread out of its wait, then joins it. Cancel is
//! idempotent and also runs on `Drop`, so a handle can never leak its thread.

use anyhow::{anyhow, Context, Result};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Returned by a tick to keep or end the schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskControl {
    Continue,
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirstFire {
    /// Run the first tick immediately, then every period.
    Immediate,
    /// Wait one full period before the first tick.
    AfterPeriod,
}

#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    stop: Option<mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Run `tick` every `period` until cancelled or the tick returns `Stop`.
    pub fn every<F>(name: &str, period: Duration, first: FirstFire, mut tick: F) -> Result<Self>
    where
        F: FnMut() -> TaskControl + Send + 'static,
    {
        if period.is_zero() {
            return Err(anyhow!("task {} needs a non-zero period", name));
        }
        Self::spawn(name, move |stop_rx| {
            if first == FirstFire::Immediate && tick() == TaskControl::Stop {
                return;
            }
            loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if tick() == TaskControl::Stop {
                            return;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        })
    }

    /// Run `job` once after `delay` unless cancelled first.
    pub fn after<F>(name: &str, delay: Duration, job: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(name, move |stop_rx| {
            if let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(delay) {
                job();
            }
        })
    }

    fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(mpsc::Receiver<()>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel();
        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(stop_rx))
            .with_context(|| format!("spawn task {}", name))?;
        Ok(Self {
            name: name.to_string(),
            stop: Some(stop_tx),
            join: Some(join),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the task body has returned (finished, stopped itself, or cancelled).
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Stop the task and wait for its thread. Later calls are no-ops.
    pub fn cancel(&mut self) {
        drop(self.stop.take());
        if let Some(join) = self.join.take() {
            if join.thread().id() == std::thread::current().id() {
                return;
            }
            if join.join().is_err() {
                log::error!("task {} panicked", self.name);
            }
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
