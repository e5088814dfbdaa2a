//! Readiness gate for the publish scheduler.
//!
//! The consumer loop owns a [`ReadinessSignal`]; everything else holds a
//! cloneable [`Readiness`] view. The gate is not-ready until the loop starts,
//! ready while it runs (including when the queue is empty), and drops back to
//! not-ready when the loop exits or its task dies.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Writer half of the gate, owned by the consumer loop.
#[derive(Debug)]
pub struct ReadinessSignal {
    tx: watch::Sender<bool>,
}

/// Read-only view of the gate.
#[derive(Debug, Clone)]
pub struct Readiness {
    rx: watch::Receiver<bool>,
}

/// Create a gate in the not-ready state.
pub fn readiness_gate() -> (ReadinessSignal, Readiness) {
    let (tx, rx) = watch::channel(false);
    (ReadinessSignal { tx }, Readiness { rx })
}

impl ReadinessSignal {
    /// Mark the consumer loop as running.
    pub fn mark_ready(&self) {
        self.tx.send_replace(true);
    }

    /// Mark the consumer loop as stopped.
    pub fn mark_stopped(&self) {
        self.tx.send_replace(false);
    }
}

impl Drop for ReadinessSignal {
    fn drop(&mut self) {
        self.mark_stopped();
    }
}

impl Readiness {
    /// Returns `true` while the consumer loop is running.
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the consumer loop is running.
    ///
    /// Returns `false` if the loop went away without ever becoming ready.
    pub async fn wait_ready(&self) -> bool {
        let mut rx = self.rx.clone();
        let ready = rx.wait_for(|ready| *ready).await.is_ok();
        ready
    }
}

/// Serving status reported to health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// The scheduler is accepting and draining work.
    Serving,
    /// The scheduler has not started or has stopped.
    NotServing,
}

impl HealthStatus {
    /// Derive the status from the readiness gate.
    pub fn from_readiness(readiness: &Readiness) -> Self {
        if readiness.is_ready() {
            Self::Serving
        } else {
            Self::NotServing
        }
    }
}

/// Health snapshot for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Serving status.
    pub status: HealthStatus,
    /// Units of publish work queued or in flight.
    pub outstanding: usize,
}
