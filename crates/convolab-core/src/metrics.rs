//! Process-wide batch counters, flushed as one event when a batch ends.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub static METRICS: Metrics = Metrics::new();

#[derive(Debug)]
pub struct Metrics {
    units_provisioned: AtomicU64,
    units_failed: AtomicU64,
    exports_failed: AtomicU64,
    poll_timeouts: AtomicU64,
    checkpoints_written: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub units_provisioned: u64,
    pub units_failed: u64,
    pub exports_failed: u64,
    pub poll_timeouts: u64,
    pub checkpoints_written: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            units_provisioned: AtomicU64::new(0),
            units_failed: AtomicU64::new(0),
            exports_failed: AtomicU64::new(0),
            poll_timeouts: AtomicU64::new(0),
            checkpoints_written: AtomicU64::new(0),
        }
    }

    fn bump(counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn inc_units_provisioned(&self) {
        Self::bump(&self.units_provisioned, "units_provisioned");
    }

    pub fn inc_units_failed(&self) {
        Self::bump(&self.units_failed, "units_failed");
    }

    pub fn inc_exports_failed(&self) {
        Self::bump(&self.exports_failed, "exports_failed");
    }

    pub fn inc_poll_timeouts(&self) {
        Self::bump(&self.poll_timeouts, "poll_timeouts");
    }

    pub fn inc_checkpoints_written(&self) {
        Self::bump(&self.checkpoints_written, "checkpoints_written");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            units_provisioned: self.units_provisioned.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            exports_failed: self.exports_failed.load(Ordering::Relaxed),
            poll_timeouts: self.poll_timeouts.load(Ordering::Relaxed),
            checkpoints_written: self.checkpoints_written.load(Ordering::Relaxed),
        }
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            units_provisioned = s.units_provisioned,
            units_failed = s.units_failed,
            exports_failed = s.exports_failed,
            poll_timeouts = s.poll_timeouts,
            checkpoints_written = s.checkpoints_written,
        );
    }
}
