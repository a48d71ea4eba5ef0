//! Batch lifecycle events.
//!
//! Every event carries an `event` field (`batch.started`, `unit.provisioned`,
//! ...) so JSON logs can be filtered without parsing messages.

use tracing::{info, warn};

/// Batch-scoped span; attach with `Instrument` so every unit task inherits it.
pub struct BatchSpan;

impl BatchSpan {
    pub fn span(batch_id: &str) -> tracing::Span {
        tracing::info_span!("convolab.batch", batch_id = %batch_id)
    }
}

pub fn emit_batch_started(total_units: usize, concurrency: usize, wait: bool) {
    info!(
        event = "batch.started",
        total_units,
        concurrency,
        wait_for_completion = wait,
    );
}

pub fn emit_window_started(window: usize, windows: usize, labels: &[String]) {
    info!(
        event = "window.started",
        window,
        windows,
        units = %labels.join(","),
    );
}

pub fn emit_unit_provisioned(label: &str, experiment_id: &str, cohort_id: &str) {
    info!(
        event = "unit.provisioned",
        unit = %label,
        experiment_id = %experiment_id,
        cohort_id = %cohort_id,
    );
}

pub fn emit_unit_provision_failed(label: &str, error: &dyn std::fmt::Display, orphaned: bool) {
    warn!(
        event = "unit.provision_failed",
        unit = %label,
        error = %error,
        orphaned,
    );
}

pub fn emit_unit_poll_settled(label: &str, completed: bool, elapsed_ms: u64) {
    if completed {
        info!(event = "unit.poll_settled", unit = %label, completed, elapsed_ms);
    } else {
        warn!(event = "unit.poll_settled", unit = %label, completed, elapsed_ms);
    }
}

pub fn emit_unit_export_failed(label: &str, error: &dyn std::fmt::Display) {
    warn!(event = "unit.export_failed", unit = %label, error = %error);
}

pub fn emit_checkpoint_written(results: usize, location: &str) {
    info!(event = "checkpoint.written", results, location = %location);
}

pub fn emit_batch_finished(total: usize, succeeded: usize, failed: usize, duration_ms: u64) {
    info!(
        event = "batch.finished",
        total,
        succeeded,
        failed,
        duration_ms,
    );
}
