//! Windowed batch scheduler.
//!
//! Specs are processed in windows of `concurrency` units. Inside a window the
//! provision, poll and export phases each fan out on a fresh `JoinSet` and are
//! joined before the next phase. Windows run strictly one after another, and
//! the full accumulated state is checkpointed after each one.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{warn, Instrument};
use uuid::Uuid;

use crate::api::LabApi;
use crate::checkpoint::CheckpointSink;
use crate::config::SchedulerConfig;
use crate::domain::error::{ConvolabError, Result};
use crate::domain::result::{BatchState, CompletionOutcome, PartialHandle, UnitHandle, UnitResult};
use crate::domain::spec::ExperimentSpec;
use crate::export::export_unit;
use crate::metrics::METRICS;
use crate::obs::{self, BatchSpan};
use crate::poller::await_completion;
use crate::provision::{provision, ProvisionSettings};
use crate::render::render_dialogue;

/// Drives a batch of specs against a lab.
pub struct BatchScheduler {
    api: Arc<dyn LabApi>,
    settings: Arc<ProvisionSettings>,
    config: SchedulerConfig,
    sink: Arc<dyn CheckpointSink>,
    batch_id: String,
}

/// A provisioned unit, or the terminal result of one that was not.
type Provisioned = std::result::Result<UnitHandle, UnitResult>;

impl BatchScheduler {
    pub fn new(
        api: Arc<dyn LabApi>,
        settings: ProvisionSettings,
        config: SchedulerConfig,
        sink: Arc<dyn CheckpointSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            api,
            settings: Arc::new(settings),
            config,
            sink,
            batch_id: Uuid::new_v4().to_string(),
        })
    }

    /// Tag log lines with a caller-chosen id, e.g. the checkpoint's batch id.
    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = batch_id.into();
        self
    }

    /// Run every spec and return the accumulated state.
    ///
    /// Per-unit failures become error results. Only an empty spec list or a
    /// failed checkpoint write aborts the batch.
    pub async fn run(&self, specs: &[ExperimentSpec]) -> Result<BatchState> {
        self.run_inner(specs)
            .instrument(BatchSpan::span(&self.batch_id))
            .await
    }

    async fn run_inner(&self, specs: &[ExperimentSpec]) -> Result<BatchState> {
        if specs.is_empty() {
            return Err(ConvolabError::setup("no specs to run"));
        }

        let started = Instant::now();
        let window_size = self.config.concurrency;
        let windows = specs.len().div_ceil(window_size);
        obs::emit_batch_started(specs.len(), window_size, self.config.wait_for_completion);

        let mut state = BatchState::new();
        for (n, window) in specs.chunks(window_size).enumerate() {
            let labels: Vec<String> = window.iter().map(ExperimentSpec::label).collect();
            obs::emit_window_started(n + 1, windows, &labels);

            let results = self.run_window(window).await;
            debug_assert_eq!(results.len(), window.len());
            state.append_window(results);
            self.checkpoint(&state)?;
        }

        METRICS.flush();
        obs::emit_batch_finished(
            state.len(),
            state.succeeded(),
            state.failed(),
            started.elapsed().as_millis() as u64,
        );
        Ok(state)
    }

    /// Settle one window; results come back in spec order.
    async fn run_window(&self, window: &[ExperimentSpec]) -> Vec<UnitResult> {
        let provisioned = self.provision_phase(window).await;
        let completions = if self.config.wait_for_completion {
            self.poll_phase(window, &provisioned).await
        } else {
            vec![CompletionOutcome::NotAwaited; window.len()]
        };
        self.export_phase(window, provisioned, completions).await
    }

    async fn provision_phase(&self, window: &[ExperimentSpec]) -> Vec<Provisioned> {
        let mut set = JoinSet::new();
        for (idx, spec) in window.iter().cloned().enumerate() {
            let api = Arc::clone(&self.api);
            let settings = Arc::clone(&self.settings);
            set.spawn(
                async move { (idx, provision(api.as_ref(), &spec, &settings).await) }
                    .in_current_span(),
            );
        }

        window
            .iter()
            .zip(join_ordered(set, window.len()).await)
            .map(|(spec, slot)| {
                let label = spec.label();
                match slot {
                    Some(Ok(handle)) => {
                        METRICS.inc_units_provisioned();
                        obs::emit_unit_provisioned(&label, &handle.experiment_id, &handle.cohort_id);
                        Ok(handle)
                    }
                    Some(Err(failure)) => {
                        METRICS.inc_units_failed();
                        obs::emit_unit_provision_failed(&label, &failure, !failure.partial.is_empty());
                        Err(UnitResult::failed(spec.key(), failure.to_string(), failure.partial))
                    }
                    None => {
                        METRICS.inc_units_failed();
                        obs::emit_unit_provision_failed(&label, &"unit task panicked", false);
                        Err(UnitResult::failed(
                            spec.key(),
                            "unit task panicked".to_string(),
                            PartialHandle::default(),
                        ))
                    }
                }
            })
            .collect()
    }

    async fn poll_phase(
        &self,
        window: &[ExperimentSpec],
        provisioned: &[Provisioned],
    ) -> Vec<CompletionOutcome> {
        let poll = self.config.poll;
        let mut set = JoinSet::new();
        for (idx, unit) in provisioned.iter().enumerate() {
            let Ok(handle) = unit else { continue };
            let api = Arc::clone(&self.api);
            let handle = handle.clone();
            set.spawn(
                async move {
                    let started = Instant::now();
                    let done = await_completion(api.as_ref(), &handle, &poll).await;
                    (idx, (done, started.elapsed()))
                }
                .in_current_span(),
            );
        }

        window
            .iter()
            .zip(provisioned)
            .zip(join_ordered(set, window.len()).await)
            .map(|((spec, unit), slot)| match (unit, slot) {
                (Err(_), _) => CompletionOutcome::NotAwaited,
                (Ok(_), Some((done, elapsed))) => {
                    if !done {
                        METRICS.inc_poll_timeouts();
                    }
                    obs::emit_unit_poll_settled(&spec.label(), done, elapsed.as_millis() as u64);
                    if done {
                        CompletionOutcome::Completed
                    } else {
                        CompletionOutcome::TimedOut
                    }
                }
                (Ok(_), None) => {
                    METRICS.inc_poll_timeouts();
                    warn!(unit = %spec.label(), "poll task panicked; exporting anyway");
                    CompletionOutcome::TimedOut
                }
            })
            .collect()
    }

    async fn export_phase(
        &self,
        window: &[ExperimentSpec],
        provisioned: Vec<Provisioned>,
        completions: Vec<CompletionOutcome>,
    ) -> Vec<UnitResult> {
        let mut set = JoinSet::new();
        for (idx, unit) in provisioned.iter().enumerate() {
            let Ok(handle) = unit else { continue };
            let api = Arc::clone(&self.api);
            let handle = handle.clone();
            set.spawn(
                async move { (idx, export_unit(api.as_ref(), &handle).await) }.in_current_span(),
            );
        }
        let mut exports = join_ordered(set, window.len()).await;

        window
            .iter()
            .zip(provisioned)
            .zip(completions)
            .enumerate()
            .map(|(idx, ((spec, unit), completion))| {
                let handle = match unit {
                    Ok(handle) => handle,
                    Err(failed) => return failed,
                };
                let (conversations, export_error) = match exports[idx].take() {
                    Some(Ok(conversations)) => (conversations, None),
                    Some(Err(e)) => {
                        METRICS.inc_exports_failed();
                        obs::emit_unit_export_failed(&spec.label(), &e);
                        (Vec::new(), Some(e.to_string()))
                    }
                    None => {
                        METRICS.inc_exports_failed();
                        obs::emit_unit_export_failed(&spec.label(), &"export task panicked");
                        (Vec::new(), Some("export task panicked".to_string()))
                    }
                };
                UnitResult::success(spec.key(), &handle, completion, conversations, export_error)
            })
            .collect()
    }

    fn checkpoint(&self, state: &BatchState) -> Result<()> {
        let dialogue = render_dialogue(state.results());
        self.sink.write(state.results(), &dialogue)?;
        METRICS.inc_checkpoints_written();
        obs::emit_checkpoint_written(state.len(), &self.sink.location());
        Ok(())
    }
}

/// Drain `set` into slots indexed by the task's position in the window.
///
/// A task that panicked leaves its slot empty.
async fn join_ordered<T: Send + 'static>(mut set: JoinSet<(usize, T)>, len: usize) -> Vec<Option<T>> {
    let mut slots: Vec<Option<T>> = (0..len).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, value)) => slots[idx] = Some(value),
            Err(e) => warn!(error = %e, "unit task did not complete"),
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_ordered_restores_spawn_order() {
        let mut set = JoinSet::new();
        for idx in 0..4usize {
            set.spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis((4 - idx as u64) * 5)).await;
                (idx, idx * 10)
            });
        }
        let slots = join_ordered(set, 4).await;
        assert_eq!(slots, vec![Some(0), Some(10), Some(20), Some(30)]);
    }

    #[tokio::test]
    async fn test_join_ordered_leaves_panicked_slot_empty() {
        let mut set = JoinSet::new();
        set.spawn(async { (0usize, "ok") });
        set.spawn(async {
            if true {
                panic!("boom");
            }
            (1usize, "unreachable")
        });
        let slots = join_ordered(set, 2).await;
        assert_eq!(slots, vec![Some("ok"), None]);
    }
}
