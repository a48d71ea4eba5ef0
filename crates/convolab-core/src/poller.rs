//! Completion polling by message-count stability.
//!
//! A conversation is considered finished once its message count has stayed at
//! the same positive value for `stability_threshold` consecutive samples.
//! This is a heuristic: a slow conversation can look settled, and an empty one
//! never does.

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::api::ConversationApi;
use crate::config::PollConfig;
use crate::domain::result::UnitHandle;

/// Tracks the current run of identical positive samples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StabilityTracker {
    last: Option<usize>,
    run: u32,
}

impl StabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample and return the current run length.
    ///
    /// The first sample of a new positive count starts the run at 1; zero
    /// resets it.
    pub fn observe(&mut self, count: usize) -> u32 {
        if count == 0 {
            self.run = 0;
        } else if self.last == Some(count) {
            self.run += 1;
        } else {
            self.run = 1;
        }
        self.last = Some(count);
        self.run
    }

    pub fn last(&self) -> Option<usize> {
        self.last
    }
}

/// Wait until the unit's conversation stabilizes.
///
/// Returns `true` on stability and `false` when `max_wait` elapses first.
/// Failed samples are logged and skipped: they neither extend nor reset the
/// current run.
pub async fn await_completion<A>(api: &A, handle: &UnitHandle, config: &PollConfig) -> bool
where
    A: ConversationApi + ?Sized,
{
    let sampling = async {
        let mut tracker = StabilityTracker::new();
        loop {
            match api.message_count(handle).await {
                Ok(count) => {
                    let run = tracker.observe(count);
                    debug!(
                        experiment_id = %handle.experiment_id,
                        count,
                        run,
                        "poll sample"
                    );
                    if run >= config.stability_threshold {
                        return;
                    }
                }
                Err(e) => {
                    warn!(
                        experiment_id = %handle.experiment_id,
                        error = %e,
                        transient = e.is_transient(),
                        "poll sample failed; retrying next tick"
                    );
                }
            }
            sleep(config.interval).await;
        }
    };

    timeout(config.max_wait, sampling).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::{ApiError, ApiResult};
    use crate::api::ExportedConversations;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays a fixed sample sequence, then repeats `tail` forever.
    struct SampleFeed {
        samples: Mutex<VecDeque<ApiResult<usize>>>,
        tail: Box<dyn Fn(u64) -> ApiResult<usize> + Send + Sync>,
        calls: Mutex<u64>,
    }

    impl SampleFeed {
        fn new(
            samples: Vec<ApiResult<usize>>,
            tail: impl Fn(u64) -> ApiResult<usize> + Send + Sync + 'static,
        ) -> Self {
            Self {
                samples: Mutex::new(samples.into()),
                tail: Box::new(tail),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u64 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ConversationApi for SampleFeed {
        async fn export_conversations(&self, _experiment_id: &str) -> ApiResult<ExportedConversations> {
            Ok(ExportedConversations::new())
        }

        async fn message_count(&self, _handle: &UnitHandle) -> ApiResult<usize> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            let next = self.samples.lock().unwrap().pop_front();
            next.unwrap_or_else(|| (self.tail)(n))
        }
    }

    fn handle() -> UnitHandle {
        UnitHandle {
            experiment_id: "exp-1".into(),
            cohort_id: "co-1".into(),
        }
    }

    fn config(threshold: u32, max_wait_secs: u64) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(max_wait_secs),
            stability_threshold: threshold,
        }
    }

    #[test]
    fn test_tracker_counts_runs_of_positive_samples() {
        let mut t = StabilityTracker::new();
        assert_eq!(t.observe(0), 0);
        assert_eq!(t.observe(0), 0);
        assert_eq!(t.observe(3), 1);
        assert_eq!(t.observe(3), 2);
        assert_eq!(t.observe(4), 1);
        assert_eq!(t.observe(0), 0);
        assert_eq!(t.last(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stabilizes_after_fifteen_equal_samples() {
        let mut samples = vec![Ok(0), Ok(0)];
        samples.extend(std::iter::repeat_with(|| Ok(3)).take(15));
        let feed = SampleFeed::new(samples, |_| Ok(99));

        let start = tokio::time::Instant::now();
        let done = await_completion(&feed, &handle(), &config(15, 3600)).await;

        assert!(done);
        assert_eq!(feed.calls(), 17);
        // 17 samples, 16 sleeps between them.
        assert_eq!(start.elapsed(), Duration::from_secs(160));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oscillating_count_times_out() {
        let feed = SampleFeed::new(vec![], |n| Ok(if n % 2 == 0 { 4 } else { 3 }));

        let start = tokio::time::Instant::now();
        let done = await_completion(&feed, &handle(), &config(15, 600)).await;

        assert!(!done);
        assert!(start.elapsed() >= Duration::from_secs(600));
        assert!(feed.calls() >= 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_messages_never_complete() {
        let feed = SampleFeed::new(vec![], |_| Ok(0));
        assert!(!await_completion(&feed, &handle(), &config(3, 300)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_are_non_advancing_samples() {
        let samples = vec![
            Ok(5),
            Err(ApiError::Transport("reset".into())),
            Ok(5),
            Err(ApiError::Status {
                status: 502,
                body: "bad gateway".into(),
            }),
            Ok(5),
        ];
        let feed = SampleFeed::new(samples, |_| Err(ApiError::Transport("down".into())));

        let done = await_completion(&feed, &handle(), &config(3, 3600)).await;
        assert!(done);
        assert_eq!(feed.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_errors_time_out_without_panicking() {
        let feed = SampleFeed::new(vec![], |_| Err(ApiError::Transport("down".into())));
        assert!(!await_completion(&feed, &handle(), &config(1, 120)).await);
    }
}
