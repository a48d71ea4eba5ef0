//! In-memory lab fake (testing only)
//!
//! [`ScriptedLab`] implements [`ProvisioningApi`] and [`ConversationApi`]
//! without any network. Failures are injected per experiment name and step;
//! message counts seen by the poller can be scripted per experiment.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::api::error::{ApiError, ApiResult};
use crate::api::{
    AgentParticipantRequest, CohortRequest, ConversationApi, ExperimentRequest,
    ExportedConversations, ExportedMessage, ExportedProfile, ProvisioningApi, WireTimestamp,
};
use crate::domain::result::{MessageKind, UnitHandle};

/// Where an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateExperiment,
    CreateCohort,
    /// Index within the cohort: 0 is the facilitator.
    AddParticipant(usize),
    Export,
}

#[derive(Debug, Clone)]
pub struct FakeCohort {
    pub id: String,
    pub request: CohortRequest,
    pub participants: Vec<AgentParticipantRequest>,
}

#[derive(Debug, Clone)]
pub struct FakeExperiment {
    pub id: String,
    pub request: ExperimentRequest,
    pub cohorts: Vec<FakeCohort>,
}

#[derive(Debug, Default)]
struct LabState {
    next_id: u64,
    experiments: BTreeMap<String, FakeExperiment>,
    failures: HashMap<(String, FailPoint), ApiError>,
    count_scripts: HashMap<String, VecDeque<ApiResult<usize>>>,
    calls: Vec<String>,
}

impl LabState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn name_of(&self, experiment_id: &str) -> ApiResult<String> {
        self.experiments
            .get(experiment_id)
            .map(|e| e.request.name.clone())
            .ok_or_else(|| ApiError::Status {
                status: 404,
                body: format!("experiment {experiment_id} not found"),
            })
    }

    fn injected(&self, name: &str, point: FailPoint) -> ApiResult<()> {
        match self.failures.get(&(name.to_string(), point)) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Scriptable in-memory lab.
#[derive(Debug, Default)]
pub struct ScriptedLab {
    state: Mutex<LabState>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedLab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every provisioning call, so overlapping units are observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail `point` for the experiment named `experiment_name`.
    pub fn fail_at(&self, experiment_name: &str, point: FailPoint, error: ApiError) {
        self.state()
            .failures
            .insert((experiment_name.to_string(), point), error);
    }

    /// Script the counts returned by `message_count` for an experiment.
    ///
    /// Once the script is exhausted the real transcript length is returned.
    pub fn script_message_counts(&self, experiment_name: &str, counts: Vec<ApiResult<usize>>) {
        self.state()
            .count_scripts
            .insert(experiment_name.to_string(), counts.into());
    }

    pub fn experiments(&self) -> Vec<FakeExperiment> {
        self.state().experiments.values().cloned().collect()
    }

    pub fn experiment_named(&self, name: &str) -> Option<FakeExperiment> {
        self.state()
            .experiments
            .values()
            .find(|e| e.request.name == name)
            .cloned()
    }

    /// Every call in arrival order, e.g. `create_cohort:Restaurant_silent_group1`.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, LabState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
        guard
    }

    fn transcript(cohort: &FakeCohort) -> Vec<ExportedMessage> {
        let base: DateTime<Utc> = DateTime::from_timestamp(1_772_366_400, 0).unwrap_or_default();
        cohort
            .participants
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let name = p
                    .name
                    .clone()
                    .unwrap_or_else(|| p.agent_config.agent_id.clone());
                ExportedMessage {
                    id: format!("{}-m{}", cohort.id, i + 1),
                    message: format!("hello from {name}"),
                    timestamp: WireTimestamp::from(base + ChronoDuration::seconds(5 * i as i64)),
                    profile: ExportedProfile {
                        name,
                        avatar: None,
                        pronouns: p.pronouns.clone(),
                    },
                    kind: if i == 0 {
                        MessageKind::Agent
                    } else {
                        MessageKind::Participant
                    },
                    agent_id: Some(p.agent_config.agent_id.clone()),
                }
            })
            .collect()
    }
}

#[async_trait]
impl ProvisioningApi for ScriptedLab {
    async fn create_experiment(&self, request: &ExperimentRequest) -> ApiResult<String> {
        let _guard = self.enter().await;
        let mut state = self.state();
        state.calls.push(format!("create_experiment:{}", request.name));
        state.injected(&request.name, FailPoint::CreateExperiment)?;

        let id = state.next_id("exp");
        state.experiments.insert(
            id.clone(),
            FakeExperiment {
                id: id.clone(),
                request: request.clone(),
                cohorts: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn create_cohort(&self, experiment_id: &str, request: &CohortRequest) -> ApiResult<String> {
        let _guard = self.enter().await;
        let mut state = self.state();
        let name = state.name_of(experiment_id)?;
        state.calls.push(format!("create_cohort:{name}"));
        state.injected(&name, FailPoint::CreateCohort)?;

        let id = state.next_id("cohort");
        if let Some(experiment) = state.experiments.get_mut(experiment_id) {
            experiment.cohorts.push(FakeCohort {
                id: id.clone(),
                request: request.clone(),
                participants: Vec::new(),
            });
        }
        Ok(id)
    }

    async fn add_agent_participant(
        &self,
        experiment_id: &str,
        cohort_id: &str,
        request: &AgentParticipantRequest,
    ) -> ApiResult<String> {
        let _guard = self.enter().await;
        let mut state = self.state();
        let name = state.name_of(experiment_id)?;
        state.calls.push(format!("add_agent_participant:{name}"));

        let index = state
            .experiments
            .get(experiment_id)
            .and_then(|e| e.cohorts.iter().find(|c| c.id == cohort_id))
            .map(|c| c.participants.len())
            .ok_or_else(|| ApiError::Status {
                status: 404,
                body: format!("cohort {cohort_id} not found"),
            })?;
        state.injected(&name, FailPoint::AddParticipant(index))?;

        let id = state.next_id("participant");
        if let Some(cohort) = state
            .experiments
            .get_mut(experiment_id)
            .and_then(|e| e.cohorts.iter_mut().find(|c| c.id == cohort_id))
        {
            cohort.participants.push(request.clone());
        }
        Ok(id)
    }
}

#[async_trait]
impl ConversationApi for ScriptedLab {
    async fn export_conversations(&self, experiment_id: &str) -> ApiResult<ExportedConversations> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        let name = state.name_of(experiment_id)?;
        state.calls.push(format!("export:{name}"));
        state.injected(&name, FailPoint::Export)?;

        let mut export = ExportedConversations::new();
        if let Some(experiment) = state.experiments.get(experiment_id) {
            for cohort in &experiment.cohorts {
                let mut threads = BTreeMap::new();
                threads.insert("main".to_string(), Self::transcript(cohort));
                export.insert(cohort.id.clone(), threads);
            }
        }
        Ok(export)
    }

    async fn message_count(&self, handle: &UnitHandle) -> ApiResult<usize> {
        let mut state = self.state();
        let name = state.name_of(&handle.experiment_id)?;
        if let Some(next) = state.count_scripts.get_mut(&name).and_then(VecDeque::pop_front) {
            return next;
        }
        Ok(state
            .experiments
            .get(&handle.experiment_id)
            .and_then(|e| e.cohorts.iter().find(|c| c.id == handle.cohort_id))
            .map(|c| c.participants.len())
            .unwrap_or(0))
    }
}
