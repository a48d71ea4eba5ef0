//! Unit provisioning: experiment → cohort → facilitator → participants.
//!
//! Four sequential remote steps with no retries. The first failing step
//! aborts the unit. Remote objects created before the failure are left in
//! place and reported through [`ProvisionFailure::partial`].

use std::fmt;

use tracing::{debug, instrument};

use crate::api::error::ApiError;
use crate::api::{
    AgentConfig, AgentParticipantRequest, ChatConfig, CohortCapacity, CohortRequest,
    DiscussionConfig, ExperimentRequest, ProvisioningApi, StageConfig, TimerConfig,
};
use crate::config::DesignConfig;
use crate::domain::behavior::ModelSettings;
use crate::domain::result::{PartialHandle, UnitHandle};
use crate::domain::scenario::ParticipantPersona;
use crate::domain::spec::ExperimentSpec;

const MESSAGE_CHAR_LIMIT: u32 = 500;

/// Design-wide settings the provisioner needs for every unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionSettings {
    pub name_prefix: String,
    pub chat_duration_minutes: u32,
    pub participant_model: ModelSettings,
    pub generic_participant_prompt: String,
}

impl From<&DesignConfig> for ProvisionSettings {
    fn from(design: &DesignConfig) -> Self {
        Self {
            name_prefix: design.name_prefix.clone(),
            chat_duration_minutes: design.chat_duration_minutes,
            participant_model: design.participant_model.clone(),
            generic_participant_prompt: design.generic_participant_prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    CreateExperiment,
    CreateCohort,
    AddFacilitator,
    /// 1-based participant index.
    AddParticipant(u32),
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionStep::CreateExperiment => write!(f, "create experiment"),
            ProvisionStep::CreateCohort => write!(f, "create cohort"),
            ProvisionStep::AddFacilitator => write!(f, "add facilitator"),
            ProvisionStep::AddParticipant(i) => write!(f, "add participant {i}"),
        }
    }
}

/// A unit whose provisioning stopped at `step`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to {step}: {source}")]
pub struct ProvisionFailure {
    pub step: ProvisionStep,
    #[source]
    pub source: ApiError,
    /// Remote objects already created; never cleaned up automatically.
    pub partial: PartialHandle,
}

/// Experiment name, e.g. `Restaurant_silent_group3`.
pub fn experiment_name(settings: &ProvisionSettings, spec: &ExperimentSpec) -> String {
    format!("{}_{}", settings.name_prefix, spec.label())
}

/// Build the create-experiment request for a unit.
pub fn experiment_request(settings: &ProvisionSettings, spec: &ExperimentSpec) -> ExperimentRequest {
    let narrative = spec
        .scenario
        .as_ref()
        .map(|s| s.narrative.clone())
        .unwrap_or_else(|| format!("Group discussion with {} participants", spec.group_size));

    ExperimentRequest {
        name: experiment_name(settings, spec),
        description: format!(
            "{narrative} | Facilitator: {} | Group: {}",
            spec.behavior.name, spec.group_size
        ),
        stages: vec![
            StageConfig::Profile {
                name: "Profile Setup".to_string(),
                profile_type: "ANONYMOUS_ANIMAL".to_string(),
            },
            StageConfig::GroupChat {
                name: "Group Discussion".to_string(),
                description: narrative,
                discussion: DiscussionConfig {
                    chat_config: ChatConfig {
                        message_char_limit: MESSAGE_CHAR_LIMIT,
                    },
                    timer_config: TimerConfig {
                        duration_in_minutes: settings.chat_duration_minutes,
                    },
                },
            },
        ],
    }
}

/// Cohort sized to exactly `group_size + 1` (facilitator plus participants).
pub fn cohort_request(spec: &ExperimentSpec) -> CohortRequest {
    let total = spec.group_size + 1;
    CohortRequest {
        name: format!("Cohort 1 - {}", spec.behavior.name),
        description: format!(
            "{total} participants (1 facilitator + {} participants)",
            spec.group_size
        ),
        participant_config: CohortCapacity::exact(total),
    }
}

fn facilitator_request(spec: &ExperimentSpec) -> AgentParticipantRequest {
    AgentParticipantRequest {
        is_anonymous: true,
        agent_config: AgentConfig {
            agent_id: spec.behavior.agent_id.clone(),
            prompt_context: spec.behavior.prompt().to_string(),
            model_settings: spec.behavior.model_settings.clone(),
        },
        name: spec.behavior.display_name.clone(),
        pronouns: None,
    }
}

/// Participant requests: scenario personas when present, generic ones otherwise.
pub fn participant_requests(
    settings: &ProvisionSettings,
    spec: &ExperimentSpec,
) -> Vec<AgentParticipantRequest> {
    // (agent id, persona, prompt)
    let personas: Vec<(String, ParticipantPersona, String)> = match &spec.scenario {
        Some(scenario) => scenario
            .participants
            .iter()
            .map(|p| {
                let agent_id = format!("participant_{}", p.name.to_lowercase().replace(' ', "_"));
                let prompt = format!("You are {}. {}", p.name, p.description);
                (agent_id, p.clone(), prompt)
            })
            .collect(),
        None => (1..=spec.group_size)
            .map(|i| {
                let name = format!("Participant {i}");
                let prompt = settings.generic_participant_prompt.replace("{name}", &name);
                (format!("participant_{i}"), ParticipantPersona::new(&name, ""), prompt)
            })
            .collect(),
    };

    personas
        .into_iter()
        .map(|(agent_id, persona, prompt)| AgentParticipantRequest {
            is_anonymous: true,
            agent_config: AgentConfig {
                agent_id,
                prompt_context: prompt,
                model_settings: settings.participant_model.clone(),
            },
            name: Some(persona.name),
            pronouns: persona.pronouns,
        })
        .collect()
}

/// Provision one unit.
#[instrument(skip_all, fields(unit = %spec.label()))]
pub async fn provision<A>(
    api: &A,
    spec: &ExperimentSpec,
    settings: &ProvisionSettings,
) -> Result<UnitHandle, ProvisionFailure>
where
    A: ProvisioningApi + ?Sized,
{
    let mut partial = PartialHandle::default();
    let fail = |step: ProvisionStep, source: ApiError, partial: &PartialHandle| ProvisionFailure {
        step,
        source,
        partial: partial.clone(),
    };

    let experiment_id = api
        .create_experiment(&experiment_request(settings, spec))
        .await
        .map_err(|e| fail(ProvisionStep::CreateExperiment, e, &partial))?;
    debug!(experiment_id = %experiment_id, "experiment created");
    partial.experiment_id = Some(experiment_id.clone());

    let cohort_id = api
        .create_cohort(&experiment_id, &cohort_request(spec))
        .await
        .map_err(|e| fail(ProvisionStep::CreateCohort, e, &partial))?;
    debug!(cohort_id = %cohort_id, "cohort created");
    partial.cohort_id = Some(cohort_id.clone());

    let facilitator_id = api
        .add_agent_participant(&experiment_id, &cohort_id, &facilitator_request(spec))
        .await
        .map_err(|e| fail(ProvisionStep::AddFacilitator, e, &partial))?;
    partial.participant_ids.push(facilitator_id);

    for (i, request) in participant_requests(settings, spec).iter().enumerate() {
        let participant_id = api
            .add_agent_participant(&experiment_id, &cohort_id, request)
            .await
            .map_err(|e| fail(ProvisionStep::AddParticipant(i as u32 + 1), e, &partial))?;
        partial.participant_ids.push(participant_id);
    }
    debug!(agents = partial.participant_ids.len(), "agents added");

    Ok(UnitHandle {
        experiment_id,
        cohort_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fakes::{FailPoint, ScriptedLab};
    use crate::domain::behavior::BehaviorVariant;
    use crate::domain::scenario::ScenarioDefinition;
    use std::sync::Arc;

    fn settings() -> ProvisionSettings {
        ProvisionSettings {
            name_prefix: "Restaurant".to_string(),
            chat_duration_minutes: 10,
            participant_model: ModelSettings::new("gemini-1.5-flash", 0.8),
            generic_participant_prompt: "You are {name}.".to_string(),
        }
    }

    fn spec(group_size: u32) -> ExperimentSpec {
        ExperimentSpec {
            behavior: Arc::new(
                BehaviorVariant::new(
                    "silent",
                    "gemini_silent",
                    "\nStay quiet.\n",
                    ModelSettings::new("gemini-1.5-pro", 0.6),
                )
                .with_display_name("Gemini"),
            ),
            group_size,
            scenario: None,
        }
    }

    fn scenario_spec() -> ExperimentSpec {
        let scenario = ScenarioDefinition {
            id: "downtown".into(),
            scenario_type: "group_chat".into(),
            narrative: "Friday dinner downtown".into(),
            participants: vec![
                ParticipantPersona::new("Ana Maria", "vegetarian"),
                ParticipantPersona::new("Bo", "wants noodles"),
            ],
        };
        ExperimentSpec {
            group_size: 2,
            scenario: Some(Arc::new(scenario)),
            ..spec(2)
        }
    }

    #[tokio::test]
    async fn test_provision_runs_four_steps_in_order() {
        let lab = ScriptedLab::new();
        let handle = provision(&lab, &spec(2), &settings()).await.unwrap();

        let exp = lab.experiment_named("Restaurant_silent_group2").unwrap();
        assert_eq!(exp.id, handle.experiment_id);
        assert_eq!(exp.cohorts.len(), 1);

        let cohort = &exp.cohorts[0];
        assert_eq!(cohort.id, handle.cohort_id);
        assert_eq!(cohort.request.participant_config, CohortCapacity::exact(3));
        assert_eq!(cohort.participants.len(), 3);

        let facilitator = &cohort.participants[0];
        assert_eq!(facilitator.agent_config.agent_id, "gemini_silent");
        assert_eq!(facilitator.agent_config.prompt_context, "Stay quiet.");
        assert_eq!(facilitator.name.as_deref(), Some("Gemini"));

        let p2 = &cohort.participants[2];
        assert_eq!(p2.agent_config.agent_id, "participant_2");
        assert_eq!(p2.agent_config.prompt_context, "You are Participant 2.");
        assert_eq!(p2.agent_config.model_settings.model, "gemini-1.5-flash");

        assert_eq!(
            lab.calls(),
            vec![
                "create_experiment:Restaurant_silent_group2",
                "create_cohort:Restaurant_silent_group2",
                "add_agent_participant:Restaurant_silent_group2",
                "add_agent_participant:Restaurant_silent_group2",
                "add_agent_participant:Restaurant_silent_group2",
            ]
        );
    }

    #[tokio::test]
    async fn test_scenario_personas_drive_participants() {
        let lab = ScriptedLab::new();
        provision(&lab, &scenario_spec(), &settings()).await.unwrap();

        let exp = lab.experiment_named("Restaurant_silent_group2_downtown").unwrap();
        assert!(exp.request.description.starts_with("Friday dinner downtown | Facilitator: silent"));
        let participants = &exp.cohorts[0].participants;
        assert_eq!(participants[1].agent_config.agent_id, "participant_ana_maria");
        assert_eq!(
            participants[1].agent_config.prompt_context,
            "You are Ana Maria. vegetarian"
        );
        assert_eq!(participants[2].name.as_deref(), Some("Bo"));
    }

    #[tokio::test]
    async fn test_cohort_failure_aborts_and_reports_orphans() {
        let lab = ScriptedLab::new();
        lab.fail_at(
            "Restaurant_silent_group1",
            FailPoint::CreateCohort,
            ApiError::Status {
                status: 500,
                body: "cohort backend down".into(),
            },
        );

        let failure = provision(&lab, &spec(1), &settings()).await.unwrap_err();
        assert_eq!(failure.step, ProvisionStep::CreateCohort);
        assert_eq!(
            failure.to_string(),
            "failed to create cohort: 500 cohort backend down"
        );
        assert!(failure.partial.experiment_id.is_some());
        assert!(failure.partial.cohort_id.is_none());

        // No agent calls after the failing step.
        assert!(!lab.calls().iter().any(|c| c.starts_with("add_agent_participant")));
    }

    #[tokio::test]
    async fn test_participant_failure_names_index() {
        let lab = ScriptedLab::new();
        lab.fail_at(
            "Restaurant_silent_group3",
            FailPoint::AddParticipant(2),
            ApiError::Transport("connection reset".into()),
        );

        let failure = provision(&lab, &spec(3), &settings()).await.unwrap_err();
        assert_eq!(failure.step, ProvisionStep::AddParticipant(2));
        assert_eq!(failure.partial.participant_ids.len(), 2);
        assert!(failure.to_string().contains("add participant 2"));
    }

    #[test]
    fn test_experiment_request_shape() {
        let request = experiment_request(&settings(), &spec(4));
        assert_eq!(request.name, "Restaurant_silent_group4");
        assert_eq!(request.stages.len(), 2);
        match &request.stages[1] {
            StageConfig::GroupChat { discussion, .. } => {
                assert_eq!(discussion.chat_config.message_char_limit, 500);
                assert_eq!(discussion.timer_config.duration_in_minutes, 10);
            }
            other => panic!("unexpected stage {other:?}"),
        }
    }
}
