//! Lab API contracts.
//!
//! [`ProvisioningApi`] creates experiments, cohorts and agent participants;
//! [`ConversationApi`] reads transcripts back. Both are injectable so the
//! scheduler runs against [`HttpLabClient`] in production and
//! [`fakes::ScriptedLab`] in tests.

pub mod error;
pub mod fakes;
pub mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::behavior::ModelSettings;
use crate::domain::result::{MessageKind, UnitHandle};

pub use error::{ApiError, ApiResult};
pub use http::HttpLabClient;

// ---------------------------------------------------------------------------
// Provisioning requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRequest {
    pub name: String,
    pub description: String,
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StageConfig {
    Profile {
        name: String,
        #[serde(rename = "profileType")]
        profile_type: String,
    },
    GroupChat {
        name: String,
        description: String,
        #[serde(rename = "discussionConfig")]
        discussion: DiscussionConfig,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionConfig {
    pub chat_config: ChatConfig,
    pub timer_config: TimerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    pub message_char_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    pub duration_in_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortRequest {
    pub name: String,
    pub description: String,
    pub participant_config: CohortCapacity,
}

/// Cohort capacity; provisioning always sets `min == max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortCapacity {
    pub min_participants_per_cohort: u32,
    pub max_participants_per_cohort: u32,
}

impl CohortCapacity {
    pub fn exact(n: u32) -> Self {
        Self {
            min_participants_per_cohort: n,
            max_participants_per_cohort: n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub agent_id: String,
    pub prompt_context: String,
    pub model_settings: ModelSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentParticipantRequest {
    pub is_anonymous: bool,
    pub agent_config: AgentConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronouns: Option<String>,
}

// ---------------------------------------------------------------------------
// Export payloads
// ---------------------------------------------------------------------------

/// Message timestamp. The lab sends either an RFC 3339 string or a
/// `{seconds, nanoseconds}` object; an epoch pair chrono cannot represent
/// fails deserialization. Always serialized as RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimestamp", into = "DateTime<Utc>")]
pub struct WireTimestamp(DateTime<Utc>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Rfc3339(DateTime<Utc>),
    Epoch { seconds: i64, nanoseconds: u32 },
}

impl TryFrom<RawTimestamp> for WireTimestamp {
    type Error = String;

    fn try_from(raw: RawTimestamp) -> Result<Self, Self::Error> {
        match raw {
            RawTimestamp::Rfc3339(ts) => Ok(WireTimestamp(ts)),
            RawTimestamp::Epoch {
                seconds,
                nanoseconds,
            } => Utc
                .timestamp_opt(seconds, nanoseconds)
                .single()
                .map(WireTimestamp)
                .ok_or_else(|| format!("timestamp out of range: {seconds}s {nanoseconds}ns")),
        }
    }
}

impl From<DateTime<Utc>> for WireTimestamp {
    fn from(ts: DateTime<Utc>) -> Self {
        WireTimestamp(ts)
    }
}

impl From<WireTimestamp> for DateTime<Utc> {
    fn from(ts: WireTimestamp) -> Self {
        ts.0
    }
}

impl WireTimestamp {
    pub fn to_utc(self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronouns: Option<String>,
}

fn default_kind() -> MessageKind {
    MessageKind::Other
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedMessage {
    pub id: String,
    #[serde(alias = "text")]
    pub message: String,
    pub timestamp: WireTimestamp,
    #[serde(default)]
    pub profile: ExportedProfile,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// `cohort id -> thread id -> messages`.
pub type ExportedConversations = BTreeMap<String, BTreeMap<String, Vec<ExportedMessage>>>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Remote experiment provisioning. Every call mutates remote state.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    /// Create an experiment; returns the server-assigned id.
    async fn create_experiment(&self, request: &ExperimentRequest) -> ApiResult<String>;

    /// Create a cohort inside an experiment; returns the cohort id.
    async fn create_cohort(&self, experiment_id: &str, request: &CohortRequest) -> ApiResult<String>;

    /// Add an agent participant to a cohort; returns the participant id.
    async fn add_agent_participant(
        &self,
        experiment_id: &str,
        cohort_id: &str,
        request: &AgentParticipantRequest,
    ) -> ApiResult<String>;
}

/// Transcript access for provisioned units.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn export_conversations(&self, experiment_id: &str) -> ApiResult<ExportedConversations>;

    /// Total messages across all threads of the unit's cohort.
    async fn message_count(&self, handle: &UnitHandle) -> ApiResult<usize> {
        let export = self.export_conversations(&handle.experiment_id).await?;
        Ok(export
            .get(&handle.cohort_id)
            .map(|threads| threads.values().map(Vec::len).sum())
            .unwrap_or(0))
    }
}

/// Everything the batch scheduler needs from the lab.
pub trait LabApi: ProvisioningApi + ConversationApi {}

impl<T: ProvisioningApi + ConversationApi + ?Sized> LabApi for T {}
