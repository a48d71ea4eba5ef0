//! Unit handles, exported conversations and terminal unit results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::spec::UnitKey;

/// Remote ids of a fully provisioned unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitHandle {
    pub experiment_id: String,
    pub cohort_id: String,
}

/// Remote objects created before a provisioning step failed.
///
/// These are not cleaned up automatically; they are recorded so an operator
/// can remove them by hand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialHandle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participant_ids: Vec<String>,
}

impl PartialHandle {
    pub fn is_empty(&self) -> bool {
        self.experiment_id.is_none() && self.cohort_id.is_none() && self.participant_ids.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronouns: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Participant,
    Agent,
    Mediator,
    System,
    #[serde(other)]
    Other,
}

/// One message in an exported thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub sender: SenderIdentity,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// One discussion thread within a unit's cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub cohort_id: String,
    pub thread_id: String,
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Success,
    Error,
}

/// How the completion wait ended for a provisioned unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOutcome {
    Completed,
    TimedOut,
    NotAwaited,
}

/// Terminal record for one unit. Immutable once appended to a [`BatchState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub behavior: String,
    pub group_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort_id: Option<String>,
    /// Provisioning failure message, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned: Option<PartialHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionOutcome>,
    /// Set when the unit provisioned but its transcript could not be fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_error: Option<String>,
    #[serde(default)]
    pub conversations: Vec<ConversationRecord>,
}

impl UnitResult {
    pub fn success(
        key: UnitKey,
        handle: &UnitHandle,
        completion: CompletionOutcome,
        conversations: Vec<ConversationRecord>,
        export_error: Option<String>,
    ) -> Self {
        Self {
            behavior: key.behavior,
            group_size: key.group_size,
            scenario_id: key.scenario_id,
            status: UnitStatus::Success,
            experiment_id: Some(handle.experiment_id.clone()),
            cohort_id: Some(handle.cohort_id.clone()),
            error: None,
            orphaned: None,
            completion: Some(completion),
            export_error,
            conversations,
        }
    }

    pub fn failed(key: UnitKey, error: String, orphaned: PartialHandle) -> Self {
        Self {
            behavior: key.behavior,
            group_size: key.group_size,
            scenario_id: key.scenario_id,
            status: UnitStatus::Error,
            experiment_id: None,
            cohort_id: None,
            error: Some(error),
            orphaned: (!orphaned.is_empty()).then_some(orphaned),
            completion: None,
            export_error: None,
            conversations: Vec::new(),
        }
    }

    pub fn key(&self) -> UnitKey {
        UnitKey {
            behavior: self.behavior.clone(),
            group_size: self.group_size,
            scenario_id: self.scenario_id.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UnitStatus::Success
    }

    pub fn message_count(&self) -> usize {
        self.conversations.iter().map(|c| c.messages.len()).sum()
    }
}

/// Append-only, ordered result list accumulated across windows.
#[derive(Debug, Clone, Default)]
pub struct BatchState {
    results: Vec<UnitResult>,
}

impl BatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one settled window, already in spec order.
    pub fn append_window(&mut self, window: Vec<UnitResult>) {
        self.results.extend(window);
    }

    pub fn results(&self) -> &[UnitResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(behavior: &str, size: u32) -> UnitKey {
        UnitKey {
            behavior: behavior.to_string(),
            group_size: size,
            scenario_id: None,
        }
    }

    #[test]
    fn test_failed_result_drops_empty_orphan_record() {
        let r = UnitResult::failed(key("silent", 2), "500 boom".into(), PartialHandle::default());
        assert_eq!(r.status, UnitStatus::Error);
        assert!(r.orphaned.is_none());

        let partial = PartialHandle {
            experiment_id: Some("exp-1".into()),
            ..Default::default()
        };
        let r = UnitResult::failed(key("silent", 2), "500 boom".into(), partial);
        assert_eq!(
            r.orphaned.and_then(|p| p.experiment_id),
            Some("exp-1".to_string())
        );
    }

    #[test]
    fn test_result_json_uses_snake_case_status() {
        let handle = UnitHandle {
            experiment_id: "exp-1".into(),
            cohort_id: "co-1".into(),
        };
        let r = UnitResult::success(
            key("silent", 1),
            &handle,
            CompletionOutcome::TimedOut,
            vec![],
            Some("503 unavailable".into()),
        );
        let raw = serde_json::to_value(&r).unwrap();
        assert_eq!(raw["status"], "success");
        assert_eq!(raw["completion"], "timed_out");
        assert_eq!(raw["export_error"], "503 unavailable");
        assert!(raw.get("error").is_none());
    }

    #[test]
    fn test_unknown_message_kind_maps_to_other() {
        let kind: MessageKind = serde_json::from_str("\"moderator_bot\"").unwrap();
        assert_eq!(kind, MessageKind::Other);
    }

    #[test]
    fn test_batch_state_counts() {
        let handle = UnitHandle {
            experiment_id: "e".into(),
            cohort_id: "c".into(),
        };
        let mut state = BatchState::new();
        state.append_window(vec![
            UnitResult::success(key("a", 1), &handle, CompletionOutcome::NotAwaited, vec![], None),
            UnitResult::failed(key("a", 2), "x".into(), PartialHandle::default()),
        ]);
        assert_eq!(state.len(), 2);
        assert_eq!(state.succeeded(), 1);
        assert_eq!(state.failed(), 1);
        assert_eq!(state.results()[1].key(), key("a", 2));
    }
}
