//! Transcript export: reshape the lab's export into per-thread records.

use tracing::debug;

use crate::api::error::ApiResult;
use crate::api::{ConversationApi, ExportedConversations, ExportedMessage};
use crate::domain::result::{ConversationRecord, MessageRecord, SenderIdentity, UnitHandle};

/// Fetch and normalize the unit's conversations.
///
/// Errors are returned to the caller; the scheduler downgrades them to an
/// empty conversation list on a success result.
pub async fn export_unit<A>(api: &A, handle: &UnitHandle) -> ApiResult<Vec<ConversationRecord>>
where
    A: ConversationApi + ?Sized,
{
    let export = api.export_conversations(&handle.experiment_id).await?;
    let records = reshape(&handle.cohort_id, export);
    debug!(
        experiment_id = %handle.experiment_id,
        threads = records.len(),
        "transcript exported"
    );
    Ok(records)
}

/// One record per thread of `cohort_id`, threads ordered by id and messages by
/// timestamp. Other cohorts in the export are ignored.
pub fn reshape(cohort_id: &str, mut export: ExportedConversations) -> Vec<ConversationRecord> {
    let Some(threads) = export.remove(cohort_id) else {
        return Vec::new();
    };

    threads
        .into_iter()
        .map(|(thread_id, messages)| {
            let mut messages: Vec<MessageRecord> = messages.into_iter().map(normalize).collect();
            messages.sort_by_key(|m| m.timestamp);
            ConversationRecord {
                cohort_id: cohort_id.to_string(),
                thread_id,
                messages,
            }
        })
        .collect()
}

fn normalize(message: ExportedMessage) -> MessageRecord {
    MessageRecord {
        id: message.id,
        text: message.message,
        timestamp: message.timestamp.to_utc(),
        sender: SenderIdentity {
            name: message.profile.name,
            avatar: message.profile.avatar,
            pronouns: message.profile.pronouns,
        },
        kind: message.kind,
        agent_id: message.agent_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ExportedProfile, WireTimestamp};
    use chrono::{TimeZone, Utc};
    use crate::domain::result::MessageKind;
    use std::collections::BTreeMap;

    fn msg(id: &str, secs: i64) -> ExportedMessage {
        ExportedMessage {
            id: id.to_string(),
            message: format!("text {id}"),
            timestamp: WireTimestamp::from(Utc.timestamp_opt(secs, 0).unwrap()),
            profile: ExportedProfile {
                name: "Ana".into(),
                avatar: Some("🐼".into()),
                pronouns: None,
            },
            kind: MessageKind::Participant,
            agent_id: None,
        }
    }

    #[test]
    fn test_reshape_keeps_only_unit_cohort_and_sorts_messages() {
        let mut export = ExportedConversations::new();
        let mut threads = BTreeMap::new();
        threads.insert("t-b".to_string(), vec![msg("late", 200), msg("early", 100)]);
        threads.insert("t-a".to_string(), vec![msg("only", 150)]);
        export.insert("co-1".to_string(), threads);
        let mut other = BTreeMap::new();
        other.insert("t-x".to_string(), vec![msg("x", 1)]);
        export.insert("co-2".to_string(), other);

        let records = reshape("co-1", export);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].thread_id, "t-a");
        assert_eq!(records[1].thread_id, "t-b");
        let ids: Vec<&str> = records[1].messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(records[1].messages[0].sender.avatar.as_deref(), Some("🐼"));
        assert_eq!(records[1].messages[0].text, "text early");
    }

    #[test]
    fn test_reshape_missing_cohort_is_empty() {
        assert!(reshape("co-missing", ExportedConversations::new()).is_empty());
    }
}
