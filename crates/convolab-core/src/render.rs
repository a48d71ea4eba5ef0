//! Human-readable dialogue transcript rendered from unit results.

use std::fmt::{self, Write as _};

use chrono::{Local, TimeZone};

use crate::domain::result::{MessageKind, MessageRecord, UnitResult};

/// Render the transcript with timestamps in the local time zone.
pub fn render_dialogue(results: &[UnitResult]) -> String {
    render_dialogue_in(results, &Local)
}

/// Render the transcript with timestamps shown in `tz`.
///
/// Only success units with at least one conversation appear. Output depends
/// only on the input, so re-rendering a checkpoint overwrites it byte for byte.
pub fn render_dialogue_in<Tz>(results: &[UnitResult], tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let mut out = String::new();

    for result in results {
        if !result.is_success() || result.conversations.is_empty() {
            continue;
        }

        let _ = write!(out, "=== {} | group {}", result.behavior, result.group_size);
        if let Some(scenario) = &result.scenario_id {
            let _ = write!(out, " | {scenario}");
        }
        out.push_str(" ===\n");
        let _ = writeln!(
            out,
            "Experiment ID: {}",
            result.experiment_id.as_deref().unwrap_or("N/A")
        );

        for conversation in &result.conversations {
            for message in &conversation.messages {
                let local = message.timestamp.with_timezone(tz);
                let _ = writeln!(
                    out,
                    "[{}] {}: {}",
                    local.format("%H:%M:%S"),
                    sender_name(message),
                    single_line(&message.text)
                );
            }
        }
        out.push('\n');
    }

    out
}

fn sender_name(message: &MessageRecord) -> &str {
    let name = message.sender.name.trim();
    if !name.is_empty() {
        return name;
    }
    match (&message.kind, &message.agent_id) {
        (MessageKind::System, _) => "System",
        (_, Some(agent_id)) => agent_id,
        _ => "Unknown",
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::{
        CompletionOutcome, ConversationRecord, PartialHandle, SenderIdentity, UnitHandle,
    };
    use crate::domain::spec::UnitKey;
    use chrono::{DateTime, FixedOffset, Utc};

    fn message(id: &str, ts: &str, name: &str, text: &str, kind: MessageKind) -> MessageRecord {
        MessageRecord {
            id: id.into(),
            text: text.into(),
            timestamp: DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc),
            sender: SenderIdentity {
                name: name.into(),
                ..Default::default()
            },
            kind,
            agent_id: None,
        }
    }

    fn key(behavior: &str, size: u32) -> UnitKey {
        UnitKey {
            behavior: behavior.into(),
            group_size: size,
            scenario_id: None,
        }
    }

    fn results() -> Vec<UnitResult> {
        let handle = UnitHandle {
            experiment_id: "exp-1".into(),
            cohort_id: "co-1".into(),
        };
        let conversation = ConversationRecord {
            cohort_id: "co-1".into(),
            thread_id: "main".into(),
            messages: vec![
                message("m1", "2026-03-01T12:00:00Z", "", "Discussion started", MessageKind::System),
                message("m2", "2026-03-01T12:00:07Z", "Ana", "Tacos?\nOr   ramen", MessageKind::Participant),
                message("m3", "2026-03-01T12:01:30Z", "Gemini", "Both are nearby.", MessageKind::Agent),
            ],
        };
        vec![
            UnitResult::success(key("silent", 1), &handle, CompletionOutcome::Completed, vec![conversation], None),
            UnitResult::failed(key("silent", 2), "500 boom".into(), PartialHandle::default()),
            UnitResult::success(
                key("short", 1),
                &handle,
                CompletionOutcome::NotAwaited,
                vec![],
                Some("export failed".into()),
            ),
        ]
    }

    #[test]
    fn test_render_format_in_utc() {
        let text = render_dialogue_in(&results(), &Utc);
        let expected = "=== silent | group 1 ===\n\
                        Experiment ID: exp-1\n\
                        [12:00:00] System: Discussion started\n\
                        [12:00:07] Ana: Tacos? Or ramen\n\
                        [12:01:30] Gemini: Both are nearby.\n\
                        \n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_converts_to_given_zone() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let text = render_dialogue_in(&results(), &tz);
        assert!(text.contains("[14:00:07] Ana:"));
    }

    #[test]
    fn test_render_is_idempotent() {
        let results = results();
        assert_eq!(render_dialogue(&results), render_dialogue(&results));
    }

    #[test]
    fn test_render_skips_failed_and_empty_units() {
        let text = render_dialogue_in(&results()[1..], &Utc);
        assert!(text.is_empty());
    }
}
