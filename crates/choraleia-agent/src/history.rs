//! Translate the stored linear path into model wire form.
//!
//! A stored assistant message with N tool rounds expands into N assistant
//! wire messages, each followed by the tool messages answering its calls.
//! Mismatched pairs are dropped here so the wire history is always
//! well-formed: a `tool_call` with no `tool_result` in the same message
//! disappears, as does an orphaned `tool_result`.

use std::collections::BTreeMap;

use choraleia_store::types::{MessagePart, Role, StoredMessage};

use crate::provider::{WireMessage, WireToolCall};

/// Build the wire history for a linear path (root-first order). The final
/// assistant placeholder (empty, still streaming) contributes nothing.
pub fn build_wire_history(path: &[StoredMessage]) -> Vec<WireMessage> {
    let mut wire = Vec::new();
    for message in path {
        match message.role {
            Role::System => {
                let text = message.text();
                if !text.is_empty() {
                    wire.push(WireMessage::system(text));
                }
            }
            Role::User => {
                let text = message.text();
                if !text.is_empty() {
                    wire.push(WireMessage::user(text));
                }
            }
            Role::Assistant => expand_assistant(message, &mut wire),
            Role::Tool => {
                // Standalone tool rows don't occur in this tree shape; if one
                // ever does, it is only meaningful with a call id.
                if let Some(MessagePart::ToolResult {
                    tool_call_id,
                    content,
                    ..
                }) = message.parts.first()
                {
                    wire.push(WireMessage::tool(tool_call_id.clone(), content.clone()));
                }
            }
        }
    }
    wire
}

/// Expand one stored assistant message into its per-round wire messages.
fn expand_assistant(message: &StoredMessage, wire: &mut Vec<WireMessage>) {
    // Group parts by round, preserving round order.
    let mut rounds: BTreeMap<u32, Vec<&MessagePart>> = BTreeMap::new();
    for part in &message.parts {
        rounds.entry(part.round_index()).or_default().push(part);
    }

    for (_, parts) in rounds {
        let mut text = String::new();
        let mut calls: Vec<&MessagePart> = Vec::new();
        let mut results: BTreeMap<&str, (&str, &str)> = BTreeMap::new();

        for part in &parts {
            match part {
                MessagePart::Text { text: t, .. } => text.push_str(t),
                MessagePart::Reasoning { .. } => {
                    // Reasoning is never replayed to the model.
                }
                MessagePart::ToolCall { .. } => calls.push(part),
                MessagePart::ToolResult {
                    tool_call_id,
                    name,
                    content,
                    ..
                } => {
                    results.insert(tool_call_id.as_str(), (name.as_str(), content.as_str()));
                }
            }
        }

        // Keep only calls with a matching result; at most one result per call.
        let mut wire_calls = Vec::new();
        let mut wire_results = Vec::new();
        for part in calls {
            let MessagePart::ToolCall {
                id, name, arguments, ..
            } = part
            else {
                continue;
            };
            if let Some((_, content)) = results.remove(id.as_str()) {
                wire_calls.push(WireToolCall::new(id.clone(), name.clone(), arguments.clone()));
                wire_results.push(WireMessage::tool(id.clone(), content.to_string()));
            }
            // No result: dropped, the round was interrupted mid-flight.
        }
        // Whatever is left in `results` has no owning call; dropped likewise.

        // A round with no text and no answered calls (interrupted mid-flight)
        // is dropped entirely.
        if text.is_empty() && wire_calls.is_empty() {
            continue;
        }
        let content = if text.is_empty() { None } else { Some(text) };
        wire.push(WireMessage::assistant(content, wire_calls));
        wire.extend(wire_results);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use choraleia_core::types::{ConversationId, MessageId};
    use choraleia_store::types::MessageStatus;

    fn stored(role: Role, parts: Vec<MessagePart>) -> StoredMessage {
        StoredMessage {
            id: MessageId::new(),
            conversation_id: ConversationId::new(),
            role,
            parent_id: None,
            branch_index: 0,
            parts,
            status: MessageStatus::Completed,
            finish_reason: None,
            usage: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn text(t: &str, round: u32) -> MessagePart {
        MessagePart::Text {
            text: t.into(),
            round_index: round,
        }
    }

    #[test]
    fn two_round_assistant_expands_into_two_wire_messages() {
        let assistant = stored(
            Role::Assistant,
            vec![
                text("let me check", 0),
                MessagePart::ToolCall {
                    id: "c1".into(),
                    name: "terminal_exec_command".into(),
                    arguments: r#"{"command":"ls"}"#.into(),
                    round_index: 0,
                },
                MessagePart::ToolResult {
                    tool_call_id: "c1".into(),
                    name: "terminal_exec_command".into(),
                    content: "file.txt".into(),
                    round_index: 0,
                },
                text("found it", 1),
            ],
        );

        let wire = build_wire_history(&[stored(Role::User, vec![text("hi", 0)]), assistant]);
        // user, assistant(round0 + call), tool result, assistant(round1)
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[1].tool_calls.len(), 1);
        assert_eq!(wire[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(wire[3].content.as_deref(), Some("found it"));
        assert!(wire[3].tool_calls.is_empty());
    }

    #[test]
    fn orphaned_call_is_dropped() {
        // Interrupted round: the call has no result.
        let assistant = stored(
            Role::Assistant,
            vec![
                text("working", 0),
                MessagePart::ToolCall {
                    id: "c9".into(),
                    name: "terminal_exec_command".into(),
                    arguments: "{}".into(),
                    round_index: 0,
                },
            ],
        );
        let wire = build_wire_history(&[assistant]);
        assert_eq!(wire.len(), 1);
        assert!(wire[0].tool_calls.is_empty());
        assert_eq!(wire[0].content.as_deref(), Some("working"));
    }

    #[test]
    fn orphaned_result_is_dropped() {
        let assistant = stored(
            Role::Assistant,
            vec![
                MessagePart::ToolResult {
                    tool_call_id: "ghost".into(),
                    name: "terminal_exec_command".into(),
                    content: "noise".into(),
                    round_index: 0,
                },
                text("answer", 0),
            ],
        );
        let wire = build_wire_history(&[assistant]);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].content.as_deref(), Some("answer"));
        assert!(wire[0].tool_calls.is_empty());
    }

    #[test]
    fn round_with_only_unanswered_calls_vanishes() {
        let assistant = stored(
            Role::Assistant,
            vec![MessagePart::ToolCall {
                id: "c1".into(),
                name: "x".into(),
                arguments: "{}".into(),
                round_index: 0,
            }],
        );
        let wire = build_wire_history(&[assistant]);
        assert!(wire.is_empty());
    }

    #[test]
    fn reasoning_parts_never_reach_the_wire() {
        let assistant = stored(
            Role::Assistant,
            vec![
                MessagePart::Reasoning {
                    text: "secret chain of thought".into(),
                    round_index: 0,
                },
                text("visible", 0),
            ],
        );
        let wire = build_wire_history(&[assistant]);
        let json = serde_json::to_string(&wire).unwrap();
        assert!(!json.contains("secret chain of thought"));
        assert!(json.contains("visible"));
    }

    #[test]
    fn empty_placeholder_contributes_nothing() {
        let placeholder = stored(Role::Assistant, vec![]);
        let wire = build_wire_history(&[stored(Role::User, vec![text("q", 0)]), placeholder]);
        assert_eq!(wire.len(), 1);
    }
}
