//! Persisted conversation types: messages, parts, usage.

use choraleia_core::types::{ConversationId, MessageId, RoomId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// Role of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// Streaming lifecycle of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Completed,
    Error,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Streaming => "streaming",
            MessageStatus::Completed => "completed",
            MessageStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MessageStatus::Pending),
            "streaming" => Some(MessageStatus::Streaming),
            "completed" => Some(MessageStatus::Completed),
            "error" => Some(MessageStatus::Error),
            _ => None,
        }
    }
}

/// One structured piece of a message. Tool-using turns carry multiple rounds
/// inside a single assistant message; `round_index` groups the parts of each
/// round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
        #[serde(default)]
        round_index: u32,
    },
    Reasoning {
        text: String,
        #[serde(default)]
        round_index: u32,
    },
    ToolCall {
        id: String,
        name: String,
        /// JSON-encoded arguments exactly as produced by the model.
        arguments: String,
        #[serde(default)]
        round_index: u32,
    },
    ToolResult {
        tool_call_id: String,
        name: String,
        content: String,
        #[serde(default)]
        round_index: u32,
    },
}

impl MessagePart {
    pub fn round_index(&self) -> u32 {
        match self {
            MessagePart::Text { round_index, .. }
            | MessagePart::Reasoning { round_index, .. }
            | MessagePart::ToolCall { round_index, .. }
            | MessagePart::ToolResult { round_index, .. } => *round_index,
        }
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A node of the conversation branch tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: Role,
    /// `None` for tree roots.
    pub parent_id: Option<MessageId>,
    /// Position among siblings sharing `parent_id`; contiguous from 0.
    pub branch_index: i64,
    pub parts: Vec<MessagePart>,
    pub status: MessageStatus,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    pub created_at: String,
}

impl StoredMessage {
    /// Concatenated text parts, the plain-text view of the message.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let MessagePart::Text { text, .. } = part {
                out.push_str(text);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ConversationStatus::Active),
            "archived" => Some(ConversationStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub workspace_id: WorkspaceId,
    pub room_id: Option<RoomId>,
    pub title: String,
    pub model_id: Option<String>,
    pub status: ConversationStatus,
    /// Head of the active linear path; the engine moves this on every action.
    pub active_leaf_id: Option<MessageId>,
    pub compressed_at: Option<String>,
    pub compression_count: i64,
    pub summary: Option<String>,
    pub key_topics: Vec<String>,
    pub key_decisions: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Summary bookkeeping written by the compression pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionRecord {
    pub summary: String,
    pub key_topics: Vec<String>,
    pub key_decisions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_part_kind_tags_round_trip() {
        let parts = vec![
            MessagePart::Text {
                text: "hello".into(),
                round_index: 0,
            },
            MessagePart::Reasoning {
                text: "hmm".into(),
                round_index: 0,
            },
            MessagePart::ToolCall {
                id: "call_1".into(),
                name: "terminal_exec_command".into(),
                arguments: r#"{"command":"ls"}"#.into(),
                round_index: 0,
            },
            MessagePart::ToolResult {
                tool_call_id: "call_1".into(),
                name: "terminal_exec_command".into(),
                content: "ok".into(),
                round_index: 0,
            },
        ];

        let json = serde_json::to_string(&parts).unwrap();
        assert!(json.contains(r#""kind":"text""#));
        assert!(json.contains(r#""kind":"reasoning""#));
        assert!(json.contains(r#""kind":"tool_call""#));
        assert!(json.contains(r#""kind":"tool_result""#));

        let back: Vec<MessagePart> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, parts);
    }

    #[test]
    fn text_view_skips_non_text_parts() {
        let msg = StoredMessage {
            id: MessageId::new(),
            conversation_id: ConversationId::new(),
            role: Role::Assistant,
            parent_id: None,
            branch_index: 0,
            parts: vec![
                MessagePart::Reasoning {
                    text: "thinking".into(),
                    round_index: 0,
                },
                MessagePart::Text {
                    text: "answer".into(),
                    round_index: 0,
                },
            ],
            status: MessageStatus::Completed,
            finish_reason: Some("stop".into()),
            usage: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        assert_eq!(msg.text(), "answer");
    }
}
