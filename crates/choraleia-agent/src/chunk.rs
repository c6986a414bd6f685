//! Chat-stream chunk wire shape: one JSON object per server-sent event,
//! OpenAI-chunk compatible with a `conversation_id` extension.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    /// The assistant message id this stream is producing.
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub conversation_id: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
    /// Present on tool-result chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkToolCall {
    pub index: u32,
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ChunkFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFunction {
    pub name: String,
    pub arguments: String,
}

impl ChatChunk {
    fn base(message_id: &str, model: &str, conversation_id: &str, delta: ChunkDelta) -> Self {
        Self {
            id: message_id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            conversation_id: conversation_id.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
        }
    }

    /// First chunk of a stream, carrying the assistant role marker.
    pub fn role(message_id: &str, model: &str, conversation_id: &str) -> Self {
        Self::base(
            message_id,
            model,
            conversation_id,
            ChunkDelta {
                role: Some("assistant".into()),
                ..Default::default()
            },
        )
    }

    pub fn content(message_id: &str, model: &str, conversation_id: &str, text: &str) -> Self {
        Self::base(
            message_id,
            model,
            conversation_id,
            ChunkDelta {
                content: Some(text.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn reasoning(message_id: &str, model: &str, conversation_id: &str, text: &str) -> Self {
        Self::base(
            message_id,
            model,
            conversation_id,
            ChunkDelta {
                reasoning_content: Some(text.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn tool_call(
        message_id: &str,
        model: &str,
        conversation_id: &str,
        index: u32,
        call_id: &str,
        name: &str,
        arguments: &str,
    ) -> Self {
        Self::base(
            message_id,
            model,
            conversation_id,
            ChunkDelta {
                tool_calls: Some(vec![ChunkToolCall {
                    index,
                    id: call_id.to_string(),
                    call_type: "function".to_string(),
                    function: ChunkFunction {
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    },
                }]),
                ..Default::default()
            },
        )
    }

    pub fn tool_result(
        message_id: &str,
        model: &str,
        conversation_id: &str,
        tool_call_id: &str,
        content: &str,
    ) -> Self {
        Self::base(
            message_id,
            model,
            conversation_id,
            ChunkDelta {
                content: Some(content.to_string()),
                tool_call_id: Some(tool_call_id.to_string()),
                ..Default::default()
            },
        )
    }

    /// Terminal chunk with a finish reason and an empty delta.
    pub fn finish(message_id: &str, model: &str, conversation_id: &str, reason: &str) -> Self {
        let mut chunk = Self::base(message_id, model, conversation_id, ChunkDelta::default());
        chunk.choices[0].finish_reason = Some(reason.to_string());
        chunk
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first()?.finish_reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_chunk_has_expected_wire_shape() {
        let chunk = ChatChunk::content("msg-1", "test-model", "conv-1", "hello");
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains(r#""object":"chat.completion.chunk""#));
        assert!(json.contains(r#""conversation_id":"conv-1""#));
        assert!(json.contains(r#""content":"hello""#));
        // absent fields stay off the wire
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("finish_reason"));
        assert!(!json.contains("reasoning_content"));
    }

    #[test]
    fn finish_chunk_carries_reason() {
        let chunk = ChatChunk::finish("msg-1", "m", "c", "stop");
        assert_eq!(chunk.finish_reason(), Some("stop"));
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains(r#""finish_reason":"stop""#));
    }

    #[test]
    fn tool_chunks_round_trip() {
        let call = ChatChunk::tool_call("m1", "m", "c", 0, "call_1", "terminal_exec_command", "{}");
        let json = serde_json::to_string(&call).unwrap();
        assert!(json.contains(r#""type":"function""#));
        assert!(json.contains(r#""name":"terminal_exec_command""#));

        let result = ChatChunk::tool_result("m1", "m", "c", "call_1", "ok");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""tool_call_id":"call_1""#));
    }
}
