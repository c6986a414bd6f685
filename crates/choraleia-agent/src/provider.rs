//! The seam to the LLM host: wire-form messages, tool definitions, and the
//! provider trait. Concrete HTTP adapters live outside this system; tests
//! use scripted providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Role of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call as carried on an assistant wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: WireFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    /// Raw JSON arguments exactly as the model produced them.
    pub arguments: String,
}

impl WireToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: "function".into(),
            function: WireFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// One message in the history sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: WireRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl WireMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: WireRole::System,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: WireRole::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<WireToolCall>) -> Self {
        Self {
            role: WireRole::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: WireRole::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Tool definition sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Request to the provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
}

/// A complete tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Non-streaming response.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Incremental events from a streaming response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    /// Tool-call fragments arrive interleaved; `index` correlates fragments
    /// of the same call, `id`/`name` appear on the first fragment.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Done {
        finish_reason: String,
        tokens_in: u32,
        tokens_out: u32,
    },
    Error {
        message: String,
    },
}

/// Common interface to tool-capable chat models.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// One-shot request/response.
    async fn generate(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Stream events through a channel. The default falls back to `generate`
    /// and emits one TextDelta (plus tool calls) followed by Done.
    async fn stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let resp = self.generate(req).await?;
        if !resp.content.is_empty() {
            let _ = tx
                .send(StreamEvent::TextDelta {
                    text: resp.content.clone(),
                })
                .await;
        }
        if let Some(reasoning) = &resp.reasoning {
            let _ = tx
                .send(StreamEvent::ReasoningDelta {
                    text: reasoning.clone(),
                })
                .await;
        }
        for (index, call) in resp.tool_calls.iter().enumerate() {
            let _ = tx
                .send(StreamEvent::ToolCallDelta {
                    index,
                    id: Some(call.id.clone()),
                    name: Some(call.name.clone()),
                    arguments: call.arguments.clone(),
                })
                .await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                finish_reason: resp.finish_reason.clone(),
                tokens_in: resp.tokens_in,
                tokens_out: resp.tokens_out,
            })
            .await;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}
