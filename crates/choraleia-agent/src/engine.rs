//! The chat engine: action handling on the branch tree, the streaming turn
//! loop, tool dispatch, cancellation, and error shaping.
//!
//! A failing tool call never aborts the conversation (it becomes a tool
//! result); a failing model call never corrupts history (the partial
//! assistant message is finalized with a shaped error note).

use std::collections::BTreeMap;
use std::sync::Arc;

use choraleia_core::config::{AgentConfig, MAX_TOOL_ROUNDS};
use choraleia_core::types::{ConversationId, MessageId};
use choraleia_memory::MemoryManager;
use choraleia_store::types::{Conversation, MessagePart, MessageStatus, Role, Usage};
use choraleia_store::Store;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::chunk::ChatChunk;
use crate::error::{AgentError, Result};
use crate::history::build_wire_history;
use crate::prompt;
use crate::provider::{ChatRequest, LlmProvider, StreamEvent, WireMessage, WireToolCall};
use crate::shape::shape_llm_error;
use crate::stream_session::{StreamRegistry, StreamSession};
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatAction {
    New,
    Edit,
    Regenerate,
}

/// One chat submission.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub conversation_id: ConversationId,
    pub model_id: Option<String>,
    pub action: ChatAction,
    /// Explicit attach point for `new`; defaults to the active leaf.
    pub parent_id: Option<MessageId>,
    /// The edited user message or regenerated assistant message.
    pub source_id: Option<MessageId>,
    /// User text for `new`/`edit`; ignored for `regenerate`.
    pub content: String,
}

pub struct ChatEngine {
    store: Arc<Store>,
    memory: Arc<MemoryManager>,
    tools: Arc<ToolRegistry>,
    provider: Arc<dyn LlmProvider>,
    streams: Arc<StreamRegistry>,
    config: AgentConfig,
}

impl ChatEngine {
    pub fn new(
        store: Arc<Store>,
        memory: Arc<MemoryManager>,
        tools: Arc<ToolRegistry>,
        provider: Arc<dyn LlmProvider>,
        streams: Arc<StreamRegistry>,
        config: AgentConfig,
    ) -> Self {
        Self {
            store,
            memory,
            tools,
            provider,
            streams,
            config,
        }
    }

    pub fn streams(&self) -> Arc<StreamRegistry> {
        Arc::clone(&self.streams)
    }

    pub fn provider(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.provider)
    }

    /// Apply the action to the branch tree, open a stream session, and kick
    /// off the turn loop. Returns the assistant placeholder's id.
    pub async fn submit(self: &Arc<Self>, req: EngineRequest) -> Result<MessageId> {
        let conversation = self.store.get_conversation(&req.conversation_id)?;
        let model = req
            .model_id
            .clone()
            .or_else(|| conversation.model_id.clone())
            .unwrap_or_else(|| self.config.default_model.clone());

        let assistant_id = self.apply_action(&conversation, &req)?;
        self.store
            .set_active_leaf(&conversation.id, &assistant_id)?;

        let session = self.streams.open(&conversation.id);
        session.publish(ChatChunk::role(
            assistant_id.as_str(),
            &model,
            conversation.id.as_str(),
        ));

        let engine = Arc::clone(self);
        let conv = conversation.clone();
        let assistant = assistant_id.clone();
        let session_for_task = Arc::clone(&session);
        tokio::spawn(async move {
            engine.run(conv, model, assistant, session_for_task).await;
        });

        Ok(assistant_id)
    }

    /// Request cancellation of the running stream for a conversation.
    pub fn cancel(&self, conversation_id: &ConversationId) -> bool {
        self.streams.cancel(conversation_id)
    }

    // -----------------------------------------------------------------------
    // Tree actions
    // -----------------------------------------------------------------------

    fn apply_action(&self, conversation: &Conversation, req: &EngineRequest) -> Result<MessageId> {
        match req.action {
            ChatAction::New => {
                let parent = req
                    .parent_id
                    .clone()
                    .or_else(|| conversation.active_leaf_id.clone());
                let user = self.store.insert_message(
                    &conversation.id,
                    Role::User,
                    parent.as_ref(),
                    vec![MessagePart::Text {
                        text: req.content.clone(),
                        round_index: 0,
                    }],
                    MessageStatus::Completed,
                )?;
                let assistant = self.store.insert_message(
                    &conversation.id,
                    Role::Assistant,
                    Some(&user.id),
                    vec![],
                    MessageStatus::Pending,
                )?;
                Ok(assistant.id)
            }
            ChatAction::Edit => {
                let source_id = req.source_id.clone().ok_or_else(|| {
                    AgentError::InvalidRequest("edit requires source_id".into())
                })?;
                let source = self.store.get_message(&source_id)?;
                if source.role != Role::User {
                    return Err(AgentError::InvalidRequest(
                        "edit source must be a user message".into(),
                    ));
                }
                // Sibling of the original: same parent, next branch index.
                // The original branch stays reachable.
                let edited = self.store.insert_message(
                    &conversation.id,
                    Role::User,
                    source.parent_id.as_ref(),
                    vec![MessagePart::Text {
                        text: req.content.clone(),
                        round_index: 0,
                    }],
                    MessageStatus::Completed,
                )?;
                let assistant = self.store.insert_message(
                    &conversation.id,
                    Role::Assistant,
                    Some(&edited.id),
                    vec![],
                    MessageStatus::Pending,
                )?;
                Ok(assistant.id)
            }
            ChatAction::Regenerate => {
                let source_id = req.source_id.clone().ok_or_else(|| {
                    AgentError::InvalidRequest("regenerate requires source_id".into())
                })?;
                let source = self.store.get_message(&source_id)?;
                if source.role != Role::Assistant {
                    return Err(AgentError::InvalidRequest(
                        "regenerate source must be an assistant message".into(),
                    ));
                }
                let assistant = self.store.insert_message(
                    &conversation.id,
                    Role::Assistant,
                    source.parent_id.as_ref(),
                    vec![],
                    MessageStatus::Pending,
                )?;
                Ok(assistant.id)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Turn loop
    // -----------------------------------------------------------------------

    async fn run(
        self: Arc<Self>,
        conversation: Conversation,
        model: String,
        assistant_id: MessageId,
        session: Arc<StreamSession>,
    ) {
        let outcome = self
            .turn_loop(&conversation, &model, &assistant_id, &session)
            .await;

        if let Err(e) = outcome {
            // Shape for the user, log the cause, finalize the message.
            error!(conversation = %conversation.id, error = %e, "turn loop failed");
            let shaped = shape_llm_error(&e.to_string());
            let mut parts = self
                .store
                .get_message(&assistant_id)
                .map(|m| m.parts)
                .unwrap_or_default();
            parts.push(MessagePart::Text {
                text: shaped.clone(),
                round_index: parts.last().map(|p| p.round_index()).unwrap_or(0),
            });
            let _ = self.store.update_message(
                &assistant_id,
                &parts,
                MessageStatus::Completed,
                Some("stop"),
                None,
            );
            session.publish(ChatChunk::content(
                assistant_id.as_str(),
                &model,
                conversation.id.as_str(),
                &shaped,
            ));
            session.publish(ChatChunk::finish(
                assistant_id.as_str(),
                &model,
                conversation.id.as_str(),
                "stop",
            ));
        }
        self.streams.close(&conversation.id);
    }

    async fn turn_loop(
        &self,
        conversation: &Conversation,
        model: &str,
        assistant_id: &MessageId,
        session: &Arc<StreamSession>,
    ) -> Result<()> {
        let cancel = session.cancel_token();

        let path = self.store.linear_path(assistant_id)?;
        let mut wire = vec![WireMessage::system(self.compose_system_prompt(
            conversation,
            &path,
        )?)];
        wire.extend(build_wire_history(&path));

        let tool_defs = self.tools.definitions();
        let mut parts: Vec<MessagePart> = Vec::new();
        let mut usage = Usage::default();
        let mut round: u32 = 0;

        loop {
            if round as usize >= MAX_TOOL_ROUNDS {
                warn!(conversation = %conversation.id, "tool round limit reached");
                self.finalize(conversation, model, assistant_id, session, &parts, "stop", usage)?;
                return Ok(());
            }

            let request = ChatRequest {
                model: model.to_string(),
                messages: wire.clone(),
                tools: tool_defs.clone(),
                max_tokens: self.config.max_output_tokens,
            };

            let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
            let provider = Arc::clone(&self.provider);
            let provider_task =
                tokio::spawn(async move { provider.stream(&request, tx).await });

            let mut text = String::new();
            let mut reasoning = String::new();
            let mut pending_calls: BTreeMap<usize, (String, String, String)> = BTreeMap::new();

            let stream_result = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break StreamOutcome::Cancelled,
                    event = rx.recv() => match event {
                        None => break StreamOutcome::Ended,
                        Some(StreamEvent::TextDelta { text: delta }) => {
                            text.push_str(&delta);
                            session.publish(ChatChunk::content(
                                assistant_id.as_str(), model, conversation.id.as_str(), &delta,
                            ));
                        }
                        Some(StreamEvent::ReasoningDelta { text: delta }) => {
                            reasoning.push_str(&delta);
                            session.publish(ChatChunk::reasoning(
                                assistant_id.as_str(), model, conversation.id.as_str(), &delta,
                            ));
                        }
                        Some(StreamEvent::ToolCallDelta { index, id, name, arguments }) => {
                            let entry = pending_calls.entry(index).or_default();
                            if let Some(id) = id {
                                entry.0 = id;
                            }
                            if let Some(name) = name {
                                entry.1 = name;
                            }
                            entry.2.push_str(&arguments);
                        }
                        Some(StreamEvent::Done { tokens_in, tokens_out, .. }) => {
                            usage.prompt_tokens += tokens_in;
                            usage.completion_tokens += tokens_out;
                            break StreamOutcome::Ended;
                        }
                        Some(StreamEvent::Error { message }) => {
                            break StreamOutcome::Failed(message);
                        }
                    }
                }
            };
            drop(rx);

            match stream_result {
                StreamOutcome::Cancelled => {
                    info!(conversation = %conversation.id, "stream cancelled");
                    if !reasoning.is_empty() {
                        parts.push(MessagePart::Reasoning {
                            text: reasoning,
                            round_index: round,
                        });
                    }
                    if !text.is_empty() {
                        parts.push(MessagePart::Text {
                            text,
                            round_index: round,
                        });
                    }
                    self.finalize(
                        conversation,
                        model,
                        assistant_id,
                        session,
                        &parts,
                        "cancelled",
                        usage,
                    )?;
                    return Ok(());
                }
                StreamOutcome::Failed(message) => {
                    // Surfaced to the shaped-error path in `run`.
                    let _ = provider_task.await;
                    return Err(AgentError::Model(message));
                }
                StreamOutcome::Ended => {
                    if let Ok(Err(e)) = provider_task.await {
                        return Err(e.into());
                    }
                }
            }

            if !reasoning.is_empty() {
                parts.push(MessagePart::Reasoning {
                    text: reasoning.clone(),
                    round_index: round,
                });
            }
            if !text.is_empty() {
                parts.push(MessagePart::Text {
                    text: text.clone(),
                    round_index: round,
                });
            }

            if pending_calls.is_empty() {
                self.finalize(conversation, model, assistant_id, session, &parts, "stop", usage)?;
                return Ok(());
            }

            // Tool round: dispatch each call, append the paired parts, then
            // feed everything back into the wire history.
            let mut wire_calls = Vec::new();
            let mut wire_results = Vec::new();
            for (index, (call_id, name, arguments)) in &pending_calls {
                debug!(tool = %name, call = %call_id, "dispatching tool call");
                parts.push(MessagePart::ToolCall {
                    id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                    round_index: round,
                });
                session.publish(ChatChunk::tool_call(
                    assistant_id.as_str(),
                    model,
                    conversation.id.as_str(),
                    *index as u32,
                    call_id,
                    name,
                    arguments,
                ));

                let result = tokio::select! {
                    _ = cancel.cancelled() => {
                        // Cancelling a stream cancels tool calls in flight.
                        self.finalize(
                            conversation, model, assistant_id, session, &parts, "cancelled", usage,
                        )?;
                        return Ok(());
                    }
                    result = self.tools.invoke(name, arguments) => result,
                };

                parts.push(MessagePart::ToolResult {
                    tool_call_id: call_id.clone(),
                    name: name.clone(),
                    content: result.content.clone(),
                    round_index: round,
                });
                session.publish(ChatChunk::tool_result(
                    assistant_id.as_str(),
                    model,
                    conversation.id.as_str(),
                    call_id,
                    &result.content,
                ));

                wire_calls.push(WireToolCall::new(
                    call_id.clone(),
                    name.clone(),
                    arguments.clone(),
                ));
                wire_results.push(WireMessage::tool(call_id.clone(), result.content));
            }

            // Persist progress so a crash mid-turn loses at most one round.
            self.store.update_message(
                assistant_id,
                &parts,
                MessageStatus::Streaming,
                None,
                None,
            )?;

            let content = if text.is_empty() { None } else { Some(text.clone()) };
            wire.push(WireMessage::assistant(content, wire_calls));
            wire.extend(wire_results);
            round += 1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        conversation: &Conversation,
        model: &str,
        assistant_id: &MessageId,
        session: &Arc<StreamSession>,
        parts: &[MessagePart],
        finish_reason: &str,
        usage: Usage,
    ) -> Result<()> {
        self.store.update_message(
            assistant_id,
            parts,
            MessageStatus::Completed,
            Some(finish_reason),
            Some(usage),
        )?;
        session.publish(ChatChunk::finish(
            assistant_id.as_str(),
            model,
            conversation.id.as_str(),
            finish_reason,
        ));
        info!(
            conversation = %conversation.id,
            message = %assistant_id,
            finish_reason,
            "assistant message finalized"
        );
        Ok(())
    }

    fn compose_system_prompt(
        &self,
        conversation: &Conversation,
        path: &[choraleia_store::types::StoredMessage],
    ) -> Result<String> {
        let workspace = self.store.get_workspace(&conversation.workspace_id)?;
        let mut assets = Vec::new();
        for asset_id in &workspace.asset_ids {
            if let Ok(asset) = self.store.get_asset(asset_id) {
                assets.push(asset);
            }
        }

        let memory_context = if workspace.memory_enabled {
            let latest_user = path
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.text());
            match latest_user {
                Some(query) if !query.is_empty() => self
                    .memory
                    .context_block(workspace.id.as_str(), &query)
                    .unwrap_or_default(),
                _ => None,
            }
        } else {
            None
        };

        Ok(prompt::compose(&workspace, &assets, memory_context.as_deref()))
    }
}

enum StreamOutcome {
    Ended,
    Cancelled,
    Failed(String),
}
