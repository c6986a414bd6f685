//! Chat submission, the SSE reconnect/replay stream, and cancellation.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use choraleia_agent::engine::{ChatAction, EngineRequest};
use choraleia_core::types::{ConversationId, MessageId};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::app::AppState;
use crate::http::ApiError;

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub action: ChatAction,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

pub async fn submit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ChatBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = EngineRequest {
        conversation_id: ConversationId(id),
        model_id: body.model_id,
        action: body.action,
        parent_id: body.parent_id.map(MessageId),
        source_id: body.source_id.map(MessageId),
        content: body.content,
    };
    let message_id = state.engine.submit(request).await?;
    Ok(Json(json!({ "message_id": message_id })))
}

#[derive(Debug, Deserialize, Default)]
pub struct StreamQuery {
    #[serde(default)]
    pub last_event_id: Option<u64>,
}

/// Replay ring entries past `last_event_id`, then follow the live stream
/// until the done signal.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let conversation_id = ConversationId(id);
    let since = query.last_event_id.unwrap_or(0);

    let session = state
        .streams
        .get(&conversation_id)
        .ok_or_else(|| ApiError::not_found("no active stream for this conversation"))?;

    // Subscribe first so nothing falls between replay and live delivery;
    // duplicates are filtered by event id below.
    let (mut live, guard) = session.subscribe();
    let replay = session.events_since(since);
    let done = session.done_token();

    let stream = async_stream::stream! {
        let _guard = guard;
        let mut last_sent = since;

        for envelope in replay {
            last_sent = envelope.event_id;
            yield Ok(sse_event(&envelope));
        }

        loop {
            tokio::select! {
                maybe = live.recv() => {
                    match maybe {
                        Some(envelope) if envelope.event_id > last_sent => {
                            last_sent = envelope.event_id;
                            yield Ok(sse_event(&envelope));
                        }
                        Some(_) => {} // replayed already
                        None => break,
                    }
                }
                _ = done.cancelled() => {
                    // Drain anything still buffered, then finish.
                    while let Ok(envelope) = live.try_recv() {
                        if envelope.event_id > last_sent {
                            last_sent = envelope.event_id;
                            yield Ok(sse_event(&envelope));
                        }
                    }
                    break;
                }
            }
        }
        debug!("chat stream closed (last_event_id={last_sent})");
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(envelope: &choraleia_agent::StreamEnvelope) -> Event {
    Event::default()
        .id(envelope.event_id.to_string())
        .data(serde_json::to_string(&envelope.chunk).unwrap_or_default())
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cancelled = state.engine.cancel(&ConversationId(id));
    Ok(Json(json!({ "cancelled": cancelled })))
}
