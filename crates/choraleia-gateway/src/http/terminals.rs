//! Terminal session introspection, including the output-fetch protocol
//! against a connected client's authoritative xterm scrollback.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use choraleia_terminal::{SessionId, SessionInfo};
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;
use crate::http::ApiError;

pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.terminal.list())
}

#[derive(Debug, Deserialize)]
pub struct OutputQuery {
    #[serde(default = "default_lines")]
    pub lines: usize,
}

fn default_lines() -> usize {
    100
}

/// Ask the connected client for the last `lines` of its xterm scrollback.
/// Fails with a timeout when the client doesn't answer within the deadline.
pub async fn client_output(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<OutputQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = SessionId::from(id);
    let ctrl = state
        .terminal_control
        .get(&session_id)
        .map(|c| c.clone())
        .ok_or_else(|| ApiError::not_found("no client attached to this session"))?;

    let output = state
        .output_requests
        .request(query.lines, move |frame| {
            ctrl.try_send(frame)
                .map_err(|e| choraleia_terminal::TerminalError::IoError(
                    std::io::Error::other(e.to_string()),
                ))
        })
        .await
        .map_err(|e| match e {
            choraleia_terminal::TerminalError::OutputRequestTimeout => {
                ApiError::new(
                    axum::http::StatusCode::GATEWAY_TIMEOUT,
                    "TIMEOUT",
                    "client did not answer the output request",
                )
            }
            other => ApiError::internal(other.to_string()),
        })?;
    Ok(Json(json!({ "output": output })))
}

pub async fn close(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = SessionId::from(id);
    state
        .terminal
        .remove(&session_id)
        .await
        .map_err(|e| ApiError::not_found(e.to_string()))?;
    state.terminal_control.remove(&session_id);
    Ok(Json(json!({ "closed": true })))
}
