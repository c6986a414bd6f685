use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::app::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let db_ok = state.store.list_workspaces().is_ok();
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": db_ok,
        "ssh_clients": state.pool.len(),
        "tunnels": state.tunnels.list().len(),
        "terminal_sessions": state.terminal.list().len(),
    }))
}
