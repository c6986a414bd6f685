use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use choraleia_browser::{BrowserInstance, BrowserRuntimeType};
use choraleia_core::types::{AssetId, BrowserId, ConversationId, WorkspaceId};
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;
use crate::http::ApiError;

#[derive(Debug, Deserialize)]
pub struct LaunchBody {
    #[serde(default)]
    pub workspace_id: Option<String>,
    /// local | remote_ssh
    #[serde(default = "default_runtime")]
    pub runtime_type: String,
    #[serde(default)]
    pub ssh_asset_id: Option<String>,
}

fn default_runtime() -> String {
    "local".to_string()
}

pub async fn launch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<LaunchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversation_id = ConversationId(id);
    state.store.get_conversation(&conversation_id)?;

    let runtime_type = BrowserRuntimeType::parse(&body.runtime_type)
        .ok_or_else(|| ApiError::bad_request("runtime_type must be local or remote_ssh"))?;
    if runtime_type == BrowserRuntimeType::RemoteSsh {
        let asset_id = body
            .ssh_asset_id
            .clone()
            .ok_or_else(|| ApiError::bad_request("remote_ssh browsers require ssh_asset_id"))?;
        // Make sure the pooled client exists before launch needs it.
        let asset_id = AssetId(asset_id);
        let asset = state.store.get_asset(&asset_id)?;
        let endpoint = asset
            .ssh
            .as_ref()
            .ok_or_else(|| ApiError::bad_request("asset has no ssh config"))?;
        state.pool.get_or_connect(&asset_id, endpoint).await?;
    }

    let browser_id = state
        .browser
        .launch(
            &conversation_id,
            body.workspace_id.map(WorkspaceId).as_ref(),
            runtime_type,
            body.ssh_asset_id.map(AssetId).as_ref(),
        )
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(json!({ "browser_id": browser_id })))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<BrowserInstance>>, ApiError> {
    Ok(Json(
        state
            .browser
            .list_for_conversation(&ConversationId(id))
            .await,
    ))
}

pub async fn close(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .browser
        .close(&BrowserId(id))
        .await
        .map_err(|e| ApiError::not_found(e.to_string()))?;
    Ok(Json(json!({ "closed": true })))
}
