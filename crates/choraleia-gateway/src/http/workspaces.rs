use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use choraleia_core::types::{
    is_dns_label, Room, RoomId, Workspace, WorkspaceId, WorkspaceRuntime, WorkspaceStatus,
};
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;
use crate::http::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateWorkspace {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: String,
    pub runtime: WorkspaceRuntime,
    #[serde(default)]
    pub asset_ids: Vec<choraleia_core::types::AssetId>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub memory_enabled: bool,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateWorkspace>,
) -> Result<Json<Workspace>, ApiError> {
    if !is_dns_label(&body.name) {
        return Err(ApiError::bad_request(
            "workspace name must be a DNS label (lowercase letters, digits, hyphens)",
        ));
    }
    body.runtime.validate().map_err(ApiError::bad_request)?;
    if state.store.get_workspace_by_name(&body.name)?.is_some() {
        return Err(ApiError::bad_request(format!(
            "workspace name '{}' already exists",
            body.name
        )));
    }

    let now = chrono::Utc::now().to_rfc3339();
    let mut workspace = Workspace {
        id: WorkspaceId::new(),
        name: body.name,
        description: body.description,
        color: body.color,
        status: WorkspaceStatus::Stopped,
        runtime: body.runtime,
        asset_ids: body.asset_ids,
        tools: body.tools,
        active_room_id: None,
        memory_enabled: body.memory_enabled,
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    state.store.insert_workspace(&workspace)?;

    // Every workspace starts with one room.
    let room = Room {
        id: RoomId::new(),
        workspace_id: workspace.id.clone(),
        name: "general".into(),
        created_at: now,
    };
    state.store.insert_room(&room)?;
    workspace.active_room_id = Some(room.id);

    Ok(Json(workspace))
}

pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Workspace>>, ApiError> {
    Ok(Json(state.store.list_workspaces()?))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Workspace>, ApiError> {
    Ok(Json(state.store.get_workspace(&WorkspaceId(id))?))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = WorkspaceId(id);
    let workspace = state.store.get_workspace(&id)?;
    if workspace.status != WorkspaceStatus::Stopped {
        return Err(ApiError::bad_request("stop the workspace before deleting it"));
    }
    state.store.delete_workspace(&id)?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = WorkspaceId(id);
    state.runtime.start(&id).await?;
    Ok(Json(json!({ "status": "starting" })))
}

#[derive(Debug, Deserialize, Default)]
pub struct StopBody {
    #[serde(default)]
    pub force: bool,
}

pub async fn stop(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<StopBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = WorkspaceId(id);
    let force = body.map(|b| b.force).unwrap_or(false);
    state.runtime.stop(&id, force).await?;
    Ok(Json(json!({ "status": "stopping" })))
}

#[derive(Debug, Deserialize)]
pub struct ExecBody {
    pub argv: Vec<String>,
}

pub async fn exec(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ExecBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.argv.is_empty() {
        return Err(ApiError::bad_request("argv must not be empty"));
    }
    let output = state.runtime.exec(&WorkspaceId(id), &body.argv).await?;
    Ok(Json(json!({ "output": output })))
}
