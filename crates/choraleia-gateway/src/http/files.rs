//! File browsing over the workspace filesystem abstraction.
//!
//! The backend follows the runtime: local runtimes read the host directory,
//! docker runtimes go through `docker exec`, and SSH assets expose their
//! remote filesystem over SFTP.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use choraleia_core::types::{AssetId, RuntimeType, WorkspaceId};
use choraleia_fs::{DirEntry, DockerFs, FileStat, LocalFs, SftpFs, TarStreamer, WorkspaceFs};
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;
use crate::http::ApiError;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

/// Pick the filesystem backend for a workspace.
async fn fs_for_workspace(
    state: &Arc<AppState>,
    workspace_id: &WorkspaceId,
) -> Result<Box<dyn WorkspaceFs>, ApiError> {
    let workspace = state.store.get_workspace(workspace_id)?;
    match workspace.runtime.runtime_type {
        RuntimeType::Local => Ok(Box::new(LocalFs)),
        RuntimeType::DockerLocal | RuntimeType::DockerRemote => {
            let (cli, container) = state.runtime.docker_access(workspace_id).await?;
            Ok(Box::new(DockerFs::new(Arc::new(cli), container)))
        }
    }
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<DirEntry>>, ApiError> {
    let fs = fs_for_workspace(&state, &WorkspaceId(id)).await?;
    let entries = fs
        .list_dir(&query.path)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(entries))
}

pub async fn stat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<FileStat>, ApiError> {
    let fs = fs_for_workspace(&state, &WorkspaceId(id)).await?;
    let stat = fs
        .stat(&query.path)
        .await
        .map_err(|e| ApiError::not_found(e.to_string()))?;
    Ok(Json(stat))
}

pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let fs = fs_for_workspace(&state, &WorkspaceId(id)).await?;
    let data = fs
        .read(&query.path)
        .await
        .map_err(|e| ApiError::not_found(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data))
}

#[derive(Debug, Deserialize)]
pub struct WriteBody {
    pub path: String,
    pub content: String,
}

pub async fn write(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<WriteBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = fs_for_workspace(&state, &WorkspaceId(id)).await?;
    fs.write(&body.path, body.content.as_bytes())
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(json!({ "written": body.content.len() })))
}

#[derive(Debug, Deserialize)]
pub struct RenameBody {
    pub from: String,
    pub to: String,
}

pub async fn rename(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = fs_for_workspace(&state, &WorkspaceId(id)).await?;
    fs.rename(&body.from, &body.to)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(json!({ "renamed": true })))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = fs_for_workspace(&state, &WorkspaceId(id)).await?;
    fs.remove(&query.path)
        .await
        .map_err(|e| ApiError::not_found(e.to_string()))?;
    Ok(Json(json!({ "deleted": true })))
}

/// Gzipped tar of a host-side workspace directory (local runtimes only;
/// container interiors are transferred file by file).
pub async fn archive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = state.store.get_workspace(&WorkspaceId(id))?;
    if workspace.runtime.runtime_type != RuntimeType::Local {
        return Err(ApiError::bad_request(
            "archive export is only available for local runtimes",
        ));
    }
    let bytes = TarStreamer::pack_dir(query.path.clone())
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"workspace.tar.gz\"".to_string(),
            ),
        ],
        bytes,
    ))
}

// ---------------------------------------------------------------------------
// SFTP browsing on SSH assets
// ---------------------------------------------------------------------------

pub async fn asset_list(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<DirEntry>>, ApiError> {
    let asset_id = AssetId(id);
    let asset = state.store.get_asset(&asset_id)?;
    let endpoint = asset
        .ssh
        .as_ref()
        .ok_or_else(|| ApiError::bad_request("asset has no ssh config"))?;
    let client = state.pool.get_or_connect(&asset_id, endpoint).await?;
    let fs = SftpFs::connect(client)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let entries = fs
        .list_dir(&query.path)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(entries))
}
