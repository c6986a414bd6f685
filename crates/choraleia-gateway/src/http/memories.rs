use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use choraleia_memory::types::{ImportReport, Memory, NewMemory};
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;
use crate::http::ApiError;

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
) -> Result<Json<Vec<Memory>>, ApiError> {
    Ok(Json(state.memory.list(&workspace_id)?))
}

#[derive(Debug, Deserialize)]
pub struct RememberBody {
    #[serde(flatten)]
    pub entry: NewMemory,
}

pub async fn remember(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Json(body): Json<RememberBody>,
) -> Result<Json<Memory>, ApiError> {
    let mut entry = body.entry;
    entry.workspace_id = workspace_id;
    Ok(Json(state.memory.remember(&entry)?))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Memory>>, ApiError> {
    Ok(Json(state.memory.search(&workspace_id, &query.q, query.limit)?))
}

pub async fn export(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
) -> Result<Json<Vec<Memory>>, ApiError> {
    Ok(Json(state.memory.export(&workspace_id)?))
}

#[derive(Debug, Deserialize)]
pub struct ImportBody {
    pub entries: Vec<NewMemory>,
    #[serde(default = "default_skip")]
    pub skip_duplicates: bool,
}

fn default_skip() -> bool {
    true
}

pub async fn import(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Json(body): Json<ImportBody>,
) -> Result<Json<ImportReport>, ApiError> {
    let entries: Vec<NewMemory> = body
        .entries
        .into_iter()
        .map(|mut e| {
            e.workspace_id = workspace_id.clone();
            e
        })
        .collect();
    Ok(Json(state.memory.import(&entries, body.skip_duplicates)?))
}

pub async fn forget(
    State(state): State<Arc<AppState>>,
    Path((workspace_id, key)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.memory.delete(&workspace_id, &key)?;
    Ok(Json(json!({ "deleted": true })))
}
