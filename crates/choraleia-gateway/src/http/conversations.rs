use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use choraleia_core::types::{ConversationId, Room, RoomId, WorkspaceId};
use choraleia_store::types::{Conversation, ConversationStatus, StoredMessage};
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;
use crate::http::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateRoom {
    pub name: String,
}

pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Json(body): Json<CreateRoom>,
) -> Result<Json<Room>, ApiError> {
    let workspace_id = WorkspaceId(workspace_id);
    state.store.get_workspace(&workspace_id)?;
    let room = Room {
        id: RoomId::new(),
        workspace_id,
        name: body.name,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    state.store.insert_room(&room)?;
    Ok(Json(room))
}

pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
) -> Result<Json<Vec<Room>>, ApiError> {
    Ok(Json(state.store.list_rooms(&WorkspaceId(workspace_id))?))
}

#[derive(Debug, Deserialize)]
pub struct CreateConversation {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub model_id: Option<String>,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Json(body): Json<CreateConversation>,
) -> Result<Json<Conversation>, ApiError> {
    let workspace_id = WorkspaceId(workspace_id);
    let workspace = state.store.get_workspace(&workspace_id)?;

    let room_id = body
        .room_id
        .map(RoomId)
        .or_else(|| workspace.active_room_id.clone());

    let now = chrono::Utc::now().to_rfc3339();
    let conversation = Conversation {
        id: ConversationId::new(),
        workspace_id,
        room_id,
        title: body.title,
        model_id: body.model_id,
        status: ConversationStatus::Active,
        active_leaf_id: None,
        compressed_at: None,
        compression_count: 0,
        summary: None,
        key_topics: vec![],
        key_decisions: vec![],
        created_at: now.clone(),
        updated_at: now,
    };
    state.store.insert_conversation(&conversation)?;
    Ok(Json(conversation))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    Ok(Json(
        state.store.list_conversations(&WorkspaceId(workspace_id))?,
    ))
}

/// The active linear path of a conversation, root first.
pub async fn messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    let conversation = state.store.get_conversation(&ConversationId(id))?;
    match conversation.active_leaf_id {
        Some(leaf) => Ok(Json(state.store.linear_path(&leaf)?)),
        None => Ok(Json(Vec::new())),
    }
}

pub async fn compress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversation_id = ConversationId(id);
    let conversation = state.store.get_conversation(&conversation_id)?;
    let model = conversation
        .model_id
        .clone()
        .unwrap_or_else(|| state.config.agent.default_model.clone());

    let record = choraleia_agent::compress::compress_conversation(
        &state.store,
        state.engine.provider(),
        &model,
        &conversation_id,
    )
    .await?;

    match record {
        Some(record) => Ok(Json(json!({
            "compressed": true,
            "summary": record.summary,
            "key_topics": record.key_topics,
            "key_decisions": record.key_decisions,
        }))),
        None => Ok(Json(json!({ "compressed": false }))),
    }
}
