//! Typed CRUD over the SQLite schema, plus the branch-tree operations the
//! agent engine depends on.

use std::sync::Mutex;

use choraleia_core::types::{
    Asset, AssetId, ConversationId, MessageId, Room, RoomId, Workspace, WorkspaceId,
    WorkspaceRuntime, WorkspaceStatus,
};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::types::*;

/// Thread-safe store over a single SQLite connection.
pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Wrap an already-open connection and ensure the schema exists.
    pub fn new(conn: Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path).map_err(StoreError::Database)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::new(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    // -----------------------------------------------------------------------
    // Workspaces
    // -----------------------------------------------------------------------

    pub fn insert_workspace(&self, ws: &Workspace) -> Result<()> {
        let db = self.db.lock().unwrap();
        let runtime = serde_json::to_string(&ws.runtime)?;
        let asset_ids = serde_json::to_string(&ws.asset_ids)?;
        let tools = serde_json::to_string(&ws.tools)?;
        db.execute(
            "INSERT INTO workspaces
             (id, name, description, color, status, runtime, asset_ids, tools,
              active_room_id, memory_enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                ws.id.as_str(),
                ws.name,
                ws.description,
                ws.color,
                ws.status.to_string(),
                runtime,
                asset_ids,
                tools,
                ws.active_room_id.as_ref().map(|r| r.as_str()),
                ws.memory_enabled as i64,
                ws.created_at,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(format!("workspace name '{}' already exists", ws.name))
            }
            other => StoreError::Database(other),
        })?;
        debug!(id = %ws.id, name = %ws.name, "workspace inserted");
        Ok(())
    }

    pub fn get_workspace(&self, id: &WorkspaceId) -> Result<Workspace> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, name, description, color, status, runtime, asset_ids, tools,
                    active_room_id, memory_enabled, created_at, updated_at
             FROM workspaces WHERE id = ?1",
            params![id.as_str()],
            row_to_workspace,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound {
            what: "workspace",
            id: id.to_string(),
        })
    }

    pub fn get_workspace_by_name(&self, name: &str) -> Result<Option<Workspace>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                "SELECT id, name, description, color, status, runtime, asset_ids, tools,
                        active_room_id, memory_enabled, created_at, updated_at
                 FROM workspaces WHERE name = ?1",
                params![name],
                row_to_workspace,
            )
            .optional()?)
    }

    pub fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, name, description, color, status, runtime, asset_ids, tools,
                    active_room_id, memory_enabled, created_at, updated_at
             FROM workspaces ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_workspace)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Persist a status flip, with an optional operator-facing message
    /// (the stderr tail on `Error`).
    pub fn set_workspace_status(
        &self,
        id: &WorkspaceId,
        status: WorkspaceStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let changed = db.execute(
            "UPDATE workspaces SET status = ?1, status_message = ?2, updated_at = ?3
             WHERE id = ?4",
            params![status.to_string(), message, now, id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                what: "workspace",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Persist the runtime block (container id/name/ip are written here as the
    /// controller creates or discovers containers).
    pub fn set_workspace_runtime(&self, id: &WorkspaceId, runtime: &WorkspaceRuntime) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let json = serde_json::to_string(runtime)?;
        let changed = db.execute(
            "UPDATE workspaces SET runtime = ?1, updated_at = ?2 WHERE id = ?3",
            params![json, now, id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                what: "workspace",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn delete_workspace(&self, id: &WorkspaceId) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM rooms WHERE workspace_id = ?1",
            params![id.as_str()],
        )?;
        let changed = db.execute("DELETE FROM workspaces WHERE id = ?1", params![id.as_str()])?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                what: "workspace",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Assets
    // -----------------------------------------------------------------------

    pub fn insert_asset(&self, asset: &Asset) -> Result<()> {
        let db = self.db.lock().unwrap();
        let config = serde_json::to_string(&AssetConfigBlob {
            ssh: asset.ssh.clone(),
            docker_host: asset.docker_host.clone(),
        })?;
        db.execute(
            "INSERT INTO assets (id, name, kind, config, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                asset.id.as_str(),
                asset.name,
                asset.kind.as_str(),
                config,
                asset.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_asset(&self, id: &AssetId) -> Result<Asset> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, name, kind, config, created_at FROM assets WHERE id = ?1",
            params![id.as_str()],
            row_to_asset,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound {
            what: "asset",
            id: id.to_string(),
        })
    }

    pub fn list_assets(&self) -> Result<Vec<Asset>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare("SELECT id, name, kind, config, created_at FROM assets ORDER BY created_at")?;
        let rows = stmt.query_map([], row_to_asset)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Replace an asset's name and config blob.
    pub fn update_asset(&self, asset: &Asset) -> Result<()> {
        let db = self.db.lock().unwrap();
        let config = serde_json::to_string(&AssetConfigBlob {
            ssh: asset.ssh.clone(),
            docker_host: asset.docker_host.clone(),
        })?;
        let changed = db.execute(
            "UPDATE assets SET name = ?1, config = ?2 WHERE id = ?3",
            params![asset.name, config, asset.id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                what: "asset",
                id: asset.id.to_string(),
            });
        }
        Ok(())
    }

    pub fn delete_asset(&self, id: &AssetId) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute("DELETE FROM assets WHERE id = ?1", params![id.as_str()])?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                what: "asset",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    pub fn insert_room(&self, room: &Room) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO rooms (id, workspace_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                room.id.as_str(),
                room.workspace_id.as_str(),
                room.name,
                room.created_at
            ],
        )?;
        Ok(())
    }

    pub fn list_rooms(&self, workspace_id: &WorkspaceId) -> Result<Vec<Room>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, workspace_id, name, created_at FROM rooms
             WHERE workspace_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![workspace_id.as_str()], |row| {
            Ok(Room {
                id: RoomId(row.get(0)?),
                workspace_id: WorkspaceId(row.get(1)?),
                name: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    pub fn insert_conversation(&self, conv: &Conversation) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations
             (id, workspace_id, room_id, title, model_id, status, active_leaf_id,
              compressed_at, compression_count, summary, key_topics, key_decisions,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                conv.id.as_str(),
                conv.workspace_id.as_str(),
                conv.room_id.as_ref().map(|r| r.as_str()),
                conv.title,
                conv.model_id,
                conv.status.as_str(),
                conv.active_leaf_id.as_ref().map(|m| m.as_str()),
                conv.compressed_at,
                conv.compression_count,
                conv.summary,
                serde_json::to_string(&conv.key_topics)?,
                serde_json::to_string(&conv.key_decisions)?,
                conv.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, workspace_id, room_id, title, model_id, status, active_leaf_id,
                    compressed_at, compression_count, summary, key_topics, key_decisions,
                    created_at, updated_at
             FROM conversations WHERE id = ?1",
            params![id.as_str()],
            row_to_conversation,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound {
            what: "conversation",
            id: id.to_string(),
        })
    }

    pub fn list_conversations(&self, workspace_id: &WorkspaceId) -> Result<Vec<Conversation>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, workspace_id, room_id, title, model_id, status, active_leaf_id,
                    compressed_at, compression_count, summary, key_topics, key_decisions,
                    created_at, updated_at
             FROM conversations WHERE workspace_id = ?1 ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map(params![workspace_id.as_str()], row_to_conversation)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn set_active_leaf(&self, id: &ConversationId, leaf: &MessageId) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let changed = db.execute(
            "UPDATE conversations SET active_leaf_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![leaf.as_str(), now, id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                what: "conversation",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Record a completed compression pass.
    pub fn record_compression(&self, id: &ConversationId, rec: &CompressionRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let changed = db.execute(
            "UPDATE conversations
             SET compressed_at = ?1, compression_count = compression_count + 1,
                 summary = ?2, key_topics = ?3, key_decisions = ?4, updated_at = ?1
             WHERE id = ?5",
            params![
                now,
                rec.summary,
                serde_json::to_string(&rec.key_topics)?,
                serde_json::to_string(&rec.key_decisions)?,
                id.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                what: "conversation",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Messages (branch tree)
    // -----------------------------------------------------------------------

    /// Insert a message as a child of `parent_id` (or as a root). The branch
    /// index is `max(sibling.branch_index) + 1`, computed inside the same
    /// transaction as the insert so concurrent writers cannot collide.
    pub fn insert_message(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        parent_id: Option<&MessageId>,
        parts: Vec<MessagePart>,
        status: MessageStatus,
    ) -> Result<StoredMessage> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let parent_key = parent_id.map(|p| p.as_str().to_string()).unwrap_or_default();

        // Parent must exist in the same conversation.
        if !parent_key.is_empty() {
            let found: Option<String> = tx
                .query_row(
                    "SELECT id FROM messages WHERE id = ?1 AND conversation_id = ?2",
                    params![parent_key, conversation_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_none() {
                return Err(StoreError::NotFound {
                    what: "parent message",
                    id: parent_key,
                });
            }
        }

        let branch_index: i64 = tx.query_row(
            "SELECT COALESCE(MAX(branch_index) + 1, 0) FROM messages
             WHERE conversation_id = ?1 AND parent_id = ?2",
            params![conversation_id.as_str(), parent_key],
            |row| row.get(0),
        )?;

        let id = MessageId::new();
        let created_at = chrono::Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO messages
             (id, conversation_id, role, parent_id, branch_index, parts, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.as_str(),
                conversation_id.as_str(),
                role.as_str(),
                parent_key,
                branch_index,
                serde_json::to_string(&parts)?,
                status.as_str(),
                created_at,
            ],
        )?;
        tx.commit()?;

        Ok(StoredMessage {
            id,
            conversation_id: conversation_id.clone(),
            role,
            parent_id: parent_id.cloned(),
            branch_index,
            parts,
            status,
            finish_reason: None,
            usage: None,
            created_at,
        })
    }

    pub fn get_message(&self, id: &MessageId) -> Result<StoredMessage> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, conversation_id, role, parent_id, branch_index, parts, status,
                    finish_reason, usage, created_at
             FROM messages WHERE id = ?1",
            params![id.as_str()],
            row_to_message,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound {
            what: "message",
            id: id.to_string(),
        })
    }

    /// Children of `parent_id` (or roots), ordered by branch index.
    pub fn children(
        &self,
        conversation_id: &ConversationId,
        parent_id: Option<&MessageId>,
    ) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().unwrap();
        let parent_key = parent_id.map(|p| p.as_str().to_string()).unwrap_or_default();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, role, parent_id, branch_index, parts, status,
                    finish_reason, usage, created_at
             FROM messages WHERE conversation_id = ?1 AND parent_id = ?2
             ORDER BY branch_index",
        )?;
        let rows = stmt.query_map(params![conversation_id.as_str(), parent_key], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Walk parent pointers from `leaf` to the root and return the path in
    /// root-first order. This is the linear conversation view.
    pub fn linear_path(&self, leaf: &MessageId) -> Result<Vec<StoredMessage>> {
        let mut path = Vec::new();
        let mut cursor = Some(leaf.clone());
        while let Some(id) = cursor {
            let msg = self.get_message(&id)?;
            cursor = msg.parent_id.clone();
            path.push(msg);
        }
        path.reverse();
        Ok(path)
    }

    /// Overwrite a message's parts and streaming state. The engine calls this
    /// as rounds complete and once more at finalisation.
    pub fn update_message(
        &self,
        id: &MessageId,
        parts: &[MessagePart],
        status: MessageStatus,
        finish_reason: Option<&str>,
        usage: Option<Usage>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let usage_json = usage.map(|value| serde_json::to_string(&value)).transpose()?;
        let changed = db.execute(
            "UPDATE messages SET parts = ?1, status = ?2, finish_reason = ?3, usage = ?4
             WHERE id = ?5",
            params![
                serde_json::to_string(parts)?,
                status.as_str(),
                finish_reason,
                usage_json,
                id.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                what: "message",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Browser instances
    // -----------------------------------------------------------------------

    /// Upsert a browser row; called on every state change.
    pub fn upsert_browser_instance(&self, row: &BrowserRow) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO browser_instances
             (id, conversation_id, workspace_id, runtime_type, container_id, container_name,
              container_ip, devtools_url, tabs, active_tab, status, ssh_asset_id,
              tunnel_local_port, last_activity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             ON CONFLICT(id) DO UPDATE SET
                container_id = excluded.container_id,
                container_name = excluded.container_name,
                container_ip = excluded.container_ip,
                devtools_url = excluded.devtools_url,
                tabs = excluded.tabs,
                active_tab = excluded.active_tab,
                status = excluded.status,
                ssh_asset_id = excluded.ssh_asset_id,
                tunnel_local_port = excluded.tunnel_local_port,
                last_activity = excluded.last_activity",
            params![
                row.id,
                row.conversation_id,
                row.workspace_id,
                row.runtime_type,
                row.container_id,
                row.container_name,
                row.container_ip,
                row.devtools_url,
                serde_json::to_string(&row.tabs)?,
                row.active_tab,
                row.status,
                row.ssh_asset_id,
                row.tunnel_local_port,
                row.last_activity,
            ],
        )?;
        Ok(())
    }

    pub fn list_browser_instances(&self) -> Result<Vec<BrowserRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, workspace_id, runtime_type, container_id,
                    container_name, container_ip, devtools_url, tabs, active_tab, status,
                    ssh_asset_id, tunnel_local_port, last_activity
             FROM browser_instances",
        )?;
        let rows = stmt.query_map([], row_to_browser)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn delete_browser_instance(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM browser_instances WHERE id = ?1", params![id])?;
        Ok(())
    }
}

/// Raw browser row as persisted; the browser controller owns the typed view.
#[derive(Debug, Clone)]
pub struct BrowserRow {
    pub id: String,
    pub conversation_id: String,
    pub workspace_id: Option<String>,
    pub runtime_type: String,
    pub container_id: String,
    pub container_name: String,
    pub container_ip: String,
    pub devtools_url: String,
    pub tabs: Vec<String>,
    pub active_tab: Option<String>,
    pub status: String,
    pub ssh_asset_id: Option<String>,
    pub tunnel_local_port: Option<i64>,
    pub last_activity: String,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct AssetConfigBlob {
    ssh: Option<choraleia_core::types::SshEndpoint>,
    docker_host: Option<choraleia_core::types::DockerHostConfig>,
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    let status_str: String = row.get(4)?;
    let runtime_json: String = row.get(5)?;
    let asset_ids_json: String = row.get(6)?;
    let tools_json: String = row.get(7)?;
    Ok(Workspace {
        id: WorkspaceId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        color: row.get(3)?,
        status: WorkspaceStatus::parse(&status_str).unwrap_or(WorkspaceStatus::Error),
        runtime: serde_json::from_str(&runtime_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        asset_ids: serde_json::from_str(&asset_ids_json).unwrap_or_default(),
        tools: serde_json::from_str(&tools_json).unwrap_or_default(),
        active_room_id: row.get::<_, Option<String>>(8)?.map(RoomId),
        memory_enabled: row.get::<_, i64>(9)? != 0,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn row_to_asset(row: &rusqlite::Row<'_>) -> rusqlite::Result<Asset> {
    let kind_str: String = row.get(2)?;
    let config_json: String = row.get(3)?;
    let blob: AssetConfigBlob = serde_json::from_str(&config_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Asset {
        id: AssetId(row.get(0)?),
        name: row.get(1)?,
        kind: choraleia_core::types::AssetKind::parse(&kind_str)
            .unwrap_or(choraleia_core::types::AssetKind::Local),
        ssh: blob.ssh,
        docker_host: blob.docker_host,
        created_at: row.get(4)?,
    })
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let status_str: String = row.get(5)?;
    let topics_json: String = row.get(10)?;
    let decisions_json: String = row.get(11)?;
    Ok(Conversation {
        id: ConversationId(row.get(0)?),
        workspace_id: WorkspaceId(row.get(1)?),
        room_id: row.get::<_, Option<String>>(2)?.map(RoomId),
        title: row.get(3)?,
        model_id: row.get(4)?,
        status: ConversationStatus::parse(&status_str).unwrap_or(ConversationStatus::Active),
        active_leaf_id: row.get::<_, Option<String>>(6)?.map(MessageId),
        compressed_at: row.get(7)?,
        compression_count: row.get(8)?,
        summary: row.get(9)?,
        key_topics: serde_json::from_str(&topics_json).unwrap_or_default(),
        key_decisions: serde_json::from_str(&decisions_json).unwrap_or_default(),
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role_str: String = row.get(2)?;
    let parent_raw: String = row.get(3)?;
    let parts_json: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let usage_json: Option<String> = row.get(8)?;
    Ok(StoredMessage {
        id: MessageId(row.get(0)?),
        conversation_id: ConversationId(row.get(1)?),
        role: Role::parse(&role_str).unwrap_or(Role::User),
        parent_id: if parent_raw.is_empty() {
            None
        } else {
            Some(MessageId(parent_raw))
        },
        branch_index: row.get(4)?,
        parts: serde_json::from_str(&parts_json).unwrap_or_default(),
        status: MessageStatus::parse(&status_str).unwrap_or(MessageStatus::Completed),
        finish_reason: row.get(7)?,
        usage: usage_json.and_then(|j| serde_json::from_str(&j).ok()),
        created_at: row.get(9)?,
    })
}

fn row_to_browser(row: &rusqlite::Row<'_>) -> rusqlite::Result<BrowserRow> {
    let tabs_json: String = row.get(8)?;
    Ok(BrowserRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        workspace_id: row.get(2)?,
        runtime_type: row.get(3)?,
        container_id: row.get(4)?,
        container_name: row.get(5)?,
        container_ip: row.get(6)?,
        devtools_url: row.get(7)?,
        tabs: serde_json::from_str(&tabs_json).unwrap_or_default(),
        active_tab: row.get(9)?,
        status: row.get(10)?,
        ssh_asset_id: row.get(11)?,
        tunnel_local_port: row.get(12)?,
        last_activity: row.get(13)?,
    })
}
