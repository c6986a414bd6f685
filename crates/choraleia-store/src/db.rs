use rusqlite::{Connection, Result};

/// Initialise all tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_workspaces(conn)?;
    create_assets(conn)?;
    create_rooms(conn)?;
    create_conversations(conn)?;
    create_messages(conn)?;
    create_browser_instances(conn)?;
    Ok(())
}

fn create_workspaces(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS workspaces (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL UNIQUE,
            description     TEXT NOT NULL DEFAULT '',
            color           TEXT NOT NULL DEFAULT '',
            status          TEXT NOT NULL DEFAULT 'stopped',
            status_message  TEXT,
            runtime         TEXT NOT NULL,
            asset_ids       TEXT NOT NULL DEFAULT '[]',
            tools           TEXT NOT NULL DEFAULT '[]',
            active_room_id  TEXT,
            memory_enabled  INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );",
    )
}

fn create_assets(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS assets (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            kind        TEXT NOT NULL,
            config      TEXT NOT NULL DEFAULT '{}',
            created_at  TEXT NOT NULL
        );",
    )
}

fn create_rooms(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS rooms (
            id            TEXT PRIMARY KEY,
            workspace_id  TEXT NOT NULL REFERENCES workspaces(id),
            name          TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rooms_workspace
            ON rooms(workspace_id);",
    )
}

fn create_conversations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id                 TEXT PRIMARY KEY,
            workspace_id       TEXT NOT NULL REFERENCES workspaces(id),
            room_id            TEXT,
            title              TEXT NOT NULL DEFAULT '',
            model_id           TEXT,
            status             TEXT NOT NULL DEFAULT 'active',
            active_leaf_id     TEXT,
            compressed_at      TEXT,
            compression_count  INTEGER NOT NULL DEFAULT 0,
            summary            TEXT,
            key_topics         TEXT NOT NULL DEFAULT '[]',
            key_decisions      TEXT NOT NULL DEFAULT '[]',
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_workspace
            ON conversations(workspace_id, updated_at DESC);",
    )
}

/// The branch tree. `parent_id` uses '' (empty string) for roots so the
/// uniqueness constraint applies to root siblings too — SQLite treats NULLs
/// as distinct in unique indexes.
fn create_messages(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            role             TEXT NOT NULL,
            parent_id        TEXT NOT NULL DEFAULT '',
            branch_index     INTEGER NOT NULL,
            parts            TEXT NOT NULL DEFAULT '[]',
            status           TEXT NOT NULL DEFAULT 'pending',
            finish_reason    TEXT,
            usage            TEXT,
            created_at       TEXT NOT NULL,
            UNIQUE(conversation_id, parent_id, branch_index)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_parent
            ON messages(conversation_id, parent_id);",
    )
}

fn create_browser_instances(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS browser_instances (
            id                 TEXT PRIMARY KEY,
            conversation_id    TEXT NOT NULL,
            workspace_id       TEXT,
            runtime_type       TEXT NOT NULL,
            container_id       TEXT NOT NULL DEFAULT '',
            container_name     TEXT NOT NULL DEFAULT '',
            container_ip       TEXT NOT NULL DEFAULT '',
            devtools_url       TEXT NOT NULL DEFAULT '',
            tabs               TEXT NOT NULL DEFAULT '[]',
            active_tab         TEXT,
            status             TEXT NOT NULL DEFAULT 'starting',
            ssh_asset_id       TEXT,
            tunnel_local_port  INTEGER,
            last_activity      TEXT NOT NULL,
            created_at         TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_browsers_conversation
            ON browser_instances(conversation_id);",
    )
}
