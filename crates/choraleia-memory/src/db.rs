use rusqlite::{Connection, Result};

/// Initialise memory tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_memories_table(conn)?;
    create_fts_index(conn)?;
    Ok(())
}

fn create_memories_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            workspace_id  TEXT NOT NULL,
            scope         TEXT NOT NULL DEFAULT 'workspace',
            agent_id      TEXT,
            mem_type      TEXT NOT NULL DEFAULT 'fact',
            key           TEXT NOT NULL,
            content       TEXT NOT NULL,
            tags          TEXT NOT NULL DEFAULT '[]',
            importance    INTEGER NOT NULL DEFAULT 50,
            source_type   TEXT NOT NULL DEFAULT 'inferred',
            access_count  INTEGER NOT NULL DEFAULT 0,
            last_access   TEXT,
            expires_at    TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            UNIQUE(workspace_id, key)
        );
        CREATE INDEX IF NOT EXISTS idx_memories_workspace
            ON memories(workspace_id, importance DESC);",
    )
}

/// FTS5 virtual table over memory keys and content. content='' makes it an
/// external-content table so the index is synced manually on every write.
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts
            USING fts5(key, content, content='memories', content_rowid='id');",
    )
}
