use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::types::*;

/// Maximum rendered context size in characters.
const MAX_CONTEXT_CHARS: usize = 2_000;
/// Maximum entries rendered into the context block.
const MAX_CONTEXT_ENTRIES: usize = 6;

/// Manages per-workspace memories.
///
/// Thread-safe: wraps the SQLite connection in a Mutex. Reads that feed the
/// system prompt also bump access counters, so there is no read-only path.
pub struct MemoryManager {
    db: Mutex<Connection>,
}

impl MemoryManager {
    pub fn new(conn: Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Store or update a memory. `(workspace_id, key)` is unique; on conflict
    /// the content is replaced and `updated_at` bumped. The FTS index is kept
    /// in sync manually (external-content table).
    pub fn remember(&self, new: &NewMemory) -> Result<Memory> {
        if new.key.trim().is_empty() {
            return Err(MemoryError::Invalid("key must not be empty".into()));
        }
        if new.importance > 100 {
            return Err(MemoryError::Invalid("importance must be 0..=100".into()));
        }
        if new.scope == MemoryScope::Agent && new.agent_id.is_none() {
            return Err(MemoryError::Invalid("agent scope requires agent_id".into()));
        }

        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let tags = serde_json::to_string(&new.tags)?;

        let existing: Option<i64> = db
            .query_row(
                "SELECT id FROM memories WHERE workspace_id = ?1 AND key = ?2",
                params![new.workspace_id, new.key],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                db.execute(
                    "UPDATE memories SET scope = ?1, agent_id = ?2, mem_type = ?3,
                     content = ?4, tags = ?5, importance = ?6, source_type = ?7,
                     expires_at = ?8, updated_at = ?9 WHERE id = ?10",
                    params![
                        new.scope.as_str(),
                        new.agent_id,
                        new.mem_type,
                        new.content,
                        tags,
                        new.importance as i64,
                        new.source_type,
                        new.expires_at,
                        now,
                        id,
                    ],
                )?;
                // Sync FTS: delete old row, insert new.
                db.execute(
                    "INSERT INTO memories_fts(memories_fts, rowid, key, content)
                     VALUES('delete', ?1, ?2, ?3)",
                    params![id, new.key, new.content],
                )?;
                db.execute(
                    "INSERT INTO memories_fts(rowid, key, content) VALUES(?1, ?2, ?3)",
                    params![id, new.key, new.content],
                )?;
                id
            }
            None => {
                db.execute(
                    "INSERT INTO memories
                     (workspace_id, scope, agent_id, mem_type, key, content, tags,
                      importance, source_type, expires_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                    params![
                        new.workspace_id,
                        new.scope.as_str(),
                        new.agent_id,
                        new.mem_type,
                        new.key,
                        new.content,
                        tags,
                        new.importance as i64,
                        new.source_type,
                        new.expires_at,
                        now,
                    ],
                )?;
                let id = db.last_insert_rowid();
                db.execute(
                    "INSERT INTO memories_fts(rowid, key, content) VALUES(?1, ?2, ?3)",
                    params![id, new.key, new.content],
                )?;
                id
            }
        };

        debug!(workspace = %new.workspace_id, key = %new.key, "memory stored");
        drop(db);
        self.get_by_id(id)
    }

    pub fn get(&self, workspace_id: &str, key: &str) -> Result<Option<Memory>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                &format!("SELECT {COLUMNS} FROM memories WHERE workspace_id = ?1 AND key = ?2"),
                params![workspace_id, key],
                row_to_memory,
            )
            .optional()?)
    }

    fn get_by_id(&self, id: i64) -> Result<Memory> {
        let db = self.db.lock().unwrap();
        db.query_row(
            &format!("SELECT {COLUMNS} FROM memories WHERE id = ?1"),
            params![id],
            row_to_memory,
        )
        .optional()?
        .ok_or(MemoryError::NotFound {
            key: id.to_string(),
        })
    }

    pub fn list(&self, workspace_id: &str) -> Result<Vec<Memory>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS} FROM memories WHERE workspace_id = ?1
             ORDER BY importance DESC, updated_at DESC"
        ))?;
        let rows = stmt.query_map(params![workspace_id], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn delete(&self, workspace_id: &str, key: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let row: Option<(i64, String)> = db
            .query_row(
                "SELECT id, content FROM memories WHERE workspace_id = ?1 AND key = ?2",
                params![workspace_id, key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((id, content)) = row else {
            return Err(MemoryError::NotFound { key: key.into() });
        };
        db.execute(
            "INSERT INTO memories_fts(memories_fts, rowid, key, content)
             VALUES('delete', ?1, ?2, ?3)",
            params![id, key, content],
        )?;
        db.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Full-text search over keys and content, expired entries excluded,
    /// ranked by FTS relevance then importance.
    pub fn search(&self, workspace_id: &str, query: &str, limit: usize) -> Result<Vec<Memory>> {
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS_M} FROM memories_fts
             JOIN memories m ON m.id = memories_fts.rowid
             WHERE memories_fts MATCH ?1
               AND m.workspace_id = ?2
               AND (m.expires_at IS NULL OR m.expires_at > ?3)
             ORDER BY rank, m.importance DESC
             LIMIT ?4"
        ))?;
        let rows = stmt.query_map(
            params![sanitized, workspace_id, now, limit as i64],
            row_to_memory,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Render the context block injected into the system prompt: the most
    /// relevant entries for `query`, bounded by entry and character budgets.
    /// Bumps access counters on every entry it returns.
    pub fn context_block(&self, workspace_id: &str, query: &str) -> Result<Option<String>> {
        let hits = self.search(workspace_id, query, MAX_CONTEXT_ENTRIES)?;
        if hits.is_empty() {
            return Ok(None);
        }

        let mut block = String::from("Relevant workspace memory:\n");
        let mut used = Vec::new();
        for mem in &hits {
            let line = format!("- {}: {}\n", mem.key, mem.content);
            if block.len() + line.len() > MAX_CONTEXT_CHARS {
                break;
            }
            block.push_str(&line);
            used.push(mem.id);
        }
        if used.is_empty() {
            return Ok(None);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        for id in used {
            db.execute(
                "UPDATE memories SET access_count = access_count + 1, last_access = ?1
                 WHERE id = ?2",
                params![now, id],
            )?;
        }
        Ok(Some(block))
    }

    /// Export every memory of a workspace.
    pub fn export(&self, workspace_id: &str) -> Result<Vec<Memory>> {
        self.list(workspace_id)
    }

    /// Import memories. With `skip_duplicates` an existing `(workspace, key)`
    /// row is left untouched, which makes a re-import a no-op; without it the
    /// incoming entry replaces the stored one.
    pub fn import(&self, entries: &[NewMemory], skip_duplicates: bool) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        for entry in entries {
            let exists = self.get(&entry.workspace_id, &entry.key)?.is_some();
            if exists && skip_duplicates {
                report.skipped += 1;
                continue;
            }
            self.remember(entry)?;
            if exists {
                report.replaced += 1;
            } else {
                report.imported += 1;
            }
        }
        Ok(report)
    }

    /// Remove expired entries; returns the number deleted.
    pub fn prune_expired(&self) -> Result<usize> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, key, content FROM memories
             WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        )?;
        let doomed: Vec<(i64, String, String)> = stmt
            .query_map(params![now], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        for (id, key, content) in &doomed {
            db.execute(
                "INSERT INTO memories_fts(memories_fts, rowid, key, content)
                 VALUES('delete', ?1, ?2, ?3)",
                params![id, key, content],
            )?;
            db.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        }
        Ok(doomed.len())
    }
}

const COLUMNS: &str = "id, workspace_id, scope, agent_id, mem_type, key, content, tags, \
                       importance, source_type, access_count, last_access, expires_at, \
                       created_at, updated_at";
const COLUMNS_M: &str = "m.id, m.workspace_id, m.scope, m.agent_id, m.mem_type, m.key, \
                         m.content, m.tags, m.importance, m.source_type, m.access_count, \
                         m.last_access, m.expires_at, m.created_at, m.updated_at";

/// Strip FTS5 operators so user text cannot break the MATCH expression.
fn sanitize_fts_query(query: &str) -> String {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .take(12)
        .collect();
    words.join(" OR ")
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let scope_str: String = row.get(2)?;
    let tags_json: String = row.get(7)?;
    Ok(Memory {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        scope: MemoryScope::parse(&scope_str).unwrap_or(MemoryScope::Workspace),
        agent_id: row.get(3)?,
        mem_type: row.get(4)?,
        key: row.get(5)?,
        content: row.get(6)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        importance: row.get::<_, i64>(8)?.clamp(0, 100) as u8,
        source_type: row.get(9)?,
        access_count: row.get(10)?,
        last_access: row.get(11)?,
        expires_at: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> MemoryManager {
        MemoryManager::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn mem(key: &str, content: &str, importance: u8) -> NewMemory {
        NewMemory {
            workspace_id: "ws-1".into(),
            scope: MemoryScope::Workspace,
            agent_id: None,
            mem_type: "fact".into(),
            key: key.into(),
            content: content.into(),
            tags: vec![],
            importance,
            source_type: "manual".into(),
            expires_at: None,
        }
    }

    #[test]
    fn remember_then_get() {
        let m = manager();
        m.remember(&mem("editor", "user prefers neovim", 80)).unwrap();
        let got = m.get("ws-1", "editor").unwrap().unwrap();
        assert_eq!(got.content, "user prefers neovim");
        assert_eq!(got.importance, 80);
    }

    #[test]
    fn upsert_replaces_content_on_same_key() {
        let m = manager();
        m.remember(&mem("editor", "vim", 50)).unwrap();
        m.remember(&mem("editor", "neovim", 60)).unwrap();
        let got = m.get("ws-1", "editor").unwrap().unwrap();
        assert_eq!(got.content, "neovim");
        assert_eq!(m.list("ws-1").unwrap().len(), 1);
    }

    #[test]
    fn search_matches_content_words() {
        let m = manager();
        m.remember(&mem("deploy", "deployments go through the staging cluster", 70))
            .unwrap();
        m.remember(&mem("editor", "user prefers neovim", 30)).unwrap();

        let hits = m.search("ws-1", "how do I deploy to staging?", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "deploy");
    }

    #[test]
    fn context_block_respects_budget_and_bumps_access() {
        let m = manager();
        m.remember(&mem("deploy", "deployments go through staging", 70))
            .unwrap();

        let block = m.context_block("ws-1", "deploy").unwrap().unwrap();
        assert!(block.contains("deploy"));

        let got = m.get("ws-1", "deploy").unwrap().unwrap();
        assert_eq!(got.access_count, 1);
        assert!(got.last_access.is_some());
    }

    #[test]
    fn import_with_skip_duplicates_is_idempotent() {
        let m = manager();
        let entries = vec![mem("a", "one", 50), mem("b", "two", 50)];

        let first = m.import(&entries, true).unwrap();
        assert_eq!(first.imported, 2);
        assert_eq!(first.skipped, 0);

        let second = m.import(&entries, true).unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(m.list("ws-1").unwrap().len(), 2);
    }

    #[test]
    fn expired_entries_are_excluded_and_pruned() {
        let m = manager();
        let mut e = mem("stale", "old news", 50);
        e.expires_at = Some("2000-01-01T00:00:00Z".into());
        m.remember(&e).unwrap();

        assert!(m.search("ws-1", "news", 5).unwrap().is_empty());
        assert_eq!(m.prune_expired().unwrap(), 1);
        assert!(m.get("ws-1", "stale").unwrap().is_none());
    }

    #[test]
    fn agent_scope_requires_agent_id() {
        let m = manager();
        let mut e = mem("x", "y", 50);
        e.scope = MemoryScope::Agent;
        assert!(m.remember(&e).is_err());
    }
}
