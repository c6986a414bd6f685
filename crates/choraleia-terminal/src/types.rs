//! Shared terminal types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier for an interactive session.
///
/// Sessions register under a transient UUID at creation and may be migrated
/// to a client-chosen stable id on the first `TermSetSessionId` frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a fresh random session ID (UUIDv4).
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What the session's byte duplex is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// A pseudo-terminal running the configured shell on this host.
    LocalPty,
    /// An SSH session with a PTY on a remote host.
    Ssh,
    /// `docker exec -it` into a container, locally or through SSH.
    DockerExec,
}

/// Snapshot of a live session, returned by `TerminalManager::list`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub kind: SessionKind,
    pub asset_id: Option<String>,
    pub last_command: Option<String>,
    pub scrollback_len: usize,
    pub is_alive: bool,
    pub created_at: u64,
}
