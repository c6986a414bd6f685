//! `TerminalManager` — owns and multiplexes all active interactive sessions.
//!
//! Sessions register under a transient UUID at creation; a client may migrate
//! one to a stable id with the first `TermSetSessionId` frame, after which
//! reconnects find the same scrollback and backend.

use std::sync::Arc;

use choraleia_ssh::{BoxedDuplex, SshClient};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{Result, TerminalError};
use crate::session::TermSession;
use crate::types::{SessionId, SessionInfo, SessionKind};

pub struct TerminalManager {
    sessions: DashMap<SessionId, Arc<TermSession>>,
}

impl TerminalManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Session creation
    // -----------------------------------------------------------------------

    /// Open a local PTY session with the configured shell.
    pub fn create_local(
        &self,
        shell: &str,
        login: bool,
        env: &[(String, String)],
        cwd: Option<&str>,
    ) -> Result<(SessionId, Arc<TermSession>)> {
        let session = Arc::new(TermSession::new_local_pty(shell, login, env, cwd)?);
        Ok(self.register(session, "local PTY"))
    }

    /// Open an interactive SSH shell on a pooled client.
    pub async fn create_ssh(
        &self,
        asset_id: &str,
        client: Arc<SshClient>,
        cols: u16,
        rows: u16,
    ) -> Result<(SessionId, Arc<TermSession>)> {
        let stream = client.open_shell(cols, rows).await?;
        let session = Arc::new(TermSession::new_from_stream(
            SessionKind::Ssh,
            Some(asset_id.to_string()),
            stream,
        ));
        Ok(self.register(session, "ssh"))
    }

    /// `docker exec -it` into a container on the local daemon.
    pub fn create_docker_exec_local(
        &self,
        container: &str,
        shell: &str,
    ) -> Result<(SessionId, Arc<TermSession>)> {
        let session = Arc::new(TermSession::new_docker_exec_local(container, shell)?);
        Ok(self.register(session, "docker exec (local)"))
    }

    /// `docker exec -it` into a container on a remote daemon, run through an
    /// SSH PTY so interactive programs behave.
    pub async fn create_docker_exec_remote(
        &self,
        asset_id: &str,
        client: Arc<SshClient>,
        container: &str,
        shell: &str,
        cols: u16,
        rows: u16,
    ) -> Result<(SessionId, Arc<TermSession>)> {
        let command = format!("docker exec -it {container} {shell}");
        let stream: BoxedDuplex = client.open_pty_command(cols, rows, Some(&command)).await?;
        let session = Arc::new(TermSession::new_from_stream(
            SessionKind::DockerExec,
            Some(asset_id.to_string()),
            stream,
        ));
        Ok(self.register(session, "docker exec (remote)"))
    }

    fn register(&self, session: Arc<TermSession>, what: &str) -> (SessionId, Arc<TermSession>) {
        let id = SessionId::new();
        info!(session = %id, kind = what, "session created");
        self.sessions.insert(id.clone(), Arc::clone(&session));
        (id, session)
    }

    // -----------------------------------------------------------------------
    // Lookup and migration
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &SessionId) -> Result<Arc<TermSession>> {
        self.sessions
            .get(id)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| TerminalError::SessionNotFound(id.to_string()))
    }

    /// Move a session to a client-chosen stable id. The scrollback and
    /// attached backend travel with the entry; the old id stops resolving.
    pub fn migrate(&self, from: &SessionId, to: &SessionId) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if self.sessions.contains_key(to) {
            return Err(TerminalError::SessionIdTaken(to.to_string()));
        }
        let (_, session) = self
            .sessions
            .remove(from)
            .ok_or_else(|| TerminalError::SessionNotFound(from.to_string()))?;
        self.sessions.insert(to.clone(), session);
        debug!(from = %from, to = %to, "session id migrated");
        Ok(())
    }

    /// Kill the backend and drop the session.
    pub async fn remove(&self, id: &SessionId) -> Result<()> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| TerminalError::SessionNotFound(id.to_string()))?;
        session.kill().await?;
        info!(session = %id, "session removed");
        Ok(())
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                SessionInfo {
                    id: entry.key().clone(),
                    kind: session.kind(),
                    asset_id: session.asset_id().map(String::from),
                    last_command: session.last_command(),
                    scrollback_len: session.scrollback_len(),
                    is_alive: session.is_alive(),
                    created_at: session.created_at(),
                }
            })
            .collect()
    }
}

impl Default for TerminalManager {
    fn default() -> Self {
        Self::new()
    }
}
