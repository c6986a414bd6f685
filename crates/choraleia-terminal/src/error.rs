use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session id already in use: {0}")]
    SessionIdTaken(String),

    #[error("PTY spawn failed: {0}")]
    PtySpawn(String),

    #[error("Session backend closed")]
    BackendClosed,

    #[error("Command timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Output request timed out")]
    OutputRequestTimeout,

    #[error("SSH error: {0}")]
    Ssh(#[from] choraleia_ssh::SshError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TerminalError>;
