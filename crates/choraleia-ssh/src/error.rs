use thiserror::Error;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("Authentication failed for {user}@{host}")]
    AuthFailed { user: String, host: String },

    #[error("No usable credential for {user}@{host}: {reason}")]
    NoCredential {
        user: String,
        host: String,
        reason: String,
    },

    #[error("Key error: {0}")]
    Key(String),

    #[error("Dial timed out after {secs}s: {host}:{port}")]
    DialTimeout { host: String, port: u16, secs: u64 },

    #[error("Proxy handshake failed: {0}")]
    Proxy(String),

    #[error("SFTP error: {0}")]
    Sftp(String),

    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("Remote command exited with {code}: {stderr}")]
    ExitStatus { code: u32, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SshError>;
