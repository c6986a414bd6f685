use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Browser not found: {0}")]
    NotFound(String),

    #[error("Browser limit reached for conversation ({max} active)")]
    LimitReached { max: usize },

    #[error("Browser not ready after {secs}s")]
    NotReady { secs: u64 },

    #[error("DevTools error: {0}")]
    DevTools(String),

    #[error("Tab not found: {0}")]
    TabNotFound(String),

    #[error("Docker error: {0}")]
    Docker(#[from] choraleia_docker::DockerError),

    #[error("SSH error: {0}")]
    Ssh(#[from] choraleia_ssh::SshError),

    #[error("Store error: {0}")]
    Store(#[from] choraleia_store::StoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

pub type Result<T> = std::result::Result<T, BrowserError>;
