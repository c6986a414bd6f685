use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChoraleiaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Workspace not found: {id}")]
    WorkspaceNotFound { id: String },

    #[error("Asset not found: {id}")]
    AssetNotFound { id: String },

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Docker error: {0}")]
    Docker(String),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChoraleiaError {
    /// Short error code string surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            ChoraleiaError::Config(_) => "CONFIG_ERROR",
            ChoraleiaError::Validation(_) => "VALIDATION_ERROR",
            ChoraleiaError::WorkspaceNotFound { .. } => "WORKSPACE_NOT_FOUND",
            ChoraleiaError::AssetNotFound { .. } => "ASSET_NOT_FOUND",
            ChoraleiaError::ConversationNotFound { .. } => "CONVERSATION_NOT_FOUND",
            ChoraleiaError::InvalidTransition { .. } => "INVALID_TRANSITION",
            ChoraleiaError::Database(_) => "DATABASE_ERROR",
            ChoraleiaError::Docker(_) => "DOCKER_ERROR",
            ChoraleiaError::Ssh(_) => "SSH_ERROR",
            ChoraleiaError::Serialization(_) => "SERIALIZATION_ERROR",
            ChoraleiaError::Io(_) => "IO_ERROR",
            ChoraleiaError::Timeout { .. } => "TIMEOUT",
            ChoraleiaError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChoraleiaError>;
