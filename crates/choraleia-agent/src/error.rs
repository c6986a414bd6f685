use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Store error: {0}")]
    Store(#[from] choraleia_store::StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Model stream error: {0}")]
    Model(String),

    #[error("No active stream for conversation {0}")]
    NoStream(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
