use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Workspace is {status}, cannot {op}")]
    WrongState { status: String, op: &'static str },

    #[error("No container reference for workspace {0}")]
    NoContainer(String),

    #[error("Store error: {0}")]
    Store(#[from] choraleia_store::StoreError),

    #[error("Docker error: {0}")]
    Docker(#[from] choraleia_docker::DockerError),

    #[error("SSH error: {0}")]
    Ssh(#[from] choraleia_ssh::SshError),

    #[error("Exec timed out after {secs}s")]
    ExecTimeout { secs: u64 },
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
