use thiserror::Error;

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("docker command failed ({code}): {stderr}")]
    CommandFailed { code: i32, stderr: String },

    #[error("docker command timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("unparseable docker output: {0}")]
    Parse(String),

    #[error("SSH transport error: {0}")]
    Ssh(#[from] choraleia_ssh::SshError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DockerError>;
