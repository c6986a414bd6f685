//! Docker control plane driven through the `docker` CLI.
//!
//! Every operation goes through a [`CommandRunner`], so the same code path
//! serves the local daemon (spawned process) and remote daemons (the command
//! dispatched over a pooled SSH session). There is no local fallback when an
//! SSH runner cannot reach its host.

pub mod cli;
pub mod error;
pub mod runner;
pub mod types;

pub use cli::DockerCli;
pub use error::{DockerError, Result};
pub use runner::{CommandRunner, LocalRunner, RunOutput, SshRunner};
pub use types::{ContainerInfo, ContainerSpec};
