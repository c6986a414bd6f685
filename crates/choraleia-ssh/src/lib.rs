//! SSH fabric: pooled clients, proxy/jump dialing, remote exec, SFTP, and
//! tunnels (local, remote, dynamic) with byte accounting.
//!
//! Clients are cached per asset id and shared by every consumer — terminal
//! sessions, remote Docker, remote filesystems, browser tunnels. All russh
//! types stay inside this crate; consumers see boxed duplex streams.

pub mod client;
pub mod error;
pub mod pool;
pub mod proxy;
pub mod socks;
pub mod tunnel;

pub use client::{ExecOutput, SshClient};
pub use error::{Result, SshError};
pub use pool::SshPool;
pub use tunnel::{TunnelHandle, TunnelManager, TunnelSpec, TunnelStats, TunnelStatus, TunnelType};

use tokio::io::{AsyncRead, AsyncWrite};

/// A byte-oriented duplex returned by shell/forward opens.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

/// Boxed duplex so consumers don't name russh stream types.
pub type BoxedDuplex = Box<dyn Duplex>;
