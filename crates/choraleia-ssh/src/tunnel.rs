//! Port-forwarding tunnels over pooled SSH clients.
//!
//! Three modes mirroring the OpenSSH flags: local (-L), remote (-R), and
//! dynamic (-D, a minimal SOCKS5 server). Tunnel lifetime is decoupled from
//! any terminal session; byte counters are bumped per read inside the bridge
//! loops so live inspection observes progress.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use choraleia_core::types::{AssetId, TunnelId};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::SshClient;
use crate::error::{Result, SshError};
use crate::socks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelType {
    Local,
    Remote,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Stopped,
    Running,
    Error,
}

/// Persistable tunnel configuration (stored inside the owning SSH asset).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelSpec {
    pub id: TunnelId,
    pub asset_id: AssetId,
    #[serde(rename = "type")]
    pub tunnel_type: TunnelType,
    pub local_host: String,
    pub local_port: u16,
    /// Unused for dynamic tunnels.
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
}

/// Monotonic transfer counters shared with the bridge loops.
#[derive(Debug, Default)]
pub struct Counters {
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub connections: AtomicU64,
}

/// Snapshot of a tunnel's counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TunnelStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connections: u64,
}

/// One registered tunnel and its runtime state.
pub struct TunnelHandle {
    pub spec: TunnelSpec,
    status: RwLock<TunnelStatus>,
    error: RwLock<Option<String>>,
    counters: Arc<Counters>,
    cancel: RwLock<Option<CancellationToken>>,
}

impl TunnelHandle {
    fn new(spec: TunnelSpec) -> Self {
        Self {
            spec,
            status: RwLock::new(TunnelStatus::Stopped),
            error: RwLock::new(None),
            counters: Arc::new(Counters::default()),
            cancel: RwLock::new(None),
        }
    }

    pub fn status(&self) -> TunnelStatus {
        *self.status.read().unwrap()
    }

    pub fn last_error(&self) -> Option<String> {
        self.error.read().unwrap().clone()
    }

    pub fn stats(&self) -> TunnelStats {
        TunnelStats {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            connections: self.counters.connections.load(Ordering::Relaxed),
        }
    }

    fn set_status(&self, status: TunnelStatus, error: Option<String>) {
        *self.status.write().unwrap() = status;
        *self.error.write().unwrap() = error;
    }
}

/// Registry of tunnels across all assets.
pub struct TunnelManager {
    tunnels: dashmap::DashMap<TunnelId, Arc<TunnelHandle>>,
}

impl TunnelManager {
    pub fn new() -> Self {
        Self {
            tunnels: dashmap::DashMap::new(),
        }
    }

    /// Register tunnel specs found in asset rows at boot. Existing entries
    /// keep their state; unknown stopped entries are garbage-collected.
    pub fn rehydrate(&self, specs: Vec<TunnelSpec>) {
        let known: std::collections::HashSet<_> = specs.iter().map(|s| s.id.clone()).collect();
        for spec in specs {
            self.tunnels
                .entry(spec.id.clone())
                .or_insert_with(|| Arc::new(TunnelHandle::new(spec)));
        }
        // GC: configured-away tunnels that are not running.
        self.tunnels.retain(|id, handle| {
            known.contains(id) || handle.status() == TunnelStatus::Running
        });
    }

    pub fn get(&self, id: &TunnelId) -> Option<Arc<TunnelHandle>> {
        self.tunnels.get(id).map(|t| Arc::clone(&t))
    }

    pub fn list(&self) -> Vec<Arc<TunnelHandle>> {
        self.tunnels.iter().map(|t| Arc::clone(&t)).collect()
    }

    /// Start a tunnel. Idempotent: starting a running tunnel is a no-op.
    pub async fn start(&self, spec: TunnelSpec, client: Arc<SshClient>) -> Result<Arc<TunnelHandle>> {
        let handle = self
            .tunnels
            .entry(spec.id.clone())
            .or_insert_with(|| Arc::new(TunnelHandle::new(spec.clone())))
            .clone();

        if handle.status() == TunnelStatus::Running {
            debug!(tunnel = %handle.spec.id, "tunnel already running");
            return Ok(handle);
        }

        let cancel = CancellationToken::new();
        *handle.cancel.write().unwrap() = Some(cancel.clone());

        match handle.spec.tunnel_type {
            TunnelType::Local => spawn_local(Arc::clone(&handle), client, cancel).await?,
            TunnelType::Remote => spawn_remote(Arc::clone(&handle), client, cancel).await?,
            TunnelType::Dynamic => spawn_dynamic(Arc::clone(&handle), client, cancel).await?,
        }

        handle.set_status(TunnelStatus::Running, None);
        info!(tunnel = %handle.spec.id, kind = ?handle.spec.tunnel_type, "tunnel started");
        Ok(handle)
    }

    /// Stop a tunnel: cancel its accept loop and any per-connection bridges.
    pub async fn stop(&self, id: &TunnelId) -> Result<()> {
        let handle = self.get(id).ok_or_else(|| {
            SshError::Tunnel(format!("unknown tunnel {id}"))
        })?;
        if let Some(cancel) = handle.cancel.write().unwrap().take() {
            cancel.cancel();
        }
        handle.set_status(TunnelStatus::Stopped, None);
        info!(tunnel = %id, "tunnel stopped");
        Ok(())
    }

    /// Remove a stopped tunnel entirely.
    pub fn remove(&self, id: &TunnelId) -> Result<()> {
        match self.get(id) {
            Some(h) if h.status() == TunnelStatus::Running => {
                Err(SshError::Tunnel("stop the tunnel before removing it".into()))
            }
            Some(_) => {
                self.tunnels.remove(id);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Default for TunnelManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

async fn spawn_local(
    handle: Arc<TunnelHandle>,
    client: Arc<SshClient>,
    cancel: CancellationToken,
) -> Result<()> {
    let spec = handle.spec.clone();
    let remote_host = spec
        .remote_host
        .clone()
        .ok_or_else(|| SshError::Tunnel("local tunnel requires remote_host".into()))?;
    let remote_port = spec
        .remote_port
        .ok_or_else(|| SshError::Tunnel("local tunnel requires remote_port".into()))?;

    let listener = TcpListener::bind((spec.local_host.as_str(), spec.local_port)).await?;
    let counters = Arc::clone(&handle.counters);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (tcp, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(tunnel = %spec.id, error = %e, "accept failed");
                            continue;
                        }
                    };
                    debug!(tunnel = %spec.id, peer = %peer, "local tunnel connection");
                    let client = Arc::clone(&client);
                    let counters = Arc::clone(&counters);
                    let remote_host = remote_host.clone();
                    let conn_cancel = cancel.child_token();
                    let tid = spec.id.clone();
                    tokio::spawn(async move {
                        counters.connections.fetch_add(1, Ordering::Relaxed);
                        match client.open_direct_tcpip(&remote_host, remote_port as u32).await {
                            Ok(channel) => {
                                let bridge = bridge_counted(tcp, channel.into_stream(), &counters);
                                tokio::select! {
                                    _ = conn_cancel.cancelled() => {}
                                    res = bridge => {
                                        if let Err(e) = res {
                                            debug!(tunnel = %tid, error = %e, "bridge closed with error");
                                        }
                                    }
                                }
                            }
                            Err(e) => warn!(tunnel = %tid, error = %e, "direct-tcpip open failed"),
                        }
                        counters.connections.fetch_sub(1, Ordering::Relaxed);
                    });
                }
            }
        }
        debug!(tunnel = %spec.id, "local tunnel listener exited");
    });
    Ok(())
}

async fn spawn_remote(
    handle: Arc<TunnelHandle>,
    client: Arc<SshClient>,
    cancel: CancellationToken,
) -> Result<()> {
    let spec = handle.spec.clone();
    let remote_host = spec
        .remote_host
        .clone()
        .ok_or_else(|| SshError::Tunnel("remote tunnel requires remote_host".into()))?;
    let remote_port = spec
        .remote_port
        .ok_or_else(|| SshError::Tunnel("remote tunnel requires remote_port".into()))?;

    let mut incoming = client
        .request_remote_forward(&remote_host, remote_port as u32)
        .await?;
    let counters = Arc::clone(&handle.counters);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = client
                        .cancel_remote_forward(&remote_host, remote_port as u32)
                        .await;
                    break;
                }
                channel = incoming.recv() => {
                    let Some(channel) = channel else { break };
                    debug!(tunnel = %spec.id, "remote tunnel connection");
                    let counters = Arc::clone(&counters);
                    let local = (spec.local_host.clone(), spec.local_port);
                    let conn_cancel = cancel.child_token();
                    let tid = spec.id.clone();
                    tokio::spawn(async move {
                        counters.connections.fetch_add(1, Ordering::Relaxed);
                        match TcpStream::connect((local.0.as_str(), local.1)).await {
                            Ok(tcp) => {
                                let bridge = bridge_counted(tcp, channel.into_stream(), &counters);
                                tokio::select! {
                                    _ = conn_cancel.cancelled() => {}
                                    res = bridge => {
                                        if let Err(e) = res {
                                            debug!(tunnel = %tid, error = %e, "bridge closed with error");
                                        }
                                    }
                                }
                            }
                            Err(e) => warn!(tunnel = %tid, error = %e, "local dial failed"),
                        }
                        counters.connections.fetch_sub(1, Ordering::Relaxed);
                    });
                }
            }
        }
        debug!(tunnel = %spec.id, "remote tunnel loop exited");
    });
    Ok(())
}

async fn spawn_dynamic(
    handle: Arc<TunnelHandle>,
    client: Arc<SshClient>,
    cancel: CancellationToken,
) -> Result<()> {
    let spec = handle.spec.clone();
    let listener = TcpListener::bind((spec.local_host.as_str(), spec.local_port)).await?;
    let counters = Arc::clone(&handle.counters);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (tcp, _) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(tunnel = %spec.id, error = %e, "accept failed");
                            continue;
                        }
                    };
                    let client = Arc::clone(&client);
                    let counters = Arc::clone(&counters);
                    let conn_cancel = cancel.child_token();
                    let tid = spec.id.clone();
                    tokio::spawn(async move {
                        counters.connections.fetch_add(1, Ordering::Relaxed);
                        let serve = socks::serve_connection(tcp, client, &counters);
                        tokio::select! {
                            _ = conn_cancel.cancelled() => {}
                            res = serve => {
                                if let Err(e) = res {
                                    debug!(tunnel = %tid, error = %e, "SOCKS connection ended with error");
                                }
                            }
                        }
                        counters.connections.fetch_sub(1, Ordering::Relaxed);
                    });
                }
            }
        }
        debug!(tunnel = %spec.id, "dynamic tunnel listener exited");
    });
    Ok(())
}

/// Copy both directions between `a` (the local/client side) and `b` (the SSH
/// side), counting client→remote bytes as sent and remote→client as received.
pub(crate) async fn bridge_counted<A, B>(a: A, b: B, counters: &Counters) -> std::io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ar, mut aw) = tokio::io::split(a);
    let (mut br, mut bw) = tokio::io::split(b);

    let up = async {
        let mut buf = [0u8; 8192];
        loop {
            let n = ar.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            bw.write_all(&buf[..n]).await?;
            counters.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        }
        let _ = bw.shutdown().await;
        Ok::<_, std::io::Error>(())
    };

    let down = async {
        let mut buf = [0u8; 8192];
        loop {
            let n = br.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            aw.write_all(&buf[..n]).await?;
            counters.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
        }
        let _ = aw.shutdown().await;
        Ok::<_, std::io::Error>(())
    };

    tokio::try_join!(up, down)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bridge_counts_both_directions() {
        let (a_client, a_server) = tokio::io::duplex(1024);
        let (b_client, b_server) = tokio::io::duplex(1024);
        let counters = Arc::new(Counters::default());

        let counters2 = Arc::clone(&counters);
        let bridge = tokio::spawn(async move {
            let _ = bridge_counted(a_server, b_server, &counters2).await;
        });

        let (mut ar, mut aw) = tokio::io::split(a_client);
        let (mut br, mut bw) = tokio::io::split(b_client);

        // client -> remote
        aw.write_all(&[1u8; 1000]).await.unwrap();
        let mut buf = vec![0u8; 1000];
        br.read_exact(&mut buf).await.unwrap();

        // remote -> client
        bw.write_all(&[2u8; 1000]).await.unwrap();
        ar.read_exact(&mut buf).await.unwrap();

        drop(aw);
        drop(bw);
        let _ = bridge.await;

        assert!(counters.bytes_sent.load(Ordering::Relaxed) >= 1000);
        assert!(counters.bytes_received.load(Ordering::Relaxed) >= 1000);
    }

    #[test]
    fn rehydrate_gcs_stopped_orphans() {
        let mgr = TunnelManager::new();
        let keep = TunnelSpec {
            id: TunnelId::new(),
            asset_id: AssetId::new(),
            tunnel_type: TunnelType::Local,
            local_host: "127.0.0.1".into(),
            local_port: 10022,
            remote_host: Some("127.0.0.1".into()),
            remote_port: Some(22),
        };
        let orphan = TunnelSpec {
            id: TunnelId::new(),
            local_port: 10023,
            ..keep.clone()
        };

        mgr.rehydrate(vec![keep.clone(), orphan.clone()]);
        assert_eq!(mgr.list().len(), 2);

        // Next boot the orphan is gone from configuration.
        mgr.rehydrate(vec![keep.clone()]);
        assert!(mgr.get(&keep.id).is_some());
        assert!(mgr.get(&orphan.id).is_none());
    }
}
