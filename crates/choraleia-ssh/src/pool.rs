//! Client pool keyed by asset id. All components share connections through
//! this pool — terminal sessions, remote Docker, remote filesystems, tunnels,
//! browser controllers.

use std::sync::Arc;
use std::time::Duration;

use choraleia_core::config::SshDefaults;
use choraleia_core::types::{AssetId, SshEndpoint};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::client::SshClient;
use crate::error::Result;

pub struct SshPool {
    clients: DashMap<AssetId, Arc<SshClient>>,
    dial_timeout: Duration,
    keepalive: Option<Duration>,
}

impl SshPool {
    pub fn new(defaults: &SshDefaults) -> Self {
        let keepalive = if defaults.keepalive_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(defaults.keepalive_interval_secs))
        };
        Self {
            clients: DashMap::new(),
            dial_timeout: Duration::from_secs(defaults.dial_timeout_secs),
            keepalive,
        }
    }

    /// Return the cached client for `asset_id`, dialing `endpoint` on miss.
    ///
    /// There is deliberately no fallback on connect failure; callers that
    /// need a remote Docker host get the error, not a local substitute.
    pub async fn get_or_connect(
        &self,
        asset_id: &AssetId,
        endpoint: &SshEndpoint,
    ) -> Result<Arc<SshClient>> {
        if let Some(existing) = self.clients.get(asset_id) {
            debug!(asset = %asset_id, "SSH pool hit");
            return Ok(Arc::clone(&existing));
        }

        let client = Arc::new(
            SshClient::connect(endpoint, self.dial_timeout, self.keepalive).await?,
        );
        info!(asset = %asset_id, host = %endpoint.host, "SSH pool miss, connected");
        self.clients.insert(asset_id.clone(), Arc::clone(&client));
        Ok(client)
    }

    /// Cached client without dialing.
    pub fn get(&self, asset_id: &AssetId) -> Option<Arc<SshClient>> {
        self.clients.get(asset_id).map(|c| Arc::clone(&c))
    }

    /// Drop and disconnect the cached client for `asset_id`.
    pub async fn evict(&self, asset_id: &AssetId) {
        if let Some((_, client)) = self.clients.remove(asset_id) {
            let _ = client.disconnect().await;
            info!(asset = %asset_id, "SSH client evicted");
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
