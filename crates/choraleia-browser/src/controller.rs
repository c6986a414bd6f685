//! Browser container lifecycle and the action surface the browser tools call.

use std::sync::Arc;
use std::time::Duration;

use choraleia_core::config::{
    BrowserConfig, BROWSER_IDLE_TIMEOUT_SECS, BROWSER_READY_TIMEOUT_SECS,
    MAX_BROWSERS_PER_CONVERSATION,
};
use choraleia_core::types::{AssetId, BrowserId, ConversationId, TunnelId, WorkspaceId};
use choraleia_docker::{CommandRunner, ContainerSpec, DockerCli, LocalRunner, SshRunner};
use choraleia_ssh::{SshPool, TunnelManager, TunnelSpec, TunnelType};
use choraleia_store::Store;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::devtools::{self, DevToolsClient};
use crate::error::{BrowserError, Result};
use crate::types::{BrowserInstance, BrowserRuntimeType, BrowserStatus, Tab};

pub const LABEL_MANAGED_BY: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "choraleia-browser";
pub const LABEL_BROWSER_ID: &str = "browser-id";
pub const LABEL_CONVERSATION_ID: &str = "conversation-id";

pub struct BrowserController {
    store: Arc<Store>,
    pool: Arc<SshPool>,
    tunnels: Arc<TunnelManager>,
    config: BrowserConfig,
    instances: DashMap<BrowserId, Arc<Mutex<BrowserInstance>>>,
    /// DevTools connection to each browser's active tab.
    clients: DashMap<BrowserId, Arc<DevToolsClient>>,
    runner_override: Option<Arc<dyn CommandRunner>>,
}

impl BrowserController {
    pub fn new(
        store: Arc<Store>,
        pool: Arc<SshPool>,
        tunnels: Arc<TunnelManager>,
        config: BrowserConfig,
    ) -> Self {
        Self {
            store,
            pool,
            tunnels,
            config,
            instances: DashMap::new(),
            clients: DashMap::new(),
            runner_override: None,
        }
    }

    /// Test seam: route docker commands through `runner`.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner_override = Some(runner);
        self
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Launch a browser container for `conversation_id`. Remote runtimes get
    /// an SSH tunnel from a local port to the container's DevTools endpoint.
    pub async fn launch(
        &self,
        conversation_id: &ConversationId,
        workspace_id: Option<&WorkspaceId>,
        runtime_type: BrowserRuntimeType,
        ssh_asset_id: Option<&AssetId>,
    ) -> Result<BrowserId> {
        let active = self
            .list_for_conversation(conversation_id)
            .await
            .into_iter()
            .filter(|b| !matches!(b.status, BrowserStatus::Closed | BrowserStatus::Error))
            .count();
        if active >= MAX_BROWSERS_PER_CONVERSATION {
            return Err(BrowserError::LimitReached {
                max: MAX_BROWSERS_PER_CONVERSATION,
            });
        }

        let id = BrowserId::new();
        let short = &id.as_str()[..8.min(id.as_str().len())];
        let name = format!("choraleia-browser-{short}");
        let cli = self.cli_for(runtime_type, ssh_asset_id).await?;

        cli.ensure_network(&self.config.network).await?;

        let mut instance = BrowserInstance {
            id: id.clone(),
            conversation_id: conversation_id.clone(),
            workspace_id: workspace_id.cloned(),
            runtime_type,
            container_id: String::new(),
            container_name: name.clone(),
            container_ip: String::new(),
            devtools_url: String::new(),
            tabs: vec![],
            active_tab: None,
            status: BrowserStatus::Starting,
            ssh_asset_id: ssh_asset_id.cloned(),
            tunnel_local_port: None,
            last_activity: chrono::Utc::now().to_rfc3339(),
        };
        self.store.upsert_browser_instance(&instance.to_row())?;

        match self.bring_up(&cli, &mut instance).await {
            Ok(()) => {
                instance.status = BrowserStatus::Ready;
                self.store.upsert_browser_instance(&instance.to_row())?;
                info!(browser = %id, container = %name, "browser ready");
                self.instances
                    .insert(id.clone(), Arc::new(Mutex::new(instance)));
                Ok(id)
            }
            Err(e) => {
                warn!(browser = %id, error = %e, "browser bring-up failed");
                let _ = cli.remove(&name, true).await;
                instance.status = BrowserStatus::Error;
                self.store.upsert_browser_instance(&instance.to_row())?;
                Err(e)
            }
        }
    }

    async fn bring_up(&self, cli: &DockerCli, instance: &mut BrowserInstance) -> Result<()> {
        if let Err(e) = cli.pull(&self.config.image, None).await {
            warn!(image = %self.config.image, error = %e, "browser image pull failed, using cache");
        }
        let container_id = cli.create(&self.container_spec(instance)).await?;
        instance.container_id = container_id.clone();
        cli.start(&container_id).await?;

        let info = cli
            .inspect(&container_id)
            .await?
            .ok_or_else(|| BrowserError::NotFound(container_id.clone()))?;
        instance.container_ip = info.ip_on(Some(&self.config.network)).unwrap_or_default();

        instance.devtools_url = self.establish_endpoint(instance).await?;
        self.wait_ready(&instance.devtools_url).await?;

        let targets = devtools::list_tabs(&instance.devtools_url).await?;
        instance.tabs = targets.iter().map(|(tab, _)| tab.clone()).collect();
        if let Some((tab, ws_url)) = targets.first() {
            instance.active_tab = Some(tab.id.clone());
            let client = DevToolsClient::connect(ws_url).await?;
            self.clients.insert(instance.id.clone(), Arc::new(client));
        }
        Ok(())
    }

    fn container_spec(&self, instance: &BrowserInstance) -> ContainerSpec {
        ContainerSpec {
            image: self.config.image.clone(),
            name: instance.container_name.clone(),
            labels: vec![
                (LABEL_MANAGED_BY.into(), MANAGED_BY_VALUE.into()),
                (LABEL_BROWSER_ID.into(), instance.id.to_string()),
                (
                    LABEL_CONVERSATION_ID.into(),
                    instance.conversation_id.to_string(),
                ),
            ],
            binds: vec![],
            env: vec![],
            memory_limit: "1g".into(),
            cpu_limit: String::new(),
            shm_size: "1g".into(),
            network: Some(self.config.network.clone()),
            command: vec![
                "--headless".into(),
                "--no-sandbox".into(),
                "--disable-gpu".into(),
                "--remote-debugging-address=0.0.0.0".into(),
                format!("--remote-debugging-port={}", self.config.devtools_port),
            ],
        }
    }

    /// Resolve how this process reaches the container's DevTools endpoint;
    /// remote runtimes get a local SSH tunnel.
    async fn establish_endpoint(&self, instance: &mut BrowserInstance) -> Result<String> {
        match instance.runtime_type {
            BrowserRuntimeType::Local => Ok(format!(
                "http://{}:{}",
                instance.container_ip, self.config.devtools_port
            )),
            BrowserRuntimeType::RemoteSsh => {
                let asset_id = instance
                    .ssh_asset_id
                    .clone()
                    .ok_or_else(|| BrowserError::DevTools("remote browser without ssh asset".into()))?;
                let asset = self.store.get_asset(&asset_id)?;
                let endpoint = asset.ssh.as_ref().ok_or_else(|| {
                    BrowserError::DevTools(format!("asset {asset_id} has no ssh config"))
                })?;
                let client = self.pool.get_or_connect(&asset_id, endpoint).await?;

                let local_port = pick_free_port()?;
                let spec = TunnelSpec {
                    id: TunnelId(format!("browser-{}", instance.id)),
                    asset_id,
                    tunnel_type: TunnelType::Local,
                    local_host: "127.0.0.1".into(),
                    local_port,
                    remote_host: Some(instance.container_ip.clone()),
                    remote_port: Some(self.config.devtools_port),
                };
                self.tunnels.start(spec, client).await?;
                instance.tunnel_local_port = Some(local_port);
                Ok(format!("http://127.0.0.1:{local_port}"))
            }
        }
    }

    async fn wait_ready(&self, devtools_url: &str) -> Result<()> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(BROWSER_READY_TIMEOUT_SECS);
        loop {
            if devtools::probe(devtools_url).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::NotReady {
                    secs: BROWSER_READY_TIMEOUT_SECS,
                });
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Stop and remove a browser container, its tunnel, and its row state.
    pub async fn close(&self, id: &BrowserId) -> Result<()> {
        let Some((_, instance)) = self.instances.remove(id) else {
            return Err(BrowserError::NotFound(id.to_string()));
        };
        self.clients.remove(id);

        let mut instance = instance.lock().await;
        let cli = self
            .cli_for(instance.runtime_type, instance.ssh_asset_id.as_ref())
            .await?;
        if let Err(e) = cli.remove(&instance.container_name, true).await {
            warn!(browser = %id, error = %e, "browser container removal failed");
        }
        if instance.tunnel_local_port.is_some() {
            let _ = self
                .tunnels
                .stop(&TunnelId(format!("browser-{}", instance.id)))
                .await;
        }
        instance.status = BrowserStatus::Closed;
        self.store.upsert_browser_instance(&instance.to_row())?;
        info!(browser = %id, "browser closed");
        Ok(())
    }

    /// Re-adopt persisted browser rows after a restart: inspect containers,
    /// re-establish tunnels for remote ones, and re-match the active tab by
    /// URL (the first target is not guaranteed to be it).
    pub async fn reconcile(&self) -> Result<()> {
        for row in self.store.list_browser_instances()? {
            let mut instance = BrowserInstance::from_row(&row);
            if matches!(instance.status, BrowserStatus::Closed | BrowserStatus::Error) {
                continue;
            }
            let cli = match self
                .cli_for(instance.runtime_type, instance.ssh_asset_id.as_ref())
                .await
            {
                Ok(cli) => cli,
                Err(e) => {
                    warn!(browser = %instance.id, error = %e, "reconcile: docker unreachable");
                    continue;
                }
            };
            match cli.inspect(&instance.container_name).await {
                Ok(Some(info)) if info.running => {
                    instance.container_ip = info
                        .ip_on(Some(&self.config.network))
                        .unwrap_or(instance.container_ip);
                    instance.devtools_url = match self.establish_endpoint(&mut instance).await {
                        Ok(url) => url,
                        Err(e) => {
                            warn!(browser = %instance.id, error = %e, "reconcile: endpoint failed");
                            continue;
                        }
                    };
                    if self.wait_ready(&instance.devtools_url).await.is_err() {
                        continue;
                    }
                    let targets = devtools::list_tabs(&instance.devtools_url).await?;
                    let previous_url = instance
                        .tabs
                        .iter()
                        .find(|t| Some(&t.id) == instance.active_tab.as_ref())
                        .map(|t| t.url.clone());
                    instance.tabs = targets.iter().map(|(t, _)| t.clone()).collect();

                    // Prefer a URL match against the persisted active tab,
                    // fall back to the first page target.
                    let chosen = targets
                        .iter()
                        .find(|(t, _)| Some(&t.url) == previous_url.as_ref())
                        .or_else(|| targets.first());
                    if let Some((tab, ws_url)) = chosen {
                        instance.active_tab = Some(tab.id.clone());
                        if let Ok(client) = DevToolsClient::connect(ws_url).await {
                            self.clients.insert(instance.id.clone(), Arc::new(client));
                        }
                    }
                    instance.status = BrowserStatus::Ready;
                    self.store.upsert_browser_instance(&instance.to_row())?;
                    self.instances
                        .insert(instance.id.clone(), Arc::new(Mutex::new(instance)));
                }
                _ => {
                    instance.status = BrowserStatus::Closed;
                    self.store.upsert_browser_instance(&instance.to_row())?;
                }
            }
        }
        Ok(())
    }

    /// Background reaper closing browsers idle past the timeout.
    pub fn spawn_idle_reaper(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                let now = chrono::Utc::now();
                let mut idle = Vec::new();
                for entry in controller.instances.iter() {
                    let instance = entry.value().lock().await;
                    if let Ok(last) =
                        chrono::DateTime::parse_from_rfc3339(&instance.last_activity)
                    {
                        let idle_for = now.signed_duration_since(last.with_timezone(&chrono::Utc));
                        if idle_for.num_seconds() > BROWSER_IDLE_TIMEOUT_SECS as i64 {
                            idle.push(entry.key().clone());
                        }
                    }
                }
                for id in idle {
                    info!(browser = %id, "closing idle browser");
                    let _ = controller.close(&id).await;
                }
            }
        });
    }

    // -----------------------------------------------------------------------
    // Actions (the browser tool surface)
    // -----------------------------------------------------------------------

    pub async fn navigate(&self, id: &BrowserId, url: &str) -> Result<()> {
        let client = self.client(id)?;
        self.touch(id).await?;
        client.navigate(url).await?;
        // Track the new URL on the active tab.
        let instance = self.instances.get(id).map(|i| Arc::clone(&i));
        if let Some(instance) = instance {
            let mut instance = instance.lock().await;
            let active = instance.active_tab.clone();
            if let Some(tab) = instance
                .tabs
                .iter_mut()
                .find(|t| Some(&t.id) == active.as_ref())
            {
                tab.url = url.to_string();
            }
            self.store.upsert_browser_instance(&instance.to_row())?;
        }
        Ok(())
    }

    pub async fn click(&self, id: &BrowserId, selector: &str) -> Result<()> {
        self.touch(id).await?;
        self.client(id)?.click(selector).await
    }

    pub async fn input(&self, id: &BrowserId, selector: &str, text: &str) -> Result<()> {
        self.touch(id).await?;
        self.client(id)?.input(selector, text).await
    }

    pub async fn scroll(&self, id: &BrowserId, dx: i64, dy: i64) -> Result<()> {
        self.touch(id).await?;
        self.client(id)?.scroll_by(dx, dy).await
    }

    pub async fn screenshot(&self, id: &BrowserId) -> Result<String> {
        self.touch(id).await?;
        self.client(id)?.screenshot().await
    }

    pub async fn extract(&self, id: &BrowserId, selector: Option<&str>) -> Result<String> {
        self.touch(id).await?;
        self.client(id)?.extract_text(selector).await
    }

    pub async fn wait_ms(&self, id: &BrowserId, ms: u64) -> Result<()> {
        self.touch(id).await?;
        tokio::time::sleep(Duration::from_millis(ms.min(30_000))).await;
        Ok(())
    }

    pub async fn scroll_info(&self, id: &BrowserId) -> Result<Value> {
        self.touch(id).await?;
        self.client(id)?.scroll_info().await
    }

    pub async fn open_tab(&self, id: &BrowserId, url: &str) -> Result<Tab> {
        self.touch(id).await?;
        let instance_arc = self
            .instances
            .get(id)
            .map(|i| Arc::clone(&i))
            .ok_or_else(|| BrowserError::NotFound(id.to_string()))?;
        let mut instance = instance_arc.lock().await;
        let (tab, ws_url) = devtools::open_tab(&instance.devtools_url, url).await?;
        let client = DevToolsClient::connect(&ws_url).await?;
        self.clients.insert(id.clone(), Arc::new(client));
        instance.tabs.push(tab.clone());
        instance.active_tab = Some(tab.id.clone());
        self.store.upsert_browser_instance(&instance.to_row())?;
        Ok(tab)
    }

    pub async fn switch_tab(&self, id: &BrowserId, tab_id: &str) -> Result<()> {
        self.touch(id).await?;
        let instance_arc = self
            .instances
            .get(id)
            .map(|i| Arc::clone(&i))
            .ok_or_else(|| BrowserError::NotFound(id.to_string()))?;
        let mut instance = instance_arc.lock().await;

        let targets = devtools::list_tabs(&instance.devtools_url).await?;
        let (tab, ws_url) = targets
            .into_iter()
            .find(|(t, _)| t.id == tab_id)
            .ok_or_else(|| BrowserError::TabNotFound(tab_id.to_string()))?;

        devtools::activate_tab(&instance.devtools_url, tab_id).await?;
        let client = DevToolsClient::connect(&ws_url).await?;
        self.clients.insert(id.clone(), Arc::new(client));
        instance.active_tab = Some(tab.id);
        self.store.upsert_browser_instance(&instance.to_row())?;
        Ok(())
    }

    pub async fn close_tab(&self, id: &BrowserId, tab_id: &str) -> Result<()> {
        self.touch(id).await?;
        let instance_arc = self
            .instances
            .get(id)
            .map(|i| Arc::clone(&i))
            .ok_or_else(|| BrowserError::NotFound(id.to_string()))?;
        let mut instance = instance_arc.lock().await;

        devtools::close_tab(&instance.devtools_url, tab_id).await?;
        instance.tabs.retain(|t| t.id != tab_id);

        if instance.active_tab.as_deref() == Some(tab_id) {
            instance.active_tab = instance.tabs.first().map(|t| t.id.clone());
            if instance.active_tab.is_some() {
                let targets = devtools::list_tabs(&instance.devtools_url).await?;
                if let Some((_, ws_url)) = targets
                    .iter()
                    .find(|(t, _)| Some(&t.id) == instance.active_tab.as_ref())
                {
                    let client = DevToolsClient::connect(ws_url).await?;
                    self.clients.insert(id.clone(), Arc::new(client));
                }
            } else {
                self.clients.remove(id);
            }
        }
        self.store.upsert_browser_instance(&instance.to_row())?;
        Ok(())
    }

    /// Navigate the active tab to a search-results page and return its text.
    pub async fn web_search(&self, id: &BrowserId, query: &str) -> Result<String> {
        let url = format!("https://duckduckgo.com/html/?q={}", query_encode(query));
        self.navigate(id, &url).await?;
        self.wait_ms(id, 1500).await?;
        self.extract(id, None).await
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub async fn get(&self, id: &BrowserId) -> Result<BrowserInstance> {
        let instance = self
            .instances
            .get(id)
            .map(|i| Arc::clone(&i))
            .ok_or_else(|| BrowserError::NotFound(id.to_string()))?;
        let guard = instance.lock().await;
        Ok(guard.clone())
    }

    pub async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Vec<BrowserInstance> {
        let mut out = Vec::new();
        for entry in self.instances.iter() {
            let instance = entry.value().lock().await;
            if instance.conversation_id == *conversation_id {
                out.push(instance.clone());
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn client(&self, id: &BrowserId) -> Result<Arc<DevToolsClient>> {
        self.clients
            .get(id)
            .map(|c| Arc::clone(&c))
            .ok_or_else(|| BrowserError::NotFound(id.to_string()))
    }

    /// Bump `last_activity` and persist.
    async fn touch(&self, id: &BrowserId) -> Result<()> {
        let instance = self
            .instances
            .get(id)
            .map(|i| Arc::clone(&i))
            .ok_or_else(|| BrowserError::NotFound(id.to_string()))?;
        let mut guard = instance.lock().await;
        guard.last_activity = chrono::Utc::now().to_rfc3339();
        self.store.upsert_browser_instance(&guard.to_row())?;
        Ok(())
    }

    async fn cli_for(
        &self,
        runtime_type: BrowserRuntimeType,
        ssh_asset_id: Option<&AssetId>,
    ) -> Result<DockerCli> {
        if let Some(runner) = &self.runner_override {
            return Ok(DockerCli::new(Arc::clone(runner)));
        }
        match runtime_type {
            BrowserRuntimeType::Local => Ok(DockerCli::new(Arc::new(LocalRunner))),
            BrowserRuntimeType::RemoteSsh => {
                let asset_id = ssh_asset_id
                    .ok_or_else(|| BrowserError::DevTools("remote browser without ssh asset".into()))?;
                let asset = self.store.get_asset(asset_id)?;
                let endpoint = asset.ssh.as_ref().ok_or_else(|| {
                    BrowserError::DevTools(format!("asset {asset_id} has no ssh config"))
                })?;
                let client = self.pool.get_or_connect(asset_id, endpoint).await?;
                Ok(DockerCli::new(Arc::new(SshRunner::new(client))))
            }
        }
    }
}

fn pick_free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| BrowserError::DevTools(format!("no free local port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| BrowserError::DevTools(e.to_string()))?
        .port();
    Ok(port)
}

fn query_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_encoding_handles_spaces_and_symbols() {
        assert_eq!(query_encode("rust async streams"), "rust+async+streams");
        assert_eq!(query_encode("a&b"), "a%26b");
    }

    #[test]
    fn free_port_allocation_returns_usable_port() {
        let port = pick_free_port().unwrap();
        assert!(port > 0);
    }
}
