use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use choraleia_agent::{ChatEngine, StreamRegistry, ToolRegistry};
use choraleia_agent::tools::browser::BrowserTool;
use choraleia_agent::tools::terminal::{
    ExecCommandTool, GetOutputTool, ReadFileTool, WriteFileTool,
};
use choraleia_browser::BrowserController;
use choraleia_core::config::ChoraleiaConfig;
use choraleia_core::types::TunnelId;
use choraleia_memory::MemoryManager;
use choraleia_runtime::{RuntimeController, RuntimeEvents};
use choraleia_ssh::{SshPool, TunnelManager, TunnelSpec, TunnelType};
use choraleia_store::Store;
use choraleia_terminal::{OutputRequestManager, TerminalManager};
use tracing::warn;

use crate::provider_stub::UnconfiguredProvider;

/// Central shared state, passed as `Arc<AppState>` to every handler.
pub struct AppState {
    pub config: ChoraleiaConfig,
    pub store: Arc<Store>,
    pub memory: Arc<MemoryManager>,
    pub pool: Arc<SshPool>,
    pub tunnels: Arc<TunnelManager>,
    pub runtime: Arc<RuntimeController>,
    pub browser: Arc<BrowserController>,
    pub terminal: Arc<TerminalManager>,
    pub output_requests: Arc<OutputRequestManager>,
    pub engine: Arc<ChatEngine>,
    pub streams: Arc<StreamRegistry>,
    /// JSON control channel of each attached terminal socket, keyed by the
    /// session's current id. Used to push server frames (output requests,
    /// theme changes) to the client.
    pub terminal_control: dashmap::DashMap<
        choraleia_terminal::SessionId,
        tokio::sync::mpsc::Sender<choraleia_terminal::protocol::ServerFrame>,
    >,
}

impl AppState {
    pub fn new(config: ChoraleiaConfig) -> anyhow::Result<Self> {
        let store = Arc::new(Store::open(&config.database.path)?);
        let memory_conn = rusqlite_open(&config.database.path)?;
        let memory = Arc::new(MemoryManager::new(memory_conn)?);
        let pool = Arc::new(SshPool::new(&config.ssh));
        let tunnels = Arc::new(TunnelManager::new());

        let runtime = Arc::new(RuntimeController::new(
            Arc::clone(&store),
            Arc::clone(&pool),
            config.docker.clone(),
            Arc::new(RuntimeEvents::new()),
        ));
        let browser = Arc::new(BrowserController::new(
            Arc::clone(&store),
            Arc::clone(&pool),
            Arc::clone(&tunnels),
            config.browser.clone(),
        ));
        let terminal = Arc::new(TerminalManager::new());
        let output_requests = Arc::new(OutputRequestManager::new());

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(GetOutputTool::new(Arc::clone(&terminal))));
        tools.register(Arc::new(ExecCommandTool::new(Arc::clone(&terminal))));
        tools.register(Arc::new(ReadFileTool::new(Arc::clone(&terminal))));
        tools.register(Arc::new(WriteFileTool::new(Arc::clone(&terminal))));
        for tool in BrowserTool::all(Arc::clone(&browser)) {
            tools.register(tool);
        }

        let streams = Arc::new(StreamRegistry::new());
        let engine = Arc::new(ChatEngine::new(
            Arc::clone(&store),
            Arc::clone(&memory),
            Arc::new(tools),
            Arc::new(UnconfiguredProvider),
            Arc::clone(&streams),
            config.agent.clone(),
        ));

        Ok(Self {
            config,
            store,
            memory,
            pool,
            tunnels,
            runtime,
            browser,
            terminal,
            output_requests,
            engine,
            streams,
            terminal_control: dashmap::DashMap::new(),
        })
    }

    /// Register tunnel specs persisted inside SSH asset configs. Running
    /// tunnels survive; stopped ones that vanished from configuration are
    /// collected.
    pub fn rehydrate_tunnels(&self) {
        let mut specs = Vec::new();
        let assets = match self.store.list_assets() {
            Ok(assets) => assets,
            Err(e) => {
                warn!("tunnel rehydrate: asset list failed: {e}");
                return;
            }
        };
        for asset in assets {
            let Some(ssh) = asset.ssh else { continue };
            for tunnel in ssh.tunnels {
                let Some(tunnel_type) = parse_tunnel_type(&tunnel.tunnel_type) else {
                    warn!(tunnel = %tunnel.id, "unknown tunnel type in config");
                    continue;
                };
                specs.push(TunnelSpec {
                    id: TunnelId(tunnel.id.to_string()),
                    asset_id: asset.id.clone(),
                    tunnel_type,
                    local_host: tunnel.local_host,
                    local_port: tunnel.local_port,
                    remote_host: tunnel.remote_host,
                    remote_port: tunnel.remote_port,
                });
            }
        }
        self.tunnels.rehydrate(specs);
    }
}

pub fn parse_tunnel_type(s: &str) -> Option<TunnelType> {
    match s {
        "local" => Some(TunnelType::Local),
        "remote" => Some(TunnelType::Remote),
        "dynamic" => Some(TunnelType::Dynamic),
        _ => None,
    }
}

fn rusqlite_open(path: &str) -> anyhow::Result<rusqlite::Connection> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    Ok(rusqlite::Connection::open(path)?)
}

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health))
        // Workspaces
        .route(
            "/workspaces",
            get(crate::http::workspaces::list).post(crate::http::workspaces::create),
        )
        .route(
            "/workspaces/{id}",
            get(crate::http::workspaces::get_one).delete(crate::http::workspaces::remove),
        )
        .route("/workspaces/{id}/start", post(crate::http::workspaces::start))
        .route("/workspaces/{id}/stop", post(crate::http::workspaces::stop))
        .route("/workspaces/{id}/exec", post(crate::http::workspaces::exec))
        .route(
            "/workspaces/{id}/rooms",
            get(crate::http::conversations::list_rooms).post(crate::http::conversations::create_room),
        )
        .route(
            "/workspaces/{id}/conversations",
            get(crate::http::conversations::list)
                .post(crate::http::conversations::create),
        )
        // Files
        .route(
            "/workspaces/{id}/files",
            get(crate::http::files::list)
                .put(crate::http::files::write)
                .delete(crate::http::files::remove),
        )
        .route("/workspaces/{id}/files/stat", get(crate::http::files::stat))
        .route("/workspaces/{id}/files/read", get(crate::http::files::read))
        .route(
            "/workspaces/{id}/files/rename",
            post(crate::http::files::rename),
        )
        .route(
            "/workspaces/{id}/files/archive",
            get(crate::http::files::archive),
        )
        .route("/assets/{id}/files", get(crate::http::files::asset_list))
        // Assets and tunnels
        .route(
            "/assets",
            get(crate::http::assets::list).post(crate::http::assets::create),
        )
        .route(
            "/assets/{id}",
            get(crate::http::assets::get_one).delete(crate::http::assets::remove),
        )
        .route("/tunnels", get(crate::http::assets::list_tunnels))
        .route("/tunnels/{id}/start", post(crate::http::assets::start_tunnel))
        .route("/tunnels/{id}/stop", post(crate::http::assets::stop_tunnel))
        // Conversations
        .route(
            "/conversations/{id}/messages",
            get(crate::http::conversations::messages),
        )
        .route("/conversations/{id}/chat", post(crate::http::chat::submit))
        .route("/conversations/{id}/stream", get(crate::http::chat::stream))
        .route("/conversations/{id}/cancel", post(crate::http::chat::cancel))
        .route(
            "/conversations/{id}/compress",
            post(crate::http::conversations::compress),
        )
        // Browsers
        .route(
            "/conversations/{id}/browsers",
            get(crate::http::browsers::list).post(crate::http::browsers::launch),
        )
        .route("/browsers/{id}", delete(crate::http::browsers::close))
        // Memories
        .route(
            "/workspaces/{id}/memories",
            get(crate::http::memories::list).post(crate::http::memories::remember),
        )
        .route(
            "/workspaces/{id}/memories/search",
            get(crate::http::memories::search),
        )
        .route(
            "/workspaces/{id}/memories/export",
            get(crate::http::memories::export),
        )
        .route(
            "/workspaces/{id}/memories/import",
            post(crate::http::memories::import),
        )
        .route(
            "/workspaces/{id}/memories/{key}",
            delete(crate::http::memories::forget),
        )
        // Terminal sessions
        .route("/terminal-sessions", get(crate::http::terminals::list))
        .route(
            "/terminal-sessions/{id}",
            delete(crate::http::terminals::close),
        )
        .route(
            "/terminal-sessions/{id}/client-output",
            get(crate::http::terminals::client_output),
        )
        // Terminal WebSocket
        .route("/ws/terminal", get(crate::ws::terminal::ws_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_token,
        ))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
