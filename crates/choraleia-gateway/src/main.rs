use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

mod app;
mod auth;
mod http;
mod provider_stub;
mod ws;

#[derive(Debug, Parser)]
#[command(name = "choraleia-gateway", about = "Choraleia workspace orchestrator gateway")]
struct Args {
    /// Path to choraleia.toml (defaults to ~/.choraleia/choraleia.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "choraleia_gateway=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = choraleia_core::config::ChoraleiaConfig::load(args.config.as_deref())
        .unwrap_or_else(|e| {
            warn!("Config load failed ({e}), using defaults");
            choraleia_core::config::ChoraleiaConfig::default()
        });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let state = Arc::new(app::AppState::new(config)?);

    // Reconcile persisted containers and tunnels before accepting traffic.
    if let Err(e) = state.runtime.reconcile().await {
        warn!("workspace reconcile failed: {e}");
    }
    if let Err(e) = state.browser.reconcile().await {
        warn!("browser reconcile failed: {e}");
    }
    state.rehydrate_tunnels();
    state.browser.spawn_idle_reaper();

    let router = app::build_router(Arc::clone(&state));
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("Choraleia gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
