use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use choraleia_core::types::{Asset, AssetId, AssetKind, TunnelId};
use choraleia_ssh::{TunnelSpec, TunnelStats, TunnelStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app::{parse_tunnel_type, AppState};
use crate::http::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateAsset {
    pub name: String,
    pub kind: AssetKind,
    #[serde(default)]
    pub ssh: Option<choraleia_core::types::SshEndpoint>,
    #[serde(default)]
    pub docker_host: Option<choraleia_core::types::DockerHostConfig>,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateAsset>,
) -> Result<Json<Asset>, ApiError> {
    let asset = Asset {
        id: AssetId::new(),
        name: body.name,
        kind: body.kind,
        ssh: body.ssh,
        docker_host: body.docker_host,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    asset.validate().map_err(ApiError::bad_request)?;
    state.store.insert_asset(&asset)?;
    Ok(Json(asset))
}

pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Asset>>, ApiError> {
    Ok(Json(state.store.list_assets()?))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Asset>, ApiError> {
    Ok(Json(state.store.get_asset(&AssetId(id))?))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = AssetId(id);
    state.pool.evict(&id).await;
    state.store.delete_asset(&id)?;
    Ok(Json(json!({ "deleted": true })))
}

// ---------------------------------------------------------------------------
// Tunnels
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TunnelView {
    pub id: TunnelId,
    pub asset_id: AssetId,
    #[serde(rename = "type")]
    pub tunnel_type: String,
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
    pub status: TunnelStatus,
    #[serde(flatten)]
    pub stats: TunnelStats,
    pub last_error: Option<String>,
}

pub async fn list_tunnels(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TunnelView>>, ApiError> {
    let views = state
        .tunnels
        .list()
        .into_iter()
        .map(|handle| TunnelView {
            id: handle.spec.id.clone(),
            asset_id: handle.spec.asset_id.clone(),
            tunnel_type: format!("{:?}", handle.spec.tunnel_type).to_lowercase(),
            local_host: handle.spec.local_host.clone(),
            local_port: handle.spec.local_port,
            remote_host: handle.spec.remote_host.clone(),
            remote_port: handle.spec.remote_port,
            status: handle.status(),
            stats: handle.stats(),
            last_error: handle.last_error(),
        })
        .collect();
    Ok(Json(views))
}

#[derive(Debug, Deserialize)]
pub struct StartTunnelBody {
    pub asset_id: String,
    #[serde(rename = "type")]
    pub tunnel_type: String,
    #[serde(default = "default_local_host")]
    pub local_host: String,
    pub local_port: u16,
    #[serde(default)]
    pub remote_host: Option<String>,
    #[serde(default)]
    pub remote_port: Option<u16>,
}

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

/// Start (or idempotently re-start) a tunnel. The configuration is persisted
/// into the owning SSH asset so it survives restarts.
pub async fn start_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<StartTunnelBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tunnel_id = TunnelId(id);
    let asset_id = AssetId(body.asset_id.clone());
    let tunnel_type = parse_tunnel_type(&body.tunnel_type)
        .ok_or_else(|| ApiError::bad_request("type must be local, remote, or dynamic"))?;

    let mut asset = state.store.get_asset(&asset_id)?;
    let endpoint = asset
        .ssh
        .clone()
        .ok_or_else(|| ApiError::bad_request("tunnels require an ssh asset"))?;

    let client = state.pool.get_or_connect(&asset_id, &endpoint).await?;
    let spec = TunnelSpec {
        id: tunnel_id.clone(),
        asset_id: asset_id.clone(),
        tunnel_type,
        local_host: body.local_host.clone(),
        local_port: body.local_port,
        remote_host: body.remote_host.clone(),
        remote_port: body.remote_port,
    };
    state.tunnels.start(spec, client).await?;

    // Persist the configuration on the asset row.
    if let Some(ssh) = asset.ssh.as_mut() {
        ssh.tunnels.retain(|t| t.id != tunnel_id);
        ssh.tunnels.push(choraleia_core::types::TunnelConfig {
            id: tunnel_id.clone(),
            tunnel_type: body.tunnel_type,
            local_host: body.local_host,
            local_port: body.local_port,
            remote_host: body.remote_host,
            remote_port: body.remote_port,
        });
    }
    state.store.update_asset(&asset)?;

    Ok(Json(json!({ "started": true, "id": tunnel_id })))
}

pub async fn stop_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.tunnels.stop(&TunnelId(id)).await?;
    Ok(Json(json!({ "stopped": true })))
}
