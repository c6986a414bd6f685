//! Terminal WebSocket endpoint.
//!
//! Binary frames carry PTY bytes (backend → client); JSON control frames
//! carry everything else. Byte order toward the client is preserved by the
//! single forwarding channel per session; a 30-second ping keeps
//! intermediaries from dropping quiet connections.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use choraleia_core::config::WS_PING_INTERVAL_SECS;
use choraleia_core::types::{AssetId, RuntimeType, WorkspaceId};
use choraleia_terminal::protocol::{ClientFrame, ServerFrame};
use choraleia_terminal::{SessionId, TermSession};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct TerminalQuery {
    /// local | ssh | docker_exec
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

fn default_kind() -> String {
    "local".to_string()
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TerminalQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, query))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, query: TerminalQuery) {
    let (session_id, session) = match open_session(&state, &query).await {
        Ok(pair) => pair,
        Err(message) => {
            warn!(error = %message, "terminal session open failed");
            let mut socket = socket;
            let frame = ServerFrame::Status {
                message: format!("failed to open session: {message}"),
            };
            let _ = socket
                .send(Message::Text(
                    serde_json::to_string(&frame).unwrap_or_default().into(),
                ))
                .await;
            return;
        }
    };
    info!(session = %session_id, kind = %query.kind, "terminal attached");

    let (mut sink, mut stream) = socket.split();

    // Backend bytes flow through this channel in read order.
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(64);
    session.attach_ws(out_tx);

    // Tell the client its (transient) session id; the first TermSetSessionId
    // migrates it to a stable one.
    let hello = ServerFrame::Status {
        message: format!("session:{session_id}"),
    };
    let _ = sink
        .send(Message::Text(
            serde_json::to_string(&hello).unwrap_or_default().into(),
        ))
        .await;

    let mut current_id = session_id;

    // Server→client JSON control channel (output requests, theme pushes).
    let (ctrl_tx, mut ctrl_rx) = mpsc::channel::<ServerFrame>(16);
    state
        .terminal_control
        .insert(current_id.clone(), ctrl_tx.clone());

    let mut ping = tokio::time::interval(std::time::Duration::from_secs(WS_PING_INTERVAL_SECS));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            // Backend output → binary frame.
            chunk = out_rx.recv() => {
                match chunk {
                    Some(bytes) => {
                        if sink.send(Message::Binary(bytes.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Server-initiated control frames.
            frame = ctrl_rx.recv() => {
                match frame {
                    Some(frame) => {
                        let json = serde_json::to_string(&frame).unwrap_or_default();
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Client frames.
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_frame(
                            &state, &session, &mut current_id, &ctrl_tx, &text,
                        ).await {
                            let frame = ServerFrame::Status { message: e };
                            let _ = sink.send(Message::Text(
                                serde_json::to_string(&frame).unwrap_or_default().into(),
                            )).await;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        // Raw input is relayed verbatim.
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        if session.write(&text).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "terminal ws read error");
                        break;
                    }
                }
            }

            // Keepalive.
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    session.detach_ws();
    state.terminal_control.remove(&current_id);
    info!(session = %current_id, "terminal detached");
}

async fn handle_client_frame(
    state: &Arc<AppState>,
    session: &Arc<TermSession>,
    current_id: &mut SessionId,
    ctrl_tx: &tokio::sync::mpsc::Sender<ServerFrame>,
    text: &str,
) -> Result<(), String> {
    let frame: ClientFrame =
        serde_json::from_str(text).map_err(|e| format!("malformed frame: {e}"))?;
    match frame {
        ClientFrame::TermInput { data } => {
            session.write(&data).await.map_err(|e| e.to_string())?;
        }
        ClientFrame::TermResize { rows, cols } => {
            session.resize(cols, rows).map_err(|e| e.to_string())?;
        }
        ClientFrame::TermSetSessionId { session_id } => {
            let target = SessionId::from(session_id);
            state
                .terminal
                .migrate(current_id, &target)
                .map_err(|e| e.to_string())?;
            state.terminal_control.remove(current_id);
            state.terminal_control.insert(target.clone(), ctrl_tx.clone());
            *current_id = target;
        }
        ClientFrame::TermPause { pause } => {
            session.set_paused(pause);
        }
        ClientFrame::TermOutputResponse {
            request_id,
            output,
            error,
        } => {
            state.output_requests.fulfill(&request_id, output, error);
        }
    }
    Ok(())
}

/// Open the backend the query asks for.
async fn open_session(
    state: &Arc<AppState>,
    query: &TerminalQuery,
) -> Result<(SessionId, Arc<TermSession>), String> {
    match query.kind.as_str() {
        "local" => {
            let shell = query
                .shell
                .clone()
                .unwrap_or_else(|| state.config.terminal.shell.clone());
            state
                .terminal
                .create_local(
                    &shell,
                    state.config.terminal.login_shell,
                    &[],
                    query.cwd.as_deref(),
                )
                .map_err(|e| e.to_string())
        }
        "ssh" => {
            let asset_id = query
                .asset_id
                .clone()
                .map(AssetId)
                .ok_or("ssh sessions require asset_id")?;
            let asset = state
                .store
                .get_asset(&asset_id)
                .map_err(|e| e.to_string())?;
            let endpoint = asset.ssh.as_ref().ok_or("asset has no ssh config")?;
            let client = state
                .pool
                .get_or_connect(&asset_id, endpoint)
                .await
                .map_err(|e| e.to_string())?;
            state
                .terminal
                .create_ssh(asset_id.as_str(), client, 80, 24)
                .await
                .map_err(|e| e.to_string())
        }
        "docker_exec" => {
            let workspace_id = query
                .workspace_id
                .clone()
                .map(WorkspaceId)
                .ok_or("docker_exec sessions require workspace_id")?;
            let workspace = state
                .store
                .get_workspace(&workspace_id)
                .map_err(|e| e.to_string())?;
            let container = workspace
                .runtime
                .container_name
                .clone()
                .or_else(|| workspace.runtime.container_id.clone())
                .ok_or("workspace has no container yet")?;
            let shell = query.shell.clone().unwrap_or_else(|| "/bin/sh".into());

            if workspace.runtime.runtime_type == RuntimeType::DockerRemote {
                let docker_asset_id = workspace
                    .runtime
                    .docker_asset_id
                    .clone()
                    .ok_or("remote runtime has no docker asset")?;
                let docker_asset = state
                    .store
                    .get_asset(&docker_asset_id)
                    .map_err(|e| e.to_string())?;
                let ssh_asset_id = docker_asset
                    .docker_host
                    .as_ref()
                    .and_then(|dh| dh.ssh_asset_id.clone())
                    .ok_or("docker host has no ssh asset")?;
                let ssh_asset = state
                    .store
                    .get_asset(&ssh_asset_id)
                    .map_err(|e| e.to_string())?;
                let endpoint = ssh_asset.ssh.as_ref().ok_or("asset has no ssh config")?;
                let client = state
                    .pool
                    .get_or_connect(&ssh_asset_id, endpoint)
                    .await
                    .map_err(|e| e.to_string())?;
                state
                    .terminal
                    .create_docker_exec_remote(
                        ssh_asset_id.as_str(),
                        client,
                        &container,
                        &shell,
                        80,
                        24,
                    )
                    .await
                    .map_err(|e| e.to_string())
            } else {
                state
                    .terminal
                    .create_docker_exec_local(&container, &shell)
                    .map_err(|e| e.to_string())
            }
        }
        other => Err(format!("unknown session kind: {other}")),
    }
}
