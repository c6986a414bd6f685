//! A single authenticated SSH connection and the operations built on it:
//! exec, interactive shell, direct-tcpip opens, remote forwards, SFTP.

use std::sync::Arc;
use std::time::Duration;

use choraleia_core::types::{ConnectMode, SshEndpoint};
use dashmap::DashMap;
use russh::client::{self, AuthResult, Handle, Msg};
use russh::keys::{decode_secret_key, load_secret_key, PrivateKeyWithHashAlg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Result, SshError};
use crate::proxy;
use crate::BoxedDuplex;

/// Combined output of a remote exec.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    /// stdout and stderr interleaved in arrival order is not preserved by the
    /// SSH channel model; combined output is stdout followed by stderr.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}{}", self.stdout, self.stderr)
        }
    }
}

/// Routes server-initiated forwarded-tcpip channels (remote tunnels) to the
/// tunnel that registered the `(address, port)` pair.
type ForwardRegistry = Arc<DashMap<(String, u32), mpsc::UnboundedSender<Channel<Msg>>>>;

struct ClientHandler {
    forwards: ForwardRegistry,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Host-key pinning is the operator's job (known_hosts is not consulted
        // for pooled machine-to-machine connections).
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut client::Session,
    ) -> std::result::Result<(), Self::Error> {
        let key = (connected_address.to_string(), connected_port);
        match self.forwards.get(&key) {
            Some(tx) => {
                let _ = tx.send(channel);
            }
            None => {
                warn!(
                    address = %connected_address,
                    port = connected_port,
                    "forwarded channel with no registered tunnel, dropping"
                );
            }
        }
        Ok(())
    }
}

/// One authenticated SSH connection. Cheap to clone via `Arc` in the pool.
pub struct SshClient {
    handle: Mutex<Handle<ClientHandler>>,
    forwards: ForwardRegistry,
    endpoint: SshEndpoint,
    /// Jump-mode hop carrying this connection; kept alive for our lifetime.
    hop: Option<Box<SshClient>>,
}

impl SshClient {
    /// Dial and authenticate `endpoint`, following its connect mode (direct,
    /// proxy, or jump chains — jump recurses through this function).
    pub async fn connect(
        endpoint: &SshEndpoint,
        dial_timeout: Duration,
        keepalive: Option<Duration>,
    ) -> Result<Self> {
        let mut config = client::Config::default();
        config.keepalive_interval = keepalive;
        config.keepalive_max = 3;
        let config = Arc::new(config);

        let forwards: ForwardRegistry = Arc::new(DashMap::new());
        let handler = ClientHandler {
            forwards: Arc::clone(&forwards),
        };

        let mut hop = None;
        let mut handle = match &endpoint.connect {
            ConnectMode::Direct => {
                let addr = (endpoint.host.as_str(), endpoint.port);
                let stream = tokio::time::timeout(dial_timeout, TcpStream::connect(addr))
                    .await
                    .map_err(|_| SshError::DialTimeout {
                        host: endpoint.host.clone(),
                        port: endpoint.port,
                        secs: dial_timeout.as_secs(),
                    })??;
                client::connect_stream(config, stream, handler).await?
            }
            ConnectMode::Proxy { proxy: p } => {
                let stream = tokio::time::timeout(
                    dial_timeout,
                    proxy::dial_through_proxy(p, &endpoint.host, endpoint.port),
                )
                .await
                .map_err(|_| SshError::DialTimeout {
                    host: p.host.clone(),
                    port: p.port,
                    secs: dial_timeout.as_secs(),
                })??;
                client::connect_stream(config, stream, handler).await?
            }
            ConnectMode::Jump { jump } => {
                // Dial the jump host with its own full endpoint config (jump
                // chains recurse here), tunnel a direct-tcpip channel to the
                // target, and run the SSH handshake over that channel.
                let hop_client =
                    Box::pin(SshClient::connect(jump, dial_timeout, keepalive)).await?;
                let channel = hop_client
                    .open_direct_tcpip(&endpoint.host, endpoint.port as u32)
                    .await?;
                hop = Some(Box::new(hop_client));
                client::connect_stream(config, channel.into_stream(), handler).await?
            }
        };

        authenticate(&mut handle, endpoint).await?;
        info!(user = %endpoint.username, host = %endpoint.host, "SSH session established");

        Ok(Self {
            handle: Mutex::new(handle),
            forwards,
            endpoint: endpoint.clone(),
            hop,
        })
    }

    pub fn endpoint(&self) -> &SshEndpoint {
        &self.endpoint
    }

    /// Run `command` on the remote host and collect output + exit status.
    pub async fn exec(&self, command: &str) -> Result<ExecOutput> {
        let mut channel = {
            let handle = self.handle.lock().await;
            handle.channel_open_session().await?
        };
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = 0i32;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = exit_status as i32,
                _ => {}
            }
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    /// Open an interactive shell with a PTY and return its byte stream.
    pub async fn open_shell(&self, cols: u16, rows: u16) -> Result<BoxedDuplex> {
        self.open_pty_command(cols, rows, None).await
    }

    /// Open a PTY channel, optionally running `command` instead of the login
    /// shell. Used for remote `docker exec -it`.
    pub async fn open_pty_command(
        &self,
        cols: u16,
        rows: u16,
        command: Option<&str>,
    ) -> Result<BoxedDuplex> {
        let channel = {
            let handle = self.handle.lock().await;
            handle.channel_open_session().await?
        };
        channel
            .request_pty(false, "xterm-256color", cols as u32, rows as u32, 0, 0, &[])
            .await?;
        match command {
            Some(cmd) => channel.exec(true, cmd).await?,
            None => channel.request_shell(true).await?,
        }
        Ok(Box::new(channel.into_stream()))
    }

    /// Open a direct-tcpip channel (the building block of -L forwards and the
    /// dynamic SOCKS server).
    pub async fn open_direct_tcpip(&self, host: &str, port: u32) -> Result<Channel<Msg>> {
        let handle = self.handle.lock().await;
        Ok(handle
            .channel_open_direct_tcpip(host, port, "127.0.0.1", 0)
            .await?)
    }

    /// Same as [`open_direct_tcpip`] but boxed for consumers outside this crate.
    pub async fn open_forward_stream(&self, host: &str, port: u32) -> Result<BoxedDuplex> {
        let channel = self.open_direct_tcpip(host, port).await?;
        Ok(Box::new(channel.into_stream()))
    }

    /// Ask the server to listen on `address:port` (-R). Incoming connections
    /// are delivered on the returned receiver.
    pub async fn request_remote_forward(
        &self,
        address: &str,
        port: u32,
    ) -> Result<mpsc::UnboundedReceiver<Channel<Msg>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.forwards.insert((address.to_string(), port), tx);
        let mut handle = self.handle.lock().await;
        handle.tcpip_forward(address, port).await?;
        debug!(address, port, "remote forward registered");
        Ok(rx)
    }

    /// Cancel a previously requested remote forward.
    pub async fn cancel_remote_forward(&self, address: &str, port: u32) -> Result<()> {
        self.forwards.remove(&(address.to_string(), port));
        let mut handle = self.handle.lock().await;
        handle.cancel_tcpip_forward(address, port).await?;
        Ok(())
    }

    /// Start an SFTP session on this connection.
    pub async fn sftp(&self) -> Result<SftpSession> {
        let channel = {
            let handle = self.handle.lock().await;
            handle.channel_open_session().await?
        };
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(SshError::Protocol)?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::Sftp(e.to_string()))
    }

    /// Gracefully close the connection (and its jump hop, if any).
    pub async fn disconnect(&self) -> Result<()> {
        {
            let handle = self.handle.lock().await;
            handle
                .disconnect(Disconnect::ByApplication, "closing", "en")
                .await?;
        }
        if let Some(hop) = &self.hop {
            let _ = Box::pin(hop.disconnect()).await;
        }
        Ok(())
    }
}

/// Try the endpoint's credentials: inline key, key path, then password.
async fn authenticate(handle: &mut Handle<ClientHandler>, endpoint: &SshEndpoint) -> Result<()> {
    let user = endpoint.username.as_str();

    let key = if let Some(pem) = &endpoint.private_key {
        Some(
            decode_secret_key(pem, endpoint.passphrase.as_deref())
                .map_err(|e| SshError::Key(e.to_string()))?,
        )
    } else if let Some(path) = &endpoint.private_key_path {
        let expanded = shellexpand::tilde(path).into_owned();
        Some(
            load_secret_key(&expanded, endpoint.passphrase.as_deref())
                .map_err(|e| SshError::Key(e.to_string()))?,
        )
    } else {
        None
    };

    if let Some(key) = key {
        let hash = handle
            .best_supported_rsa_hash()
            .await?
            .flatten();
        let result = handle
            .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash))
            .await?;
        if matches!(result, AuthResult::Success) {
            return Ok(());
        }
        debug!(user, host = %endpoint.host, "public key rejected, trying password");
    }

    if let Some(password) = &endpoint.password {
        let result = handle.authenticate_password(user, password).await?;
        if matches!(result, AuthResult::Success) {
            return Ok(());
        }
        return Err(SshError::AuthFailed {
            user: user.to_string(),
            host: endpoint.host.clone(),
        });
    }

    Err(SshError::NoCredential {
        user: user.to_string(),
        host: endpoint.host.clone(),
        reason: "no key or password configured, or key was rejected".into(),
    })
}
