//! Entity model shared across crates: workspaces, runtimes, assets, rooms.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate an opaque string-backed id type.
///
/// All persisted rows use UUIDv7 so primary keys sort by creation time;
/// the inner representation stays private to callers.
macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh time-ordered id (UUIDv7).
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a workspace.
    WorkspaceId
);
string_id!(
    /// Identifier of a credentialed asset.
    AssetId
);
string_id!(
    /// Identifier of a room within a workspace.
    RoomId
);
string_id!(
    /// Identifier of a conversation.
    ConversationId
);
string_id!(
    /// Identifier of a message within a conversation's branch tree.
    MessageId
);
string_id!(
    /// Identifier of a browser instance.
    BrowserId
);
string_id!(
    /// Identifier of a tunnel.
    TunnelId
);

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Lifecycle state of a workspace. Only the runtime controller may move it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkspaceStatus::Stopped => "stopped",
            WorkspaceStatus::Starting => "starting",
            WorkspaceStatus::Running => "running",
            WorkspaceStatus::Stopping => "stopping",
            WorkspaceStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl WorkspaceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(Self::Stopped),
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "stopping" => Some(Self::Stopping),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Legal transitions: Stopped→Starting→Running, Running→Stopping→Stopped,
    /// and any state → Error.
    pub fn can_transition_to(self, to: WorkspaceStatus) -> bool {
        use WorkspaceStatus::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Starting, Running)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (_, Error)
                | (Error, Starting)
                | (Error, Stopped)
        )
    }
}

/// Where a workspace's commands run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeType {
    /// Commands run directly on the host.
    Local,
    /// Commands run inside a container on local Docker.
    DockerLocal,
    /// Commands run inside a container on a remote SSH-reachable Docker host.
    DockerRemote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerMode {
    /// The controller creates a fresh container from `new_container_image`.
    New,
    /// The controller attaches to a pre-existing container.
    Existing,
}

/// Declarative runtime of a workspace. Exactly one per workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRuntime {
    #[serde(rename = "type")]
    pub runtime_type: RuntimeType,
    /// For `docker_remote`: the SSH-capable Docker host asset.
    pub docker_asset_id: Option<AssetId>,
    pub container_mode: Option<ContainerMode>,
    /// Populated by the controller when it creates or discovers a container.
    pub container_id: Option<String>,
    pub container_name: Option<String>,
    pub container_ip: Option<String>,
    pub new_container_image: Option<String>,
    pub new_container_name: Option<String>,
    /// Host-side working directory, may contain `~`.
    pub work_dir_host: String,
    /// Mount point inside the container.
    pub work_dir_container: Option<String>,
}

impl WorkspaceRuntime {
    /// Check the invariants of the runtime block itself.
    pub fn validate(&self) -> Result<(), String> {
        if self.runtime_type == RuntimeType::DockerRemote && self.docker_asset_id.is_none() {
            return Err("docker_remote runtime requires docker_asset_id".into());
        }
        if self.container_mode == Some(ContainerMode::New) && self.new_container_image.is_none() {
            return Err("container_mode=new requires new_container_image".into());
        }
        if self.runtime_type != RuntimeType::Local && self.container_mode.is_none() {
            return Err("docker runtimes require container_mode".into());
        }
        Ok(())
    }

    pub fn is_docker(&self) -> bool {
        matches!(
            self.runtime_type,
            RuntimeType::DockerLocal | RuntimeType::DockerRemote
        )
    }
}

/// A declarative workspace: one runtime, assets, tools, rooms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    /// DNS-label name, unique globally.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: String,
    pub status: WorkspaceStatus,
    pub runtime: WorkspaceRuntime,
    #[serde(default)]
    pub asset_ids: Vec<AssetId>,
    #[serde(default)]
    pub tools: Vec<String>,
    pub active_room_id: Option<RoomId>,
    /// When set, the agent builds a semantic-memory context block.
    #[serde(default)]
    pub memory_enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// RFC 1035 label: lowercase alphanumeric and hyphens, no leading/trailing
/// hyphen, 1..=63 chars.
pub fn is_dns_label(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }
    if name.starts_with('-') || name.ends_with('-') {
        return false;
    }
    name.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Local,
    Ssh,
    DockerHost,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Local => "local",
            AssetKind::Ssh => "ssh",
            AssetKind::DockerHost => "docker_host",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(AssetKind::Local),
            "ssh" => Some(AssetKind::Ssh),
            "docker_host" => Some(AssetKind::DockerHost),
            _ => None,
        }
    }
}

/// Kind of proxy in front of an SSH endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    Socks4,
    Socks5,
    HttpConnect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// How the SSH TCP connection is established.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ConnectMode {
    /// Plain `Dial("tcp", host:port)`.
    Direct,
    /// TCP to a SOCKS4/SOCKS5/HTTP CONNECT proxy, SSH layered on top.
    Proxy { proxy: ProxyEndpoint },
    /// Dial the jump host first, open a direct-tcpip channel to the target,
    /// and layer a new SSH client on that channel.
    Jump { jump: Box<SshEndpoint> },
}

impl Default for ConnectMode {
    fn default() -> Self {
        ConnectMode::Direct
    }
}

/// Full SSH endpoint description, including authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshEndpoint {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    /// PEM private key inline.
    pub private_key: Option<String>,
    /// Path to a private key file. Ignored when `private_key` is set.
    pub private_key_path: Option<String>,
    pub passphrase: Option<String>,
    #[serde(default)]
    pub connect: ConnectMode,
    /// Tunnel configurations owned by this asset, rehydrated at boot.
    #[serde(default)]
    pub tunnels: Vec<TunnelConfig>,
}

/// Persisted tunnel configuration. The live counters belong to the tunnel
/// manager; only this shape survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub id: TunnelId,
    #[serde(rename = "type")]
    pub tunnel_type: String,
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DockerConnectionType {
    Local,
    Ssh,
}

/// Docker-host asset config: local daemon or a daemon behind SSH.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerHostConfig {
    pub connection_type: DockerConnectionType,
    /// Required when `connection_type == Ssh`.
    pub ssh_asset_id: Option<AssetId>,
}

/// A credentialed endpoint usable by workspaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub name: String,
    pub kind: AssetKind,
    pub ssh: Option<SshEndpoint>,
    pub docker_host: Option<DockerHostConfig>,
    pub created_at: String,
}

impl Asset {
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            AssetKind::Ssh if self.ssh.is_none() => Err("ssh asset requires ssh config".into()),
            AssetKind::DockerHost => {
                let dh = self
                    .docker_host
                    .as_ref()
                    .ok_or("docker_host asset requires docker_host config")?;
                if dh.connection_type == DockerConnectionType::Ssh && dh.ssh_asset_id.is_none() {
                    return Err("ssh-connected docker host requires ssh_asset_id".into());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// Groups conversations under a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_label_accepts_valid_names() {
        assert!(is_dns_label("dev"));
        assert!(is_dns_label("my-workspace-01"));
        assert!(is_dns_label("a"));
    }

    #[test]
    fn dns_label_rejects_invalid_names() {
        assert!(!is_dns_label(""));
        assert!(!is_dns_label("-leading"));
        assert!(!is_dns_label("trailing-"));
        assert!(!is_dns_label("UpperCase"));
        assert!(!is_dns_label("under_score"));
        assert!(!is_dns_label(&"x".repeat(64)));
    }

    #[test]
    fn status_transitions_follow_the_state_machine() {
        use WorkspaceStatus::*;
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Error));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopped.can_transition_to(Stopping));
    }

    #[test]
    fn remote_runtime_requires_docker_asset() {
        let rt = WorkspaceRuntime {
            runtime_type: RuntimeType::DockerRemote,
            docker_asset_id: None,
            container_mode: Some(ContainerMode::New),
            container_id: None,
            container_name: None,
            container_ip: None,
            new_container_image: Some("ubuntu:24.04".into()),
            new_container_name: None,
            work_dir_host: "~/work".into(),
            work_dir_container: Some("/workspace".into()),
        };
        assert!(rt.validate().is_err());
    }

    #[test]
    fn new_mode_requires_image() {
        let rt = WorkspaceRuntime {
            runtime_type: RuntimeType::DockerLocal,
            docker_asset_id: None,
            container_mode: Some(ContainerMode::New),
            container_id: None,
            container_name: None,
            container_ip: None,
            new_container_image: None,
            new_container_name: None,
            work_dir_host: "~/work".into(),
            work_dir_container: Some("/workspace".into()),
        };
        assert!(rt.validate().is_err());
    }
}
