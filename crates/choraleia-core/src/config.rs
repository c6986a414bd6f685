use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Shared timing/size constants. These are part of the tool and wire contracts
// and must not drift between crates.
pub const DEFAULT_PORT: u16 = 18890;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Hard cap on interactive-session scrollback, in bytes.
pub const SCROLLBACK_MAX_BYTES: usize = 1_000_000;
/// Cap on `terminal_read_file` payloads, in bytes.
pub const READ_FILE_MAX_BYTES: usize = 200_000;
/// Chat-chunk replay ring capacity per active stream.
pub const STREAM_RING_CAPACITY: usize = 1_000;
/// Per-subscriber buffered chunks before drop-if-slow kicks in.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;
/// Maximum tool rounds within one assistant message.
pub const MAX_TOOL_ROUNDS: usize = 50;
/// Hard deadline for `Exec` on a workspace container.
pub const EXEC_TIMEOUT_SECS: u64 = 300;
/// Image pulls and container stops.
pub const DOCKER_OP_TIMEOUT_SECS: u64 = 30;
/// DevTools readiness wait.
pub const BROWSER_READY_TIMEOUT_SECS: u64 = 30;
/// Browser instances are reaped after this long without activity.
pub const BROWSER_IDLE_TIMEOUT_SECS: u64 = 600;
/// Browsers allowed per conversation.
pub const MAX_BROWSERS_PER_CONVERSATION: usize = 3;
/// Default timeout for agent-driven terminal commands.
pub const TOOL_EXEC_DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Deadline for the client-side output-fetch protocol.
pub const OUTPUT_REQUEST_TIMEOUT_SECS: u64 = 5;
/// WebSocket keepalive ping cadence.
pub const WS_PING_INTERVAL_SECS: u64 = 30;
/// Default SSH dial deadline.
pub const SSH_DIAL_TIMEOUT_SECS: u64 = 30;

/// Top-level config (choraleia.toml + CHORALEIA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoraleiaConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub ssh: SshDefaults,
    #[serde(default)]
    pub terminal: TerminalConfig,
}

impl Default for ChoraleiaConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            docker: DockerConfig::default(),
            browser: BrowserConfig::default(),
            agent: AgentConfig::default(),
            ssh: SshDefaults::default(),
            terminal: TerminalConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Static bearer token; `None` disables auth (trusted networks only).
    pub auth_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Image used when a `new`-mode runtime doesn't name one.
    #[serde(default = "default_workspace_image")]
    pub default_image: String,
    /// Memory limit passed to `docker create` (e.g. "2g"). Empty disables.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    /// CPU limit passed to `docker create` (e.g. "2"). Empty disables.
    #[serde(default)]
    pub cpu_limit: String,
    /// Shared-memory size (e.g. "512m"). Empty disables.
    #[serde(default = "default_shm_size")]
    pub shm_size: String,
    /// Default mount point when the runtime doesn't set one.
    #[serde(default = "default_container_workdir")]
    pub container_workdir: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            default_image: default_workspace_image(),
            memory_limit: default_memory_limit(),
            cpu_limit: String::new(),
            shm_size: default_shm_size(),
            container_workdir: default_container_workdir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Headless-Chromium image for browser containers.
    #[serde(default = "default_browser_image")]
    pub image: String,
    /// Bridge network browser containers attach to.
    #[serde(default = "default_browser_network")]
    pub network: String,
    /// DevTools port exposed inside the container.
    #[serde(default = "default_devtools_port")]
    pub devtools_port: u16,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            image: default_browser_image(),
            network: default_browser_network(),
            devtools_port: default_devtools_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model id used when a conversation has no preference.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshDefaults {
    #[serde(default = "default_ssh_dial_timeout")]
    pub dial_timeout_secs: u64,
    /// Interval for keepalive@openssh.com requests. 0 disables.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            dial_timeout_secs: default_ssh_dial_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Shell spawned for local PTY sessions.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Pass `-l` so the shell reads login profiles.
    #[serde(default)]
    pub login_shell: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            login_shell: false,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.choraleia/choraleia.db")
}
fn default_workspace_image() -> String {
    "ubuntu:24.04".to_string()
}
fn default_memory_limit() -> String {
    "2g".to_string()
}
fn default_shm_size() -> String {
    "512m".to_string()
}
fn default_container_workdir() -> String {
    "/workspace".to_string()
}
fn default_browser_image() -> String {
    "zenika/alpine-chrome:latest".to_string()
}
fn default_browser_network() -> String {
    "choraleia-browser-net".to_string()
}
fn default_devtools_port() -> u16 {
    9222
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_max_output_tokens() -> u32 {
    8192
}
fn default_ssh_dial_timeout() -> u64 {
    SSH_DIAL_TIMEOUT_SECS
}
fn default_keepalive_interval() -> u64 {
    30
}
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}

impl ChoraleiaConfig {
    /// Load config from a TOML file with CHORALEIA_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ChoraleiaConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHORALEIA_").split("_"))
            .extract()
            .map_err(|e| crate::error::ChoraleiaError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.choraleia/choraleia.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ChoraleiaConfig::default();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.browser.network, "choraleia-browser-net");
        assert!(cfg.database.path.ends_with("choraleia.db"));
    }

    #[test]
    fn load_reads_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("choraleia.toml");
        std::fs::write(&path, "[gateway]\nport = 4242\n").unwrap();

        let cfg = ChoraleiaConfig::load(path.to_str()).unwrap();
        assert_eq!(cfg.gateway.port, 4242);
        // untouched sections keep defaults
        assert_eq!(cfg.docker.container_workdir, "/workspace");
    }
}
