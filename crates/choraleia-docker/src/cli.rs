//! The docker CLI operations the runtime and browser controllers use.

use std::sync::Arc;
use std::time::Duration;

use choraleia_core::config::{DOCKER_OP_TIMEOUT_SECS, EXEC_TIMEOUT_SECS};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{DockerError, Result};
use crate::runner::{CommandRunner, RunOutput};
use crate::types::{ContainerInfo, ContainerSpec};

pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    pub fn describe(&self) -> String {
        self.runner.describe()
    }

    fn op_timeout() -> Duration {
        Duration::from_secs(DOCKER_OP_TIMEOUT_SECS)
    }

    async fn run_checked(&self, argv: Vec<String>, timeout: Duration) -> Result<RunOutput> {
        let out = self.runner.run(&argv, timeout).await?;
        if !out.success() {
            return Err(DockerError::CommandFailed {
                code: out.exit_code,
                stderr: out.stderr_tail(5),
            });
        }
        Ok(out)
    }

    /// `docker image inspect` — true when the image exists locally.
    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        let argv = vec![
            "docker".into(),
            "image".into(),
            "inspect".into(),
            image.into(),
        ];
        let out = self.runner.run(&argv, Self::op_timeout()).await?;
        Ok(out.success())
    }

    /// Pull `image`, forwarding progress lines to `progress`. Failures are
    /// reported but callers typically swallow them — `docker create` retries
    /// implicitly against the local image cache.
    pub async fn pull(
        &self,
        image: &str,
        progress: Option<mpsc::Sender<String>>,
    ) -> Result<()> {
        let argv = vec!["docker".into(), "pull".into(), image.into()];
        let out = match progress {
            Some(tx) => {
                self.runner
                    .run_streaming(&argv, Self::op_timeout(), tx)
                    .await?
            }
            None => self.runner.run(&argv, Self::op_timeout()).await?,
        };
        if !out.success() {
            return Err(DockerError::CommandFailed {
                code: out.exit_code,
                stderr: out.stderr_tail(5),
            });
        }
        info!(image, target = %self.runner.describe(), "image pulled");
        Ok(())
    }

    /// `docker create`; returns the new container id.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let out = self
            .run_checked(spec.to_create_argv(), Self::op_timeout())
            .await?;
        let id = out.stdout_str().trim().to_string();
        if id.is_empty() {
            return Err(DockerError::Parse("docker create printed no id".into()));
        }
        debug!(name = %spec.name, id = %id, "container created");
        Ok(id)
    }

    pub async fn start(&self, container: &str) -> Result<()> {
        self.run_checked(
            vec!["docker".into(), "start".into(), container.into()],
            Self::op_timeout(),
        )
        .await?;
        Ok(())
    }

    pub async fn stop(&self, container: &str, timeout_secs: u64) -> Result<()> {
        self.run_checked(
            vec![
                "docker".into(),
                "stop".into(),
                "-t".into(),
                timeout_secs.to_string(),
                container.into(),
            ],
            Duration::from_secs(timeout_secs + DOCKER_OP_TIMEOUT_SECS),
        )
        .await?;
        Ok(())
    }

    pub async fn remove(&self, container: &str, force: bool) -> Result<()> {
        let mut argv = vec!["docker".into(), "rm".into()];
        if force {
            argv.push("-f".into());
        }
        argv.push(container.into());
        self.run_checked(argv, Self::op_timeout()).await?;
        Ok(())
    }

    /// `docker inspect`; `None` when the container does not exist.
    pub async fn inspect(&self, container: &str) -> Result<Option<ContainerInfo>> {
        let argv = vec!["docker".into(), "inspect".into(), container.into()];
        let out = self.runner.run(&argv, Self::op_timeout()).await?;
        if !out.success() {
            // "No such object" is the normal miss; other failures too are a miss
            // from the caller's perspective, inspect errors are never fatal here.
            return Ok(None);
        }
        parse_inspect(&out.stdout_str()).map(Some)
    }

    /// Container names carrying `label=value`, running or not.
    pub async fn ps_by_label(&self, label: &str, value: &str) -> Result<Vec<String>> {
        let argv = vec![
            "docker".into(),
            "ps".into(),
            "-a".into(),
            "--filter".into(),
            format!("label={label}={value}"),
            "--format".into(),
            "{{.Names}}".into(),
        ];
        let out = self.run_checked(argv, Self::op_timeout()).await?;
        Ok(out
            .stdout_str()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Run a shell script inside the container, combining stdout and stderr.
    pub async fn exec_sh(&self, container: &str, script: &str) -> Result<RunOutput> {
        let argv = vec![
            "docker".into(),
            "exec".into(),
            container.into(),
            "/bin/sh".into(),
            "-c".into(),
            script.into(),
        ];
        self.runner
            .run(&argv, Duration::from_secs(EXEC_TIMEOUT_SECS))
            .await
    }

    /// Create `network` if it doesn't exist yet.
    pub async fn ensure_network(&self, network: &str) -> Result<()> {
        let argv = vec![
            "docker".into(),
            "network".into(),
            "inspect".into(),
            network.into(),
        ];
        let out = self.runner.run(&argv, Self::op_timeout()).await?;
        if out.success() {
            return Ok(());
        }
        self.run_checked(
            vec![
                "docker".into(),
                "network".into(),
                "create".into(),
                network.into(),
            ],
            Self::op_timeout(),
        )
        .await?;
        info!(network, "bridge network created");
        Ok(())
    }
}

/// Parse the JSON array printed by `docker inspect`.
fn parse_inspect(raw: &str) -> Result<ContainerInfo> {
    let parsed: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| DockerError::Parse(e.to_string()))?;
    let first = parsed
        .as_array()
        .and_then(|a| a.first())
        .ok_or_else(|| DockerError::Parse("inspect returned an empty array".into()))?;

    let id = first["Id"].as_str().unwrap_or_default().to_string();
    let name = first["Name"]
        .as_str()
        .unwrap_or_default()
        .trim_start_matches('/')
        .to_string();
    let running = first["State"]["Running"].as_bool().unwrap_or(false);

    let labels = first["Config"]["Labels"]
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let networks = first["NetworkSettings"]["Networks"]
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(net, v)| {
                    (
                        net.clone(),
                        v["IPAddress"].as_str().unwrap_or_default().to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ContainerInfo {
        id,
        name,
        running,
        labels,
        networks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspect_parsing_extracts_the_fields_we_need() {
        let raw = r#"[{
            "Id": "abcdef123456",
            "Name": "/ws-dev",
            "State": { "Running": true },
            "Config": { "Labels": { "managed-by": "choraleia", "workspace-id": "w1" } },
            "NetworkSettings": {
                "Networks": {
                    "bridge": { "IPAddress": "172.17.0.2" }
                }
            }
        }]"#;
        let info = parse_inspect(raw).unwrap();
        assert_eq!(info.id, "abcdef123456");
        assert_eq!(info.name, "ws-dev");
        assert!(info.running);
        assert_eq!(info.labels.get("workspace-id").unwrap(), "w1");
        assert_eq!(info.networks.get("bridge").unwrap(), "172.17.0.2");
    }

    #[test]
    fn inspect_parsing_rejects_garbage() {
        assert!(parse_inspect("[]").is_err());
        assert!(parse_inspect("not json").is_err());
    }
}
