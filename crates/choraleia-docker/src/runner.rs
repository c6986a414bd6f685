//! Command execution seam: a local process spawn or an SSH exec, behind one
//! trait so the control plane never branches on where the daemon lives.

use std::borrow::Cow;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use choraleia_ssh::SshClient;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{DockerError, Result};

/// Captured output of one command run.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl RunOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The last few stderr lines, used as the operator-facing error message.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let text = self.stderr_str();
        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Runs argv vectors somewhere a Docker daemon is reachable.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` and wait for completion, bounded by `timeout`.
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<RunOutput>;

    /// Run `argv`, forwarding stdout lines as they appear (image pulls).
    /// The default buffers and replays; runners that can stream override it.
    async fn run_streaming(
        &self,
        argv: &[String],
        timeout: Duration,
        lines: mpsc::Sender<String>,
    ) -> Result<RunOutput> {
        let output = self.run(argv, timeout).await?;
        for line in output.stdout_str().lines() {
            let _ = lines.send(line.to_string()).await;
        }
        Ok(output)
    }

    /// Human-readable target for logs ("local" or "user@host").
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// Local
// ---------------------------------------------------------------------------

/// Spawns commands on this host.
pub struct LocalRunner;

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<RunOutput> {
        debug!(cmd = %argv.join(" "), "local run");
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| DockerError::Spawn("empty argv".into()))?;

        let child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DockerError::Spawn(e.to_string()))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| DockerError::Timeout {
                secs: timeout.as_secs(),
            })??;

        Ok(RunOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn run_streaming(
        &self,
        argv: &[String],
        timeout: Duration,
        lines: mpsc::Sender<String>,
    ) -> Result<RunOutput> {
        debug!(cmd = %argv.join(" "), "local run (streaming)");
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| DockerError::Spawn("empty argv".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DockerError::Spawn(e.to_string()))?;

        let stdout = child.stdout.take().expect("stdout piped");
        let mut reader = BufReader::new(stdout).lines();
        let mut collected = Vec::new();

        let drain = async {
            while let Ok(Some(line)) = reader.next_line().await {
                collected.extend_from_slice(line.as_bytes());
                collected.push(b'\n');
                if lines.send(line).await.is_err() {
                    // Observer went away; keep draining so the child doesn't block.
                    break;
                }
            }
            // Finish draining without forwarding.
            while let Ok(Some(line)) = reader.next_line().await {
                collected.extend_from_slice(line.as_bytes());
                collected.push(b'\n');
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(timeout, drain)
            .await
            .map_err(|_| DockerError::Timeout {
                secs: timeout.as_secs(),
            })??;

        Ok(RunOutput {
            stdout: collected,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn describe(&self) -> String {
        "local".to_string()
    }
}

// ---------------------------------------------------------------------------
// SSH
// ---------------------------------------------------------------------------

/// Dispatches commands through a pooled SSH client.
pub struct SshRunner {
    client: Arc<SshClient>,
}

impl SshRunner {
    pub fn new(client: Arc<SshClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<RunOutput> {
        let command = join_quoted(argv);
        debug!(cmd = %command, host = %self.client.endpoint().host, "ssh run");

        let exec = self.client.exec(&command);
        let output = tokio::time::timeout(timeout, exec)
            .await
            .map_err(|_| DockerError::Timeout {
                secs: timeout.as_secs(),
            })??;

        if output.exit_code != 0 {
            warn!(
                cmd = %command,
                code = output.exit_code,
                "remote command returned non-zero"
            );
        }
        Ok(RunOutput {
            stdout: output.stdout.into_bytes(),
            stderr: output.stderr.into_bytes(),
            exit_code: output.exit_code,
        })
    }

    fn describe(&self) -> String {
        let ep = self.client.endpoint();
        format!("{}@{}", ep.username, ep.host)
    }
}

/// Join argv into one shell line, single-quoting each argument with the
/// standard `'\''` escape for embedded quotes.
pub fn join_quoted(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_escape::unix::escape(Cow::Borrowed(a.as_str())).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_quoted_escapes_single_quotes() {
        let argv = vec!["echo".to_string(), "it's here".to_string()];
        let joined = join_quoted(&argv);
        assert_eq!(joined, r#"echo 'it'\''s here'"#);
    }

    #[test]
    fn join_quoted_leaves_safe_words_alone() {
        let argv = vec!["docker".to_string(), "ps".to_string(), "-a".to_string()];
        assert_eq!(join_quoted(&argv), "docker ps -a");
    }

    #[tokio::test]
    async fn local_runner_captures_output_and_code() {
        let out = LocalRunner
            .run(
                &["sh".into(), "-c".into(), "echo hi; exit 3".into()],
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout_str().trim(), "hi");
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn local_runner_times_out() {
        let err = LocalRunner
            .run(
                &["sleep".into(), "5".into()],
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DockerError::Timeout { .. }));
    }

    #[tokio::test]
    async fn streaming_runner_forwards_lines() {
        let (tx, mut rx) = mpsc::channel(16);
        let out = LocalRunner
            .run_streaming(
                &["sh".into(), "-c".into(), "echo one; echo two".into()],
                Duration::from_secs(5),
                tx,
            )
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(rx.recv().await.unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap(), "two");
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let out = RunOutput {
            stdout: Vec::new(),
            stderr: b"a\nb\nc\nd\n".to_vec(),
            exit_code: 1,
        };
        assert_eq!(out.stderr_tail(2), "c\nd");
    }
}
