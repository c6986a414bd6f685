//! The `WorkspaceFs` trait and its three backends.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use base64::Engine;
use choraleia_docker::DockerCli;
use choraleia_ssh::SshClient;
use russh_sftp::client::SftpSession;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{FsError, Result};

/// One directory listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// File metadata.
#[derive(Debug, Clone, Serialize)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
    /// Unix seconds; 0 when the backend cannot report it.
    pub modified: u64,
}

/// Uniform file operations over local disk, SFTP, or a container interior.
#[async_trait]
pub trait WorkspaceFs: Send + Sync {
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>>;
    async fn stat(&self, path: &str) -> Result<FileStat>;
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;
    async fn rename(&self, from: &str, to: &str) -> Result<()>;
    async fn remove(&self, path: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Local
// ---------------------------------------------------------------------------

pub struct LocalFs;

#[async_trait]
impl WorkspaceFs for LocalFs {
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let mut rd = tokio::fs::read_dir(path).await?;
        while let Some(entry) = rd.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| FsError::NotFound(path.to_string()))?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
            modified,
        })
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        Ok(tokio::fs::rename(from, to).await?)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| FsError::NotFound(path.to_string()))?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SFTP
// ---------------------------------------------------------------------------

/// SFTP over a pooled SSH client. A fresh subsystem channel is opened lazily
/// and kept for the life of this value.
pub struct SftpFs {
    session: SftpSession,
}

impl SftpFs {
    pub async fn connect(client: Arc<SshClient>) -> Result<Self> {
        let session = client
            .sftp()
            .await
            .map_err(|e| FsError::Sftp(e.to_string()))?;
        Ok(Self { session })
    }
}

#[async_trait]
impl WorkspaceFs for SftpFs {
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let rd = self
            .session
            .read_dir(path)
            .await
            .map_err(|e| FsError::Sftp(e.to_string()))?;
        let mut entries: Vec<DirEntry> = rd
            .map(|entry| DirEntry {
                name: entry.file_name(),
                is_dir: entry.file_type().is_dir(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let attrs = self
            .session
            .metadata(path)
            .await
            .map_err(|_| FsError::NotFound(path.to_string()))?;
        Ok(FileStat {
            size: attrs.size.unwrap_or(0),
            is_dir: attrs.is_dir(),
            modified: attrs.mtime.unwrap_or(0) as u64,
        })
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let mut file = self
            .session
            .open(path)
            .await
            .map_err(|_| FsError::NotFound(path.to_string()))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(|e| FsError::Sftp(e.to_string()))?;
        Ok(data)
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut file = self
            .session
            .create(path)
            .await
            .map_err(|e| FsError::Sftp(e.to_string()))?;
        file.write_all(data)
            .await
            .map_err(|e| FsError::Sftp(e.to_string()))?;
        file.shutdown()
            .await
            .map_err(|e| FsError::Sftp(e.to_string()))?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.session
            .rename(from, to)
            .await
            .map_err(|e| FsError::Sftp(e.to_string()))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let attrs = self
            .session
            .metadata(path)
            .await
            .map_err(|_| FsError::NotFound(path.to_string()))?;
        if attrs.is_dir() {
            self.session
                .remove_dir(path)
                .await
                .map_err(|e| FsError::Sftp(e.to_string()))
        } else {
            self.session
                .remove_file(path)
                .await
                .map_err(|e| FsError::Sftp(e.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Docker CLI
// ---------------------------------------------------------------------------

/// File access inside a container, via `docker exec ... /bin/sh -c`. Content
/// crosses the exec channel base64-encoded so binary data survives.
pub struct DockerFs {
    cli: Arc<DockerCli>,
    container: String,
}

impl DockerFs {
    pub fn new(cli: Arc<DockerCli>, container: impl Into<String>) -> Self {
        Self {
            cli,
            container: container.into(),
        }
    }

    async fn sh(&self, script: String) -> Result<String> {
        debug!(container = %self.container, script = %script, "container fs op");
        let out = self
            .cli
            .exec_sh(&self.container, &script)
            .await
            .map_err(|e| FsError::Exec(e.to_string()))?;
        if !out.success() {
            return Err(FsError::Exec(out.stderr_tail(3)));
        }
        Ok(out.stdout_str())
    }
}

fn q(path: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(path)).into_owned()
}

#[async_trait]
impl WorkspaceFs for DockerFs {
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        // -A: skip . and ..; -p: mark directories with a trailing slash.
        let out = self.sh(format!("ls -1Ap -- {}", q(path))).await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(|line| match line.strip_suffix('/') {
                Some(dir) => DirEntry {
                    name: dir.to_string(),
                    is_dir: true,
                },
                None => DirEntry {
                    name: line.to_string(),
                    is_dir: false,
                },
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let out = self
            .sh(format!("stat -c '%F|%s|%Y' -- {}", q(path)))
            .await
            .map_err(|_| FsError::NotFound(path.to_string()))?;
        let line = out.trim();
        let mut fields = line.splitn(3, '|');
        let kind = fields.next().unwrap_or_default();
        let size = fields
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        let modified = fields
            .next()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);
        Ok(FileStat {
            size,
            is_dir: kind.contains("directory"),
            modified,
        })
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let out = self
            .sh(format!("base64 < {}", q(path)))
            .await
            .map_err(|_| FsError::NotFound(path.to_string()))?;
        let compact: String = out.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| FsError::Exec(format!("base64 decode failed: {e}")))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        self.sh(format!(
            "mkdir -p -- \"$(dirname {p})\" && printf '%s' {b} | base64 -d > {p}",
            p = q(path),
            b = q(&encoded),
        ))
        .await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.sh(format!("mv -- {} {}", q(from), q(to))).await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.sh(format!("rm -rf -- {}", q(path))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_fs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs;
        let file = dir.path().join("nested/hello.txt");
        let file = file.to_str().unwrap();

        fs.write(file, b"hello world").await.unwrap();
        assert_eq!(fs.read(file).await.unwrap(), b"hello world");

        let stat = fs.stat(file).await.unwrap();
        assert_eq!(stat.size, 11);
        assert!(!stat.is_dir);

        let listing = fs
            .list_dir(dir.path().join("nested").to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "hello.txt");

        let renamed = dir.path().join("nested/renamed.txt");
        fs.rename(file, renamed.to_str().unwrap()).await.unwrap();
        assert!(fs.stat(file).await.is_err());

        fs.remove(renamed.to_str().unwrap()).await.unwrap();
        assert!(fs.stat(renamed.to_str().unwrap()).await.is_err());
    }

    #[test]
    fn docker_paths_are_quoted() {
        assert_eq!(q("/tmp/with space"), "'/tmp/with space'");
        assert_eq!(q("/tmp/it's"), r#"'/tmp/it'\''s'"#);
    }
}
