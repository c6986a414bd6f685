//! Bulk copy via gzipped tar archives.
//!
//! The tar/flate2 APIs are synchronous; archive work runs on the blocking
//! pool so the async runtime never stalls on disk I/O.

use std::path::PathBuf;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::{FsError, Result};

pub struct TarStreamer;

impl TarStreamer {
    /// Pack the directory at `dir` into a gzipped tar archive. Entries are
    /// stored relative to `dir` itself.
    pub async fn pack_dir(dir: impl Into<PathBuf>) -> Result<Vec<u8>> {
        let dir = dir.into();
        tokio::task::spawn_blocking(move || {
            let encoder = GzEncoder::new(Vec::new(), Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder
                .append_dir_all(".", &dir)
                .map_err(|e| FsError::Archive(e.to_string()))?;
            let encoder = builder
                .into_inner()
                .map_err(|e| FsError::Archive(e.to_string()))?;
            let bytes = encoder
                .finish()
                .map_err(|e| FsError::Archive(e.to_string()))?;
            debug!(dir = %dir.display(), bytes = bytes.len(), "directory packed");
            Ok(bytes)
        })
        .await
        .map_err(|e| FsError::Archive(format!("pack task failed: {e}")))?
    }

    /// Unpack a gzipped tar archive into `dest`, creating it if needed.
    pub async fn unpack_into(archive: Vec<u8>, dest: impl Into<PathBuf>) -> Result<()> {
        let dest = dest.into();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dest)?;
            let decoder = GzDecoder::new(archive.as_slice());
            let mut reader = tar::Archive::new(decoder);
            reader
                .unpack(&dest)
                .map_err(|e| FsError::Archive(e.to_string()))?;
            debug!(dest = %dest.display(), "archive unpacked");
            Ok(())
        })
        .await
        .map_err(|e| FsError::Archive(format!("unpack task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pack_then_unpack_preserves_tree() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(src.path().join("sub/b.txt"), b"beta").unwrap();

        let archive = TarStreamer::pack_dir(src.path()).await.unwrap();
        assert!(!archive.is_empty());

        let dest = tempfile::tempdir().unwrap();
        TarStreamer::unpack_into(archive, dest.path()).await.unwrap();

        assert_eq!(std::fs::read(dest.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(
            std::fs::read(dest.path().join("sub/b.txt")).unwrap(),
            b"beta"
        );
    }
}
