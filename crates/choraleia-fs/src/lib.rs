//! Uniform filesystem access for the host, SFTP remotes, and container
//! interiors (via `docker exec`), plus a tar streamer for bulk copies.

pub mod backend;
pub mod error;
pub mod tar_stream;

pub use backend::{DirEntry, DockerFs, FileStat, LocalFs, SftpFs, WorkspaceFs};
pub use error::{FsError, Result};
pub use tar_stream::TarStreamer;
