//! Output-fetch protocol: when the browser's xterm holds the authoritative
//! scrollback, the server asks the client for a window and waits on a
//! single-shot channel with a 5-second deadline.

use std::time::Duration;

use choraleia_core::config::OUTPUT_REQUEST_TIMEOUT_SECS;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, TerminalError};
use crate::protocol::ServerFrame;

type Pending = oneshot::Sender<std::result::Result<Vec<String>, String>>;

pub struct OutputRequestManager {
    pending: DashMap<String, Pending>,
}

impl OutputRequestManager {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Build a request frame and wait for the client's response. `send` must
    /// deliver the frame to the session's WebSocket; the future resolves when
    /// the client answers or the deadline passes.
    pub async fn request<F>(&self, lines: usize, send: F) -> Result<Vec<String>>
    where
        F: FnOnce(ServerFrame) -> Result<()>,
    {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let frame = ServerFrame::TermOutputRequest {
            request_id: request_id.clone(),
            lines,
        };
        if let Err(e) = send(frame) {
            self.pending.remove(&request_id);
            return Err(e);
        }

        let deadline = Duration::from_secs(OUTPUT_REQUEST_TIMEOUT_SECS);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(client_error))) => {
                debug!(request_id, error = %client_error, "client reported output error");
                Err(TerminalError::IoError(std::io::Error::other(client_error)))
            }
            // Sender dropped without answering (connection closed).
            Ok(Err(_)) => Err(TerminalError::BackendClosed),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(TerminalError::OutputRequestTimeout)
            }
        }
    }

    /// Deliver a client `TermOutputResponse`. Unknown ids (late replies after
    /// timeout) are dropped silently.
    pub fn fulfill(
        &self,
        request_id: &str,
        output: Option<Vec<String>>,
        error: Option<String>,
    ) {
        if let Some((_, tx)) = self.pending.remove(request_id) {
            let result = match (output, error) {
                (_, Some(err)) => Err(err),
                (Some(lines), None) => Ok(lines),
                (None, None) => Ok(Vec::new()),
            };
            let _ = tx.send(result);
        } else {
            debug!(request_id, "late or unknown output response dropped");
        }
    }
}

impl Default for OutputRequestManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fulfilled_request_returns_lines() {
        let mgr = std::sync::Arc::new(OutputRequestManager::new());

        let mgr2 = std::sync::Arc::clone(&mgr);
        let task = tokio::spawn(async move {
            mgr2.request(10, |frame| {
                // Simulate the client answering as soon as it sees the frame.
                let ServerFrame::TermOutputRequest { request_id, .. } = frame else {
                    panic!("wrong frame")
                };
                let mgr3 = std::sync::Arc::clone(&mgr2);
                tokio::spawn(async move {
                    mgr3.fulfill(&request_id, Some(vec!["line".into()]), None);
                });
                Ok(())
            })
            .await
        });

        let lines = task.await.unwrap().unwrap();
        assert_eq!(lines, vec!["line"]);
    }

    #[tokio::test]
    async fn client_error_is_surfaced() {
        let mgr = std::sync::Arc::new(OutputRequestManager::new());
        let mgr2 = std::sync::Arc::clone(&mgr);
        let res = mgr
            .request(10, move |frame| {
                let ServerFrame::TermOutputRequest { request_id, .. } = frame else {
                    panic!("wrong frame")
                };
                mgr2.fulfill(&request_id, None, Some("xterm detached".into()));
                Ok(())
            })
            .await;
        assert!(res.is_err());
    }

    #[test]
    fn late_fulfill_is_ignored() {
        let mgr = OutputRequestManager::new();
        mgr.fulfill("unknown", Some(vec![]), None);
    }
}
