//! Progress events published by the controller during bring-up and teardown.

use choraleia_core::types::{WorkspaceId, WorkspaceStatus};
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Bring-up phase for docker runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimePhase {
    Pulling,
    Creating,
    Starting,
    Ready,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    Phase {
        workspace_id: WorkspaceId,
        phase: RuntimePhase,
    },
    PullProgress {
        workspace_id: WorkspaceId,
        line: String,
    },
    StatusChanged {
        workspace_id: WorkspaceId,
        status: WorkspaceStatus,
        message: Option<String>,
    },
}

/// Fan-out of runtime events to observers (gateway WS, logs).
/// Silently drops when nobody is subscribed.
pub struct RuntimeEvents {
    tx: broadcast::Sender<RuntimeEvent>,
}

impl RuntimeEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: RuntimeEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for RuntimeEvents {
    fn default() -> Self {
        Self::new()
    }
}
