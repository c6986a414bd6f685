use choraleia_core::types::{AssetId, BrowserId, ConversationId, WorkspaceId};
use choraleia_store::store::BrowserRow;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserStatus {
    Starting,
    Ready,
    Busy,
    Closed,
    Error,
}

impl BrowserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BrowserStatus::Starting => "starting",
            BrowserStatus::Ready => "ready",
            BrowserStatus::Busy => "busy",
            BrowserStatus::Closed => "closed",
            BrowserStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(Self::Starting),
            "ready" => Some(Self::Ready),
            "busy" => Some(Self::Busy),
            "closed" => Some(Self::Closed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserRuntimeType {
    Local,
    RemoteSsh,
}

impl BrowserRuntimeType {
    pub fn as_str(self) -> &'static str {
        match self {
            BrowserRuntimeType::Local => "local",
            BrowserRuntimeType::RemoteSsh => "remote_ssh",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "remote_ssh" => Some(Self::RemoteSsh),
            _ => None,
        }
    }
}

/// One DevTools page target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tab {
    pub id: String,
    pub url: String,
    pub title: String,
}

/// A live browser container and its DevTools coordinates.
#[derive(Debug, Clone, Serialize)]
pub struct BrowserInstance {
    pub id: BrowserId,
    pub conversation_id: ConversationId,
    pub workspace_id: Option<WorkspaceId>,
    pub runtime_type: BrowserRuntimeType,
    pub container_id: String,
    pub container_name: String,
    pub container_ip: String,
    /// HTTP root of the DevTools endpoint as reachable from this process
    /// (tunneled local port for remote runtimes).
    pub devtools_url: String,
    pub tabs: Vec<Tab>,
    pub active_tab: Option<String>,
    pub status: BrowserStatus,
    pub ssh_asset_id: Option<AssetId>,
    pub tunnel_local_port: Option<u16>,
    /// RFC3339; bumped on every tool action, read by the idle reaper.
    pub last_activity: String,
}

impl BrowserInstance {
    /// Flatten into the persisted row shape (upserted on every change).
    pub fn to_row(&self) -> BrowserRow {
        BrowserRow {
            id: self.id.to_string(),
            conversation_id: self.conversation_id.to_string(),
            workspace_id: self.workspace_id.as_ref().map(|w| w.to_string()),
            runtime_type: self.runtime_type.as_str().to_string(),
            container_id: self.container_id.clone(),
            container_name: self.container_name.clone(),
            container_ip: self.container_ip.clone(),
            devtools_url: self.devtools_url.clone(),
            tabs: self
                .tabs
                .iter()
                .map(|t| serde_json::to_string(t).unwrap_or_default())
                .collect(),
            active_tab: self.active_tab.clone(),
            status: self.status.as_str().to_string(),
            ssh_asset_id: self.ssh_asset_id.as_ref().map(|a| a.to_string()),
            tunnel_local_port: self.tunnel_local_port.map(|p| p as i64),
            last_activity: self.last_activity.clone(),
        }
    }

    pub fn from_row(row: &BrowserRow) -> Self {
        Self {
            id: BrowserId(row.id.clone()),
            conversation_id: ConversationId(row.conversation_id.clone()),
            workspace_id: row.workspace_id.clone().map(WorkspaceId),
            runtime_type: BrowserRuntimeType::parse(&row.runtime_type)
                .unwrap_or(BrowserRuntimeType::Local),
            container_id: row.container_id.clone(),
            container_name: row.container_name.clone(),
            container_ip: row.container_ip.clone(),
            devtools_url: row.devtools_url.clone(),
            tabs: row
                .tabs
                .iter()
                .filter_map(|t| serde_json::from_str(t).ok())
                .collect(),
            active_tab: row.active_tab.clone(),
            status: BrowserStatus::parse(&row.status).unwrap_or(BrowserStatus::Error),
            ssh_asset_id: row.ssh_asset_id.clone().map(AssetId),
            tunnel_local_port: row.tunnel_local_port.map(|p| p as u16),
            last_activity: row.last_activity.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_round_trip() {
        let instance = BrowserInstance {
            id: BrowserId::new(),
            conversation_id: ConversationId::new(),
            workspace_id: None,
            runtime_type: BrowserRuntimeType::RemoteSsh,
            container_id: "abc".into(),
            container_name: "choraleia-browser-x".into(),
            container_ip: "172.20.0.4".into(),
            devtools_url: "http://127.0.0.1:19222".into(),
            tabs: vec![Tab {
                id: "t1".into(),
                url: "https://example.com".into(),
                title: "Example".into(),
            }],
            active_tab: Some("t1".into()),
            status: BrowserStatus::Ready,
            ssh_asset_id: Some(AssetId::new()),
            tunnel_local_port: Some(19222),
            last_activity: chrono::Utc::now().to_rfc3339(),
        };

        let row = instance.to_row();
        let back = BrowserInstance::from_row(&row);
        assert_eq!(back.id, instance.id);
        assert_eq!(back.runtime_type, BrowserRuntimeType::RemoteSsh);
        assert_eq!(back.tabs.len(), 1);
        assert_eq!(back.tabs[0].url, "https://example.com");
        assert_eq!(back.tunnel_local_port, Some(19222));
        assert_eq!(back.status, BrowserStatus::Ready);
    }
}
