use serde::{Deserialize, Serialize};

/// Who a memory belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    /// Shared by every conversation in the workspace.
    Workspace,
    /// Private to one agent.
    Agent,
}

impl MemoryScope {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryScope::Workspace => "workspace",
            MemoryScope::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "workspace" => Some(MemoryScope::Workspace),
            "agent" => Some(MemoryScope::Agent),
            _ => None,
        }
    }
}

/// A single remembered fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub workspace_id: String,
    pub scope: MemoryScope,
    pub agent_id: Option<String>,
    pub mem_type: String,
    pub key: String,
    pub content: String,
    pub tags: Vec<String>,
    /// 0..=100; higher entries win context-block slots.
    pub importance: u8,
    pub source_type: String,
    pub access_count: i64,
    pub last_access: Option<String>,
    pub expires_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for `remember` / import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemory {
    /// Filled from the route when arriving over the API.
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default = "default_scope")]
    pub scope: MemoryScope,
    pub agent_id: Option<String>,
    #[serde(default = "default_type")]
    pub mem_type: String,
    pub key: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_importance")]
    pub importance: u8,
    #[serde(default = "default_source")]
    pub source_type: String,
    pub expires_at: Option<String>,
}

fn default_scope() -> MemoryScope {
    MemoryScope::Workspace
}
fn default_type() -> String {
    "fact".to_string()
}
fn default_importance() -> u8 {
    50
}
fn default_source() -> String {
    "inferred".to_string()
}

/// Result of a bulk import.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub replaced: usize,
}
