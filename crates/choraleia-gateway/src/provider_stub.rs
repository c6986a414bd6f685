//! Placeholder provider wired in when no model adapter is configured.
//!
//! Provider adapters are external collaborators; this stub keeps the engine
//! honest without one — every request ends as a shaped "not configured"
//! message instead of a crash.

use async_trait::async_trait;
use choraleia_agent::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

pub struct UnconfiguredProvider;

#[async_trait]
impl LlmProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn generate(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        Err(ProviderError::Unavailable(
            "no model provider is configured for this gateway".into(),
        ))
    }
}
