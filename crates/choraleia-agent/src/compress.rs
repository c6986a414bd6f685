//! Conversation compression: chunked summarization of the older part of the
//! active path through the provider, recorded as a snapshot on the
//! conversation row.

use std::sync::Arc;

use choraleia_core::types::ConversationId;
use choraleia_store::types::{CompressionRecord, Role, StoredMessage};
use choraleia_store::Store;
use tracing::info;

use crate::error::{AgentError, Result};
use crate::provider::{ChatRequest, LlmProvider, WireMessage};

/// Messages at the tail of the path that are never compressed away.
const KEEP_RECENT: usize = 8;
/// Messages summarized per provider call.
const CHUNK_SIZE: usize = 4;

const SUMMARY_INSTRUCTIONS: &str = "Summarize the following conversation excerpt. Respond with \
JSON only: {\"summary\": \"...\", \"key_topics\": [\"...\"], \"key_decisions\": [\"...\"]}. \
Keep the summary under 200 words and list only topics and decisions that actually appear.";

/// Compress everything but the most recent messages of the active path.
/// Returns `None` when the conversation is still too short to compress.
pub async fn compress_conversation(
    store: &Store,
    provider: Arc<dyn LlmProvider>,
    model: &str,
    conversation_id: &ConversationId,
) -> Result<Option<CompressionRecord>> {
    let conversation = store.get_conversation(conversation_id)?;
    let Some(leaf) = conversation.active_leaf_id.clone() else {
        return Ok(None);
    };
    let path = store.linear_path(&leaf)?;
    if path.len() <= KEEP_RECENT {
        return Ok(None);
    }

    let old = &path[..path.len() - KEEP_RECENT];
    let mut chunk_summaries = Vec::new();
    let mut topics = Vec::new();
    let mut decisions = Vec::new();

    for chunk in old.chunks(CHUNK_SIZE) {
        let excerpt = render_excerpt(chunk);
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                WireMessage::system(SUMMARY_INSTRUCTIONS),
                WireMessage::user(excerpt),
            ],
            tools: Vec::new(),
            max_tokens: 1024,
        };
        let response = provider.generate(&request).await?;
        let parsed = parse_summary(&response.content);
        chunk_summaries.push(parsed.summary);
        merge_unique(&mut topics, parsed.key_topics);
        merge_unique(&mut decisions, parsed.key_decisions);
    }

    let record = CompressionRecord {
        summary: chunk_summaries.join("\n\n"),
        key_topics: topics,
        key_decisions: decisions,
    };
    store
        .record_compression(conversation_id, &record)
        .map_err(AgentError::Store)?;
    info!(
        conversation = %conversation_id,
        chunks = chunk_summaries_len(&record.summary),
        "conversation compressed"
    );
    Ok(Some(record))
}

fn chunk_summaries_len(summary: &str) -> usize {
    summary.split("\n\n").count()
}

fn render_excerpt(messages: &[StoredMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        let role = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
            Role::Tool => "Tool",
        };
        let text = message.text();
        if text.is_empty() {
            continue;
        }
        out.push_str(&format!("{role}: {text}\n"));
    }
    out
}

fn merge_unique(into: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}

/// The model is asked for JSON; fall back to using the raw text as the
/// summary when it returns prose anyway.
fn parse_summary(raw: &str) -> CompressionRecord {
    let candidate = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(value) => CompressionRecord {
            summary: value["summary"].as_str().unwrap_or(candidate).to_string(),
            key_topics: string_list(&value["key_topics"]),
            key_decisions: string_list(&value["key_decisions"]),
        },
        Err(_) => CompressionRecord {
            summary: candidate.to_string(),
            key_topics: Vec::new(),
            key_decisions: Vec::new(),
        },
    }
}

fn string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_summary_accepts_json_and_fenced_json() {
        let parsed = parse_summary(
            r#"{"summary": "work happened", "key_topics": ["docker"], "key_decisions": ["use tunnels"]}"#,
        );
        assert_eq!(parsed.summary, "work happened");
        assert_eq!(parsed.key_topics, vec!["docker"]);
        assert_eq!(parsed.key_decisions, vec!["use tunnels"]);

        let fenced = parse_summary("```json\n{\"summary\": \"fenced\"}\n```");
        assert_eq!(fenced.summary, "fenced");
    }

    #[test]
    fn parse_summary_falls_back_to_prose() {
        let parsed = parse_summary("The user set up a workspace.");
        assert_eq!(parsed.summary, "The user set up a workspace.");
        assert!(parsed.key_topics.is_empty());
    }

    #[test]
    fn merge_unique_deduplicates() {
        let mut acc = vec!["a".to_string()];
        merge_unique(&mut acc, vec!["a".into(), "b".into()]);
        assert_eq!(acc, vec!["a", "b"]);
    }
}
