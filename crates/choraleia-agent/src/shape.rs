//! Map raw provider/tool failures to short user-facing strings. The raw
//! cause goes to the log; the shaped text becomes the assistant's final
//! content.

/// Known failure substrings, checked in order.
const SHAPES: &[(&str, &str)] = &[
    (
        "context_length_exceeded",
        "This conversation no longer fits the model's context window. Start a new conversation or compress this one.",
    ),
    (
        "rate limit",
        "The model provider is rate-limiting requests right now. Please try again in a moment.",
    ),
    (
        "rate_limit",
        "The model provider is rate-limiting requests right now. Please try again in a moment.",
    ),
    (
        "invalid_api_key",
        "The model provider rejected the configured credentials. Check the provider settings.",
    ),
    (
        "authentication",
        "The model provider rejected the configured credentials. Check the provider settings.",
    ),
    (
        "insufficient_quota",
        "The provider account has run out of quota.",
    ),
    (
        "timeout",
        "The model took too long to respond. Please try again.",
    ),
    (
        "operation cancelled",
        "The response was cancelled.",
    ),
];

/// Shape an error message for end users.
pub fn shape_llm_error(raw: &str) -> String {
    let lower = raw.to_lowercase();
    for (needle, shaped) in SHAPES {
        if lower.contains(needle) {
            return (*shaped).to_string();
        }
    }
    "The model request failed. Please try again.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_substrings_map_to_friendly_text() {
        assert!(shape_llm_error("Error: context_length_exceeded (8192)").contains("context window"));
        assert!(shape_llm_error("429 Rate limit reached").contains("rate-limiting"));
        assert!(shape_llm_error("invalid_api_key provided").contains("credentials"));
    }

    #[test]
    fn unknown_errors_get_the_generic_line() {
        assert_eq!(
            shape_llm_error("ECONNRESET while reading body"),
            "The model request failed. Please try again."
        );
    }
}
