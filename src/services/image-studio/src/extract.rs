//! Delimiter-tag extraction for rewriter output.
//!
//! The rewrite templates ask the language model to wrap its answer in
//! `<improved_prompt>` tags. Models do not always comply, so extraction is a
//! best-effort heuristic with a documented fallback: when either tag is
//! missing, the whole trimmed response is used as-is. A missing delimiter is
//! a tolerated outcome here, never an error.

/// Opening delimiter the rewrite templates instruct the model to emit.
pub const OPENING_TAG: &str = "<improved_prompt>";

/// Closing delimiter paired with [`OPENING_TAG`].
pub const CLOSING_TAG: &str = "</improved_prompt>";

/// Isolate the rewritten prompt from a raw model response.
///
/// Takes the span strictly between the first opening tag and the first
/// closing tag after it, trimmed. Only the first delimited span is honored;
/// anything the model emits after it is ignored. Falls back to the full
/// trimmed response when either tag is absent.
pub fn extract_improved_prompt(response: &str) -> &str {
    if let Some(start) = response.find(OPENING_TAG) {
        let after = &response[start + OPENING_TAG.len()..];
        if let Some(end) = after.find(CLOSING_TAG) {
            return after[..end].trim();
        }
    }
    response.trim()
}
