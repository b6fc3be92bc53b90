//! JSON recovery from noisy model responses
//!
//! Sonar replies are not guaranteed to be clean JSON: reasoning-capable
//! models prepend `<think>` blocks, responses get truncated mid-block, and
//! the model sometimes narrates its own tool use ("Let me search...")
//! instead of answering. This module recovers a parseable JSON object from
//! that noise, trying strategies in order of reliability.

use regex::Regex;

/// Narration prefixes the model leaks in place of (or before) the answer.
/// Applied in order; each strips a matching line up to following content.
const ACTION_LEAK_PATTERNS: &[&str] = &[
    r"(?im)^\s*(?:i\s+will|i'll|let\s+me)\s+(?:search|fetch|look|find|check)[^{\n]*",
    r"(?im)^\s*(?:searching|fetching|looking\s+up|checking)\b[^{\n]*",
];

/// Extract a JSON object from text that may contain `<think>` blocks,
/// markdown code fences, or surrounding prose.
///
/// Returns a substring guaranteed to parse as a JSON object, or `None` if
/// no object is recoverable. Idempotent on its own output.
pub fn extract_json(text: &str) -> Option<String> {
    let text = strip_reasoning_blocks(text);
    let text = strip_action_leaks(&text);
    let text = text.trim();

    if text.is_empty() {
        return None;
    }

    // Fenced code blocks are the highest-confidence signal: the author
    // explicitly delimited them. JSON-tagged fences first.
    let fence_patterns = [r"(?is)```json\s*([\s\S]*?)\s*```", r"(?s)```\s*([\s\S]*?)\s*```"];
    for pattern in fence_patterns {
        let fence = Regex::new(pattern).expect("valid fence regex");
        if let Some(captures) = fence.captures(text) {
            if let Some(inner) = captures.get(1) {
                let candidate = inner.as_str().trim();
                if parses_as_object(candidate) {
                    return Some(candidate.to_string());
                }
            }
        }
    }

    // Greedy span from first '{' to last '}'. If prose leaked inside the
    // span, fall back to a balanced-brace scan from the first '{'.
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            let candidate = &text[start..=end];
            if parses_as_object(candidate) {
                return Some(candidate.to_string());
            }
            if let Some(span) = first_balanced_span(&text[start..]) {
                if parses_as_object(span) {
                    return Some(span.to_string());
                }
                // The first balanced span is the only candidate; anything
                // past it is trailing noise.
            }
        }
    }

    if parses_as_object(text) {
        return Some(text.to_string());
    }

    None
}

/// Remove `<think>...</think>` chain-of-thought blocks
///
/// Handles multiple paired blocks and an unclosed `<think>` from a
/// truncated response, in which case everything from the marker to the end
/// of the text is reasoning, not content.
fn strip_reasoning_blocks(text: &str) -> String {
    let paired = Regex::new(r"(?is)<think>.*?</think>").expect("valid think regex");
    let text = paired.replace_all(text, "");

    let unclosed = Regex::new(r"(?is)<think>.*$").expect("valid think regex");
    unclosed.replace_all(&text, "").into_owned()
}

/// Scrub leaked tool-use narration lines
fn strip_action_leaks(text: &str) -> String {
    let mut text = text.to_string();
    for pattern in ACTION_LEAK_PATTERNS {
        let leak = Regex::new(pattern).expect("valid action-leak regex");
        text = leak.replace_all(&text, "").into_owned();
    }
    text
}

/// Walk `{`/`}` nesting depth and return the first self-contained span
///
/// `text` must start at a `{`. Returns `None` if the braces never balance
/// (truncated object).
fn first_balanced_span(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    for (idx, ch) in text.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parses_as_object(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate)
        .map(|value| value.is_object())
        .unwrap_or(false)
}
