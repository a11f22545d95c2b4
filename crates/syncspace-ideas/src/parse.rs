//! Turning free-form model output into exactly three ideas.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Ideas produced per request.
pub const IDEA_COUNT: usize = 3;

/// First `[` to last `]`, across newlines.
static JSON_ARRAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[\s\S]*\]").unwrap());

/// Parsed ideas and how many slots had to be filled in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedIdeas {
    pub ideas: [String; IDEA_COUNT],
    /// How many of `ideas` came from the deterministic fallback.
    pub fallback_count: usize,
}

/// Parse a model response. Never fails.
///
/// Tries the outermost `[...]` span as a JSON array first, then falls back to
/// the first non-empty lines. Slots the response did not fill get the
/// fallback idea for that slot.
pub fn parse_ideas(response: &str, note_content: &str) -> ParsedIdeas {
    let mut found = extract(response);
    found.truncate(IDEA_COUNT);

    let fallback = fallback_ideas(note_content);
    let fallback_count = IDEA_COUNT - found.len();
    if fallback_count > 0 {
        tracing::warn!(
            parsed = found.len(),
            "model response short on ideas, filling with fallback"
        );
    }

    let ideas = std::array::from_fn(|i| {
        found
            .get(i)
            .cloned()
            .unwrap_or_else(|| fallback[i].clone())
    });
    ParsedIdeas {
        ideas,
        fallback_count,
    }
}

fn extract(response: &str) -> Vec<String> {
    if let Some(array) = JSON_ARRAY.find(response) {
        return match serde_json::from_str::<Vec<Value>>(array.as_str()) {
            Ok(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .filter(|s| !s.trim().is_empty())
                .collect(),
            Err(e) => {
                tracing::warn!("model response is not a JSON array: {e}");
                Vec::new()
            }
        };
    }

    response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(IDEA_COUNT)
        .map(str::to_string)
        .collect()
}

/// Ideas derived from the note itself, used when the model gives us nothing.
pub fn fallback_ideas(note_content: &str) -> [String; IDEA_COUNT] {
    let head: String = note_content.chars().take(30).collect();
    let first_words = note_content
        .split(' ')
        .take(3)
        .collect::<Vec<_>>()
        .join(" ");
    [
        format!("Expand on: {head}..."),
        format!("Alternative approach to {first_words}"),
        format!("Questions about {first_words}"),
    ]
}
