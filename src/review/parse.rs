//! Extraction of the structured review from raw model output.
//!
//! Models are instructed to answer with a fenced ```json block, but
//! accumulated streams regularly arrive with prose around the fence, a
//! bare object, or no JSON at all. Extraction tries, in order:
//!
//! 1. A ```json code block
//! 2. A generic code block
//! 3. Every balanced JSON object in the text, first match wins
//!
//! A candidate only counts when it deserializes as a review payload;
//! otherwise the caller falls back to passing the raw text through.

use regex::Regex;

use crate::review::ReviewPayload;

/// Parses a review payload out of raw model output.
///
/// Returns `None` when no candidate deserializes, including for empty
/// output. Never panics on malformed input.
pub fn parse_review(raw: &str) -> Option<ReviewPayload> {
    let trimmed = raw.trim();

    if let Some(payload) = extract_from_json_code_block(trimmed).and_then(deserialize) {
        return Some(payload);
    }
    if let Some(payload) = extract_from_generic_code_block(trimmed).and_then(deserialize) {
        return Some(payload);
    }

    // Scan every top-level object; prose before the payload can itself
    // contain brace-delimited fragments that are not valid JSON.
    for start in trimmed.char_indices().filter(|(_, c)| *c == '{').map(|(i, _)| i) {
        if let Some(end) = find_matching_brace(&trimmed[start..]) {
            if let Some(payload) = deserialize(trimmed[start..=start + end].to_string()) {
                return Some(payload);
            }
        }
    }

    None
}

fn deserialize(candidate: String) -> Option<ReviewPayload> {
    serde_json::from_str(&candidate).ok()
}

/// Extract JSON from a ```json ... ``` code block.
fn extract_from_json_code_block(content: &str) -> Option<String> {
    let re = Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").ok()?;
    let caps = re.captures(content)?;
    let inner = caps.get(1)?.as_str().trim();
    if inner.starts_with('{') {
        if let Some(end) = find_matching_brace(inner) {
            return Some(inner[..=end].to_string());
        }
    }
    Some(inner.to_string())
}

/// Extract JSON from a generic ``` ... ``` code block.
fn extract_from_generic_code_block(content: &str) -> Option<String> {
    let re = Regex::new(r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```").ok()?;
    let caps = re.captures(content)?;
    let inner = caps.get(1)?.as_str().trim();
    let start = inner.find('{')?;
    let end = find_matching_brace(&inner[start..])?;
    Some(inner[start..=start + end].to_string())
}

/// Finds the matching closing brace for a string starting at a '{'.
///
/// Handles nested braces, string literals and escape sequences within
/// strings, which matters because rewritten code in the payload is full
/// of braces and quotes.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                depth += 1;
            }
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}
