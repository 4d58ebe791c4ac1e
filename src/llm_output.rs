//! Cleanup of raw model output before it is parsed as JSON or HTML.

use once_cell::sync::Lazy;
use regex::Regex;

// Opening fence with an optional language tag, body, closing fence.
static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$")
        .expect("Invalid fenced block regex")
});

static EMBEDDED_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```")
        .expect("Invalid embedded fence regex")
});

/// Remove a markdown code fence wrapping the whole response.
///
/// Prose around a single fenced block is dropped too; responses without a
/// fence come back trimmed but otherwise unchanged.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(caps) = FENCED_BLOCK.captures(trimmed) {
        if let Some(body) = caps.get(1) {
            return body.as_str().trim();
        }
    }
    if trimmed.contains("```") {
        if let Some(body) = EMBEDDED_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
            return body.as_str().trim();
        }
    }
    trimmed
}

/// Extract a JSON object from potentially noisy model output.
///
/// Handles pure JSON, JSON inside a code fence, and JSON embedded in prose.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = strip_code_fence(raw);

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            return &trimmed[..end];
        }
    }

    if let Some(start) = trimmed.find('{') {
        let remainder = &trimmed[start..];
        if let Some(end) = find_matching_brace(remainder) {
            return &remainder[..end];
        }
    }

    trimmed
}

/// Byte offset just past the brace closing the first `{`, ignoring braces
/// inside JSON strings.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
