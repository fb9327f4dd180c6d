//! Shared utility functions used across the codebase.

use std::sync::OnceLock;

use regex::Regex;

/// Truncate to at most `max_chars` characters, appending `...` when cut.
///
/// Counts characters, not bytes, so multi-byte text is never split.
pub fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Build a truncated context string from conversation history.
///
/// Walks `history` from most-recent to oldest, accumulating entries until
/// `max_chars` is reached. The most-recent entry is always included.
pub fn build_history_context(history: &[(String, String)], max_chars: usize) -> String {
    let mut entries: Vec<String> = Vec::new();
    let mut total_chars = 0;
    for (role, content) in history.iter().rev() {
        let entry = format!("{}: {}\n\n", role.to_uppercase(), content);
        if total_chars + entry.len() > max_chars && !entries.is_empty() {
            break;
        }
        total_chars += entry.len();
        entries.push(entry);
    }
    entries.reverse();
    entries.concat()
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").ok())
        .as_ref()
}

/// Pull a JSON object or array out of a model reply.
///
/// Models wrap JSON in markdown fences or prose. Fenced content wins;
/// otherwise the outermost `{...}` or `[...]` span is returned.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(caps) = fence_regex().and_then(|re| re.captures(trimmed)) {
        if let Some(inner) = caps.get(1) {
            if let Ok(value) = serde_json::from_str(inner.as_str()) {
                return Some(value);
            }
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 5), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
        assert_eq!(truncate("héllo wörld", 4), "héll...");
        assert_eq!(truncate("🦀🦀🦀", 1), "🦀...");
    }

    #[test]
    fn build_history_context_formats_entries() {
        let history = vec![
            ("user".to_string(), "hello".to_string()),
            ("assistant".to_string(), "world".to_string()),
        ];
        let result = build_history_context(&history, 10000);
        assert_eq!(result, "USER: hello\n\nASSISTANT: world\n\n");
    }

    #[test]
    fn build_history_context_respects_max_chars() {
        let history = vec![
            ("user".to_string(), "first message".to_string()),
            ("assistant".to_string(), "second message".to_string()),
            ("user".to_string(), "third message".to_string()),
        ];
        let result = build_history_context(&history, 30);
        assert!(result.contains("USER: third message"));
        assert!(!result.contains("first message"));
    }

    #[test]
    fn build_history_context_always_includes_most_recent() {
        let history = vec![(
            "user".to_string(),
            "a very long message that exceeds the max".to_string(),
        )];
        let result = build_history_context(&history, 5);
        assert!(result.contains("USER: a very long message"));
    }

    #[test]
    fn extract_json_handles_fences_and_prose() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
        assert_eq!(
            extract_json("Here you go:\n```json\n{\"steps\": [\"x\"]}\n```"),
            Some(json!({"steps": ["x"]}))
        );
        assert_eq!(
            extract_json("Sure! {\"delegate\": false} hope that helps"),
            Some(json!({"delegate": false}))
        );
        assert_eq!(extract_json("[1, 2]"), Some(json!([1, 2])));
        assert_eq!(extract_json("no json here"), None);
    }
}
