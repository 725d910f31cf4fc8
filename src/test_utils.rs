//! Helpers for inspecting tool results in tests.

use rmcp::model::CallToolResult;
use serde_json::Value;

/// Concatenated text content of a tool result, one content item per line.
pub fn tool_text(result: &CallToolResult) -> String {
    let Ok(value) = serde_json::to_value(result) else {
        return String::new();
    };
    value["content"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| item["text"].as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// The first text content item parsed as JSON, if it is JSON.
pub fn tool_json(result: &CallToolResult) -> Option<Value> {
    let value = serde_json::to_value(result).ok()?;
    let text = value["content"].get(0)?["text"].as_str()?;
    serde_json::from_str(text).ok()
}

/// True if `haystack` contains `needle` once runs of whitespace are collapsed.
pub fn includes(haystack: &str, needle: &str) -> bool {
    haystack.contains(needle) || normalize_ws(haystack).contains(&normalize_ws(needle))
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
