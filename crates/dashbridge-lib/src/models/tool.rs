// Tool execution models

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Longest tool output (in chars) replayed to the model
pub const MAX_TOOL_OUTPUT_CHARS: usize = 20_000;

/// Outcome of one tool call, replayed to the model as a tool-result turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Matches ToolCall.id
    pub call_id: String,
    pub name: String,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolResult {
    /// Create a success result
    pub fn success(call_id: impl Into<String>, name: impl Into<String>, output: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            success: true,
            output,
            error: None,
            duration_ms: None,
        }
    }

    /// Create a failure result
    pub fn failure(call_id: impl Into<String>, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Tool-result turn content
    pub fn to_content(&self) -> String {
        let body = if self.success {
            json!({ "success": true, "result": self.output })
        } else {
            json!({ "success": false, "error": self.error })
        };
        truncate_chars(body.to_string(), MAX_TOOL_OUTPUT_CHARS)
    }
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}... [truncated]", &text[..cut]),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_shapes() {
        let ok = ToolResult::success("c1", "get_filters", json!({"filters": ["Region"]}));
        let content: Value = serde_json::from_str(&ok.to_content()).unwrap();
        assert_eq!(content, json!({"success": true, "result": {"filters": ["Region"]}}));

        let failed = ToolResult::failure("c2", "get_filters", "Request 3 timed out after 30000ms");
        let content: Value = serde_json::from_str(&failed.to_content()).unwrap();
        assert_eq!(content["success"], false);
        assert_eq!(content["error"], "Request 3 timed out after 30000ms");
    }

    #[test]
    fn test_large_output_is_truncated() {
        let big = ToolResult::success("c1", "get_worksheet_data", json!("x".repeat(MAX_TOOL_OUTPUT_CHARS * 2)));
        let content = big.to_content();
        assert!(content.ends_with("[truncated]"));
        assert!(content.chars().count() < MAX_TOOL_OUTPUT_CHARS + 32);
    }
}
