//! Tool results as MCP content.

use rmcp::model::{CallToolResult, Content};
use serde_json::{Value, json};

use crate::error::ToolError;

/// Wraps a tool's output as pretty-printed JSON text.
#[must_use]
pub fn success_response(value: &Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(pretty(value))])
}

/// Turns a tool failure into an error result carrying `{error, details?}`.
#[must_use]
pub fn error_response(err: &ToolError) -> CallToolResult {
    let mut body = json!({ "error": err.to_string() });
    if let Some(details) = err.details().filter(|d| !d.is_empty()) {
        body["details"] = Value::String(details);
    }
    CallToolResult::error(vec![Content::text(pretty(&body))])
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
