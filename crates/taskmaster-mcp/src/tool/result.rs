//! Tool result types.
//!
//! Structured results are carried as a single text item holding JSON, which
//! is what MCP clients render and what [`ToolResult::json`] reads back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of a `tools/call`.
///
/// `isError: true` marks a tool-level failure the model should see, as
/// opposed to a JSON-RPC error for a malformed call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "isError")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    pub fn success(content: Vec<ToolContent>) -> Self {
        Self {
            content,
            is_error: None,
        }
    }

    pub fn success_text(text: impl Into<String>) -> Self {
        Self::success(vec![ToolContent::text(text)])
    }

    pub fn success_json(value: Value) -> Self {
        Self::success(vec![ToolContent::text(value.to_string())])
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: Some(true),
        }
    }

    pub fn error_json(value: Value) -> Self {
        Self {
            content: vec![ToolContent::text(value.to_string())],
            is_error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    pub fn is_success(&self) -> bool {
        !self.is_error()
    }

    /// Parses the first text item as JSON.
    pub fn json(&self) -> Option<Value> {
        self.content
            .first()
            .and_then(ToolContent::as_text)
            .and_then(|text| serde_json::from_str(text).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
        }
    }
}
