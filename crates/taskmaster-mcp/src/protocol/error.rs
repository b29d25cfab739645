//! JSON-RPC 2.0 error object and error codes.
//!
//! # Standard JSON-RPC Error Codes
//!
//! - `-32700`: Parse error
//! - `-32600`: Invalid Request
//! - `-32601`: Method not found
//! - `-32602`: Invalid params
//! - `-32603`: Internal error
//!
//! # MCP-Specific Error Codes
//!
//! - `-32000`: Server error (rejected submissions)
//! - `-32004`: Tool not found
//! - `-32005`: Tool execution failed

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard JSON-RPC 2.0 error codes
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// MCP-specific error codes
pub mod mcp_codes {
    /// Generic server-side error
    pub const SERVER_ERROR: i32 = -32000;

    /// Requested tool does not exist
    pub const TOOL_NOT_FOUND: i32 = -32004;

    /// Tool execution failed
    pub const TOOL_EXECUTION_FAILED: i32 = -32005;
}

/// JSON-RPC 2.0 error object
///
/// ```
/// use taskmaster_mcp::protocol::JsonRpcError;
///
/// let error = JsonRpcError::method_not_found("tasks/frobnicate");
/// assert_eq!(error.code, -32601);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: String, data: Option<Value>) -> Self {
        Self {
            code,
            message,
            data,
        }
    }

    /// Invalid JSON was received by the server.
    pub fn parse_error(details: Option<String>) -> Self {
        Self::new(
            codes::PARSE_ERROR,
            "Parse error".to_string(),
            details.map(Value::String),
        )
    }

    pub fn invalid_request(details: Option<String>) -> Self {
        Self::new(
            codes::INVALID_REQUEST,
            "Invalid Request".to_string(),
            details.map(Value::String),
        )
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            "Method not found".to_string(),
            Some(serde_json::json!({ "method": method })),
        )
    }

    pub fn invalid_params(details: &str) -> Self {
        Self::new(
            codes::INVALID_PARAMS,
            "Invalid params".to_string(),
            Some(Value::String(details.to_string())),
        )
    }

    pub fn internal_error(details: Option<String>) -> Self {
        Self::new(
            codes::INTERNAL_ERROR,
            "Internal error".to_string(),
            details.map(Value::String),
        )
    }

    pub fn tool_not_found(tool_name: &str) -> Self {
        Self::new(
            mcp_codes::TOOL_NOT_FOUND,
            format!("Tool '{}' not found", tool_name),
            None,
        )
    }
}
