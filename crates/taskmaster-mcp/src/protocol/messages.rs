//! JSON-RPC 2.0 request and response envelopes.
//!
//! A request without an `id` is a notification and never gets a response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::JsonRpcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 Request object
///
/// ```
/// use taskmaster_mcp::protocol::JsonRpcRequest;
/// use serde_json::json;
///
/// let request = JsonRpcRequest::new(
///     Some(json!(1)),
///     "tools/call".to_string(),
///     Some(json!({"name": "nextTask", "arguments": {}})),
/// );
/// assert!(!request.is_notification());
///
/// let notification = JsonRpcRequest::notification("notifications/initialized".to_string(), None);
/// assert!(notification.is_notification());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: Option<Value>, method: String, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method,
            params,
        }
    }

    pub fn notification(method: String, params: Option<Value>) -> Self {
        Self::new(None, method, params)
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 Response object
///
/// Exactly one of `result` and `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,

    /// Matches the request id; `null` when the request could not be parsed.
    pub id: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn method_not_found(id: Option<Value>, method: &str) -> Self {
        Self::error(id, JsonRpcError::method_not_found(method))
    }

    pub fn invalid_params(id: Option<Value>, details: &str) -> Self {
        Self::error(id, JsonRpcError::invalid_params(details))
    }

    pub fn internal_error(id: Option<Value>, details: Option<String>) -> Self {
        Self::error(id, JsonRpcError::internal_error(details))
    }

    /// Parse errors carry a `null` id: the request id could not be read.
    pub fn parse_error(details: Option<String>) -> Self {
        Self::error(None, JsonRpcError::parse_error(details))
    }

    pub fn invalid_request(id: Option<Value>, details: Option<String>) -> Self {
        Self::error(id, JsonRpcError::invalid_request(details))
    }

    pub fn tool_not_found(id: Option<Value>, tool_name: &str) -> Self {
        Self::error(id, JsonRpcError::tool_not_found(tool_name))
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
