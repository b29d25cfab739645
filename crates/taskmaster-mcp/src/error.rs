//! Error types for the Task Master MCP server.
//!
//! # Error Hierarchy
//!
//! ```text
//! McpError (top-level)
//! ├── Transport(TransportError)
//! ├── Tool(ToolError)
//! ├── Task(TaskError)
//! ├── Config(String)
//! └── Protocol(String)
//! ```
//!
//! Task-store failures ([`TaskError`](crate::tasks::TaskError)) reach the
//! client as [`ToolError::ExecutionFailed`] when raised by a synchronous tool,
//! and as the `error` of a failed operation when raised inside deferred work.

use crate::protocol::{JsonRpcError, codes, mcp_codes};
use crate::tasks::TaskError;
use async_ops::OperationError;
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Task store error: {0}")]
    Task(#[from] TaskError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<config::ConfigError> for McpError {
    fn from(error: config::ConfigError) -> Self {
        McpError::Config(error.to_string())
    }
}

/// Tool-specific errors.
///
/// Raised during registration, argument validation, submission to the
/// operation manager, or synchronous execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool was not found in the registry.
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool already registered: {0}")]
    AlreadyRegistered(String),

    /// Arguments failed JSON deserialization.
    #[error("Invalid tool input: {0}")]
    InvalidInput(#[from] serde_json::Error),

    /// Arguments deserialized but failed validation.
    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// The operation manager refused the submission (queue full, duplicate,
    /// shutting down).
    #[error("Operation rejected: {0}")]
    Rejected(#[from] OperationError),

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Internal tool error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TaskError> for ToolError {
    fn from(error: TaskError) -> Self {
        match error {
            TaskError::Invalid(message) => ToolError::InvalidArguments(message),
            other => ToolError::ExecutionFailed(other.to_string()),
        }
    }
}

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed")]
    Closed,

    /// A line that is not a JSON-RPC request. The connection stays usable.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Registry-specific errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),
}

impl From<RegistryError> for ToolError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::DuplicateTool(name) => ToolError::AlreadyRegistered(name),
        }
    }
}

/// Maps tool errors onto JSON-RPC error objects.
///
/// - `NotFound` → `-32004` (tool not found)
/// - `InvalidInput`, `InvalidArguments` → `-32602` (invalid params)
/// - `Rejected` → `-32000` with the manager's error code in `data`
/// - `ExecutionFailed` → `-32005` (tool execution failed)
/// - `AlreadyRegistered`, `Internal` → `-32603` (internal error)
impl From<ToolError> for JsonRpcError {
    fn from(error: ToolError) -> Self {
        match error {
            ToolError::NotFound(name) => JsonRpcError::new(
                mcp_codes::TOOL_NOT_FOUND,
                format!("Tool '{}' not found", name),
                None,
            ),
            ToolError::InvalidInput(e) => JsonRpcError::new(
                codes::INVALID_PARAMS,
                "Invalid tool input".to_string(),
                Some(serde_json::json!({ "details": e.to_string() })),
            ),
            ToolError::InvalidArguments(details) => JsonRpcError::new(
                codes::INVALID_PARAMS,
                "Invalid tool arguments".to_string(),
                Some(serde_json::json!({ "details": details })),
            ),
            ToolError::Rejected(e) => JsonRpcError::new(
                mcp_codes::SERVER_ERROR,
                e.to_string(),
                Some(serde_json::json!({ "code": e.code() })),
            ),
            ToolError::ExecutionFailed(details) => JsonRpcError::new(
                mcp_codes::TOOL_EXECUTION_FAILED,
                "Tool execution failed".to_string(),
                Some(serde_json::json!({ "details": details })),
            ),
            ToolError::AlreadyRegistered(name) => JsonRpcError::new(
                codes::INTERNAL_ERROR,
                format!("Tool '{}' already registered", name),
                None,
            ),
            ToolError::Internal(e) => JsonRpcError::new(
                codes::INTERNAL_ERROR,
                "Internal error".to_string(),
                Some(serde_json::json!({ "details": format!("{:#}", e) })),
            ),
        }
    }
}
