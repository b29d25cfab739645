//! MCP protocol types.
//!
//! - [`messages`]: JSON-RPC 2.0 request/response envelopes
//! - [`error`]: JSON-RPC error object and codes
//! - [`types`]: `initialize` and `tools/*` payloads

pub mod error;
pub mod messages;
pub mod types;

pub use error::{JsonRpcError, codes, mcp_codes};
pub use messages::{JSONRPC_VERSION, JsonRpcRequest, JsonRpcResponse};
pub use types::{
    CallToolParams, ClientInfo, InitializeParams, InitializeResult, ListToolsResult,
    PROTOCOL_VERSION, ServerCapabilities, ServerInfo, ToolDefinition, ToolsCapability,
};
