//! Tool abstractions.
//!
//! - [`Tool`]: the trait behind every `tools/call` target
//! - [`ToolRegistry`]: name-indexed tool storage
//! - [`ToolContext`]: per-call request information
//! - [`ToolResult`] / [`ToolContent`]: what a call returns
//!
//! Long-running tools do not implement [`Tool`] directly; they implement
//! [`crate::shim::DeferredTool`] and are wrapped so that calling them only
//! submits work to the operation manager.

pub mod context;
pub mod registry;
pub mod result;
pub mod traits;

pub use context::{ToolContext, ToolContextBuilder};
pub use registry::ToolRegistry;
pub use result::{ToolContent, ToolResult};
pub use traits::Tool;

use schemars::JsonSchema;
use serde_json::{Value, json};

/// JSON schema of a tool's input type, as advertised by `tools/list`.
pub fn input_schema_for<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}
