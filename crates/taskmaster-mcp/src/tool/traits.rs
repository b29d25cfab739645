//! The `Tool` trait every callable MCP tool implements.

use super::{ToolContext, ToolResult};
use crate::error::ToolError;
use async_trait::async_trait;
use serde_json::Value;

/// A named, schema-described unit of work reachable through `tools/call`.
///
/// `execute` receives the raw `arguments` object. Implementations
/// deserialize it themselves, usually into a `JsonSchema`-deriving input
/// struct that also feeds [`Tool::input_schema`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn input_schema(&self) -> Value;

    fn output_schema(&self) -> Option<Value> {
        None
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError>;
}
