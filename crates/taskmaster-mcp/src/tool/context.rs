//! Per-call execution context.

use serde_json::Value;

/// Information about the `tools/call` request being served.
///
/// Client details come from the `initialize` handshake and are absent when the
/// client skipped it.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    request_id: Option<Value>,
    client_name: Option<String>,
    client_version: Option<String>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ToolContextBuilder {
        ToolContextBuilder::default()
    }

    pub fn request_id(&self) -> Option<&Value> {
        self.request_id.as_ref()
    }

    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    pub fn client_version(&self) -> Option<&str> {
        self.client_version.as_deref()
    }
}

#[derive(Debug, Default)]
pub struct ToolContextBuilder {
    request_id: Option<Value>,
    client_name: Option<String>,
    client_version: Option<String>,
}

impl ToolContextBuilder {
    pub fn request_id(mut self, id: Value) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self.client_version = Some(version.into());
        self
    }

    pub fn build(self) -> ToolContext {
        ToolContext {
            request_id: self.request_id,
            client_name: self.client_name,
            client_version: self.client_version,
        }
    }
}
