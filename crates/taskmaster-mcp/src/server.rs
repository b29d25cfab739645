//! MCP server: request routing and the serve loop.
//!
//! Requests are handled one at a time in arrival order. Long-running tools
//! only submit work and return, so a slow generation never holds up the
//! next request.

use async_ops::AsyncOperationManager;
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{McpError, TransportError};
use crate::generation::TaskGenerator;
use crate::protocol::{
    CallToolParams, ClientInfo, InitializeParams, InitializeResult, JSONRPC_VERSION,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, ServerCapabilities,
    ServerInfo, ToolsCapability,
};
use crate::tasks::TaskStore;
use crate::tool::{ToolContext, ToolRegistry};
use crate::tools;
use crate::transport::Transport;

const INSTRUCTIONS: &str = "Task Master manages a project's task list. Long-running tools \
(parsePRD, addTask, expandTask, expandAll, analyzeComplexity, update, updateTask, \
updateSubtask) return an operationId \
immediately; poll it with getOperationStatus until the status is succeeded, failed or \
cancelled.";

#[derive(Debug)]
pub struct TaskMasterServer {
    info: ServerInfo,
    tools: ToolRegistry,
    client: RwLock<Option<ClientInfo>>,
}

impl TaskMasterServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: version.into(),
            },
            tools,
            client: RwLock::new(None),
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Client that completed `initialize`, if any.
    pub fn client(&self) -> Option<ClientInfo> {
        self.client.read().clone()
    }

    /// Handles one request. Notifications are processed but never answered,
    /// so the result is `None` for them.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if !request.is_notification() {
            return Some(self.dispatch(request).await);
        }

        match request.method.as_str() {
            "notifications/initialized" => info!("Client initialized"),
            method if method.starts_with("notifications/") => {
                debug!(method, "Ignoring notification");
            }
            // A request sent without an id still runs; its response is dropped.
            method => {
                let method = method.to_string();
                if let Some(error) = self.dispatch(request).await.error {
                    warn!(method = %method, error = %error.message, "Notification failed");
                }
            }
        }
        None
    }

    async fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if request.jsonrpc != JSONRPC_VERSION {
            return JsonRpcResponse::invalid_request(
                request.id,
                Some(format!("unsupported jsonrpc version '{}'", request.jsonrpc)),
            );
        }

        debug!(method = %request.method, id = ?request.id, "Handling request");
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request),
            "ping" => JsonRpcResponse::success(request.id, json!({})),
            "tools/list" => self.handle_tools_list(request).await,
            "tools/call" => self.handle_tools_call(request).await,
            method => {
                debug!(method, "Unknown method");
                JsonRpcResponse::method_not_found(request.id, method)
            }
        }
    }

    fn handle_initialize(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params = match request.params {
            Some(ref p) => match serde_json::from_value::<InitializeParams>(p.clone()) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::invalid_params(
                        request.id,
                        &format!("Invalid initialize params: {}", e),
                    );
                }
            },
            None => InitializeParams::default(),
        };

        if let Some(client) = &params.client_info {
            info!(
                client = %client.name,
                client_version = %client.version,
                protocol_version = %params.protocol_version,
                "Client connected"
            );
        }
        *self.client.write() = params.client_info;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: self.info.clone(),
            instructions: Some(INSTRUCTIONS.to_string()),
        };

        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::internal_error(
                request.id,
                Some(format!("Failed to serialize initialize result: {}", e)),
            ),
        }
    }

    async fn handle_tools_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let result = ListToolsResult {
            tools: self.tools.list().await,
        };

        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::internal_error(
                request.id,
                Some(format!("Failed to serialize tools list: {}", e)),
            ),
        }
    }

    async fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params = match request.params {
            Some(ref p) => match serde_json::from_value::<CallToolParams>(p.clone()) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::invalid_params(
                        request.id,
                        &format!("Invalid tool call params: {}", e),
                    );
                }
            },
            None => {
                return JsonRpcResponse::invalid_params(request.id, "Tool call params are required");
            }
        };

        let Some(tool) = self.tools.get(&params.name).await else {
            warn!(tool = %params.name, "Unknown tool");
            return JsonRpcResponse::tool_not_found(request.id, &params.name);
        };

        let mut context = ToolContext::builder().request_id(request.id.clone().unwrap_or(Value::Null));
        if let Some(client) = self.client() {
            context = context.client_info(client.name, client.version);
        }
        let context = context.build();

        let input = match params.arguments {
            None | Some(Value::Null) => json!({}),
            Some(arguments) => arguments,
        };

        match tool.execute(input, &context).await {
            Ok(result) => match serde_json::to_value(&result) {
                Ok(value) => JsonRpcResponse::success(request.id, value),
                Err(e) => JsonRpcResponse::internal_error(
                    request.id,
                    Some(format!("Failed to serialize tool result: {}", e)),
                ),
            },
            Err(e) => {
                debug!(tool = %params.name, error = %e, "Tool call failed");
                JsonRpcResponse::error(request.id, e.into())
            }
        }
    }

    /// Runs the server loop until the transport reaches end of input.
    ///
    /// Lines that are not valid JSON-RPC get a parse error with a `null` id
    /// and the loop continues.
    pub async fn serve<T: Transport>(&self, mut transport: T) -> Result<(), McpError> {
        info!(server = %self.info.name, version = %self.info.version, "MCP server starting");

        loop {
            let response = match transport.recv().await {
                Ok(Some(request)) => self.handle_request(request).await,
                Ok(None) => {
                    info!("Transport closed, shutting down");
                    break;
                }
                Err(TransportError::InvalidMessage(details)) => {
                    Some(JsonRpcResponse::parse_error(Some(details)))
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(response) = response {
                transport.send(response).await?;
            }
        }

        transport.close().await?;
        info!("MCP server stopped");
        Ok(())
    }
}

/// A server wired to its operation manager and task store.
pub struct Services {
    pub server: TaskMasterServer,
    pub manager: AsyncOperationManager,
    pub store: Arc<TaskStore>,
}

impl Services {
    /// Opens the configured task file, starts the operation manager and
    /// registers every tool. Must be called inside a Tokio runtime.
    pub async fn build(config: &AppConfig, generator: Arc<dyn TaskGenerator>) -> Result<Self, McpError> {
        let store = Arc::new(TaskStore::open(config.tasks.file.clone()).await?);
        Self::with_store(config, store, generator).await
    }

    pub async fn with_store(
        config: &AppConfig,
        store: Arc<TaskStore>,
        generator: Arc<dyn TaskGenerator>,
    ) -> Result<Self, McpError> {
        let manager = AsyncOperationManager::new(config.operations.clone());
        let registry = ToolRegistry::new();
        tools::register_all(&registry, Arc::clone(&store), generator, &manager).await?;

        let server = TaskMasterServer::new(
            config.server.name.clone(),
            env!("CARGO_PKG_VERSION"),
            registry,
        );
        Ok(Self {
            server,
            manager,
            store,
        })
    }
}
