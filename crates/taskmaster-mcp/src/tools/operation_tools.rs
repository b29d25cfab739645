//! Operation polling tools: `getOperationStatus`, `cancelOperation`,
//! `listOperations`.
//!
//! An unknown (or already pruned) operation id is reported as a tool-level
//! error with `status: "not_found"` rather than a JSON-RPC error, so the
//! model sees it in the conversation.

use async_ops::{
    AsyncOperationManager, CancelOutcome, ErrorDetail, OperationError, OperationId,
    OperationSnapshot, OperationStatus, StatusFilter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::ToolError;
use crate::tool::{Tool, ToolContext, ToolResult, input_schema_for};

/// Wire shape of a polled operation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OperationReport {
    operation_id: OperationId,
    tool: String,
    status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetail>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    cancel_requested: bool,
}

impl OperationReport {
    fn new(snapshot: OperationSnapshot, result: Option<Value>) -> Self {
        Self {
            operation_id: snapshot.id,
            tool: snapshot.metadata.tool_name,
            status: snapshot.status,
            result,
            error: snapshot.error,
            created_at: snapshot.created_at,
            started_at: snapshot.started_at,
            finished_at: snapshot.finished_at,
            cancel_requested: snapshot.cancel_requested,
        }
    }

    fn to_value(&self) -> Result<Value, ToolError> {
        Ok(serde_json::to_value(self)?)
    }
}

fn not_found(id: &OperationId) -> ToolResult {
    ToolResult::error_json(json!({
        "operationId": id,
        "status": "not_found",
        "error": { "message": format!("Operation {} not found or expired", id) },
    }))
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperationIdInput {
    /// Id returned by a long-running tool call
    pub operation_id: String,
}

impl OperationIdInput {
    fn id(&self) -> Result<OperationId, ToolError> {
        let raw = self.operation_id.trim();
        if raw.is_empty() {
            return Err(ToolError::InvalidArguments(
                "operationId must not be empty".to_string(),
            ));
        }
        Ok(OperationId::from_string(raw))
    }
}

pub struct GetOperationStatusTool {
    manager: AsyncOperationManager,
}

impl GetOperationStatusTool {
    pub fn new(manager: AsyncOperationManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for GetOperationStatusTool {
    fn name(&self) -> &str {
        "getOperationStatus"
    }

    fn description(&self) -> Option<&str> {
        Some(
            "Get the status of a long-running operation. Includes the result once it \
             succeeded, or the error once it failed.",
        )
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<OperationIdInput>()
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let input: OperationIdInput = serde_json::from_value(input)?;
        let id = input.id()?;

        let (snapshot, result) = match self.manager.get_report(&id) {
            Ok(report) => report,
            Err(OperationError::NotFound(_)) => return Ok(not_found(&id)),
            Err(e) => return Err(e.into()),
        };

        debug!(operation_id = %id, status = %snapshot.status, "Polled operation");
        Ok(ToolResult::success_json(
            OperationReport::new(snapshot, result).to_value()?,
        ))
    }
}

pub struct CancelOperationTool {
    manager: AsyncOperationManager,
}

impl CancelOperationTool {
    pub fn new(manager: AsyncOperationManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for CancelOperationTool {
    fn name(&self) -> &str {
        "cancelOperation"
    }

    fn description(&self) -> Option<&str> {
        Some(
            "Cancel a long-running operation. Queued operations are cancelled at once; \
             running ones stop at their next cancellation point, so keep polling.",
        )
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<OperationIdInput>()
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let input: OperationIdInput = serde_json::from_value(input)?;
        let id = input.id()?;

        let outcome = match self.manager.cancel(&id) {
            Ok(outcome) => outcome,
            Err(OperationError::NotFound(_)) => return Ok(not_found(&id)),
            Err(e) => return Err(e.into()),
        };

        let (outcome, status) = match outcome {
            CancelOutcome::Cancelled => ("cancelled", OperationStatus::Cancelled),
            CancelOutcome::CancelRequested => ("cancel_requested", OperationStatus::Running),
            CancelOutcome::AlreadyTerminal(status) => ("already_terminal", status),
        };

        Ok(ToolResult::success_json(json!({
            "operationId": id,
            "outcome": outcome,
            "status": status,
        })))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListOperationsInput {
    /// `queued`, `running`, `succeeded`, `failed`, `cancelled`, `active`
    /// or `terminal`. Omit to list everything.
    #[serde(default)]
    pub status: Option<String>,
}

pub struct ListOperationsTool {
    manager: AsyncOperationManager,
}

impl ListOperationsTool {
    pub fn new(manager: AsyncOperationManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ListOperationsTool {
    fn name(&self) -> &str {
        "listOperations"
    }

    fn description(&self) -> Option<&str> {
        Some("List known long-running operations, oldest first, with manager statistics")
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<ListOperationsInput>()
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let input: ListOperationsInput = serde_json::from_value(input)?;
        let filter = match input.status.as_deref() {
            None => None,
            Some(raw) => Some(StatusFilter::parse(raw).ok_or_else(|| {
                ToolError::InvalidArguments(format!("unknown status filter '{}'", raw))
            })?),
        };

        let operations = self
            .manager
            .list(filter)
            .into_iter()
            .map(|snapshot| OperationReport::new(snapshot, None).to_value())
            .collect::<Result<Vec<Value>, ToolError>>()?;

        Ok(ToolResult::success_json(json!({
            "operations": operations,
            "stats": self.manager.stats(),
        })))
    }
}
