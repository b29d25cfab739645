//! Tool integration shim.
//!
//! Fast tools implement [`Tool`] and answer inline. Long-running tools
//! implement [`DeferredTool`] instead and are registered wrapped in
//! [`Deferred`], which turns a call into a submission:
//!
//! 1. the arguments are deserialized into the tool's typed input and
//!    validated, synchronously; a bad call fails here and no operation exists
//! 2. the work is submitted to the [`AsyncOperationManager`] together with
//!    the tool name, the raw arguments and the tool's resource key
//! 3. the caller immediately gets `{ "operationId": ..., "status": "queued" }`
//!    and polls with `getOperationStatus`

use async_ops::{AsyncOperationManager, OperationContext, OperationMetadata, SubmitOptions};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::error::ToolError;
use crate::tool::{Tool, ToolContext, ToolResult, input_schema_for};

/// A tool whose work runs in the background under the operation manager.
#[async_trait]
pub trait DeferredTool: Send + Sync + 'static {
    type Input: DeserializeOwned + JsonSchema + Send + 'static;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Checks the parsed input before anything is submitted.
    fn validate(&self, _input: &Self::Input) -> Result<(), ToolError> {
        Ok(())
    }

    /// Resource the work mutates, consulted by the manager's duplicate
    /// policy. `None` means the call never conflicts with another.
    fn resource_key(&self, _input: &Self::Input) -> Option<String> {
        None
    }

    fn submit_options(&self, _input: &Self::Input) -> SubmitOptions {
        SubmitOptions::default()
    }

    /// The background work. Should honour `ctx` at its await points.
    async fn run(&self, input: Self::Input, ctx: &OperationContext) -> anyhow::Result<Value>;
}

/// Adapter exposing a [`DeferredTool`] as a regular [`Tool`].
pub struct Deferred<T: DeferredTool> {
    tool: Arc<T>,
    manager: AsyncOperationManager,
}

impl<T: DeferredTool> Deferred<T> {
    pub fn new(tool: T, manager: AsyncOperationManager) -> Self {
        Self {
            tool: Arc::new(tool),
            manager,
        }
    }
}

#[async_trait]
impl<T: DeferredTool> Tool for Deferred<T> {
    fn name(&self) -> &str {
        self.tool.name()
    }

    fn description(&self) -> Option<&str> {
        Some(self.tool.description())
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<T::Input>()
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "operationId": { "type": "string" },
                "status": { "type": "string", "enum": ["queued"] }
            },
            "required": ["operationId", "status"]
        }))
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let parsed: T::Input = serde_json::from_value(input.clone())?;
        self.tool.validate(&parsed)?;

        let mut metadata = OperationMetadata::new(self.tool.name()).with_input(input);
        if let Some(key) = self.tool.resource_key(&parsed) {
            metadata = metadata.with_resource_key(key);
        }
        let options = self.tool.submit_options(&parsed);

        let tool = Arc::clone(&self.tool);
        let id = self
            .manager
            .submit_with_options(metadata, options, move |ctx| async move {
                tool.run(parsed, &ctx).await
            })?;

        info!(
            tool = self.tool.name(),
            operation_id = %id,
            request_id = ?context.request_id(),
            "Deferred tool call accepted"
        );

        Ok(ToolResult::success_json(json!({
            "operationId": id.as_str(),
            "status": "queued",
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_ops::{DuplicatePolicy, ManagerConfig, OperationError, OperationId, OperationStatus};
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct SlowSumInput {
        values: Vec<i64>,
        #[serde(default)]
        key: Option<String>,
    }

    struct SlowSum;

    #[async_trait]
    impl DeferredTool for SlowSum {
        type Input = SlowSumInput;

        fn name(&self) -> &'static str {
            "slowSum"
        }

        fn description(&self) -> &'static str {
            "Adds numbers, slowly"
        }

        fn validate(&self, input: &SlowSumInput) -> Result<(), ToolError> {
            if input.values.is_empty() {
                return Err(ToolError::InvalidArguments("values must not be empty".into()));
            }
            Ok(())
        }

        fn resource_key(&self, input: &SlowSumInput) -> Option<String> {
            input.key.clone()
        }

        async fn run(&self, input: SlowSumInput, ctx: &OperationContext) -> anyhow::Result<Value> {
            let mut total = 0;
            for value in input.values {
                ctx.check()?;
                tokio::time::sleep(Duration::from_millis(10)).await;
                total += value;
            }
            Ok(json!({ "total": total }))
        }
    }

    fn deferred(policy: DuplicatePolicy) -> (Deferred<SlowSum>, AsyncOperationManager) {
        let manager = AsyncOperationManager::new(
            ManagerConfig::default()
                .with_max_concurrent(1)
                .with_duplicate_policy(policy),
        );
        (Deferred::new(SlowSum, manager.clone()), manager)
    }

    fn operation_id(result: &ToolResult) -> OperationId {
        let json = result.json().unwrap();
        assert_eq!(json["status"], "queued");
        OperationId::from_string(json["operationId"].as_str().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_returns_ack_and_work_completes() {
        let (tool, manager) = deferred(DuplicatePolicy::Allow);
        let result = tool
            .execute(json!({"values": [1, 2, 3]}), &ToolContext::new())
            .await
            .unwrap();
        let id = operation_id(&result);

        let snapshot = manager.get_status(&id).unwrap();
        assert_eq!(snapshot.metadata.tool_name, "slowSum");
        assert_eq!(snapshot.metadata.input["values"][2], 3);

        for _ in 0..100 {
            if manager.get_status(&id).unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.get_status(&id).unwrap().status, OperationStatus::Succeeded);
        assert_eq!(manager.get_result(&id).unwrap()["total"], 6);
    }

    #[tokio::test]
    async fn test_invalid_input_never_creates_an_operation() {
        let (tool, manager) = deferred(DuplicatePolicy::Allow);

        let err = tool
            .execute(json!({"values": "nope"}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));

        let err = tool
            .execute(json!({"values": []}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        assert_eq!(manager.stats().submitted_total, 0);
    }

    #[tokio::test]
    async fn test_duplicate_resource_key_is_rejected() {
        let (tool, _manager) = deferred(DuplicatePolicy::Reject);
        let args = json!({"values": [1, 2, 3, 4, 5], "key": "tasks"});

        tool.execute(args.clone(), &ToolContext::new()).await.unwrap();
        let err = tool.execute(args, &ToolContext::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ToolError::Rejected(OperationError::DuplicateInFlight { .. })
        ));
    }

    #[tokio::test]
    async fn test_submission_after_shutdown_is_rejected() {
        let (tool, manager) = deferred(DuplicatePolicy::Allow);
        manager.shutdown();

        let err = tool
            .execute(json!({"values": [1]}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Rejected(OperationError::ShuttingDown)));
    }

    #[test]
    fn test_schema_comes_from_input_type() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let (tool, _manager) = deferred(DuplicatePolicy::Allow);

        assert_eq!(tool.name(), "slowSum");
        assert!(tool.input_schema()["properties"]["values"].is_object());
        assert!(tool.output_schema().is_some());
    }
}
