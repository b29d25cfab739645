//! Task Master tools, by category:
//! - Operations (3 tools): poll, cancel and list long-running operations
//! - Tasks (13 tools): synchronous reads and edits of the task list
//! - Generation (8 tools): deferred tools backed by a [`TaskGenerator`]

pub mod ai_tools;
pub mod operation_tools;
pub mod task_tools;

pub use ai_tools::{
    AddTaskTool, AnalyzeComplexityTool, ExpandAllTool, ExpandTaskTool, ParsePrdTool, UpdateSubtaskTool,
    UpdateTaskTool, UpdateTool,
};
pub use operation_tools::{CancelOperationTool, GetOperationStatusTool, ListOperationsTool};
pub use task_tools::{
    AddDependencyTool, AddSubtaskTool, ClearSubtasksTool, ComplexityReportTool, FixDependenciesTool,
    ListTasksTool, NextTaskTool, RemoveDependencyTool, RemoveSubtaskTool, RemoveTaskTool, SetTaskStatusTool,
    ShowTaskTool, ValidateDependenciesTool,
};

use async_ops::AsyncOperationManager;
use std::sync::Arc;
use tracing::info;

use crate::error::ToolError;
use crate::generation::TaskGenerator;
use crate::shim::Deferred;
use crate::tasks::TaskStore;
use crate::tool::ToolRegistry;

// =============================================================================
// Tool Registration
// =============================================================================

pub async fn register_operation_tools(
    registry: &ToolRegistry,
    manager: &AsyncOperationManager,
) -> Result<(), ToolError> {
    registry.register(GetOperationStatusTool::new(manager.clone())).await?;
    registry.register(CancelOperationTool::new(manager.clone())).await?;
    registry.register(ListOperationsTool::new(manager.clone())).await?;
    Ok(())
}

pub async fn register_task_tools(
    registry: &ToolRegistry,
    store: &Arc<TaskStore>,
) -> Result<(), ToolError> {
    registry.register(ListTasksTool::new(Arc::clone(store))).await?;
    registry.register(ShowTaskTool::new(Arc::clone(store))).await?;
    registry.register(NextTaskTool::new(Arc::clone(store))).await?;
    registry.register(SetTaskStatusTool::new(Arc::clone(store))).await?;
    registry.register(AddSubtaskTool::new(Arc::clone(store))).await?;
    registry.register(RemoveSubtaskTool::new(Arc::clone(store))).await?;
    registry.register(ClearSubtasksTool::new(Arc::clone(store))).await?;
    registry.register(AddDependencyTool::new(Arc::clone(store))).await?;
    registry.register(RemoveDependencyTool::new(Arc::clone(store))).await?;
    registry.register(ValidateDependenciesTool::new(Arc::clone(store))).await?;
    registry.register(FixDependenciesTool::new(Arc::clone(store))).await?;
    registry.register(RemoveTaskTool::new(Arc::clone(store))).await?;
    registry.register(ComplexityReportTool::new(Arc::clone(store))).await?;
    Ok(())
}

pub async fn register_generation_tools(
    registry: &ToolRegistry,
    store: &Arc<TaskStore>,
    generator: &Arc<dyn TaskGenerator>,
    manager: &AsyncOperationManager,
) -> Result<(), ToolError> {
    registry
        .register(Deferred::new(
            ParsePrdTool::new(Arc::clone(store), Arc::clone(generator)),
            manager.clone(),
        ))
        .await?;
    registry
        .register(Deferred::new(
            AddTaskTool::new(Arc::clone(store), Arc::clone(generator)),
            manager.clone(),
        ))
        .await?;
    registry
        .register(Deferred::new(
            ExpandTaskTool::new(Arc::clone(store), Arc::clone(generator)),
            manager.clone(),
        ))
        .await?;
    registry
        .register(Deferred::new(
            ExpandAllTool::new(Arc::clone(store), Arc::clone(generator)),
            manager.clone(),
        ))
        .await?;
    registry
        .register(Deferred::new(
            AnalyzeComplexityTool::new(Arc::clone(store), Arc::clone(generator)),
            manager.clone(),
        ))
        .await?;
    registry
        .register(Deferred::new(
            UpdateTool::new(Arc::clone(store), Arc::clone(generator)),
            manager.clone(),
        ))
        .await?;
    registry
        .register(Deferred::new(
            UpdateTaskTool::new(Arc::clone(store), Arc::clone(generator)),
            manager.clone(),
        ))
        .await?;
    registry
        .register(Deferred::new(
            UpdateSubtaskTool::new(Arc::clone(store), Arc::clone(generator)),
            manager.clone(),
        ))
        .await?;
    Ok(())
}

/// Registers every Task Master tool.
pub async fn register_all(
    registry: &ToolRegistry,
    store: Arc<TaskStore>,
    generator: Arc<dyn TaskGenerator>,
    manager: &AsyncOperationManager,
) -> Result<(), ToolError> {
    register_operation_tools(registry, manager).await?;
    register_task_tools(registry, &store).await?;
    register_generation_tools(registry, &store, &generator, manager).await?;

    info!(tools = registry.count().await, "Registered tools");
    Ok(())
}
