//! Synchronous task tools.
//!
//! Every tool here reads or edits the task store directly and answers in the
//! same call. Ids are accepted as JSON numbers or strings; subtasks are
//! addressed as `"<task>.<subtask>"`.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::ToolError;
use crate::generation::recommended_subtasks;
use crate::tasks::{SubtaskDraft, TaskId, TaskRef, TaskStatus, TaskStore};
use crate::tool::{Tool, ToolContext, ToolResult, input_schema_for};

macro_rules! task_tool {
    ($name:ident, $tool_name:expr, $desc:expr, $input:ty) => {
        pub struct $name {
            store: Arc<TaskStore>,
        }

        impl $name {
            pub fn new(store: Arc<TaskStore>) -> Self {
                Self { store }
            }
        }

        #[async_trait]
        impl Tool for $name {
            fn name(&self) -> &str {
                $tool_name
            }

            fn description(&self) -> Option<&str> {
                Some($desc)
            }

            fn input_schema(&self) -> Value {
                input_schema_for::<$input>()
            }

            async fn execute(
                &self,
                input: Value,
                _context: &ToolContext,
            ) -> Result<ToolResult, ToolError> {
                let input: $input = serde_json::from_value(input)?;
                let output = self.handle(input).await?;
                debug!(tool = $tool_name, "Task tool executed");
                Ok(ToolResult::success_json(output))
            }
        }
    };
}

/// One or more task references: `5`, `"5"`, `"5,6.1"` or `[5, "6.1"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRefList(pub Vec<TaskRef>);

impl<'de> Deserialize<'de> for TaskRefList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(TaskRef),
            Many(Vec<TaskRef>),
        }

        let refs = match Raw::deserialize(deserializer)? {
            Raw::One(single) => vec![single],
            Raw::Many(many) => many,
        };
        if refs.is_empty() {
            return Err(serde::de::Error::custom("at least one task id is required"));
        }
        Ok(TaskRefList(refs))
    }
}

/// Parses a comma-separated id string such as `"3,4.1"`.
fn parse_ref_list(raw: &str) -> Result<Vec<TaskRef>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}

/// Accepts a comma-separated string as well as a single id or an array.
pub(crate) fn deserialize_refs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<TaskRef>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(TaskId),
        Text(String),
        List(TaskRefList),
    }

    let refs = match Raw::deserialize(deserializer)? {
        Raw::Number(0) => return Err(serde::de::Error::custom("task ids start at 1")),
        Raw::Number(id) => vec![TaskRef::Task(id)],
        Raw::Text(text) => parse_ref_list(&text).map_err(serde::de::Error::custom)?,
        Raw::List(list) => list.0,
    };
    if refs.is_empty() {
        return Err(serde::de::Error::custom("at least one task id is required"));
    }
    Ok(refs)
}

pub(crate) fn deserialize_optional_refs<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<TaskRef>>, D::Error> {
    deserialize_refs(deserializer).map(Some)
}

pub(crate) fn task_only(id: TaskRef) -> Result<TaskId, ToolError> {
    match id {
        TaskRef::Task(id) => Ok(id),
        TaskRef::Subtask(..) => Err(ToolError::InvalidArguments(format!(
            "'{}' is a subtask id; a task id is required",
            id
        ))),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    Ok(serde_json::to_value(value)?)
}

// listTasks

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksInput {
    /// Only return tasks with this status
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Include subtasks in the output
    #[serde(default)]
    pub with_subtasks: bool,
}

task_tool!(
    ListTasksTool,
    "listTasks",
    "List tasks, optionally filtered by status, with per-status counts",
    ListTasksInput
);

impl ListTasksTool {
    async fn handle(&self, input: ListTasksInput) -> Result<Value, ToolError> {
        let all = self.store.list(None).await;

        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for task in &all {
            *counts.entry(task.status.as_str()).or_default() += 1;
        }
        let done = all.iter().filter(|t| t.status == TaskStatus::Done).count();
        let percent_done = if all.is_empty() {
            0.0
        } else {
            (done as f64 * 100.0 / all.len() as f64).round()
        };

        let mut tasks = Vec::new();
        for task in all
            .iter()
            .filter(|t| input.status.is_none_or(|s| t.status == s))
        {
            let mut value = to_json(task)?;
            if !input.with_subtasks {
                if let Some(object) = value.as_object_mut() {
                    object.remove("subtasks");
                    object.insert("subtaskCount".to_string(), json!(task.subtasks.len()));
                }
            }
            tasks.push(value);
        }

        Ok(json!({
            "tasks": tasks,
            "filter": input.status,
            "stats": {
                "total": all.len(),
                "byStatus": counts,
                "percentDone": percent_done,
            },
        }))
    }
}

// showTask

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ShowTaskInput {
    /// Task id (`7`) or subtask id (`7.2`)
    #[schemars(with = "String")]
    pub id: TaskRef,
}

task_tool!(
    ShowTaskTool,
    "showTask",
    "Show one task or subtask in full",
    ShowTaskInput
);

impl ShowTaskTool {
    async fn handle(&self, input: ShowTaskInput) -> Result<Value, ToolError> {
        match input.id {
            TaskRef::Task(id) => Ok(json!({ "task": self.store.get(id).await? })),
            TaskRef::Subtask(parent, sub) => {
                let task = self.store.get(parent).await?;
                let subtask = self.store.get_subtask(parent, sub).await?;
                Ok(json!({
                    "subtask": subtask,
                    "parentTask": { "id": task.id, "title": task.title, "status": task.status },
                }))
            }
        }
    }
}

// nextTask

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct EmptyInput {}

task_tool!(
    NextTaskTool,
    "nextTask",
    "Find the next task to work on: pending, all dependencies done, highest priority first",
    EmptyInput
);

impl NextTaskTool {
    async fn handle(&self, _input: EmptyInput) -> Result<Value, ToolError> {
        match self.store.next_task().await {
            Some(task) => Ok(json!({ "nextTask": task })),
            None => Ok(json!({
                "nextTask": null,
                "message": "No eligible task: every pending task waits on unfinished dependencies, or nothing is pending",
            })),
        }
    }
}

// setTaskStatus

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetTaskStatusInput {
    /// One id or several, comma-separated (`"3,4.1"`)
    #[serde(deserialize_with = "deserialize_refs")]
    #[schemars(with = "String")]
    pub id: Vec<TaskRef>,
    pub status: TaskStatus,
}

task_tool!(
    SetTaskStatusTool,
    "setTaskStatus",
    "Set the status of one or more tasks or subtasks. Marking a task done also completes its subtasks.",
    SetTaskStatusInput
);

impl SetTaskStatusTool {
    async fn handle(&self, input: SetTaskStatusInput) -> Result<Value, ToolError> {
        self.store.set_status(&input.id, input.status).await?;
        Ok(json!({
            "updated": input.id,
            "status": input.status,
        }))
    }
}

// addSubtask

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddSubtaskInput {
    /// Parent task id
    #[schemars(with = "String")]
    pub id: TaskRef,
    /// Existing task to convert into a subtask instead of creating one
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub task_id: Option<TaskRef>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: String,
    /// Ids of sibling subtasks this one depends on
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

task_tool!(
    AddSubtaskTool,
    "addSubtask",
    "Add a subtask to a task, or convert an existing task into a subtask",
    AddSubtaskInput
);

impl AddSubtaskTool {
    async fn handle(&self, input: AddSubtaskInput) -> Result<Value, ToolError> {
        let parent = task_only(input.id)?;

        let subtask = match (input.task_id, input.title) {
            (Some(existing), _) => {
                let existing = task_only(existing)?;
                self.store.convert_to_subtask(parent, existing).await?
            }
            (None, Some(title)) => {
                self.store
                    .add_subtask(
                        parent,
                        SubtaskDraft {
                            title,
                            description: input.description,
                            details: input.details,
                            dependencies: input.dependencies,
                        },
                    )
                    .await?
            }
            (None, None) => {
                return Err(ToolError::InvalidArguments(
                    "either title or taskId is required".to_string(),
                ));
            }
        };

        Ok(json!({
            "id": TaskRef::Subtask(parent, subtask.id),
            "subtask": subtask,
        }))
    }
}

// removeSubtask

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RemoveSubtaskInput {
    /// Subtask id (`7.2`)
    #[schemars(with = "String")]
    pub id: TaskRef,
    /// Turn the subtask into a standalone task instead of deleting it
    #[serde(default)]
    pub convert: bool,
}

task_tool!(
    RemoveSubtaskTool,
    "removeSubtask",
    "Remove a subtask, optionally converting it into a standalone task",
    RemoveSubtaskInput
);

impl RemoveSubtaskTool {
    async fn handle(&self, input: RemoveSubtaskInput) -> Result<Value, ToolError> {
        let TaskRef::Subtask(parent, sub) = input.id else {
            return Err(ToolError::InvalidArguments(format!(
                "'{}' is not a subtask id; use the <task>.<subtask> form",
                input.id
            )));
        };

        let promoted = self.store.remove_subtask(parent, sub, input.convert).await?;
        Ok(json!({
            "removed": input.id,
            "convertedTask": promoted,
        }))
    }
}

// clearSubtasks

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClearSubtasksInput {
    /// Task ids, comma-separated
    #[serde(default, deserialize_with = "deserialize_optional_refs")]
    #[schemars(with = "Option<String>")]
    pub id: Option<Vec<TaskRef>>,
    /// Clear the subtasks of every task
    #[serde(default)]
    pub all: bool,
}

task_tool!(
    ClearSubtasksTool,
    "clearSubtasks",
    "Remove all subtasks from the given tasks, or from every task with all=true",
    ClearSubtasksInput
);

impl ClearSubtasksTool {
    async fn handle(&self, input: ClearSubtasksInput) -> Result<Value, ToolError> {
        let cleared = match (input.id, input.all) {
            (_, true) => self.store.clear_subtasks(None).await?,
            (Some(refs), false) => {
                let ids = refs
                    .into_iter()
                    .map(task_only)
                    .collect::<Result<Vec<_>, _>>()?;
                self.store.clear_subtasks(Some(&ids)).await?
            }
            (None, false) => {
                return Err(ToolError::InvalidArguments(
                    "either id or all=true is required".to_string(),
                ));
            }
        };

        Ok(json!({ "cleared": cleared }))
    }
}

// addDependency / removeDependency

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependencyInput {
    /// Task or subtask that gains (or loses) the dependency
    #[schemars(with = "String")]
    pub id: TaskRef,
    /// Task or subtask it depends on
    #[schemars(with = "String")]
    pub depends_on: TaskRef,
}

task_tool!(
    AddDependencyTool,
    "addDependency",
    "Make a task depend on another. Self, duplicate, unknown and circular dependencies are rejected.",
    DependencyInput
);

impl AddDependencyTool {
    async fn handle(&self, input: DependencyInput) -> Result<Value, ToolError> {
        self.store.add_dependency(input.id, input.depends_on).await?;
        Ok(json!({ "id": input.id, "dependsOn": input.depends_on, "added": true }))
    }
}

task_tool!(
    RemoveDependencyTool,
    "removeDependency",
    "Remove a dependency between two tasks",
    DependencyInput
);

impl RemoveDependencyTool {
    async fn handle(&self, input: DependencyInput) -> Result<Value, ToolError> {
        self.store
            .remove_dependency(input.id, input.depends_on)
            .await?;
        Ok(json!({ "id": input.id, "dependsOn": input.depends_on, "removed": true }))
    }
}

// validateDependencies / fixDependencies

task_tool!(
    ValidateDependenciesTool,
    "validateDependencies",
    "Report self, missing, duplicate and circular dependencies without changing anything",
    EmptyInput
);

impl ValidateDependenciesTool {
    async fn handle(&self, _input: EmptyInput) -> Result<Value, ToolError> {
        let issues = self.store.validate_dependencies().await;
        Ok(json!({ "valid": issues.is_empty(), "issues": issues }))
    }
}

task_tool!(
    FixDependenciesTool,
    "fixDependencies",
    "Remove every invalid dependency and report what was removed",
    EmptyInput
);

impl FixDependenciesTool {
    async fn handle(&self, _input: EmptyInput) -> Result<Value, ToolError> {
        let removed = self.store.fix_dependencies().await?;
        Ok(json!({ "count": removed.len(), "removed": removed }))
    }
}

// removeTask

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RemoveTaskInput {
    /// Task id
    #[schemars(with = "String")]
    pub id: TaskRef,
}

task_tool!(
    RemoveTaskTool,
    "removeTask",
    "Delete a task and drop every dependency on it",
    RemoveTaskInput
);

impl RemoveTaskTool {
    async fn handle(&self, input: RemoveTaskInput) -> Result<Value, ToolError> {
        let removed = self.store.remove_task(task_only(input.id)?).await?;
        Ok(json!({ "removed": removed }))
    }
}

// complexityReport

fn default_report_threshold() -> u8 {
    5
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ComplexityReportInput {
    /// Score (1-10) at or above which expansion is recommended
    #[serde(default = "default_report_threshold")]
    pub threshold: u8,
}

task_tool!(
    ComplexityReportTool,
    "complexityReport",
    "Show the complexity scores recorded by analyzeComplexity, most complex first, and list \
     unfinished tasks that have not been analyzed yet",
    ComplexityReportInput
);

impl ComplexityReportTool {
    async fn handle(&self, input: ComplexityReportInput) -> Result<Value, ToolError> {
        if !(1..=10).contains(&input.threshold) {
            return Err(ToolError::InvalidArguments(
                "threshold must be between 1 and 10".to_string(),
            ));
        }

        let tasks = self.store.list(None).await;
        let mut scored: Vec<_> = tasks
            .iter()
            .filter_map(|task| task.complexity.map(|score| (score, task)))
            .collect();
        scored.sort_by(|(a, ta), (b, tb)| b.cmp(a).then(ta.id.cmp(&tb.id)));

        let report: Vec<Value> = scored
            .iter()
            .map(|(score, task)| {
                json!({
                    "taskId": task.id,
                    "title": task.title,
                    "status": task.status,
                    "score": score,
                    "recommendedSubtasks": recommended_subtasks(*score),
                    "subtaskCount": task.subtasks.len(),
                    "expansionRecommended": *score >= input.threshold && task.subtasks.is_empty(),
                })
            })
            .collect();
        let unanalyzed: Vec<TaskId> = tasks
            .iter()
            .filter(|task| task.complexity.is_none() && !task.status.is_complete())
            .map(|task| task.id)
            .collect();
        let recommended = report
            .iter()
            .filter(|entry| entry["expansionRecommended"] == true)
            .count();

        Ok(json!({
            "threshold": input.threshold,
            "tasksAnalyzed": report.len(),
            "expansionRecommended": recommended,
            "report": report,
            "unanalyzed": unanalyzed,
        }))
    }
}
