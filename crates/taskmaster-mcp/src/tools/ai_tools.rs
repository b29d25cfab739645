//! Long-running task tools.
//!
//! These call into a [`TaskGenerator`] and may take a while, so they are
//! [`DeferredTool`]s: the call returns an operation id and the work runs
//! under the operation manager. Work checks its [`OperationContext`] before
//! every store write, so a cancelled operation never changes the task file
//! after the cancellation was observed.

use anyhow::{Context, bail};
use async_ops::OperationContext;
use chrono::{SecondsFormat, Utc};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::task_tools::{deserialize_optional_refs, task_only};
use crate::error::ToolError;
use crate::generation::{TaskGenerator, recommended_subtasks};
use crate::shim::DeferredTool;
use crate::tasks::{Priority, Task, TaskId, TaskRef, TaskStore};

/// Resource key shared by tools that rewrite the whole task list. Keys of
/// single tasks nest under it, so they conflict with whole-list work.
const ALL_TASKS: &str = "tasks";

fn task_key(id: TaskId) -> String {
    format!("{}/{}", ALL_TASKS, id)
}
const DEFAULT_SUBTASKS: usize = 3;
const MAX_SUBTASKS: usize = 20;

fn check_subtask_count(num: Option<usize>) -> Result<(), ToolError> {
    match num {
        Some(n) if n == 0 || n > MAX_SUBTASKS => Err(ToolError::InvalidArguments(format!(
            "num must be between 1 and {}",
            MAX_SUBTASKS
        ))),
        _ => Ok(()),
    }
}

fn check_prompt(prompt: &str) -> Result<(), ToolError> {
    if prompt.trim().is_empty() {
        return Err(ToolError::InvalidArguments("prompt must not be empty".to_string()));
    }
    Ok(())
}

fn subtask_count(task: &Task, num: Option<usize>) -> usize {
    num.or_else(|| task.complexity.map(recommended_subtasks))
        .unwrap_or(DEFAULT_SUBTASKS)
}

// parsePRD

fn default_num_tasks() -> usize {
    10
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParsePrdInput {
    /// Path of the PRD file to parse
    #[serde(default)]
    pub input: Option<PathBuf>,
    /// PRD content, instead of a file
    #[serde(default)]
    pub text: Option<String>,
    /// Maximum number of tasks to generate
    #[serde(default = "default_num_tasks")]
    pub num_tasks: usize,
    /// Keep existing tasks and add the new ones after them
    #[serde(default)]
    pub append: bool,
}

pub struct ParsePrdTool {
    store: Arc<TaskStore>,
    generator: Arc<dyn TaskGenerator>,
}

impl ParsePrdTool {
    pub fn new(store: Arc<TaskStore>, generator: Arc<dyn TaskGenerator>) -> Self {
        Self { store, generator }
    }
}

#[async_trait]
impl DeferredTool for ParsePrdTool {
    type Input = ParsePrdInput;

    fn name(&self) -> &'static str {
        "parsePRD"
    }

    fn description(&self) -> &'static str {
        "Generate tasks from a product requirements document. Runs in the background: \
         returns an operationId to poll with getOperationStatus."
    }

    fn validate(&self, input: &ParsePrdInput) -> Result<(), ToolError> {
        match (&input.input, &input.text) {
            (Some(_), Some(_)) => {
                return Err(ToolError::InvalidArguments(
                    "give either input or text, not both".to_string(),
                ));
            }
            (None, None) => {
                return Err(ToolError::InvalidArguments(
                    "either input (a PRD file path) or text is required".to_string(),
                ));
            }
            (Some(path), None) if !path.is_file() => {
                return Err(ToolError::InvalidArguments(format!(
                    "PRD file not found: {}",
                    path.display()
                )));
            }
            (None, Some(text)) if text.trim().is_empty() => {
                return Err(ToolError::InvalidArguments("text must not be empty".to_string()));
            }
            _ => {}
        }

        if !(1..=100).contains(&input.num_tasks) {
            return Err(ToolError::InvalidArguments(
                "numTasks must be between 1 and 100".to_string(),
            ));
        }
        Ok(())
    }

    fn resource_key(&self, _input: &ParsePrdInput) -> Option<String> {
        Some(ALL_TASKS.to_string())
    }

    async fn run(&self, input: ParsePrdInput, ctx: &OperationContext) -> anyhow::Result<Value> {
        let (prd, source) = match (input.input, input.text) {
            (Some(path), _) => {
                let prd = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read PRD file {}", path.display()))?;
                (prd, Some(path.display().to_string()))
            }
            (None, Some(text)) => (text, None),
            (None, None) => bail!("no PRD content"),
        };

        let drafts = self
            .generator
            .generate_tasks(&prd, input.num_tasks, ctx)
            .await?;
        if drafts.is_empty() {
            bail!("no tasks could be derived from the PRD");
        }

        ctx.check()?;
        let created = self
            .store
            .import_tasks(drafts, input.append, source)
            .await?;

        info!(
            operation_id = %ctx.id(),
            tasks = created.len(),
            append = input.append,
            "Imported tasks from PRD"
        );

        let summary: Vec<Value> = created
            .iter()
            .map(|task| json!({ "id": task.id, "title": task.title, "priority": task.priority }))
            .collect();
        Ok(json!({
            "tasksCreated": created.len(),
            "append": input.append,
            "tasks": summary,
        }))
    }
}

// addTask

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddTaskInput {
    /// What the task should accomplish
    pub prompt: String,
    /// Ids of existing tasks the new task depends on
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Overrides the drafted priority
    #[serde(default)]
    pub priority: Option<Priority>,
}

pub struct AddTaskTool {
    store: Arc<TaskStore>,
    generator: Arc<dyn TaskGenerator>,
}

impl AddTaskTool {
    pub fn new(store: Arc<TaskStore>, generator: Arc<dyn TaskGenerator>) -> Self {
        Self { store, generator }
    }
}

#[async_trait]
impl DeferredTool for AddTaskTool {
    type Input = AddTaskInput;

    fn name(&self) -> &'static str {
        "addTask"
    }

    fn description(&self) -> &'static str {
        "Draft a new task from a prompt and add it to the task list. Runs in the background: \
         returns an operationId to poll with getOperationStatus."
    }

    fn validate(&self, input: &AddTaskInput) -> Result<(), ToolError> {
        if input.prompt.trim().is_empty() {
            return Err(ToolError::InvalidArguments("prompt must not be empty".to_string()));
        }
        if input.dependencies.contains(&0) {
            return Err(ToolError::InvalidArguments("task ids start at 1".to_string()));
        }
        Ok(())
    }

    fn resource_key(&self, _input: &AddTaskInput) -> Option<String> {
        Some(ALL_TASKS.to_string())
    }

    async fn run(&self, input: AddTaskInput, ctx: &OperationContext) -> anyhow::Result<Value> {
        let mut draft = self.generator.draft_task(&input.prompt, ctx).await?;
        if let Some(priority) = input.priority {
            draft.priority = priority;
        }
        for dep in input.dependencies {
            if !draft.dependencies.contains(&dep) {
                draft.dependencies.push(dep);
            }
        }

        ctx.check()?;
        let task = self.store.add_task(draft).await?;
        info!(operation_id = %ctx.id(), task_id = task.id, "Added task");
        Ok(json!({ "task": task }))
    }
}

// expandTask

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExpandTaskInput {
    /// Task to break down
    #[schemars(with = "String")]
    pub id: TaskRef,
    /// Number of subtasks; defaults to the complexity recommendation
    #[serde(default)]
    pub num: Option<usize>,
    /// Extra guidance for the breakdown
    #[serde(default)]
    pub prompt: Option<String>,
    /// Replace existing subtasks instead of appending
    #[serde(default)]
    pub force: bool,
}

pub struct ExpandTaskTool {
    store: Arc<TaskStore>,
    generator: Arc<dyn TaskGenerator>,
}

impl ExpandTaskTool {
    pub fn new(store: Arc<TaskStore>, generator: Arc<dyn TaskGenerator>) -> Self {
        Self { store, generator }
    }
}

#[async_trait]
impl DeferredTool for ExpandTaskTool {
    type Input = ExpandTaskInput;

    fn name(&self) -> &'static str {
        "expandTask"
    }

    fn description(&self) -> &'static str {
        "Break a task into subtasks. Runs in the background: returns an operationId to poll \
         with getOperationStatus."
    }

    fn validate(&self, input: &ExpandTaskInput) -> Result<(), ToolError> {
        task_only(input.id)?;
        check_subtask_count(input.num)
    }

    fn resource_key(&self, input: &ExpandTaskInput) -> Option<String> {
        Some(task_key(input.id.task_id()))
    }

    async fn run(&self, input: ExpandTaskInput, ctx: &OperationContext) -> anyhow::Result<Value> {
        let task = self.store.get(input.id.task_id()).await?;
        if task.status.is_complete() {
            bail!("task {} is {} and cannot be expanded", task.id, task.status);
        }

        let count = subtask_count(&task, input.num);
        let guidance = input.prompt.unwrap_or_default();
        let drafts = self
            .generator
            .expand_task(&task, count, &guidance, ctx)
            .await?;

        ctx.check()?;
        let subtasks = self
            .store
            .set_subtasks(task.id, drafts, !input.force)
            .await?;

        info!(
            operation_id = %ctx.id(),
            task_id = task.id,
            subtasks = subtasks.len(),
            replaced = input.force,
            "Expanded task"
        );
        Ok(json!({
            "taskId": task.id,
            "subtasksCreated": subtasks.len(),
            "replaced": input.force,
            "subtasks": subtasks,
        }))
    }
}

// expandAll

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExpandAllInput {
    /// Subtasks per task; defaults to each task's complexity recommendation
    #[serde(default)]
    pub num: Option<usize>,
    /// Extra guidance applied to every breakdown
    #[serde(default)]
    pub prompt: Option<String>,
    /// Also expand tasks that already have subtasks, replacing them
    #[serde(default)]
    pub force: bool,
}

pub struct ExpandAllTool {
    store: Arc<TaskStore>,
    generator: Arc<dyn TaskGenerator>,
}

impl ExpandAllTool {
    pub fn new(store: Arc<TaskStore>, generator: Arc<dyn TaskGenerator>) -> Self {
        Self { store, generator }
    }
}

#[async_trait]
impl DeferredTool for ExpandAllTool {
    type Input = ExpandAllInput;

    fn name(&self) -> &'static str {
        "expandAll"
    }

    fn description(&self) -> &'static str {
        "Break every unfinished task into subtasks. Runs in the background: returns an \
         operationId to poll with getOperationStatus."
    }

    fn validate(&self, input: &ExpandAllInput) -> Result<(), ToolError> {
        check_subtask_count(input.num)
    }

    fn resource_key(&self, _input: &ExpandAllInput) -> Option<String> {
        Some(ALL_TASKS.to_string())
    }

    async fn run(&self, input: ExpandAllInput, ctx: &OperationContext) -> anyhow::Result<Value> {
        let guidance = input.prompt.unwrap_or_default();
        let candidates: Vec<Task> = self
            .store
            .list(None)
            .await
            .into_iter()
            .filter(|task| !task.status.is_complete())
            .collect();

        let mut expanded = Vec::new();
        let mut skipped = Vec::new();
        for task in candidates {
            if !task.subtasks.is_empty() && !input.force {
                skipped.push(task.id);
                continue;
            }

            let count = subtask_count(&task, input.num);
            let drafts = self
                .generator
                .expand_task(&task, count, &guidance, ctx)
                .await?;

            ctx.check()?;
            let subtasks = self.store.set_subtasks(task.id, drafts, false).await?;
            debug!(operation_id = %ctx.id(), task_id = task.id, subtasks = subtasks.len(), "Expanded task");
            expanded.push(json!({ "taskId": task.id, "subtasksCreated": subtasks.len() }));
        }

        info!(
            operation_id = %ctx.id(),
            expanded = expanded.len(),
            skipped = skipped.len(),
            "Expanded all tasks"
        );
        Ok(json!({
            "tasksExpanded": expanded.len(),
            "expanded": expanded,
            "skipped": skipped,
        }))
    }
}

// analyzeComplexity

fn default_threshold() -> u8 {
    5
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeComplexityInput {
    /// Tasks to analyze, comma-separated; defaults to every unfinished task
    #[serde(default, deserialize_with = "deserialize_optional_refs")]
    #[schemars(with = "Option<String>")]
    pub ids: Option<Vec<TaskRef>>,
    /// Score (1-10) at or above which expansion is recommended
    #[serde(default = "default_threshold")]
    pub threshold: u8,
}

pub struct AnalyzeComplexityTool {
    store: Arc<TaskStore>,
    generator: Arc<dyn TaskGenerator>,
}

impl AnalyzeComplexityTool {
    pub fn new(store: Arc<TaskStore>, generator: Arc<dyn TaskGenerator>) -> Self {
        Self { store, generator }
    }
}

#[async_trait]
impl DeferredTool for AnalyzeComplexityTool {
    type Input = AnalyzeComplexityInput;

    fn name(&self) -> &'static str {
        "analyzeComplexity"
    }

    fn description(&self) -> &'static str {
        "Score task complexity from 1 to 10 and recommend which tasks to expand. Runs in the \
         background: returns an operationId to poll with getOperationStatus."
    }

    fn validate(&self, input: &AnalyzeComplexityInput) -> Result<(), ToolError> {
        if !(1..=10).contains(&input.threshold) {
            return Err(ToolError::InvalidArguments(
                "threshold must be between 1 and 10".to_string(),
            ));
        }
        if let Some(ids) = &input.ids {
            for id in ids {
                task_only(*id)?;
            }
        }
        Ok(())
    }

    fn resource_key(&self, _input: &AnalyzeComplexityInput) -> Option<String> {
        Some(format!("{}/complexity", ALL_TASKS))
    }

    async fn run(
        &self,
        input: AnalyzeComplexityInput,
        ctx: &OperationContext,
    ) -> anyhow::Result<Value> {
        let tasks: Vec<Task> = match &input.ids {
            Some(ids) => {
                let mut tasks = Vec::with_capacity(ids.len());
                for id in ids {
                    tasks.push(self.store.get(id.task_id()).await?);
                }
                tasks
            }
            None => self
                .store
                .list(None)
                .await
                .into_iter()
                .filter(|task| !task.status.is_complete())
                .collect(),
        };

        let mut scores = Vec::with_capacity(tasks.len());
        let mut report = Vec::with_capacity(tasks.len());
        for task in &tasks {
            let assessment = self.generator.assess_complexity(task, ctx).await?;
            let score = assessment.score.clamp(1, 10);
            scores.push((task.id, score));
            report.push(json!({
                "taskId": task.id,
                "title": task.title,
                "score": score,
                "recommendedSubtasks": assessment.recommended_subtasks,
                "expansionRecommended": score >= input.threshold,
                "reasoning": assessment.reasoning,
            }));
        }

        ctx.check()?;
        self.store.set_complexity(&scores).await?;

        let recommended = scores
            .iter()
            .filter(|(_, score)| *score >= input.threshold)
            .count();
        info!(
            operation_id = %ctx.id(),
            analyzed = scores.len(),
            recommended,
            "Analyzed task complexity"
        );
        Ok(json!({
            "tasksAnalyzed": scores.len(),
            "threshold": input.threshold,
            "expansionRecommended": recommended,
            "report": report,
        }))
    }
}

// update / updateTask / updateSubtask

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInput {
    /// First task id to update; every unfinished task from here on is rewritten
    pub from: TaskId,
    /// What changed: new information, a different approach, a correction
    pub prompt: String,
}

pub struct UpdateTool {
    store: Arc<TaskStore>,
    generator: Arc<dyn TaskGenerator>,
}

impl UpdateTool {
    pub fn new(store: Arc<TaskStore>, generator: Arc<dyn TaskGenerator>) -> Self {
        Self { store, generator }
    }
}

#[async_trait]
impl DeferredTool for UpdateTool {
    type Input = UpdateInput;

    fn name(&self) -> &'static str {
        "update"
    }

    fn description(&self) -> &'static str {
        "Rewrite every unfinished task from a given id onwards to reflect a change. Runs in \
         the background: returns an operationId to poll with getOperationStatus."
    }

    fn validate(&self, input: &UpdateInput) -> Result<(), ToolError> {
        if input.from == 0 {
            return Err(ToolError::InvalidArguments("task ids start at 1".to_string()));
        }
        check_prompt(&input.prompt)
    }

    fn resource_key(&self, _input: &UpdateInput) -> Option<String> {
        Some(ALL_TASKS.to_string())
    }

    async fn run(&self, input: UpdateInput, ctx: &OperationContext) -> anyhow::Result<Value> {
        let targets: Vec<Task> = self
            .store
            .list(None)
            .await
            .into_iter()
            .filter(|task| task.id >= input.from && !task.status.is_complete())
            .collect();

        let mut revisions = Vec::with_capacity(targets.len());
        for task in &targets {
            let revision = self.generator.revise_task(task, &input.prompt, ctx).await?;
            revisions.push((task.id, revision));
        }

        ctx.check()?;
        let updated = self.store.revise_tasks(revisions).await?;
        let ids: Vec<TaskId> = updated.iter().map(|task| task.id).collect();

        info!(operation_id = %ctx.id(), from = input.from, updated = ids.len(), "Updated tasks");
        Ok(json!({
            "tasksUpdated": ids.len(),
            "updated": ids,
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskInput {
    /// Task to rewrite
    #[schemars(with = "String")]
    pub id: TaskRef,
    /// What changed for this task
    pub prompt: String,
}

pub struct UpdateTaskTool {
    store: Arc<TaskStore>,
    generator: Arc<dyn TaskGenerator>,
}

impl UpdateTaskTool {
    pub fn new(store: Arc<TaskStore>, generator: Arc<dyn TaskGenerator>) -> Self {
        Self { store, generator }
    }
}

#[async_trait]
impl DeferredTool for UpdateTaskTool {
    type Input = UpdateTaskInput;

    fn name(&self) -> &'static str {
        "updateTask"
    }

    fn description(&self) -> &'static str {
        "Rewrite one task to reflect new information. Runs in the background: returns an \
         operationId to poll with getOperationStatus."
    }

    fn validate(&self, input: &UpdateTaskInput) -> Result<(), ToolError> {
        task_only(input.id)?;
        check_prompt(&input.prompt)
    }

    fn resource_key(&self, input: &UpdateTaskInput) -> Option<String> {
        Some(task_key(input.id.task_id()))
    }

    async fn run(&self, input: UpdateTaskInput, ctx: &OperationContext) -> anyhow::Result<Value> {
        let task = self.store.get(input.id.task_id()).await?;
        if task.status.is_complete() {
            bail!("task {} is {} and cannot be updated", task.id, task.status);
        }

        let revision = self.generator.revise_task(&task, &input.prompt, ctx).await?;

        ctx.check()?;
        let mut updated = self.store.revise_tasks(vec![(task.id, revision)]).await?;
        let task = updated.pop().context("revision returned no task")?;

        info!(operation_id = %ctx.id(), task_id = task.id, "Updated task");
        Ok(json!({ "task": task }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubtaskInput {
    /// Subtask to annotate (`7.2`)
    #[schemars(with = "String")]
    pub id: TaskRef,
    /// Information to record on the subtask
    pub prompt: String,
}

pub struct UpdateSubtaskTool {
    store: Arc<TaskStore>,
    generator: Arc<dyn TaskGenerator>,
}

impl UpdateSubtaskTool {
    pub fn new(store: Arc<TaskStore>, generator: Arc<dyn TaskGenerator>) -> Self {
        Self { store, generator }
    }
}

#[async_trait]
impl DeferredTool for UpdateSubtaskTool {
    type Input = UpdateSubtaskInput;

    fn name(&self) -> &'static str {
        "updateSubtask"
    }

    fn description(&self) -> &'static str {
        "Append timestamped notes to a subtask's details. Runs in the background: returns an \
         operationId to poll with getOperationStatus."
    }

    fn validate(&self, input: &UpdateSubtaskInput) -> Result<(), ToolError> {
        if !input.id.is_subtask() {
            return Err(ToolError::InvalidArguments(format!(
                "'{}' is not a subtask id; use the <task>.<subtask> form",
                input.id
            )));
        }
        check_prompt(&input.prompt)
    }

    fn resource_key(&self, input: &UpdateSubtaskInput) -> Option<String> {
        Some(task_key(input.id.task_id()))
    }

    async fn run(&self, input: UpdateSubtaskInput, ctx: &OperationContext) -> anyhow::Result<Value> {
        let TaskRef::Subtask(parent_id, sub_id) = input.id else {
            bail!("'{}' is not a subtask id", input.id);
        };
        let parent = self.store.get(parent_id).await?;
        let subtask = self.store.get_subtask(parent_id, sub_id).await?;
        if subtask.status.is_complete() {
            bail!("subtask {} is {} and cannot be updated", input.id, subtask.status);
        }

        let note = self
            .generator
            .note_subtask(&parent, &subtask, &input.prompt, ctx)
            .await?;
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let entry = format!("<info added on {stamp}>\n{}\n</info added on {stamp}>", note.trim());

        ctx.check()?;
        let subtask = self
            .store
            .append_subtask_details(parent_id, sub_id, &entry)
            .await?;

        info!(operation_id = %ctx.id(), subtask = %input.id, "Updated subtask");
        Ok(json!({
            "id": input.id,
            "subtask": subtask,
            "parentTask": { "id": parent.id, "title": parent.title },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{ComplexityAssessment, MockTaskGenerator};
    use crate::shim::Deferred;
    use crate::tasks::{SubtaskDraft, TaskDraft, TaskRevision, TaskStatus};
    use crate::tool::{Tool, ToolContext};
    use async_ops::{AsyncOperationManager, ManagerConfig, OperationId, OperationStatus};
    use std::io::Write;
    use std::time::Duration;

    fn ctx() -> OperationContext {
        OperationContext::detached("op-test")
    }

    fn draft(title: &str, deps: &[TaskId]) -> TaskDraft {
        TaskDraft {
            title: title.to_string(),
            dependencies: deps.to_vec(),
            ..Default::default()
        }
    }

    fn subtask_drafts(count: usize) -> Vec<SubtaskDraft> {
        (1..=count)
            .map(|i| SubtaskDraft {
                title: format!("Step {}", i),
                ..Default::default()
            })
            .collect()
    }

    async fn seeded_store() -> Arc<TaskStore> {
        let store = Arc::new(TaskStore::in_memory());
        store
            .import_tasks(
                vec![draft("Schema", &[]), draft("API", &[1]), draft("UI", &[2])],
                false,
                None,
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_parse_prd_validation() {
        let tool = ParsePrdTool::new(
            Arc::new(TaskStore::in_memory()),
            Arc::new(MockTaskGenerator::new()),
        );
        let parse = |value: Value| serde_json::from_value::<ParsePrdInput>(value).unwrap();

        assert!(tool.validate(&parse(json!({}))).is_err());
        assert!(tool.validate(&parse(json!({"text": "  "}))).is_err());
        assert!(tool.validate(&parse(json!({"input": "/definitely/missing.md"}))).is_err());
        assert!(tool.validate(&parse(json!({"text": "- a", "numTasks": 0}))).is_err());
        assert!(tool.validate(&parse(json!({"text": "- a", "input": "x.md"}))).is_err());
        assert!(tool.validate(&parse(json!({"text": "- a"}))).is_ok());
        assert_eq!(tool.resource_key(&parse(json!({"text": "- a"}))).unwrap(), "tasks");
    }

    #[tokio::test]
    async fn test_parse_prd_reads_file_and_imports() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# Storage\n- Schema\n- Migrations").unwrap();

        let mut generator = MockTaskGenerator::new();
        generator
            .expect_generate_tasks()
            .withf(|prd, max, _| prd.contains("Migrations") && *max == 2)
            .times(1)
            .returning(|_, _, _| Ok(vec![draft("Schema", &[]), draft("Migrations", &[1])]));

        let store = Arc::new(TaskStore::in_memory());
        let tool = ParsePrdTool::new(Arc::clone(&store), Arc::new(generator));
        let input: ParsePrdInput = serde_json::from_value(json!({
            "input": file.path(),
            "numTasks": 2
        }))
        .unwrap();

        let output = tool.run(input, &ctx()).await.unwrap();
        assert_eq!(output["tasksCreated"], 2);
        assert_eq!(store.get(2).await.unwrap().dependencies, vec![1]);
    }

    #[tokio::test]
    async fn test_parse_prd_cancelled_before_write_changes_nothing() {
        let mut generator = MockTaskGenerator::new();
        generator
            .expect_generate_tasks()
            .returning(|_, _, ctx| {
                ctx.cancel();
                Ok(vec![draft("Schema", &[])])
            });

        let store = Arc::new(TaskStore::in_memory());
        let tool = ParsePrdTool::new(Arc::clone(&store), Arc::new(generator));
        let input: ParsePrdInput = serde_json::from_value(json!({"text": "- Schema"})).unwrap();

        let err = tool.run(input, &ctx()).await.unwrap_err();
        assert!(err.downcast_ref::<async_ops::Cancelled>().is_some());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_task_merges_caller_fields() {
        let mut generator = MockTaskGenerator::new();
        generator.expect_draft_task().returning(|prompt, _| {
            Ok(TaskDraft {
                title: prompt.to_string(),
                priority: Priority::Low,
                ..Default::default()
            })
        });

        let store = seeded_store().await;
        let tool = AddTaskTool::new(Arc::clone(&store), Arc::new(generator));
        let input: AddTaskInput = serde_json::from_value(json!({
            "prompt": "Add audit log",
            "dependencies": [2],
            "priority": "high"
        }))
        .unwrap();

        let output = tool.run(input, &ctx()).await.unwrap();
        assert_eq!(output["task"]["id"], 4);
        assert_eq!(output["task"]["priority"], "high");
        assert_eq!(output["task"]["dependencies"], json!([2]));

        let bad: AddTaskInput = serde_json::from_value(json!({"prompt": " "})).unwrap();
        assert!(tool.validate(&bad).is_err());
    }

    #[tokio::test]
    async fn test_expand_task_count_and_force() {
        let mut generator = MockTaskGenerator::new();
        generator
            .expect_expand_task()
            .returning(|_, count, _, _| Ok(subtask_drafts(count)));

        let store = seeded_store().await;
        store.set_complexity(&[(2, 8)]).await.unwrap();
        let tool = ExpandTaskTool::new(Arc::clone(&store), Arc::new(generator));
        let parse = |value: Value| serde_json::from_value::<ExpandTaskInput>(value).unwrap();

        let output = tool.run(parse(json!({"id": 2})), &ctx()).await.unwrap();
        assert_eq!(output["subtasksCreated"], recommended_subtasks(8));

        tool.run(parse(json!({"id": 2, "num": 2})), &ctx()).await.unwrap();
        assert_eq!(store.get(2).await.unwrap().subtasks.len(), recommended_subtasks(8) + 2);

        tool.run(parse(json!({"id": "2", "num": 1, "force": true})), &ctx())
            .await
            .unwrap();
        assert_eq!(store.get(2).await.unwrap().subtasks.len(), 1);

        assert!(tool.validate(&parse(json!({"id": "2.1"}))).is_err());
        assert!(tool.validate(&parse(json!({"id": 2, "num": 50}))).is_err());
        assert_eq!(tool.resource_key(&parse(json!({"id": 2}))).unwrap(), "tasks/2");

        store.set_status(&[TaskRef::Task(3)], TaskStatus::Done).await.unwrap();
        let err = tool.run(parse(json!({"id": 3})), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("cannot be expanded"));
    }

    #[tokio::test]
    async fn test_expand_all_skips_expanded_and_done() {
        let mut generator = MockTaskGenerator::new();
        generator
            .expect_expand_task()
            .times(1)
            .returning(|task, _, _, _| {
                assert_eq!(task.id, 3);
                Ok(subtask_drafts(DEFAULT_SUBTASKS))
            });

        let store = seeded_store().await;
        store.set_status(&[TaskRef::Task(1)], TaskStatus::Done).await.unwrap();
        store.set_subtasks(2, subtask_drafts(1), false).await.unwrap();

        let tool = ExpandAllTool::new(Arc::clone(&store), Arc::new(generator));
        let input: ExpandAllInput = serde_json::from_value(json!({})).unwrap();
        let output = tool.run(input, &ctx()).await.unwrap();

        assert_eq!(output["tasksExpanded"], 1);
        assert_eq!(output["skipped"], json!([2]));
        assert_eq!(store.get(3).await.unwrap().subtasks.len(), DEFAULT_SUBTASKS);
    }

    #[tokio::test]
    async fn test_analyze_complexity_records_scores() {
        let mut generator = MockTaskGenerator::new();
        generator.expect_assess_complexity().returning(|task, _| {
            Ok(ComplexityAssessment {
                score: if task.id == 1 { 9 } else { 3 },
                recommended_subtasks: 2,
                reasoning: "test".to_string(),
            })
        });

        let store = seeded_store().await;
        let tool = AnalyzeComplexityTool::new(Arc::clone(&store), Arc::new(generator));
        let input: AnalyzeComplexityInput =
            serde_json::from_value(json!({"ids": "1,2", "threshold": 5})).unwrap();

        let output = tool.run(input, &ctx()).await.unwrap();
        assert_eq!(output["tasksAnalyzed"], 2);
        assert_eq!(output["expansionRecommended"], 1);
        assert_eq!(output["report"][0]["expansionRecommended"], true);
        assert_eq!(store.get(1).await.unwrap().complexity, Some(9));
        assert_eq!(store.get(3).await.unwrap().complexity, None);

        let bad: AnalyzeComplexityInput =
            serde_json::from_value(json!({"threshold": 11})).unwrap();
        assert!(tool.validate(&bad).is_err());
    }

    #[tokio::test]
    async fn test_deferred_expand_fails_for_unknown_task() {
        let mut generator = MockTaskGenerator::new();
        generator.expect_expand_task().never();

        let manager = AsyncOperationManager::new(ManagerConfig::default());
        let tool = Deferred::new(
            ExpandTaskTool::new(seeded_store().await, Arc::new(generator)),
            manager.clone(),
        );

        let ack = tool
            .execute(json!({"id": 42}), &ToolContext::new())
            .await
            .unwrap()
            .json()
            .unwrap();
        let id = OperationId::from_string(ack["operationId"].as_str().unwrap());

        for _ in 0..200 {
            if manager.get_status(&id).unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let snapshot = manager.get_status(&id).unwrap();
        assert_eq!(snapshot.status, OperationStatus::Failed);
        assert!(snapshot.error.unwrap().message.contains("42"));
    }

    fn revise_with_suffix(generator: &mut MockTaskGenerator) {
        generator.expect_revise_task().returning(|task, prompt, _| {
            Ok(TaskRevision {
                title: format!("{} (revised)", task.title),
                description: task.description.clone(),
                details: prompt.to_string(),
                test_strategy: task.test_strategy.clone(),
                priority: task.priority,
            })
        });
    }

    #[tokio::test]
    async fn test_update_rewrites_unfinished_tasks_from_id() {
        let mut generator = MockTaskGenerator::new();
        revise_with_suffix(&mut generator);

        let store = seeded_store().await;
        store.set_status(&[TaskRef::Task(3)], TaskStatus::Done).await.unwrap();
        let tool = UpdateTool::new(Arc::clone(&store), Arc::new(generator));
        let input: UpdateInput =
            serde_json::from_value(json!({"from": 2, "prompt": "Use GraphQL"})).unwrap();

        let output = tool.run(input, &ctx()).await.unwrap();
        assert_eq!(output["tasksUpdated"], 1);
        assert_eq!(output["updated"], json!([2]));
        assert_eq!(store.get(1).await.unwrap().title, "Schema");
        assert_eq!(store.get(2).await.unwrap().title, "API (revised)");
        assert_eq!(store.get(2).await.unwrap().details, "Use GraphQL");
        assert_eq!(store.get(3).await.unwrap().title, "UI");

        let bad: UpdateInput = serde_json::from_value(json!({"from": 0, "prompt": "x"})).unwrap();
        assert!(tool.validate(&bad).is_err());
        let bad: UpdateInput = serde_json::from_value(json!({"from": 1, "prompt": ""})).unwrap();
        assert!(tool.validate(&bad).is_err());
    }

    #[tokio::test]
    async fn test_update_task_refuses_finished_task() {
        let mut generator = MockTaskGenerator::new();
        revise_with_suffix(&mut generator);

        let store = seeded_store().await;
        let tool = UpdateTaskTool::new(Arc::clone(&store), Arc::new(generator));
        let parse = |value: Value| serde_json::from_value::<UpdateTaskInput>(value).unwrap();

        let output = tool
            .run(parse(json!({"id": 1, "prompt": "Add indexes"})), &ctx())
            .await
            .unwrap();
        assert_eq!(output["task"]["title"], "Schema (revised)");
        assert_eq!(output["task"]["details"], "Add indexes");

        assert!(tool.validate(&parse(json!({"id": "1.1", "prompt": "x"}))).is_err());
        assert_eq!(
            tool.resource_key(&parse(json!({"id": 1, "prompt": "x"}))).unwrap(),
            "tasks/1"
        );

        store.set_status(&[TaskRef::Task(2)], TaskStatus::Done).await.unwrap();
        let err = tool
            .run(parse(json!({"id": 2, "prompt": "x"})), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot be updated"));
    }

    #[tokio::test]
    async fn test_update_subtask_appends_stamped_note() {
        let mut generator = MockTaskGenerator::new();
        generator
            .expect_note_subtask()
            .withf(|parent, subtask, prompt, _| {
                parent.id == 2 && subtask.id == 1 && prompt == "Paginate results"
            })
            .times(2)
            .returning(|_, _, prompt, _| Ok(format!("- {}", prompt)));

        let store = seeded_store().await;
        store.set_subtasks(2, subtask_drafts(1), false).await.unwrap();
        let tool = UpdateSubtaskTool::new(Arc::clone(&store), Arc::new(generator));
        let parse = |value: Value| serde_json::from_value::<UpdateSubtaskInput>(value).unwrap();

        let input = json!({"id": "2.1", "prompt": "Paginate results"});
        tool.run(parse(input.clone()), &ctx()).await.unwrap();
        let output = tool.run(parse(input), &ctx()).await.unwrap();

        let details = output["subtask"]["details"].as_str().unwrap();
        assert_eq!(details.matches("- Paginate results").count(), 2);
        assert!(details.starts_with("<info added on "));
        assert!(details.ends_with('>'));
        assert_eq!(output["parentTask"]["id"], 2);

        assert!(tool.validate(&parse(json!({"id": 2, "prompt": "x"}))).is_err());
        assert_eq!(
            tool.resource_key(&parse(json!({"id": "2.1", "prompt": "x"}))).unwrap(),
            "tasks/2"
        );
    }
}
