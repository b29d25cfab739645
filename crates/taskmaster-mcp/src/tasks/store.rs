//! Task store with optional JSON file persistence.
//!
//! Every mutation runs against a copy of the current task file; the copy is
//! written to disk (when a path is configured) and only then swapped in. A
//! failed validation or a failed write leaves the store untouched.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use super::dependencies::{self, DependencyIssue};
use super::error::{Result, TaskError};
use super::types::{
    Subtask, SubtaskDraft, Task, TaskDraft, TaskFile, TaskFileMeta, TaskId, TaskRef, TaskRevision,
    TaskStatus,
};

#[derive(Debug)]
pub struct TaskStore {
    path: Option<PathBuf>,
    state: RwLock<TaskFile>,
}

impl TaskStore {
    pub fn in_memory() -> Self {
        Self::with_tasks(Vec::new())
    }

    /// In-memory store seeded with `tasks`.
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            path: None,
            state: RwLock::new(TaskFile { meta: None, tasks }),
        }
    }

    /// Opens the task file at `path`, starting empty when it does not exist
    /// yet. The file is created on the first mutation.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TaskFile::default(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), tasks = file.tasks.len(), "Opened task file");

        Ok(Self {
            path: Some(path),
            state: RwLock::new(file),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn list(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let state = self.state.read().await;
        state
            .tasks
            .iter()
            .filter(|task| status.is_none_or(|s| task.status == s))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, id: TaskId) -> Result<Task> {
        let state = self.state.read().await;
        find(&state.tasks, id).cloned()
    }

    pub async fn get_subtask(&self, task_id: TaskId, subtask_id: TaskId) -> Result<Subtask> {
        let state = self.state.read().await;
        find(&state.tasks, task_id)?
            .subtask(subtask_id)
            .cloned()
            .ok_or(TaskError::SubtaskNotFound(task_id, subtask_id))
    }

    /// The pending task to work on next: every dependency done, highest
    /// priority first, lowest id among equals.
    pub async fn next_task(&self) -> Option<Task> {
        let state = self.state.read().await;
        let tasks = &state.tasks;

        tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .filter(|task| {
                task.dependencies.iter().all(|dep| {
                    tasks
                        .iter()
                        .any(|t| t.id == *dep && t.status == TaskStatus::Done)
                })
            })
            .min_by_key(|task| (std::cmp::Reverse(task.priority.weight()), task.id))
            .cloned()
    }

    /// Sets the status of every target. Marking a task done also marks its
    /// subtasks done.
    pub async fn set_status(&self, targets: &[TaskRef], status: TaskStatus) -> Result<()> {
        self.mutate(|file| {
            for target in targets {
                match *target {
                    TaskRef::Task(id) => {
                        let task = find_mut(&mut file.tasks, id)?;
                        task.status = status;
                        if status == TaskStatus::Done {
                            for sub in task.subtasks.iter_mut() {
                                sub.status = TaskStatus::Done;
                            }
                        }
                    }
                    TaskRef::Subtask(task_id, sub_id) => {
                        find_subtask_mut(&mut file.tasks, task_id, sub_id)?.status = status;
                    }
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn add_task(&self, draft: TaskDraft) -> Result<Task> {
        self.mutate(|file| {
            if draft.title.trim().is_empty() {
                return Err(TaskError::Invalid("task title must not be empty".into()));
            }

            let id = next_task_id(&file.tasks);
            let mut dependencies = Vec::new();
            for dep in &draft.dependencies {
                find(&file.tasks, *dep)?;
                if !dependencies.contains(dep) {
                    dependencies.push(*dep);
                }
            }

            let task = task_from_draft(id, draft, dependencies);
            file.tasks.push(task.clone());
            Ok(task)
        })
        .await
    }

    /// Adds a generated batch of tasks. Draft dependencies are 1-based
    /// positions within the batch; out-of-range and self references are
    /// dropped. Without `append`, the batch replaces every existing task.
    pub async fn import_tasks(
        &self,
        drafts: Vec<TaskDraft>,
        append: bool,
        source: Option<String>,
    ) -> Result<Vec<Task>> {
        self.mutate(|file| {
            if !append {
                file.tasks.clear();
            }

            let base = next_task_id(&file.tasks);
            let count = drafts.len() as TaskId;
            let mut created = Vec::with_capacity(drafts.len());

            for (offset, draft) in drafts.into_iter().enumerate() {
                let position = offset as TaskId + 1;
                let mut dependencies: Vec<TaskId> = draft
                    .dependencies
                    .iter()
                    .filter(|&&p| p >= 1 && p <= count && p != position)
                    .map(|&p| base + p - 1)
                    .collect();
                dependencies.sort_unstable();
                dependencies.dedup();

                created.push(task_from_draft(base + offset as TaskId, draft, dependencies));
            }

            file.tasks.extend(created.iter().cloned());
            file.meta = Some(TaskFileMeta {
                source,
                generated_at: Utc::now(),
            });
            Ok(created)
        })
        .await
    }

    pub async fn add_subtask(&self, parent: TaskId, draft: SubtaskDraft) -> Result<Subtask> {
        self.mutate(|file| {
            if draft.title.trim().is_empty() {
                return Err(TaskError::Invalid("subtask title must not be empty".into()));
            }

            let task = find_mut(&mut file.tasks, parent)?;
            for dep in &draft.dependencies {
                if task.subtask(*dep).is_none() {
                    return Err(TaskError::SubtaskNotFound(parent, *dep));
                }
            }

            let subtask = Subtask {
                id: task.next_subtask_id(),
                title: draft.title,
                description: draft.description,
                details: draft.details,
                status: TaskStatus::Pending,
                dependencies: draft.dependencies,
            };
            task.subtasks.push(subtask.clone());
            Ok(subtask)
        })
        .await
    }

    /// Turns an existing top-level task into a subtask of `parent`.
    /// References to the converted task are dropped from other tasks.
    pub async fn convert_to_subtask(&self, parent: TaskId, task_id: TaskId) -> Result<Subtask> {
        self.mutate(|file| {
            if parent == task_id {
                return Err(TaskError::Invalid(format!(
                    "task {} cannot become a subtask of itself",
                    task_id
                )));
            }
            find(&file.tasks, parent)?;

            let converted = take_task(&mut file.tasks, task_id)?;
            let task = find_mut(&mut file.tasks, parent)?;
            let subtask = Subtask {
                id: task.next_subtask_id(),
                title: converted.title,
                description: converted.description,
                details: converted.details,
                status: converted.status,
                dependencies: Vec::new(),
            };
            task.subtasks.push(subtask.clone());
            Ok(subtask)
        })
        .await
    }

    /// Removes a subtask. With `convert`, it comes back as a new top-level
    /// task depending on its former parent.
    pub async fn remove_subtask(
        &self,
        parent: TaskId,
        subtask_id: TaskId,
        convert: bool,
    ) -> Result<Option<Task>> {
        self.mutate(|file| {
            let task = find_mut(&mut file.tasks, parent)?;
            let index = task
                .subtasks
                .iter()
                .position(|s| s.id == subtask_id)
                .ok_or(TaskError::SubtaskNotFound(parent, subtask_id))?;
            let removed = task.subtasks.remove(index);
            for sibling in task.subtasks.iter_mut() {
                sibling.dependencies.retain(|&d| d != subtask_id);
            }

            if !convert {
                return Ok(None);
            }

            let promoted = Task {
                id: next_task_id(&file.tasks),
                title: removed.title,
                description: removed.description,
                details: removed.details,
                test_strategy: String::new(),
                status: removed.status,
                priority: Default::default(),
                dependencies: vec![parent],
                subtasks: Vec::new(),
                complexity: None,
            };
            file.tasks.push(promoted.clone());
            Ok(Some(promoted))
        })
        .await
    }

    /// Stores generated subtasks under `parent`. Draft dependencies are
    /// 1-based positions within the batch. Without `append`, existing
    /// subtasks are replaced.
    pub async fn set_subtasks(
        &self,
        parent: TaskId,
        drafts: Vec<SubtaskDraft>,
        append: bool,
    ) -> Result<Vec<Subtask>> {
        self.mutate(|file| {
            let task = find_mut(&mut file.tasks, parent)?;
            if !append {
                task.subtasks.clear();
            }

            let base = task.next_subtask_id();
            let count = drafts.len() as TaskId;
            let created: Vec<Subtask> = drafts
                .into_iter()
                .enumerate()
                .map(|(offset, draft)| {
                    let position = offset as TaskId + 1;
                    Subtask {
                        id: base + offset as TaskId,
                        title: draft.title,
                        description: draft.description,
                        details: draft.details,
                        status: TaskStatus::Pending,
                        dependencies: draft
                            .dependencies
                            .iter()
                            .filter(|&&p| p >= 1 && p <= count && p != position)
                            .map(|&p| base + p - 1)
                            .collect(),
                    }
                })
                .collect();

            task.subtasks.extend(created.iter().cloned());
            Ok(created)
        })
        .await
    }

    /// Clears subtasks of the given tasks, or of every task when `ids` is
    /// `None`. Returns the ids of tasks that had subtasks.
    pub async fn clear_subtasks(&self, ids: Option<&[TaskId]>) -> Result<Vec<TaskId>> {
        self.mutate(|file| {
            let targets: Vec<TaskId> = match ids {
                Some(ids) => {
                    for id in ids {
                        find(&file.tasks, *id)?;
                    }
                    ids.to_vec()
                }
                None => file.tasks.iter().map(|t| t.id).collect(),
            };

            let mut cleared = Vec::new();
            for task in file.tasks.iter_mut().filter(|t| targets.contains(&t.id)) {
                if !task.subtasks.is_empty() {
                    task.subtasks.clear();
                    cleared.push(task.id);
                }
            }
            Ok(cleared)
        })
        .await
    }

    /// Adds `task → dependency`. Both must be top-level tasks, or subtasks of
    /// the same task. Self, duplicate, unknown and cyclic edges are rejected.
    pub async fn add_dependency(&self, task: TaskRef, dependency: TaskRef) -> Result<()> {
        self.mutate(|file| {
            let reject = |reason: &str| TaskError::Dependency {
                task,
                dependency,
                reason: reason.to_string(),
            };

            if task == dependency {
                return Err(reject("a task cannot depend on itself"));
            }

            match (task, dependency) {
                (TaskRef::Task(from), TaskRef::Task(to)) => {
                    find(&file.tasks, to)?;
                    if find(&file.tasks, from)?.dependencies.contains(&to) {
                        return Err(reject("dependency already exists"));
                    }
                    if dependencies::creates_cycle(&dependencies::task_graph(&file.tasks), from, to)
                    {
                        return Err(reject("it would create a circular dependency"));
                    }
                    find_mut(&mut file.tasks, from)?.dependencies.push(to);
                }
                (TaskRef::Subtask(parent, from), TaskRef::Subtask(other, to)) if parent == other => {
                    let owner = find_mut(&mut file.tasks, parent)?;
                    if owner.subtask(to).is_none() {
                        return Err(TaskError::SubtaskNotFound(parent, to));
                    }
                    let existing = owner
                        .subtask(from)
                        .ok_or(TaskError::SubtaskNotFound(parent, from))?;
                    if existing.dependencies.contains(&to) {
                        return Err(reject("dependency already exists"));
                    }
                    if dependencies::creates_cycle(&dependencies::subtask_graph(owner), from, to) {
                        return Err(reject("it would create a circular dependency"));
                    }
                    if let Some(sub) = owner.subtask_mut(from) {
                        sub.dependencies.push(to);
                    }
                }
                _ => {
                    return Err(reject(
                        "dependencies must link two tasks or two subtasks of the same task",
                    ));
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn remove_dependency(&self, task: TaskRef, dependency: TaskRef) -> Result<()> {
        self.mutate(|file| {
            let (deps, to) = match (task, dependency) {
                (TaskRef::Task(from), TaskRef::Task(to)) => {
                    (&mut find_mut(&mut file.tasks, from)?.dependencies, to)
                }
                (TaskRef::Subtask(parent, from), TaskRef::Subtask(other, to)) if parent == other => {
                    (&mut find_subtask_mut(&mut file.tasks, parent, from)?.dependencies, to)
                }
                _ => {
                    return Err(TaskError::Dependency {
                        task,
                        dependency,
                        reason: "no such dependency".to_string(),
                    });
                }
            };

            let before = deps.len();
            deps.retain(|&d| d != to);
            if deps.len() == before {
                return Err(TaskError::Dependency {
                    task,
                    dependency,
                    reason: "no such dependency".to_string(),
                });
            }
            Ok(())
        })
        .await
    }

    pub async fn validate_dependencies(&self) -> Vec<DependencyIssue> {
        let state = self.state.read().await;
        dependencies::validate(&state.tasks)
    }

    /// Removes every invalid dependency edge, returning the removed edges.
    pub async fn fix_dependencies(&self) -> Result<Vec<DependencyIssue>> {
        self.mutate(|file| Ok(dependencies::fix(&mut file.tasks)))
            .await
    }

    /// Removes a task and every reference other tasks hold to it.
    pub async fn remove_task(&self, id: TaskId) -> Result<Task> {
        self.mutate(|file| take_task(&mut file.tasks, id)).await
    }

    /// Applies rewritten content to several tasks at once. Either every
    /// revision lands or none does.
    pub async fn revise_tasks(&self, revisions: Vec<(TaskId, TaskRevision)>) -> Result<Vec<Task>> {
        self.mutate(|file| {
            let mut revised = Vec::with_capacity(revisions.len());
            for (id, revision) in revisions {
                if revision.title.trim().is_empty() {
                    return Err(TaskError::Invalid(format!(
                        "revised title of task {} must not be empty",
                        id
                    )));
                }
                let task = find_mut(&mut file.tasks, id)?;
                task.title = revision.title;
                task.description = revision.description;
                task.details = revision.details;
                task.test_strategy = revision.test_strategy;
                task.priority = revision.priority;
                revised.push(task.clone());
            }
            Ok(revised)
        })
        .await
    }

    /// Appends `note` to a subtask's details, separated by a blank line.
    pub async fn append_subtask_details(
        &self,
        task_id: TaskId,
        sub_id: TaskId,
        note: &str,
    ) -> Result<Subtask> {
        self.mutate(|file| {
            let subtask = find_subtask_mut(&mut file.tasks, task_id, sub_id)?;
            if subtask.details.trim().is_empty() {
                subtask.details = note.to_string();
            } else {
                subtask.details = format!("{}\n\n{}", subtask.details.trim_end(), note);
            }
            Ok(subtask.clone())
        })
        .await
    }

    /// Records complexity scores, clamped to 1..=10.
    pub async fn set_complexity(&self, scores: &[(TaskId, u8)]) -> Result<()> {
        self.mutate(|file| {
            for (id, score) in scores {
                find_mut(&mut file.tasks, *id)?.complexity = Some((*score).clamp(1, 10));
            }
            Ok(())
        })
        .await
    }

    async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TaskFile) -> Result<T>,
    {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let output = f(&mut next)?;

        if let Some(path) = &self.path {
            persist(path, &next).await?;
        }

        *state = next;
        Ok(output)
    }
}

async fn persist(path: &Path, file: &TaskFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let bytes = serde_json::to_vec_pretty(file)?;
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, bytes).await?;
    tokio::fs::rename(&staging, path).await?;

    debug!(path = %path.display(), tasks = file.tasks.len(), "Saved task file");
    Ok(())
}

fn find(tasks: &[Task], id: TaskId) -> Result<&Task> {
    tasks
        .iter()
        .find(|t| t.id == id)
        .ok_or(TaskError::TaskNotFound(id))
}

fn find_mut(tasks: &mut [Task], id: TaskId) -> Result<&mut Task> {
    tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or(TaskError::TaskNotFound(id))
}

fn find_subtask_mut(tasks: &mut [Task], task_id: TaskId, sub_id: TaskId) -> Result<&mut Subtask> {
    find_mut(tasks, task_id)?
        .subtask_mut(sub_id)
        .ok_or(TaskError::SubtaskNotFound(task_id, sub_id))
}

fn take_task(tasks: &mut Vec<Task>, id: TaskId) -> Result<Task> {
    let index = tasks
        .iter()
        .position(|t| t.id == id)
        .ok_or(TaskError::TaskNotFound(id))?;
    let removed = tasks.remove(index);
    for task in tasks.iter_mut() {
        task.dependencies.retain(|&d| d != id);
    }
    Ok(removed)
}

fn next_task_id(tasks: &[Task]) -> TaskId {
    tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1
}

fn task_from_draft(id: TaskId, draft: TaskDraft, dependencies: Vec<TaskId>) -> Task {
    Task {
        id,
        title: draft.title,
        description: draft.description,
        details: draft.details,
        test_strategy: draft.test_strategy,
        status: TaskStatus::Pending,
        priority: draft.priority,
        dependencies,
        subtasks: Vec::new(),
        complexity: None,
    }
}
