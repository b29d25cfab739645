//! Task model.
//!
//! Tasks carry numeric ids that are unique within a task file. Subtask ids
//! are unique within their parent and are addressed as `"<task>.<subtask>"`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub type TaskId = u32;

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    #[serde(alias = "in_progress")]
    InProgress,
    Done,
    Deferred,
    Blocked,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
            TaskStatus::Deferred => "deferred",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Done or cancelled: nothing left to do.
    pub fn is_complete(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority levels
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Higher is more urgent.
    pub fn weight(&self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Sibling subtask ids
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub test_strategy: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Complexity score from 1 (trivial) to 10, set by complexity analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<u8>,
}

impl Task {
    pub fn subtask(&self, id: TaskId) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn subtask_mut(&mut self, id: TaskId) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }

    pub fn next_subtask_id(&self) -> TaskId {
        self.subtasks.iter().map(|s| s.id).max().unwrap_or(0) + 1
    }
}

/// Task content produced by a generator or supplied by a caller, before an
/// id is assigned.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub test_strategy: String,
    #[serde(default)]
    pub priority: Priority,
    /// Ids of existing tasks. In a generated batch, entries refer to the
    /// 1-based position of another draft in the same batch.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: String,
    /// Sibling subtask ids. In a generated batch, entries refer to the
    /// 1-based position of another draft in the same batch.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

/// Rewritten content for an existing task. Id, status, dependencies and
/// subtasks are not part of a revision.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRevision {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub test_strategy: String,
    #[serde(default)]
    pub priority: Priority,
}

/// On-disk layout of a task file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<TaskFileMeta>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFileMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Address of a task (`"7"`) or subtask (`"7.2"`).
///
/// Deserializes from either a JSON number or a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskRef {
    Task(TaskId),
    Subtask(TaskId, TaskId),
}

impl TaskRef {
    /// The top-level task this reference lives under.
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskRef::Task(id) | TaskRef::Subtask(id, _) => *id,
        }
    }

    pub fn is_subtask(&self) -> bool {
        matches!(self, TaskRef::Subtask(..))
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskRef::Task(id) => write!(f, "{}", id),
            TaskRef::Subtask(task, sub) => write!(f, "{}.{}", task, sub),
        }
    }
}

impl FromStr for TaskRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| -> Result<TaskId, String> {
            match part.trim().parse::<TaskId>() {
                Ok(0) | Err(_) => Err(format!("invalid task id '{}'", s)),
                Ok(id) => Ok(id),
            }
        };

        match s.split_once('.') {
            None => Ok(TaskRef::Task(parse(s)?)),
            Some((task, sub)) => Ok(TaskRef::Subtask(parse(task)?, parse(sub)?)),
        }
    }
}

impl Serialize for TaskRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(TaskId),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(0) => Err(serde::de::Error::custom("task ids start at 1")),
            Raw::Number(id) => Ok(TaskRef::Task(id)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}
