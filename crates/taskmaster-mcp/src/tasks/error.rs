use super::types::{TaskId, TaskRef};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TaskError>;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("Subtask {0}.{1} not found")]
    SubtaskNotFound(TaskId, TaskId),

    /// Malformed request content, detected before anything changes.
    #[error("{0}")]
    Invalid(String),

    #[error("Cannot make {task} depend on {dependency}: {reason}")]
    Dependency {
        task: TaskRef,
        dependency: TaskRef,
        reason: String,
    },

    #[error("Failed to access task file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read task file: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TaskError {
    pub(crate) fn not_found(reference: TaskRef) -> Self {
        match reference {
            TaskRef::Task(id) => TaskError::TaskNotFound(id),
            TaskRef::Subtask(task, sub) => TaskError::SubtaskNotFound(task, sub),
        }
    }
}
