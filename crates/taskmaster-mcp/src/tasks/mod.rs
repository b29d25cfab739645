//! Task management: the task model, a store persisted as a JSON task file,
//! and dependency-graph validation.

pub mod dependencies;
pub mod error;
pub mod store;
pub mod types;

pub use dependencies::{DependencyIssue, IssueKind};
pub use error::TaskError;
pub use store::TaskStore;
pub use types::*;
