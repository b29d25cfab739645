//! # Async Operations
//!
//! In-process manager for long-running work that must not block the caller.
//! A caller submits a deferred computation and gets an operation id back
//! immediately; the work runs in the background under a concurrency ceiling
//! and the caller polls for status and result, or cancels, by id.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_ops::{AsyncOperationManager, ManagerConfig, OperationMetadata};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = AsyncOperationManager::new(ManagerConfig::default());
//!
//!     let id = manager.submit(OperationMetadata::new("expandTask"), |ctx| async move {
//!         for _ in 0..3 {
//!             ctx.check()?;
//!             tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//!         }
//!         Ok(serde_json::json!({ "subtasks": 3 }))
//!     })?;
//!
//!     loop {
//!         let snapshot = manager.get_status(&id)?;
//!         if snapshot.status.is_terminal() {
//!             println!("{}", manager.get_result(&id)?);
//!             break;
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(50)).await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`manager`]: the [`AsyncOperationManager`] handle
//! - [`registry`]: the operation record store
//! - [`context`]: cooperative cancellation handed to work
//! - [`types`]: ids, statuses, snapshots and events
//! - [`config`]: [`ManagerConfig`] and [`DuplicatePolicy`]
//! - [`error`]: [`OperationError`]

#![warn(clippy::all)]

pub mod config;
pub mod context;
mod dispatcher;
pub mod error;
pub mod manager;
pub mod registry;
pub mod types;

pub use config::{DuplicatePolicy, ManagerConfig};
pub use context::OperationContext;
pub use error::{Cancelled, OperationError, Result};
pub use manager::{AsyncOperationManager, SubmitOptions};
pub use registry::OperationRegistry;
pub use types::{
    CancelOutcome, ErrorDetail, FailureKind, ManagerStats, OperationEvent, OperationId,
    OperationMetadata, OperationSnapshot, OperationStatus, StatusFilter, resource_keys_overlap,
};
