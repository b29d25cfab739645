//! Error types for the operation manager.
//!
//! # Error Taxonomy
//!
//! ```text
//! OperationError
//! ├── NotFound                  unknown or pruned id
//! ├── NotReady                  result requested before a terminal status
//! ├── Failed(ErrorDetail)       work failed, timed out or panicked
//! ├── Cancelled                 cancelled by the caller
//! ├── ConcurrencyLimitExceeded  bounded queue is full
//! ├── DuplicateInFlight         resource key already in flight (reject policy)
//! ├── ShuttingDown              manager no longer accepts work
//! └── Internal                  registry inconsistency
//! ```
//!
//! Work functions themselves return `anyhow::Result`; their errors never
//! surface through this type except as the payload of [`OperationError::Failed`].

use crate::types::{ErrorDetail, OperationId, OperationStatus};
use thiserror::Error;

/// Result type alias for manager operations.
pub type Result<T> = std::result::Result<T, OperationError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("Operation not found: {0}")]
    NotFound(OperationId),

    #[error("Operation {id} is not finished (status: {status})")]
    NotReady {
        id: OperationId,
        status: OperationStatus,
    },

    #[error("Operation failed: {0}")]
    Failed(ErrorDetail),

    #[error("Operation {0} was cancelled by the caller")]
    Cancelled(OperationId),

    #[error("Operation queue is full ({limit} queued operations)")]
    ConcurrencyLimitExceeded { limit: usize },

    #[error("Resource '{resource_key}' already has an operation in flight: {existing}")]
    DuplicateInFlight {
        resource_key: String,
        existing: OperationId,
    },

    #[error("Operation manager is shutting down")]
    ShuttingDown,

    #[error("Internal operation manager error: {0}")]
    Internal(String),
}

impl OperationError {
    /// Short machine-readable code, used on the wire by the polling tools.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotReady { .. } => "not_ready",
            Self::Failed(_) => "operation_failed",
            Self::Cancelled(_) => "cancelled_by_caller",
            Self::ConcurrencyLimitExceeded { .. } => "concurrency_limit_exceeded",
            Self::DuplicateInFlight { .. } => "duplicate_in_flight",
            Self::ShuttingDown => "shutting_down",
            Self::Internal(_) => "internal",
        }
    }
}

/// Marker error returned by [`crate::OperationContext::check`] once
/// cancellation has been requested.
///
/// Work that propagates it with `?` ends up `cancelled` rather than `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;
