//! The public face of the crate: [`AsyncOperationManager`].

use crate::config::{DuplicatePolicy, ManagerConfig};
use crate::context::OperationContext;
use crate::dispatcher::{DispatchEvent, Dispatcher};
use crate::error::{OperationError, Result};
use crate::registry::{Completion, OperationRegistry, Work};
use crate::types::{
    CancelOutcome, ManagerStats, OperationEvent, OperationId, OperationMetadata,
    OperationSnapshot, OperationStatus, StatusFilter,
};
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Capacity of the observer channel. Slow subscribers see `Lagged` and should
/// fall back to polling.
const EVENT_CAPACITY: usize = 256;

/// State shared between manager handles and the dispatcher.
pub(crate) struct Shared {
    pub(crate) config: ManagerConfig,
    pub(crate) registry: Mutex<OperationRegistry>,
    events: broadcast::Sender<OperationEvent>,
    shutting_down: AtomicBool,
}

impl Shared {
    pub(crate) fn notify(&self, id: &OperationId, status: OperationStatus) {
        // No subscribers is not an error.
        let _ = self.events.send(OperationEvent {
            id: id.clone(),
            status,
            at: Utc::now(),
        });
    }

    /// Applies a completion and publishes the resulting transition.
    pub(crate) fn finish(&self, id: &OperationId, completion: Completion) {
        let applied = {
            let mut registry = self.registry.lock();
            registry
                .complete(id, completion)
                .map(|status| (status, registry.snapshot(id)))
        };

        match applied {
            Some((status, snapshot)) => {
                let tool = snapshot
                    .as_ref()
                    .map(|s| s.metadata.tool_name.clone())
                    .unwrap_or_default();
                match status {
                    OperationStatus::Failed => {
                        let error = snapshot
                            .and_then(|s| s.error)
                            .map(|e| e.to_string())
                            .unwrap_or_default();
                        warn!(operation_id = %id, tool = %tool, error = %error, "Operation failed");
                    }
                    _ => info!(operation_id = %id, tool = %tool, status = %status, "Operation finished"),
                }
                self.notify(id, status);
            }
            None => debug!(operation_id = %id, "Discarding late completion"),
        }
    }
}

/// Per-submission overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Replaces the configured default timeout. `Some(None)` disables the
    /// timeout for this operation.
    pub timeout: Option<Option<Duration>>,
}

impl SubmitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Some(timeout));
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = Some(None);
        self
    }
}

/// Accepts deferred work, runs it in the background under a concurrency
/// ceiling and answers status, result and cancel queries by operation id.
///
/// The handle is cheap to clone; all clones share one registry and one
/// dispatch loop. Every query method is synchronous and only holds the
/// registry lock for the duration of a lookup.
///
/// # Example
///
/// ```no_run
/// use async_ops::{AsyncOperationManager, ManagerConfig, OperationMetadata, OperationStatus};
///
/// # async fn demo() -> Result<(), async_ops::OperationError> {
/// let manager = AsyncOperationManager::new(ManagerConfig::default().with_max_concurrent(1));
///
/// let id = manager.submit(OperationMetadata::new("parsePRD"), |ctx| async move {
///     ctx.check()?;
///     Ok(serde_json::json!({ "tasks": 10 }))
/// })?;
///
/// // Returns immediately; the work has not necessarily started yet.
/// let status = manager.get_status(&id)?.status;
/// assert!(!status.is_terminal() || status == OperationStatus::Succeeded);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncOperationManager {
    shared: Arc<Shared>,
    dispatch: mpsc::UnboundedSender<DispatchEvent>,
}

impl std::fmt::Debug for AsyncOperationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncOperationManager")
            .field("config", &self.shared.config)
            .field("registry", &*self.shared.registry.lock())
            .finish()
    }
}

impl AsyncOperationManager {
    /// Creates a manager with an empty registry and spawns its dispatch loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_registry(config, OperationRegistry::new())
    }

    /// Creates a manager that takes ownership of `registry`.
    pub fn with_registry(config: ManagerConfig, registry: OperationRegistry) -> Self {
        let (dispatch, events_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let shared = Arc::new(Shared {
            config,
            registry: Mutex::new(registry),
            events,
            shutting_down: AtomicBool::new(false),
        });

        Dispatcher::new(Arc::clone(&shared), events_rx, dispatch.downgrade()).spawn();

        info!(
            max_concurrent = shared.config.concurrency_limit(),
            retention = ?shared.config.retention(),
            "Async operation manager started"
        );

        Self { shared, dispatch }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Registers `work` as a new `queued` operation and returns its id without
    /// waiting for it to start.
    pub fn submit<F, Fut>(&self, metadata: OperationMetadata, work: F) -> Result<OperationId>
    where
        F: FnOnce(OperationContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.submit_with_options(metadata, SubmitOptions::default(), work)
    }

    /// Same as [`submit`](Self::submit) with per-operation overrides.
    pub fn submit_with_options<F, Fut>(
        &self,
        metadata: OperationMetadata,
        options: SubmitOptions,
        work: F,
    ) -> Result<OperationId>
    where
        F: FnOnce(OperationContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return Err(OperationError::ShuttingDown);
        }

        let work: Work = Box::new(move |ctx| work(ctx).boxed());
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.shared.config.default_timeout());
        let tool = metadata.tool_name.clone();

        let id = {
            let mut registry = self.shared.registry.lock();

            if let Some(key) = metadata.resource_key.as_deref() {
                if let Some((existing, existing_key)) = registry.find_in_flight(key) {
                    match self.shared.config.duplicate_policy {
                        DuplicatePolicy::Allow => {}
                        // Only an identical key can share a result; an
                        // overlapping one is a conflict.
                        DuplicatePolicy::Coalesce if existing_key == key => {
                            debug!(tool = %tool, resource_key = key, existing = %existing, "Coalescing duplicate submission");
                            return Ok(existing);
                        }
                        DuplicatePolicy::Reject | DuplicatePolicy::Coalesce => {
                            warn!(
                                tool = %tool,
                                resource_key = key,
                                existing_key = %existing_key,
                                existing = %existing,
                                "Rejecting submission: resource in use"
                            );
                            return Err(OperationError::DuplicateInFlight {
                                resource_key: existing_key,
                                existing,
                            });
                        }
                    }
                }
            }

            if let Some(limit) = self.shared.config.max_queued {
                if registry.queued_len() >= limit {
                    warn!(tool = %tool, limit, "Rejecting submission: queue is full");
                    return Err(OperationError::ConcurrencyLimitExceeded { limit });
                }
            }

            registry.insert(metadata, timeout, work)
        };

        info!(operation_id = %id, tool = %tool, "Operation submitted");
        self.shared.notify(&id, OperationStatus::Queued);

        self.dispatch
            .send(DispatchEvent::Submitted)
            .map_err(|_| OperationError::Internal("dispatch loop is not running".to_string()))?;

        Ok(id)
    }

    /// Point-in-time snapshot of an operation.
    pub fn get_status(&self, id: &OperationId) -> Result<OperationSnapshot> {
        self.live_registry(id)
            .snapshot(id)
            .ok_or_else(|| OperationError::NotFound(id.clone()))
    }

    /// Terminal payload: the work's value for `succeeded`, an error otherwise.
    pub fn get_result(&self, id: &OperationId) -> Result<Value> {
        self.live_registry(id).result(id)
    }

    /// Snapshot together with the work's value when it succeeded, read under
    /// one lock so a prune cannot fall between the two.
    pub fn get_report(&self, id: &OperationId) -> Result<(OperationSnapshot, Option<Value>)> {
        let registry = self.live_registry(id);
        let snapshot = registry
            .snapshot(id)
            .ok_or_else(|| OperationError::NotFound(id.clone()))?;
        let result = match snapshot.status {
            OperationStatus::Succeeded => Some(registry.result(id)?),
            _ => None,
        };
        Ok((snapshot, result))
    }

    pub fn cancel(&self, id: &OperationId) -> Result<CancelOutcome> {
        let outcome = self.live_registry(id).cancel(id)?;
        match outcome {
            CancelOutcome::Cancelled => {
                info!(operation_id = %id, "Cancelled queued operation");
                self.shared.notify(id, OperationStatus::Cancelled);
            }
            CancelOutcome::CancelRequested => {
                info!(operation_id = %id, "Cancellation requested for running operation");
            }
            CancelOutcome::AlreadyTerminal(status) => {
                debug!(operation_id = %id, status = %status, "Cancel ignored: already terminal");
            }
        }
        Ok(outcome)
    }

    /// Snapshots of all live records in submission order.
    pub fn list(&self, filter: Option<StatusFilter>) -> Vec<OperationSnapshot> {
        let mut registry = self.shared.registry.lock();
        registry.prune_expired(Instant::now(), self.shared.config.retention());
        registry.list(filter)
    }

    pub fn stats(&self) -> ManagerStats {
        let mut stats = self.shared.registry.lock().stats();
        stats.max_concurrent = self.shared.config.concurrency_limit();
        stats
    }

    /// Receives every state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }

    /// Stops accepting work, cancels queued operations and requests
    /// cancellation of running ones. Returns how many queued operations were
    /// cancelled. Idempotent.
    pub fn shutdown(&self) -> usize {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let cancelled = self.shared.registry.lock().cancel_all();
        for id in &cancelled {
            self.shared.notify(id, OperationStatus::Cancelled);
        }
        let _ = self.dispatch.send(DispatchEvent::Shutdown);

        info!(cancelled = cancelled.len(), "Async operation manager shutting down");
        cancelled.len()
    }

    /// Locks the registry after dropping `id` if its retention has elapsed.
    fn live_registry(&self, id: &OperationId) -> parking_lot::MutexGuard<'_, OperationRegistry> {
        let mut registry = self.shared.registry.lock();
        if registry.expire(id, Instant::now(), self.shared.config.retention()) {
            debug!(operation_id = %id, "Pruned expired operation on lookup");
        }
        registry
    }
}
