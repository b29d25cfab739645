//! Operation Registry: the in-memory store of operation records.
//!
//! The registry is plain data guarded by the manager's lock. Every state
//! transition goes through one of its methods, which check the transition
//! against [`OperationStatus::can_transition_to`] and keep the
//! result/error/timestamp fields consistent with the status. Nothing here
//! awaits.

use crate::context::OperationContext;
use crate::error::{Cancelled, OperationError, Result};
use crate::types::{
    CancelOutcome, ErrorDetail, FailureKind, ManagerStats, OperationId, OperationMetadata,
    OperationSnapshot, OperationStatus, StatusFilter, resource_keys_overlap,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Future produced by a work function.
pub type OperationFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Deferred computation stored with a queued operation.
pub type Work = Box<dyn FnOnce(OperationContext) -> OperationFuture + Send + 'static>;

struct OperationRecord {
    id: OperationId,
    sequence: u64,
    status: OperationStatus,
    metadata: OperationMetadata,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    finished_instant: Option<Instant>,
    result: Option<Value>,
    error: Option<ErrorDetail>,
    cancel_requested: bool,
    token: CancellationToken,
    timeout: Option<Duration>,
    work: Option<Work>,
}

impl OperationRecord {
    fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            id: self.id.clone(),
            status: self.status,
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            cancel_requested: self.cancel_requested,
            error: self.error.clone(),
        }
    }

    fn finish(&mut self, status: OperationStatus, result: Option<Value>, error: Option<ErrorDetail>) {
        debug_assert!(self.status.can_transition_to(status));
        self.status = status;
        self.result = result;
        self.error = error;
        self.finished_at = Some(Utc::now());
        self.finished_instant = Some(Instant::now());
        self.work = None;
    }

    fn is_expired(&self, now: Instant, retention: Duration) -> bool {
        match self.finished_instant {
            Some(finished) if self.status.is_terminal() => {
                now.saturating_duration_since(finished) >= retention
            }
            _ => false,
        }
    }
}

/// An operation just moved to `running`, ready to be executed.
pub(crate) struct StartedOperation {
    pub id: OperationId,
    pub context: OperationContext,
    pub work: Work,
    pub timeout: Option<Duration>,
}

/// How a running operation's work ended.
#[derive(Debug)]
pub(crate) enum Completion {
    Returned(anyhow::Result<Value>),
    Panicked(String),
    TimedOut(Duration),
}

/// In-memory store of operation records keyed by [`OperationId`].
///
/// Construct one and hand it to
/// [`AsyncOperationManager::with_registry`](crate::AsyncOperationManager::with_registry);
/// from then on the manager owns it exclusively.
pub struct OperationRegistry {
    records: HashMap<OperationId, OperationRecord>,
    queue: VecDeque<OperationId>,
    next_sequence: u64,
    running: usize,
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("records", &self.records.len())
            .field("queued", &self.queue.len())
            .field("running", &self.running)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            queue: VecDeque::new(),
            next_sequence: 1,
            running: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn running_len(&self) -> usize {
        self.running
    }

    /// Registers a new `queued` operation and returns its id.
    pub(crate) fn insert(
        &mut self,
        metadata: OperationMetadata,
        timeout: Option<Duration>,
        work: Work,
    ) -> OperationId {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let id = OperationId::generate(sequence);

        let record = OperationRecord {
            id: id.clone(),
            sequence,
            status: OperationStatus::Queued,
            metadata,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            finished_instant: None,
            result: None,
            error: None,
            cancel_requested: false,
            token: CancellationToken::new(),
            timeout,
            work: Some(work),
        };

        self.records.insert(id.clone(), record);
        self.queue.push_back(id.clone());
        id
    }

    /// Oldest queued or running operation whose resource key overlaps
    /// `resource_key`, with the key it carries.
    pub(crate) fn find_in_flight(&self, resource_key: &str) -> Option<(OperationId, String)> {
        self.records
            .values()
            .filter(|r| !r.status.is_terminal())
            .filter_map(|r| {
                let key = r.metadata.resource_key.as_deref()?;
                resource_keys_overlap(key, resource_key).then_some((r.sequence, &r.id, key))
            })
            .min_by_key(|(sequence, _, _)| *sequence)
            .map(|(_, id, key)| (id.clone(), key.to_string()))
    }

    /// Pops the oldest queued operation and moves it to `running`.
    pub(crate) fn start_next(&mut self) -> Option<StartedOperation> {
        while let Some(id) = self.queue.pop_front() {
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            if record.status != OperationStatus::Queued {
                continue;
            }
            let Some(work) = record.work.take() else {
                continue;
            };

            record.status = OperationStatus::Running;
            record.started_at = Some(Utc::now());
            self.running += 1;

            return Some(StartedOperation {
                id: id.clone(),
                context: OperationContext::new(id, record.token.clone()),
                work,
                timeout: record.timeout,
            });
        }
        None
    }

    /// Records how a running operation ended and frees its slot.
    ///
    /// Returns the terminal status applied, or `None` when the operation is no
    /// longer running (e.g. it already timed out) and the completion is
    /// discarded.
    pub(crate) fn complete(
        &mut self,
        id: &OperationId,
        completion: Completion,
    ) -> Option<OperationStatus> {
        let record = self.records.get_mut(id)?;
        if record.status != OperationStatus::Running {
            return None;
        }

        let (status, result, error) = match completion {
            Completion::Returned(Ok(value)) => (OperationStatus::Succeeded, Some(value), None),
            Completion::Returned(Err(error))
                if record.cancel_requested && error.downcast_ref::<Cancelled>().is_some() =>
            {
                (OperationStatus::Cancelled, None, None)
            }
            Completion::Returned(Err(error)) => (
                OperationStatus::Failed,
                None,
                Some(ErrorDetail::from_error(&error)),
            ),
            Completion::Panicked(message) => (
                OperationStatus::Failed,
                None,
                Some(ErrorDetail::new(
                    FailureKind::Panic,
                    format!("operation panicked: {}", message),
                )),
            ),
            Completion::TimedOut(limit) => {
                record.cancel_requested = true;
                record.token.cancel();
                (
                    OperationStatus::Failed,
                    None,
                    Some(ErrorDetail::new(
                        FailureKind::Timeout,
                        format!("operation timed out after {:?}", limit),
                    )),
                )
            }
        };

        record.finish(status, result, error);
        self.running = self.running.saturating_sub(1);
        Some(status)
    }

    /// Cancels a queued operation outright, or flags a running one.
    pub(crate) fn cancel(&mut self, id: &OperationId) -> Result<CancelOutcome> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| OperationError::NotFound(id.clone()))?;

        match record.status {
            OperationStatus::Queued => {
                record.cancel_requested = true;
                record.token.cancel();
                record.finish(OperationStatus::Cancelled, None, None);
                self.queue.retain(|queued| queued != id);
                Ok(CancelOutcome::Cancelled)
            }
            OperationStatus::Running => {
                record.cancel_requested = true;
                record.token.cancel();
                Ok(CancelOutcome::CancelRequested)
            }
            terminal => Ok(CancelOutcome::AlreadyTerminal(terminal)),
        }
    }

    /// Cancels everything still queued and flags everything running.
    /// Returns the ids that moved straight to `cancelled`.
    pub(crate) fn cancel_all(&mut self) -> Vec<OperationId> {
        let ids: Vec<OperationId> = self
            .records
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.id.clone())
            .collect();

        ids.into_iter()
            .filter(|id| matches!(self.cancel(id), Ok(CancelOutcome::Cancelled)))
            .collect()
    }

    pub(crate) fn snapshot(&self, id: &OperationId) -> Option<OperationSnapshot> {
        self.records.get(id).map(OperationRecord::snapshot)
    }

    /// Terminal payload of an operation.
    pub(crate) fn result(&self, id: &OperationId) -> Result<Value> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| OperationError::NotFound(id.clone()))?;

        match record.status {
            OperationStatus::Queued | OperationStatus::Running => Err(OperationError::NotReady {
                id: id.clone(),
                status: record.status,
            }),
            OperationStatus::Succeeded => record.result.clone().ok_or_else(|| {
                OperationError::Internal(format!("succeeded operation {} has no result", id))
            }),
            OperationStatus::Failed => Err(OperationError::Failed(
                record.error.clone().ok_or_else(|| {
                    OperationError::Internal(format!("failed operation {} has no error", id))
                })?,
            )),
            OperationStatus::Cancelled => Err(OperationError::Cancelled(id.clone())),
        }
    }

    pub(crate) fn list(&self, filter: Option<StatusFilter>) -> Vec<OperationSnapshot> {
        let mut records: Vec<&OperationRecord> = self
            .records
            .values()
            .filter(|r| filter.is_none_or(|f| f.matches(r.status)))
            .collect();
        records.sort_by_key(|r| r.sequence);
        records.into_iter().map(OperationRecord::snapshot).collect()
    }

    pub(crate) fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            submitted_total: self.next_sequence - 1,
            ..Default::default()
        };
        for record in self.records.values() {
            match record.status {
                OperationStatus::Queued => stats.queued += 1,
                OperationStatus::Running => stats.running += 1,
                OperationStatus::Succeeded => stats.succeeded += 1,
                OperationStatus::Failed => stats.failed += 1,
                OperationStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Drops `id` if it is terminal and older than `retention`. Returns true
    /// when the record was removed.
    pub(crate) fn expire(&mut self, id: &OperationId, now: Instant, retention: Duration) -> bool {
        let expired = self
            .records
            .get(id)
            .is_some_and(|r| r.is_expired(now, retention));
        if expired {
            self.records.remove(id);
        }
        expired
    }

    /// Drops every terminal record older than `retention`.
    pub(crate) fn prune_expired(&mut self, now: Instant, retention: Duration) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired(now, retention));
        before - self.records.len()
    }
}
