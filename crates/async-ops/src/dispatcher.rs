//! Dispatch loop.
//!
//! One Tokio task per manager. It wakes up on "submitted" and "slot freed"
//! events, starts queued operations while fewer than `max_concurrent` are
//! running, and periodically prunes expired records. Each started operation
//! runs in its own task; a supervising task records the outcome (including
//! panics and timeouts) and reports the freed slot back to the loop.

use crate::manager::Shared;
use crate::registry::{Completion, StartedOperation};
use crate::types::OperationStatus;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchEvent {
    Submitted,
    SlotFreed,
    Shutdown,
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    events: mpsc::UnboundedReceiver<DispatchEvent>,
    notifier: mpsc::WeakUnboundedSender<DispatchEvent>,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<Shared>,
        events: mpsc::UnboundedReceiver<DispatchEvent>,
        notifier: mpsc::WeakUnboundedSender<DispatchEvent>,
    ) -> Self {
        Self {
            shared,
            events,
            notifier,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until shutdown is requested or every manager handle (and every
    /// in-flight supervisor) has been dropped.
    async fn run(mut self) {
        let mut prune = tokio::time::interval(self.shared.config.prune_interval());
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);
        prune.tick().await;

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(DispatchEvent::Submitted | DispatchEvent::SlotFreed) => {
                        self.dispatch_ready();
                    }
                    Some(DispatchEvent::Shutdown) | None => break,
                },
                _ = prune.tick() => self.prune(),
            }
        }

        debug!("Operation dispatcher stopped");
    }

    fn dispatch_ready(&self) {
        let limit = self.shared.config.concurrency_limit();
        let started = {
            let mut registry = self.shared.registry.lock();
            let mut started = Vec::new();
            while registry.running_len() < limit {
                match registry.start_next() {
                    Some(operation) => started.push(operation),
                    None => break,
                }
            }
            started
        };

        for operation in started {
            debug!(operation_id = %operation.id, "Starting operation");
            self.shared.notify(&operation.id, OperationStatus::Running);
            self.execute(operation);
        }
    }

    fn execute(&self, operation: StartedOperation) {
        let StartedOperation {
            id,
            context,
            work,
            timeout,
        } = operation;
        let shared = Arc::clone(&self.shared);
        let notifier = self.notifier.upgrade();
        let span = info_span!("operation", operation_id = %id);

        tokio::spawn(
            async move {
                let mut handle = tokio::spawn(async move { work(context).await });

                let completion = match timeout {
                    Some(limit) => tokio::select! {
                        joined = &mut handle => completion_from(joined),
                        _ = tokio::time::sleep(limit) => {
                            warn!(timeout = ?limit, "Operation timed out; detaching work");
                            Completion::TimedOut(limit)
                        }
                    },
                    None => completion_from(handle.await),
                };

                shared.finish(&id, completion);

                if let Some(notifier) = notifier {
                    let _ = notifier.send(DispatchEvent::SlotFreed);
                }
            }
            .instrument(span),
        );
    }

    fn prune(&self) {
        let removed = self
            .shared
            .registry
            .lock()
            .prune_expired(Instant::now(), self.shared.config.retention());
        if removed > 0 {
            debug!(removed, "Pruned expired operations");
        }
    }
}

fn completion_from(joined: Result<anyhow::Result<Value>, JoinError>) -> Completion {
    match joined {
        Ok(result) => Completion::Returned(result),
        Err(error) if error.is_panic() => {
            let message = panic_message(error.into_panic());
            warn!(panic = %message, "Operation panicked");
            Completion::Panicked(message)
        }
        Err(error) => Completion::Returned(Err(anyhow::anyhow!("operation task aborted: {}", error))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
