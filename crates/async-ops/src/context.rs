//! Cancellation context handed to every work function.

use crate::error::Cancelled;
use crate::types::OperationId;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Context passed to a work function when the dispatcher starts it.
///
/// Cancellation is cooperative: the manager fires the token when a caller
/// cancels a running operation or when its timeout expires, but the work only
/// stops where it looks at the context. The cancel-safe points are
/// [`check`](Self::check), [`cancelled`](Self::cancelled) and
/// [`with_cancellation`](Self::with_cancellation). Work that never reaches one
/// of them runs to completion and its outcome is recorded as usual.
///
/// ```
/// use async_ops::OperationContext;
///
/// async fn count(ctx: OperationContext) -> anyhow::Result<serde_json::Value> {
///     let mut total = 0;
///     for step in 0..10 {
///         ctx.check()?;
///         total += step;
///         tokio::task::yield_now().await;
///     }
///     Ok(serde_json::json!(total))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct OperationContext {
    id: OperationId,
    token: CancellationToken,
}

impl OperationContext {
    pub(crate) fn new(id: OperationId, token: CancellationToken) -> Self {
        Self { id, token }
    }

    /// Creates a context that is not attached to any manager. Handy for
    /// running work functions directly in tests.
    pub fn detached(id: impl Into<OperationId>) -> Self {
        Self::new(id.into(), CancellationToken::new())
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.token.is_cancelled() {
            return Err(Cancelled.into());
        }
        Ok(())
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Drives `fut` until it completes or cancellation is requested,
    /// whichever happens first. `fut` is dropped on cancellation.
    pub async fn with_cancellation<F>(&self, fut: F) -> anyhow::Result<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled.into()),
            output = fut => Ok(output),
        }
    }

    /// Fires the token. Used by the manager and by tests driving a detached
    /// context.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_check_reports_cancellation() {
        let ctx = OperationContext::detached("op-test");
        assert!(ctx.check().is_ok());

        ctx.cancel();
        assert!(ctx.is_cancelled());
        let error = ctx.check().unwrap_err();
        assert!(error.downcast_ref::<Cancelled>().is_some());
    }

    #[test]
    fn test_clones_share_the_token() {
        let ctx = OperationContext::detached("op-test");
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(clone.id().as_str(), "op-test");
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_cancellation_interrupts_pending_future() {
        let ctx = OperationContext::detached("op-test");
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = ctx
            .with_cancellation(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert!(result.unwrap_err().downcast_ref::<Cancelled>().is_some());
    }

    #[tokio::test]
    async fn test_with_cancellation_passes_output_through() {
        let ctx = OperationContext::detached("op-test");
        let value = ctx.with_cancellation(async { 42 }).await.unwrap();
        assert_eq!(value, 42);
    }
}
