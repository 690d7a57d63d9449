//! Deferred execution steps
//!
//! A [`Step`] is a unit of work built ahead of time and run later, so
//! executors can assemble copy/close pipelines at construction and
//! replay them at close. Combinators cover sequencing, conditionals
//! and cleanup; the scheduler adds parallel-with-requeue on top.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{CatalystError, Result};

/// Shared execution context: the root cancellation token and the
/// dry-run flag every backend consults before touching the system.
#[derive(Clone, Debug, Default)]
pub struct RunCtx {
    pub cancel: CancellationToken,
    pub dry_run: bool,
}

impl RunCtx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Error out if the root context has been cancelled
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(CatalystError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A deferred unit of work
pub struct Step(Box<dyn FnOnce(RunCtx) -> BoxFuture<'static, Result<()>> + Send>);

impl Step {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(RunCtx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Step(Box::new(move |ctx| f(ctx).boxed()))
    }

    pub fn noop() -> Self {
        Step::new(|_| async { Ok(()) })
    }

    /// A step that only runs when `cond` is true
    pub fn if_bool(self, cond: bool) -> Self {
        if cond {
            self
        } else {
            Step::noop()
        }
    }

    /// Run `cleanup` whether or not this step succeeds. A cleanup
    /// failure supersedes the original error in the returned result.
    pub fn finally(self, cleanup: Step) -> Self {
        Step::new(move |ctx| async move {
            let result = self.run(&ctx).await;
            if let Err(err) = cleanup.run(&ctx).await {
                return Err(err);
            }
            result
        })
    }

    pub async fn run(self, ctx: &RunCtx) -> Result<()> {
        (self.0)(ctx.clone()).await
    }
}

/// Run steps in order, stopping at the first failure. Warnings are
/// logged and do not stop the sequence; cancellation does.
pub async fn sequence(steps: Vec<Step>, ctx: &RunCtx) -> Result<()> {
    for step in steps {
        match step.run(ctx).await {
            Ok(()) => {}
            Err(err) if err.is_warning() => warn!("{err}"),
            Err(err) => return Err(err),
        }
        ctx.ensure_active()?;
    }
    Ok(())
}

/// Run a future, converting a panic into a `Panicked` error so one
/// plan's crash cannot take down the scheduler.
pub async fn catch_panic<Fut>(fut: Fut) -> Result<()>
where
    Fut: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(CatalystError::Panicked(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn sequence_stops_on_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (a, b) = (hits.clone(), hits.clone());
        let steps = vec![
            Step::new(move |_| async move {
                a.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            Step::new(|_| async { Err(CatalystError::CommandNotFound) }),
            Step::new(move |_| async move {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ];
        let result = sequence(steps, &RunCtx::new()).await;
        assert!(result.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequence_tolerates_warnings() {
        let hits = Arc::new(AtomicUsize::new(0));
        let after = hits.clone();
        let steps = vec![
            Step::new(|_| async { Err(CatalystError::warning("soft failure")) }),
            Step::new(move |_| async move {
                after.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ];
        assert!(sequence(steps, &RunCtx::new()).await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn if_bool_false_skips() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let step = Step::new(move |_| async move {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .if_bool(false);
        step.run(&RunCtx::new()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn finally_runs_on_error_and_keeps_original() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let step = Step::new(|_| async { Err(CatalystError::CommandNotFound) }).finally(
            Step::new(move |_| async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let result = step.run(&RunCtx::new()).await;
        assert!(matches!(result, Err(CatalystError::CommandNotFound)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn catch_panic_converts_to_error() {
        let result = catch_panic(async {
            panic!("boom");
            #[allow(unreachable_code)]
            Ok(())
        })
        .await;
        match result {
            Err(CatalystError::Panicked(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected Panicked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_context_stops_sequence() {
        let ctx = RunCtx::new();
        ctx.cancel.cancel();
        let steps = vec![Step::noop(), Step::noop()];
        let result = sequence(steps, &ctx).await;
        assert!(matches!(result, Err(CatalystError::Cancelled)));
    }
}
