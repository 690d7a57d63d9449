//! Parallel plan scheduler with deferral and re-queue
//!
//! Workers pull wrapped plan executions off a shared work queue. A
//! deferred plan goes back on the queue after a short delay without
//! holding a worker slot; warnings count as success; every other error
//! is collected and joined. The root cancellation token short-circuits
//! the drain.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, instrument};

use crate::error::{CatalystError, Result};
use crate::features::{Feature, Gate};
use crate::runner::plan::Plan;
use crate::runner::plan_runner::run_plan;
use crate::runner::step::{catch_panic, RunCtx};
use crate::runner::ExecutionType;
use crate::util::constants::DEFER_RETRY_DELAY;

/// Provides the list of plans to run
#[async_trait]
pub trait PlansProvider: Send + Sync {
    async fn plans(&self, ctx: &RunCtx) -> Result<Vec<Plan>>;
}

/// Provides the ordered feature list for a plan (first = outermost)
pub trait FeaturesProvider: Send + Sync {
    fn features(&self, plan: &Plan) -> Result<Vec<Box<dyn Feature>>>;
}

/// Runs the raw plan once the feature pipeline admitted it
#[async_trait]
pub trait PlanRunner: Send + Sync {
    async fn run(&self, ctx: &RunCtx, plan: &mut Plan) -> Result<()>;
}

/// Default runner: delegates to the command executors
pub struct CommandGroupRunner {
    pub namespace: String,
    pub execution_type: ExecutionType,
}

#[async_trait]
impl PlanRunner for CommandGroupRunner {
    async fn run(&self, ctx: &RunCtx, plan: &mut Plan) -> Result<()> {
        run_plan(ctx, &self.namespace, self.execution_type, plan).await
    }
}

/// A plan wrapped with its feature pipeline; re-runnable on deferral
pub struct PlanExecution {
    plan: Mutex<Plan>,
    features: Vec<Box<dyn Feature>>,
    runner: Arc<dyn PlanRunner>,
}

impl PlanExecution {
    pub fn new(plan: Plan, features: Vec<Box<dyn Feature>>, runner: Arc<dyn PlanRunner>) -> Self {
        Self {
            plan: Mutex::new(plan),
            features,
            runner,
        }
    }

    pub async fn plan_id(&self) -> String {
        self.plan.lock().await.id.clone()
    }

    /// Inspect the wrapped plan; used by callers that need to read
    /// state the features produced.
    pub async fn inspect<R>(&self, f: impl FnOnce(&Plan) -> R) -> R {
        let plan = self.plan.lock().await;
        f(&plan)
    }

    /// One attempt: descend through the features, run the plan, unwind.
    pub async fn run(&self, ctx: &RunCtx) -> Result<()> {
        catch_panic(self.run_pipeline(ctx)).await
    }

    async fn run_pipeline(&self, ctx: &RunCtx) -> Result<()> {
        let plan = &mut *self.plan.lock().await;

        let mut entered = Vec::with_capacity(self.features.len());
        let mut outcome = None;
        for feature in &self.features {
            match feature.before(ctx, plan).await {
                Ok(Gate::Run) => entered.push(feature),
                Ok(Gate::Skip) => {
                    outcome = Some(Ok(()));
                    break;
                }
                Err(err) => {
                    outcome = Some(Err(err));
                    break;
                }
            }
        }

        let mut result = match outcome {
            Some(early) => early,
            None => self.runner.run(ctx, plan).await,
        };
        for feature in entered.iter().rev() {
            result = feature.after(ctx, plan, result).await;
        }
        result
    }
}

/// Input parameters for [`run_all`]
pub struct RunAllParams<'a> {
    /// Namespace prefixed to derived resource names (container names)
    pub namespace: String,
    pub plans: &'a dyn PlansProvider,
    pub features: Option<&'a dyn FeaturesProvider>,
    /// Number of plans to run concurrently; clamped to at least 1
    pub concurrency: usize,
    pub execution_type: ExecutionType,
}

/// Execute all plans and features in parallel
#[instrument(skip_all, fields(namespace = %params.namespace))]
pub async fn run_all(ctx: &RunCtx, params: RunAllParams<'_>) -> Result<()> {
    let plans = params.plans.plans(ctx).await?;
    let runner: Arc<dyn PlanRunner> = Arc::new(CommandGroupRunner {
        namespace: params.namespace,
        execution_type: params.execution_type,
    });

    let mut executions = Vec::with_capacity(plans.len());
    for plan in plans {
        let features = match params.features {
            Some(provider) => provider.features(&plan)?,
            None => Vec::new(),
        };
        executions.push(Arc::new(PlanExecution::new(
            plan,
            features,
            Arc::clone(&runner),
        )));
    }
    run_executions(ctx, params.concurrency, executions).await
}

/// Parallel-with-requeue: the scheduler core.
pub async fn run_executions(
    ctx: &RunCtx,
    concurrency: usize,
    executions: Vec<Arc<PlanExecution>>,
) -> Result<()> {
    let total = executions.len();
    let (work_tx, work_rx) = mpsc::unbounded_channel::<Arc<PlanExecution>>();
    let work_rx = Arc::new(Mutex::new(work_rx));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Result<()>>();

    let mut workers = JoinSet::new();
    for _ in 0..concurrency.max(1) {
        let work_rx = Arc::clone(&work_rx);
        let work_tx = work_tx.clone();
        let done_tx = done_tx.clone();
        let ctx = ctx.clone();
        workers.spawn(async move {
            loop {
                let execution = {
                    let mut rx = work_rx.lock().await;
                    match rx.recv().await {
                        Some(e) => e,
                        None => break,
                    }
                };
                match execution.run(&ctx).await {
                    Err(err) if err.is_deferred() => {
                        let work_tx = work_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(DEFER_RETRY_DELAY).await;
                            let _ = work_tx.send(execution);
                        });
                    }
                    result => {
                        let _ = done_tx.send(result);
                    }
                }
            }
        });
    }

    for execution in &executions {
        // The channel cannot be closed here: workers hold senders.
        let _ = work_tx.send(Arc::clone(execution));
    }
    drop(work_tx);
    drop(done_tx);

    let mut errors = Vec::new();
    for _ in 0..total {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                workers.shutdown().await;
                return Err(CatalystError::Cancelled);
            }
            result = done_rx.recv() => match result {
                Some(Ok(())) => {}
                Some(Err(err)) if err.is_warning() => debug!("got warning: {err}"),
                Some(Err(err)) => errors.push(err),
                None => break,
            }
        }
    }
    workers.shutdown().await;
    debug!(errors = errors.len(), "parallel executor finished");

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.pop().expect("len checked")),
        _ => Err(CatalystError::Aggregate(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct EchoRunner {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PlanRunner for EchoRunner {
        async fn run(&self, _ctx: &RunCtx, _plan: &mut Plan) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailRunner;

    #[async_trait]
    impl PlanRunner for FailRunner {
        async fn run(&self, _ctx: &RunCtx, _plan: &mut Plan) -> Result<()> {
            Err(CatalystError::CommandFailed { code: 1 })
        }
    }

    struct DeferTwice {
        left: AtomicUsize,
    }

    #[async_trait]
    impl Feature for DeferTwice {
        async fn before(&self, _ctx: &RunCtx, _plan: &mut Plan) -> Result<Gate> {
            if self.left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                .is_ok()
            {
                Err(CatalystError::Deferred)
            } else {
                Ok(Gate::Run)
            }
        }
    }

    fn execution(runner: Arc<dyn PlanRunner>, features: Vec<Box<dyn Feature>>) -> Arc<PlanExecution> {
        Arc::new(PlanExecution::new(Plan::new("p1", "/tmp"), features, runner))
    }

    #[tokio::test]
    async fn runs_every_execution_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(EchoRunner { runs: runs.clone() });
        let execs = (0..5)
            .map(|_| execution(runner.clone(), Vec::new()))
            .collect();
        run_executions(&RunCtx::new(), 3, execs).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_execution_is_requeued() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(EchoRunner { runs: runs.clone() });
        let features: Vec<Box<dyn Feature>> = vec![Box::new(DeferTwice {
            left: AtomicUsize::new(2),
        })];
        run_executions(&RunCtx::new(), 1, vec![execution(runner, features)])
            .await
            .unwrap();
        // Deferred twice, then admitted exactly once
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_joined() {
        let execs = vec![
            execution(Arc::new(FailRunner), Vec::new()),
            execution(Arc::new(FailRunner), Vec::new()),
        ];
        let err = run_executions(&RunCtx::new(), 2, execs).await.unwrap_err();
        assert!(matches!(err, CatalystError::Aggregate(ref inner) if inner.len() == 2));
    }

    #[tokio::test]
    async fn single_failure_is_returned_directly() {
        let execs = vec![execution(Arc::new(FailRunner), Vec::new())];
        let err = run_executions(&RunCtx::new(), 2, execs).await.unwrap_err();
        assert!(matches!(err, CatalystError::CommandFailed { code: 1 }));
    }

    #[tokio::test]
    async fn cancellation_short_circuits_permanent_deferral() {
        struct AlwaysDefer;
        #[async_trait]
        impl Feature for AlwaysDefer {
            async fn before(&self, _ctx: &RunCtx, _plan: &mut Plan) -> Result<Gate> {
                Err(CatalystError::Deferred)
            }
        }
        let runner = Arc::new(EchoRunner {
            runs: Arc::new(AtomicUsize::new(0)),
        });
        let features: Vec<Box<dyn Feature>> = vec![Box::new(AlwaysDefer)];
        let ctx = RunCtx::new();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = run_executions(&ctx, 1, vec![execution(runner, features)])
            .await
            .unwrap_err();
        assert!(matches!(err, CatalystError::Cancelled));
    }

    #[tokio::test]
    async fn panicking_runner_is_reported_not_propagated() {
        struct PanicRunner;
        #[async_trait]
        impl PlanRunner for PanicRunner {
            async fn run(&self, _ctx: &RunCtx, _plan: &mut Plan) -> Result<()> {
                panic!("kaboom");
            }
        }
        let err = run_executions(
            &RunCtx::new(),
            1,
            vec![execution(Arc::new(PanicRunner), Vec::new())],
        )
        .await
        .unwrap_err();
        match err {
            CatalystError::Panicked(msg) => assert!(msg.contains("kaboom")),
            other => panic!("expected panic capture, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn skip_gate_short_circuits_without_running() {
        struct SkipAll;
        #[async_trait]
        impl Feature for SkipAll {
            async fn before(&self, _ctx: &RunCtx, _plan: &mut Plan) -> Result<Gate> {
                Ok(Gate::Skip)
            }
        }
        let runs = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(EchoRunner { runs: runs.clone() });
        let features: Vec<Box<dyn Feature>> = vec![Box::new(SkipAll)];
        run_executions(&RunCtx::new(), 1, vec![execution(runner, features)])
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
