//! The `ScheduleExecutor`: fixed-count, multi-threaded, paced invocation of a scenario.
//!
//! # High-level flow
//! 1. **Validating.** The schedule and every attached policy are checked. Anything
//!    invalid fails the run before a single invocation happens.
//! 2. **Running.** `threads` worker loops are spawned and released together. Each loop
//!    runs `warmup_invocations + invocations` iterations strictly in order:
//!    - every iteration but the first is preceded by a pause drawn from the schedule's
//!      delay distribution,
//!    - the action is invoked and timed,
//!    - iterations below `warmup_invocations` are warmups, the rest are trials,
//!    - a trial that did not fail is judged against every policy, fetching the test's
//!      baseline lazily (once per run, shared by all loops),
//!    - a failing (or panicking) invocation is recorded and stops *its* loop only.
//! 3. **Completed.** Once every loop is done their local results are merged, the
//!    one-time teardown runs, and the [`RunResult`] is handed back.
//!
//! Every worker loop owns its records until it finishes, so collecting them needs no
//! lock. Records may additionally be streamed through the scenario's `record_sink`.
//!
//! # Cancellation
//! The scenario's [`CancelSignal`](crate::cancel::CancelSignal) is checked before each
//! pause and before each invocation, and interrupts a pause in progress. A cancelled
//! loop just stops; it does not report an error.
//!
//! # Notes
//! - The action is shared, not cloned: state it captures is accessed from all loops at
//!   once and synchronizing it is the caller's business.
//! - Blocking inside the action occupies a runtime worker thread. Run with at least as
//!   many worker threads as loops (see [`crate::run_blocking`]) when the action blocks.
use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::{FutureExt, future::join_all};
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use typed_builder::TypedBuilder;

use super::Executor;
use crate::{
    config::ScheduleConfig,
    error::{BoxError, ConfigurationError, InvocationError},
    record::{ErrorInfo, MeasurementRecord},
    requirement::{PolicyVerdict, RequirementPolicy},
    result::RunResult,
    scenario::Scenario,
    stats::BaselineCache,
};
use internals::*;

/// Lifecycle of a run, observable through [`ScheduleExecutor::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Validating,
    Running,
    Completed,
    Failed,
}

/// Executor running a scenario according to a [`ScheduleConfig`].
///
/// One executor runs one scenario at a time: `exec` fails with
/// [`ConfigurationError::ExecutorBusy`] while another run on the same executor is in
/// flight. Sequential runs are fine.
///
/// ```rust
/// use cadence::{Executor, Scenario, ScheduleConfig, ScheduleExecutor, DistributionSpec};
///
/// # #[tokio::main(flavor = "multi_thread")]
/// # async fn main() {
/// let config = ScheduleConfig::new(3, 1, 2, DistributionSpec::null()).unwrap();
/// let scenario = Scenario::builder()
///     .test_id("docs.example")
///     .action(|| async { Ok(()) })
///     .build();
///
/// let result = ScheduleExecutor::new(config).exec(&scenario).await.unwrap();
/// assert_eq!(result.records.len(), 8);
/// assert!(result.passed);
/// # }
/// ```
#[derive(TypedBuilder)]
pub struct ScheduleExecutor {
    #[builder(default)]
    pub config: ScheduleConfig,
    #[builder(default = watch::channel(RunState::Idle).0, setter(skip))]
    state: watch::Sender<RunState>,
}

impl ScheduleExecutor {
    pub fn new(config: ScheduleConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Follow state changes of this executor's runs.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Move to `Validating` unless a run is already in flight.
    fn begin(&self) -> bool {
        self.state.send_if_modified(|state| match state {
            RunState::Validating | RunState::Running => false,
            _ => {
                *state = RunState::Validating;
                true
            }
        })
    }

    fn transition(&self, state: RunState) {
        tracing::debug!("Run state: {state:?}");
        self.state.send_replace(state);
    }

    fn validate<F, Fut>(&self, scenario: &Scenario<F, Fut>) -> Result<(), ConfigurationError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.config.validate()?;
        for policy in &scenario.policies {
            policy.validate()?;
        }
        Ok(())
    }
}

impl<F, Fut> Executor<F, Fut> for ScheduleExecutor
where
    Self: Send + Sync + Sized,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    type Error = ConfigurationError;

    async fn exec(&self, scenario: &Scenario<F, Fut>) -> Result<RunResult, Self::Error> {
        if !self.begin() {
            tracing::error!("Executor busy, refusing to run {}", scenario.test_id);
            return Err(ConfigurationError::ExecutorBusy);
        }
        tracing::debug!("Run state: {:?}", RunState::Validating);
        if let Err(e) = self.validate(scenario) {
            tracing::error!("Invalid configuration for {}: {e}", scenario.test_id);
            self.transition(RunState::Failed);
            return Err(e);
        }

        self.transition(RunState::Running);
        tracing::info!(
            "Running scenario {}: {} threads x ({} warmups + {} invocations), {} pacing",
            scenario.test_id,
            self.config.threads(),
            self.config.warmup_invocations(),
            self.config.invocations(),
            self.config.distribution().kind(),
        );

        let ctx = WorkerContext::new(scenario, &self.config);
        tracing::info!("Spawning {} workers...", self.config.threads());
        let handles = spawn_workers(ctx, self.config.threads());

        tracing::info!("Retrieving data from workers...");
        let mut result = RunResult::new(scenario.test_id.as_str());
        for (i, outcome) in join_all(handles).await.into_iter().enumerate() {
            match outcome {
                Ok(local) => result.merge(local),
                Err(e) => {
                    // a dead worker loses its records, but the others are kept
                    tracing::error!("Worker {i} aborted: {e}");
                    result.push_error(ErrorInfo {
                        thread_index: Some(i),
                        invocation_index: None,
                        error: InvocationError::Aborted(e.to_string()),
                    });
                }
            }
        }

        if let Some(hook) = scenario.after_once.take() {
            tracing::debug!("Running one-time teardown...");
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(hook));
            if let Some(error) = invocation_error(outcome) {
                tracing::warn!("Teardown of {} failed: {error}", scenario.test_id);
                result.push_error(ErrorInfo {
                    thread_index: None,
                    invocation_index: None,
                    error,
                });
            }
        }

        tracing::info!("Processing results...");
        let result = result.finish(scenario.verify_response_time);
        self.transition(RunState::Completed);

        tracing::info!(
            "Done running scenario {}: {} records, {} thread errors, passed: {}",
            scenario.test_id,
            result.records.len(),
            result.thread_errors.len(),
            result.passed,
        );
        Ok(result)
    }
}

/// Map the outcome of a caught invocation to the error it should be recorded as.
fn invocation_error(
    outcome: Result<Result<(), BoxError>, Box<dyn Any + Send>>,
) -> Option<InvocationError> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(InvocationError::Failed(e.to_string())),
        Err(panic) => Some(InvocationError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

/// Internal components for the `ScheduleExecutor`.
/// Encapsulated in a module to allow conditional exposure via `#[cfg(feature = "internals")]`.
mod internals {
    use super::*;
    use tokio::sync::{Barrier, mpsc::UnboundedSender};

    use crate::cancel::CancelSignal;

    /// State shared by all worker loops of one run.
    pub struct WorkerContext<F> {
        pub test_id: String,
        /// The scenario's action; one instance for every loop.
        pub action: Arc<F>,
        pub config: ScheduleConfig,
        pub policies: Arc<[RequirementPolicy]>,
        pub needs_baseline: bool,
        pub baselines: Arc<BaselineCache>,
        pub cancel: CancelSignal,
        pub sink: Option<UnboundedSender<MeasurementRecord>>,
        /// Releases all loops at once.
        pub start: Arc<Barrier>,
    }

    impl<F> Clone for WorkerContext<F> {
        fn clone(&self) -> Self {
            Self {
                test_id: self.test_id.clone(),
                action: self.action.clone(),
                config: self.config.clone(),
                policies: self.policies.clone(),
                needs_baseline: self.needs_baseline,
                baselines: self.baselines.clone(),
                cancel: self.cancel.clone(),
                sink: self.sink.clone(),
                start: self.start.clone(),
            }
        }
    }

    impl<F> WorkerContext<F> {
        pub fn new<Fut>(scenario: &Scenario<F, Fut>, config: &ScheduleConfig) -> Self
        where
            F: Fn() -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
        {
            Self {
                test_id: scenario.test_id.to_string(),
                action: scenario.action.clone(),
                config: config.clone(),
                policies: scenario.policies.iter().copied().collect(),
                needs_baseline: scenario.needs_baseline(),
                baselines: Arc::new(BaselineCache::new(
                    scenario.stats.clone(),
                    scenario.baseline_window_days,
                )),
                cancel: scenario.cancel.clone(),
                sink: scenario.record_sink.clone(),
                start: Arc::new(Barrier::new(config.threads())),
            }
        }
    }

    /// Spawns one Tokio task per worker loop.
    pub fn spawn_workers<F, Fut>(ctx: WorkerContext<F>, workers: usize) -> Vec<JoinHandle<RunResult>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        (0..workers)
            .map(|i| {
                let ctx = ctx.clone();
                tracing::debug!("Worker {i} spawned.");
                tokio::spawn(worker_loop(ctx, i))
            })
            .collect()
    }

    /// One worker loop: all iterations of one thread, in order.
    pub async fn worker_loop<F, Fut>(mut ctx: WorkerContext<F>, thread_index: usize) -> RunResult
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let mut local = RunResult::new(ctx.test_id.clone());
        ctx.start.wait().await;
        tracing::debug!("Worker {thread_index} started.");

        for index in 0..ctx.config.iterations_per_thread() {
            if ctx.cancel.is_cancelled() {
                tracing::debug!("Worker {thread_index} cancelled before iteration {index}.");
                break;
            }

            if index > 0 {
                let delay = ctx.config.distribution().sample();
                if !delay.is_zero() && pause(&mut ctx.cancel, delay).await {
                    tracing::debug!("Worker {thread_index} cancelled while pacing.");
                    break;
                }
                if ctx.cancel.is_cancelled() {
                    break;
                }
            }

            let record = invoke(&ctx, thread_index, index).await;
            let sink_closed = ctx
                .sink
                .as_ref()
                .is_some_and(|sink| sink.send(record.clone()).is_err());
            if sink_closed {
                tracing::debug!("Record sink closed, worker {thread_index} stops streaming.");
                ctx.sink = None;
            }

            let error = record.error.clone();
            local.consume(record);
            if let Some(error) = error {
                tracing::warn!("Worker {thread_index} stopped at invocation {index}: {error}");
                break;
            }
        }

        tracing::debug!("Worker {thread_index} shutting down.");
        local
    }

    /// Sleep for `delay`; true when cancelled first.
    async fn pause(cancel: &mut CancelSignal, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = cancel.cancelled() => true,
        }
    }

    /// Run, time and judge a single invocation.
    pub async fn invoke<F, Fut>(
        ctx: &WorkerContext<F>,
        thread_index: usize,
        invocation_index: usize,
    ) -> MeasurementRecord
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let action = &*ctx.action;
        let start_time = SystemTime::now();
        let started = Instant::now();
        let outcome = AssertUnwindSafe(async { action().await })
            .catch_unwind()
            .await;
        let duration = started.elapsed();

        let is_warmup = invocation_index < ctx.config.warmup_invocations();
        let error = invocation_error(outcome);
        let policy_results = if error.is_none() && !is_warmup {
            judge(ctx, duration).await
        } else {
            Vec::new()
        };

        for verdict in policy_results.iter().filter(|v| !v.passed) {
            tracing::debug!(
                "Worker {thread_index} invocation {invocation_index} violated {}: {}",
                verdict.policy,
                verdict.detail
            );
        }

        MeasurementRecord {
            test_id: ctx.test_id.clone(),
            thread_index,
            invocation_index,
            is_warmup,
            start_time,
            duration,
            error,
            policy_results,
        }
    }

    /// Evaluate every policy, fetching the baseline only if one of them needs it.
    pub async fn judge<F>(ctx: &WorkerContext<F>, duration: Duration) -> Vec<PolicyVerdict> {
        let baseline = if ctx.needs_baseline {
            ctx.baselines.get(&ctx.test_id).await.ok()
        } else {
            None
        };
        ctx.policies
            .iter()
            .map(|policy| policy.evaluate(duration, baseline.as_ref()))
            .collect()
    }
}
