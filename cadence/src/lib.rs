//! Cadence: scheduled, paced and verified invocation of a unit of work.
//!
//! Cadence runs a caller-supplied action a fixed number of times over a fixed number of
//! concurrent worker loops, optionally pausing between invocations according to a delay
//! distribution. Every invocation is timed and recorded. Measured invocations (trials)
//! are judged against response-time requirements, either absolute or relative to a
//! historical baseline supplied by the host.
//!
//! The core knows nothing about how tests are discovered or how baselines are stored:
//! it receives a resolved [`ScheduleConfig`], a list of [`RequirementPolicy`]s and a
//! callable, and hands back a [`RunResult`].
//!
//! # Architecture
//!
//! - [`DistributionSpec`]: validated delay distribution sampled between invocations.
//! - [`ScheduleConfig`]: how many invocations, warmups and worker loops.
//! - [`RequirementPolicy`]: a pass/fail rule applied to one trial's duration.
//! - [`StatsProvider`]: where baseline-relative policies get their history from.
//! - [`Scenario`]: the test identity, the action and everything attached to it.
//! - [`Executor`]: runs a scenario. [`ScheduleExecutor`] is the built-in one.
//! - [`RunResult`]: one [`MeasurementRecord`] per invocation plus the overall verdict.
//! - [`RunReport`] / [`Reporter`]: summaries and where they go.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use cadence::{DistributionSpec, RequirementPolicy, ScheduleConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ScheduleConfig::new(
//!         10,
//!         2,
//!         4,
//!         DistributionSpec::uniform(Duration::from_millis(1), Duration::from_millis(3)).unwrap(),
//!     )
//!     .unwrap();
//!
//!     let result = cadence::run(
//!         config,
//!         vec![RequirementPolicy::fixed_threshold(Duration::from_millis(500))],
//!         || async { Ok(()) },
//!         "com.example.Cache.lookup",
//!     )
//!     .await
//!     .unwrap();
//!
//!     assert_eq!(result.records.len(), 48);
//!     assert!(result.is_success());
//! }
//! ```
//!
//! # Feature flags
//!
//! - `internals`: exposes the scheduler's worker loop building blocks.

/// Run-level cancellation
pub mod cancel;
/// Raw options and validated schedules
pub mod config;
/// Delay distributions used for pacing
pub mod distribution;
pub mod error;
/// Orchestrators that define how things will actually run
pub mod executor;
/// Per-invocation records
pub mod record;
/// Reports and Reporters
pub mod report;
/// Response-time requirements
pub mod requirement;
pub mod result;
/// The unit of work and what is attached to it
pub mod scenario;
/// Historical statistics used as baselines
pub mod stats;

pub use cancel::{CancelHandle, CancelSignal, cancellation};
pub use config::{DistributionOptions, ScheduleConfig, ScheduleOptions};
pub use distribution::{
    DelayDistribution, DistributionKind, DistributionRegistry, DistributionSpec,
};
pub use error::{
    BoxError, ConfigurationError, Error, InvocationError, RequirementViolation, StatsUnavailable,
};
pub use executor::{Executor, RunState, ScheduleExecutor};
pub use record::{ErrorInfo, MeasurementRecord};
pub use report::{JsonReporter, Reporter, RunReport, StdoutReporter};
pub use requirement::{
    PolicyVerdict, RequirementDefaults, RequirementOptions, RequirementPolicy, TimeUnit,
};
pub use result::RunResult;
pub use scenario::{AfterOnce, Scenario, TestId};
pub use stats::{HistoricalStats, NoBaseline, StatsProvider};

use std::future::Future;

/// Run `action` according to `config` and judge its trials against `policies`.
///
/// Resolves once every worker loop has finished. Baseline-relative policies have no
/// history here and always pass; build a [`Scenario`] with a [`StatsProvider`] and use
/// a [`ScheduleExecutor`] directly to attach one.
pub async fn run<F, Fut>(
    config: ScheduleConfig,
    policies: Vec<RequirementPolicy>,
    action: F,
    test_id: impl Into<TestId>,
) -> Result<RunResult, ConfigurationError>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    let scenario = Scenario::builder()
        .test_id(test_id)
        .action(action)
        .policies(policies)
        .build();
    ScheduleExecutor::new(config).exec(&scenario).await
}

/// Blocking flavour of [`run`] for callers outside of an async runtime.
///
/// A dedicated multi-threaded runtime is started with at least one worker thread per
/// worker loop, so actions that block do not starve each other.
pub fn run_blocking<F, Fut>(
    config: ScheduleConfig,
    policies: Vec<RequirementPolicy>,
    action: F,
    test_id: impl Into<TestId>,
) -> Result<RunResult, Error>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads().max(num_cpus::get()))
        .enable_time()
        .build()?;
    Ok(runtime.block_on(run(config, policies, action, test_id))?)
}
