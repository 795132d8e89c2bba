//! Executor: orchestration of a scenario's invocations
//!
//! The `Executor` trait is the runtime that executes a `Scenario`. Cadence ships the
//! [`ScheduleExecutor`], which fans a fixed number of invocations out over a fixed number
//! of worker loops, paced by a delay distribution, and judges every measured invocation
//! against the scenario's requirement policies.
pub mod schedule;
pub use schedule::{RunState, ScheduleExecutor};

use crate::{error::BoxError, result::RunResult, scenario::Scenario};
use std::future::Future;

/// The runtime hook that executes a `Scenario`.
///
/// An executor decides how often, how concurrently and at what pace the scenario's
/// action is invoked, and collects one record per invocation into a [`RunResult`].
pub trait Executor<F, Fut>
where
    Self: Send + Sync + Sized,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    type Error;
    /// Execute the scenario and return everything it produced.
    ///
    /// Resolves only once every invocation has finished.
    fn exec(
        &self,
        scenario: &Scenario<F, Fut>,
    ) -> impl Future<Output = Result<RunResult, Self::Error>> + Send;
}
