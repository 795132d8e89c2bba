//! Error types for the cadence scheduler.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::requirement::PolicyVerdict;

/// Error type a scenario action may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Invalid schedule, distribution or requirement configuration.
///
/// Always raised before any invocation takes place.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// At least one measured invocation is required.
    #[error("invocations must be at least 1, got {0}")]
    InvalidInvocations(usize),

    /// At least one worker loop is required.
    #[error("threads must be at least 1, got {0}")]
    InvalidThreads(usize),

    /// Parameters do not fit the chosen distribution kind.
    #[error("invalid parameters for {kind} distribution: {reason}")]
    InvalidDistribution { kind: String, reason: String },

    /// No distribution is registered under this name.
    #[error("unknown distribution kind: {0}")]
    UnknownDistribution(String),

    /// The total number of iterations does not fit in a `usize`.
    #[error(
        "schedule too large: {threads} threads x ({warmup_invocations} warmups + {invocations} invocations)"
    )]
    TooManyInvocations {
        invocations: usize,
        warmup_invocations: usize,
        threads: usize,
    },

    /// The executor is already running a scenario.
    #[error("executor is busy with another run")]
    ExecutorBusy,

    /// A requirement policy was built with out-of-range values.
    #[error("invalid requirement: {0}")]
    InvalidRequirement(String),

    /// Options could not be parsed.
    #[error("invalid options: {0}")]
    InvalidOptions(#[from] serde_json::Error),
}

impl ConfigurationError {
    pub(crate) fn distribution(kind: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidDistribution {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure of a single invocation, or of the worker loop running it.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationError {
    /// The action returned an error.
    #[error("invocation failed: {0}")]
    Failed(String),

    /// The action panicked.
    #[error("invocation panicked: {0}")]
    Panicked(String),

    /// The worker loop died outside of an invocation.
    #[error("worker aborted: {0}")]
    Aborted(String),
}

/// Historical data could not be fetched for a test identity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no baseline available for {test_id}: {reason}")]
pub struct StatsUnavailable {
    pub test_id: String,
    pub reason: String,
}

impl StatsUnavailable {
    pub fn new(test_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            reason: reason.into(),
        }
    }
}

/// Top level error of the blocking entry point.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The async runtime backing the run could not be created.
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// A trial whose measured duration did not satisfy an attached policy.
///
/// Violations never abort a run; they are derived from a finished
/// [`RunResult`](crate::RunResult) for hosts that turn them into test failures.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[error("invocation {invocation_index} on thread {thread_index} violated {}: {}", .verdict.policy, .verdict.detail)]
pub struct RequirementViolation {
    pub thread_index: usize,
    pub invocation_index: usize,
    pub verdict: PolicyVerdict,
}
