use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::{error::InvocationError, requirement::PolicyVerdict};

/// A `MeasurementRecord` describes the outcome of exactly one invocation of a scenario's
/// action.
///
/// Records are created by the worker loop that ran the invocation and never change
/// afterwards. They carry enough metadata (`thread_index`, `invocation_index`) to rebuild
/// the global order of a run without relying on the order they were collected in.
///
/// - `is_warmup` records are never judged; their `policy_results` stay empty.
/// - A record with an `error` is never judged either.
/// - Otherwise `policy_results` holds one verdict per attached policy, in the order the
///   policies were attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub test_id: String,
    pub thread_index: usize,
    pub invocation_index: usize,
    pub is_warmup: bool,
    pub start_time: SystemTime,
    pub duration: Duration,
    pub error: Option<InvocationError>,
    pub policy_results: Vec<PolicyVerdict>,
}

impl MeasurementRecord {
    pub fn is_trial(&self) -> bool {
        !self.is_warmup
    }

    /// Every attached policy passed (vacuously true when none were evaluated).
    pub fn passed(&self) -> bool {
        self.policy_results.iter().all(|v| v.passed)
    }

    pub fn failed_policies(&self) -> impl Iterator<Item = &PolicyVerdict> {
        self.policy_results.iter().filter(|v| !v.passed)
    }

    /// The record's error, located within the run.
    pub fn error_info(&self) -> Option<ErrorInfo> {
        self.error.clone().map(|error| ErrorInfo {
            thread_index: Some(self.thread_index),
            invocation_index: Some(self.invocation_index),
            error,
        })
    }
}

/// An error surfaced at the worker-loop level.
///
/// `invocation_index` is `None` when the error is not attached to any record (a worker
/// task that died, or a failing teardown hook).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub thread_index: Option<usize>,
    pub invocation_index: Option<usize>,
    pub error: InvocationError,
}

impl ErrorInfo {
    /// Whether the error belongs to a record in the same run.
    pub fn is_recorded(&self) -> bool {
        self.invocation_index.is_some()
    }
}
