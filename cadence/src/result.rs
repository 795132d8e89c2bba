use serde::{Deserialize, Serialize};

use crate::{
    error::RequirementViolation,
    record::{ErrorInfo, MeasurementRecord},
};

/// Everything a run produced: one record per invocation plus the errors that stopped
/// worker loops.
///
/// Worker loops each fill a local `RunResult` (see [`RunResult::consume`]) which the
/// executor merges once all of them are done. `merge` only appends, so merge order
/// does not matter; [`RunResult::finish`] restores a stable `(thread, invocation)`
/// order and computes `passed`.
///
/// `passed` is true when
/// - no error outside of a record (worker abort, teardown failure) occurred, and
/// - every trial record's verdicts passed, unless verification was turned off.
///
/// Errors raised by the action itself do not make `passed` false: they are reported in
/// `thread_errors`, see [`RunResult::is_success`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub test_id: String,
    pub records: Vec<MeasurementRecord>,
    pub passed: bool,
    pub thread_errors: Vec<ErrorInfo>,
}

impl RunResult {
    pub fn new(test_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            ..Default::default()
        }
    }

    /// Add a record, surfacing its error as a thread error.
    pub fn consume(&mut self, record: MeasurementRecord) {
        if let Some(info) = record.error_info() {
            self.thread_errors.push(info);
        }
        self.records.push(record);
    }

    /// Add an error that no record carries.
    pub fn push_error(&mut self, error: ErrorInfo) {
        self.thread_errors.push(error);
    }

    pub fn merge(&mut self, other: Self) {
        self.records.extend(other.records);
        self.thread_errors.extend(other.thread_errors);
    }

    /// Order everything and compute `passed`.
    pub fn finish(mut self, verify_response_time: bool) -> Self {
        self.records
            .sort_by_key(|r| (r.thread_index, r.invocation_index));
        self.thread_errors
            .sort_by_key(|e| (e.thread_index.is_none(), e.thread_index, e.invocation_index));

        let unrecorded = self.thread_errors.iter().any(|e| !e.is_recorded());
        let requirements_met =
            !verify_response_time || self.trials().all(MeasurementRecord::passed);
        self.passed = !unrecorded && requirements_met;
        self
    }

    pub fn trials(&self) -> impl Iterator<Item = &MeasurementRecord> {
        self.records.iter().filter(|r| r.is_trial())
    }

    pub fn warmups(&self) -> impl Iterator<Item = &MeasurementRecord> {
        self.records.iter().filter(|r| r.is_warmup)
    }

    /// Every failed verdict on a trial record.
    pub fn violations(&self) -> Vec<RequirementViolation> {
        self.trials()
            .flat_map(|r| {
                r.failed_policies().map(|verdict| RequirementViolation {
                    thread_index: r.thread_index,
                    invocation_index: r.invocation_index,
                    verdict: verdict.clone(),
                })
            })
            .collect()
    }

    /// `passed` and no worker loop stopped on an error.
    pub fn is_success(&self) -> bool {
        self.passed && self.thread_errors.is_empty()
    }
}
