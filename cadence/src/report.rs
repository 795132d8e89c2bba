use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{io::Write, sync::Mutex, time::Duration};

use crate::{error::BoxError, result::RunResult};

/// Compact summary of a [`RunResult`], suitable for printing or shipping elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub test_id: String,
    pub records: usize,
    pub warmups: usize,
    pub trials: usize,
    pub errors: usize,
    pub min_duration: Option<Duration>,
    pub mean_duration: Option<Duration>,
    pub max_duration: Option<Duration>,
    pub violations: usize,
    pub passed: bool,
}

impl From<&RunResult> for RunReport {
    fn from(result: &RunResult) -> Self {
        let durations: Vec<Duration> = result.trials().map(|r| r.duration).collect();
        let total: Duration = durations.iter().sum();
        let mean_duration = u32::try_from(durations.len())
            .ok()
            .filter(|n| *n > 0)
            .map(|n| total / n);

        Self {
            test_id: result.test_id.clone(),
            records: result.records.len(),
            warmups: result.warmups().count(),
            trials: durations.len(),
            errors: result.thread_errors.len(),
            min_duration: durations.iter().min().copied(),
            mean_duration,
            max_duration: durations.iter().max().copied(),
            violations: result.violations().len(),
            passed: result.passed,
        }
    }
}

impl From<RunResult> for RunReport {
    fn from(result: RunResult) -> Self {
        Self::from(&result)
    }
}

/// Sends a report somewhere (stdout, a file, a database).
#[async_trait]
pub trait Reporter {
    async fn report(&self, report: &RunReport) -> Result<(), BoxError>;
}

pub struct StdoutReporter;

#[async_trait]
impl Reporter for StdoutReporter {
    async fn report(&self, report: &RunReport) -> Result<(), BoxError> {
        println!("{report:#?}");
        Ok(())
    }
}

/// Writes every report as one line of JSON.
pub struct JsonReporter<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonReporter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> Result<W, BoxError> {
        self.writer
            .into_inner()
            .map_err(|_| "json reporter writer poisoned".into())
    }
}

impl JsonReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[async_trait]
impl<W: Write + Send + 'static> Reporter for JsonReporter<W> {
    async fn report(&self, report: &RunReport) -> Result<(), BoxError> {
        let line = serde_json::to_string(report)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| "json reporter writer poisoned")?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::{
        record::MeasurementRecord,
        requirement::{PolicyVerdict, RequirementPolicy},
    };

    fn record(index: usize, warmup: bool, millis: u64, passed: bool) -> MeasurementRecord {
        MeasurementRecord {
            test_id: "t".into(),
            thread_index: 0,
            invocation_index: index,
            is_warmup: warmup,
            start_time: SystemTime::UNIX_EPOCH,
            duration: Duration::from_millis(millis),
            error: None,
            policy_results: vec![PolicyVerdict {
                policy: RequirementPolicy::fixed_threshold(Duration::from_millis(25)),
                passed,
                detail: String::new(),
            }],
        }
    }

    fn sample() -> RunResult {
        let mut result = RunResult::new("t");
        result.consume(record(0, true, 100, false));
        result.consume(record(1, false, 10, true));
        result.consume(record(2, false, 20, true));
        result.consume(record(3, false, 30, false));
        result.finish(true)
    }

    #[test]
    fn summarizes_trials_only() {
        let report = RunReport::from(&sample());
        assert_eq!(report.records, 4);
        assert_eq!(report.warmups, 1);
        assert_eq!(report.trials, 3);
        assert_eq!(report.min_duration, Some(Duration::from_millis(10)));
        assert_eq!(report.mean_duration, Some(Duration::from_millis(20)));
        assert_eq!(report.max_duration, Some(Duration::from_millis(30)));
        assert_eq!(report.violations, 1);
        assert!(!report.passed);
    }

    #[test]
    fn empty_run_has_no_durations() {
        let report = RunReport::from(RunResult::new("t").finish(true));
        assert_eq!(report.trials, 0);
        assert!(report.mean_duration.is_none());
        assert!(report.passed);
    }

    #[tokio::test]
    async fn json_reporter_writes_one_line() {
        let report = RunReport::from(&sample());
        let reporter = JsonReporter::new(Vec::new());
        reporter.report(&report).await.unwrap();

        let written = String::from_utf8(reporter.into_inner().unwrap()).unwrap();
        assert_eq!(written.lines().count(), 1);
        let parsed: RunReport = serde_json::from_str(written.trim_end()).unwrap();
        assert_eq!(parsed, report);
    }

    #[tokio::test]
    async fn stdout_reporter_succeeds() {
        let report = RunReport::from(&sample());
        StdoutReporter.report(&report).await.unwrap();
    }
}
