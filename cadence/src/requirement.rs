//! Requirement policies: pass/fail rules applied to measured response times.
//!
//! A [`RequirementPolicy`] is a pure predicate over one trial's duration and, for the
//! baseline-relative variants, the [`HistoricalStats`] of the test identity. The same
//! inputs always produce the same [`PolicyVerdict`].
//!
//! - [`RequirementPolicy::FixedThreshold`]: `duration <= max_response_time`.
//! - [`RequirementPolicy::ZScorePercentile`]: the standard normal CDF of
//!   `z = (duration - mean) / stddev` must not exceed `percentile`.
//! - [`RequirementPolicy::PercentageDegradation`]:
//!   `duration <= mean * (1 + percentage / 100)`.
//!
//! When a baseline-relative policy has no baseline to compare against it passes, with a
//! detail saying so; lacking history never fails a run.
//!
//! The z-score policy behaves poorly on very stable measurements with little variance.
//! With a zero stddev it degrades to `duration <= mean`.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigurationError, stats::HistoricalStats};

/// Environment variable overriding [`RequirementDefaults::zscore_percentile`].
pub const ZSCORE_PERCENTILE_ENV: &str = "CADENCE_ZSCORE_PERCENTILE_THRESHOLD";
/// Environment variable overriding [`RequirementDefaults::percentage_degradation`].
pub const PERCENTAGE_DEGRADATION_ENV: &str = "CADENCE_PERCENTAGE_DEGRADATION_THRESHOLD";

const NO_BASELINE: &str = "no baseline available";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequirementPolicy {
    FixedThreshold { max_response_time: Duration },
    ZScorePercentile { percentile: f64 },
    PercentageDegradation { percentage: f64 },
}

impl RequirementPolicy {
    pub fn fixed_threshold(max_response_time: Duration) -> Self {
        Self::FixedThreshold { max_response_time }
    }

    /// Fixed threshold expressed as a value in `unit`.
    pub fn max_response_time(value: f64, unit: TimeUnit) -> Result<Self, ConfigurationError> {
        Ok(Self::fixed_threshold(unit.duration(value)?))
    }

    pub fn zscore_percentile(percentile: f64) -> Result<Self, ConfigurationError> {
        let policy = Self::ZScorePercentile { percentile };
        policy.validate()?;
        Ok(policy)
    }

    pub fn percentage_degradation(percentage: f64) -> Result<Self, ConfigurationError> {
        let policy = Self::PercentageDegradation { percentage };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match *self {
            Self::FixedThreshold { .. } => Ok(()),
            Self::ZScorePercentile { percentile } => {
                if percentile.is_finite() && percentile > 0.0 && percentile < 1.0 {
                    Ok(())
                } else {
                    Err(ConfigurationError::InvalidRequirement(format!(
                        "percentile must be in (0, 1), got {percentile}"
                    )))
                }
            }
            Self::PercentageDegradation { percentage } => {
                if percentage.is_finite() && percentage > 0.0 {
                    Ok(())
                } else {
                    Err(ConfigurationError::InvalidRequirement(format!(
                        "percentage must be > 0, got {percentage}"
                    )))
                }
            }
        }
    }

    /// Whether evaluating this policy needs historical statistics.
    pub fn needs_baseline(&self) -> bool {
        !matches!(self, Self::FixedThreshold { .. })
    }

    /// Judge one measured duration.
    ///
    /// `baseline` is only consulted by the baseline-relative variants; `None` makes them
    /// pass with a "no baseline available" detail.
    pub fn evaluate(&self, duration: Duration, baseline: Option<&HistoricalStats>) -> PolicyVerdict {
        let (passed, detail) = match (*self, baseline) {
            (Self::FixedThreshold { max_response_time }, _) => {
                let passed = duration <= max_response_time;
                let op = if passed { "<=" } else { ">" };
                (passed, format!("{duration:?} {op} {max_response_time:?}"))
            }
            (Self::ZScorePercentile { percentile }, Some(stats)) => {
                let p = zscore_probability(duration, stats);
                (
                    p <= percentile,
                    format!("percentile {p:.4} against threshold {percentile}"),
                )
            }
            (Self::PercentageDegradation { percentage }, Some(stats)) => {
                // scaled by 100 on both sides so integral percentages compare exactly
                let scaled_limit = stats.mean.as_nanos() as f64 * (100.0 + percentage);
                let passed = duration.as_nanos() as f64 * 100.0 <= scaled_limit;
                (
                    passed,
                    format!(
                        "{duration:?} against limit {:.3}ms (mean {:?} +{percentage}%)",
                        scaled_limit / 1e8,
                        stats.mean
                    ),
                )
            }
            (_, None) => (true, NO_BASELINE.to_string()),
        };

        PolicyVerdict {
            policy: *self,
            passed,
            detail,
        }
    }
}

impl fmt::Display for RequirementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedThreshold { max_response_time } => {
                write!(f, "fixed threshold {max_response_time:?}")
            }
            Self::ZScorePercentile { percentile } => write!(f, "z-score percentile {percentile}"),
            Self::PercentageDegradation { percentage } => {
                write!(f, "percentage degradation {percentage}%")
            }
        }
    }
}

/// Outcome of one policy against one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub policy: RequirementPolicy,
    pub passed: bool,
    pub detail: String,
}

impl PolicyVerdict {
    /// True when the verdict passed only because there was nothing to compare against.
    pub fn without_baseline(&self) -> bool {
        self.detail == NO_BASELINE
    }
}

/// Probability mass of the baseline's normal distribution at or below `duration`.
///
/// A zero stddev is a step: 0 up to and including the mean, 1 above it.
pub fn zscore_probability(duration: Duration, stats: &HistoricalStats) -> f64 {
    let value = duration.as_secs_f64();
    let mean = stats.mean.as_secs_f64();
    if stats.stddev.is_zero() {
        return if value <= mean { 0.0 } else { 1.0 };
    }
    normal_cdf((value - mean) / stats.stddev.as_secs_f64())
}

/// Standard normal CDF (Abramowitz & Stegun 26.2.17, |error| < 7.5e-8).
pub fn normal_cdf(x: f64) -> f64 {
    if x < -8.0 {
        return 0.0;
    }
    if x > 8.0 {
        return 1.0;
    }
    let t = 1.0 / (1.0 + 0.231_641_9 * x.abs());
    let d = 0.398_942_280_401_432_7; // 1/sqrt(2*pi)
    let p = d
        * (-x * x / 2.0).exp()
        * (t * (0.319_381_530
            + t * (-0.356_563_782 + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429)))));
    if x > 0.0 { 1.0 - p } else { p }
}

/// Unit a fixed threshold value is expressed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
}

impl TimeUnit {
    pub fn duration(self, value: f64) -> Result<Duration, ConfigurationError> {
        let secs = match self {
            Self::Nanoseconds => value / 1e9,
            Self::Microseconds => value / 1e6,
            Self::Milliseconds => value / 1e3,
            Self::Seconds => value,
            Self::Minutes => value * 60.0,
        };
        Duration::try_from_secs_f64(secs).map_err(|e| {
            ConfigurationError::InvalidRequirement(format!("max response time {value}: {e}"))
        })
    }
}

/// Declarative requirement surface, as read from a host's test metadata.
///
/// A `max_response_time` of zero means no fixed threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementOptions {
    pub max_response_time: Option<f64>,
    pub time_unit: TimeUnit,
    pub zscore_percentile: Option<f64>,
    pub percentage_degradation: Option<f64>,
}

impl RequirementOptions {
    pub fn into_policies(self) -> Result<Vec<RequirementPolicy>, ConfigurationError> {
        let mut policies = Vec::new();
        if let Some(max) = self.max_response_time.filter(|max| *max != 0.0) {
            policies.push(RequirementPolicy::max_response_time(max, self.time_unit)?);
        }
        if let Some(percentile) = self.zscore_percentile {
            policies.push(RequirementPolicy::zscore_percentile(percentile)?);
        }
        if let Some(percentage) = self.percentage_degradation {
            policies.push(RequirementPolicy::percentage_degradation(percentage)?);
        }
        Ok(policies)
    }
}

/// Thresholds used when a baseline-relative requirement is requested without a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequirementDefaults {
    pub zscore_percentile: f64,
    pub percentage_degradation: f64,
}

impl Default for RequirementDefaults {
    fn default() -> Self {
        Self {
            zscore_percentile: 0.99,
            percentage_degradation: 20.0,
        }
    }
}

impl RequirementDefaults {
    /// Read overrides from [`ZSCORE_PERCENTILE_ENV`] and [`PERCENTAGE_DEGRADATION_ENV`].
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let mut defaults = Self::default();
        if let Some(raw) = lookup(ZSCORE_PERCENTILE_ENV) {
            defaults.zscore_percentile = parse(ZSCORE_PERCENTILE_ENV, &raw)?;
        }
        if let Some(raw) = lookup(PERCENTAGE_DEGRADATION_ENV) {
            defaults.percentage_degradation = parse(PERCENTAGE_DEGRADATION_ENV, &raw)?;
        }
        defaults.zscore()?;
        defaults.degradation()?;
        Ok(defaults)
    }

    pub fn zscore(&self) -> Result<RequirementPolicy, ConfigurationError> {
        RequirementPolicy::zscore_percentile(self.zscore_percentile)
    }

    pub fn degradation(&self) -> Result<RequirementPolicy, ConfigurationError> {
        RequirementPolicy::percentage_degradation(self.percentage_degradation)
    }
}

fn parse(key: &str, raw: &str) -> Result<f64, ConfigurationError> {
    raw.trim()
        .parse()
        .map_err(|e| ConfigurationError::InvalidRequirement(format!("{key}={raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn baseline() -> HistoricalStats {
        HistoricalStats::new(ms(100), ms(10))
    }

    mod fixed_threshold {
        use super::*;

        #[test]
        fn under_and_over() {
            let policy = RequirementPolicy::fixed_threshold(Duration::from_secs(10));
            assert!(policy.evaluate(Duration::from_secs(9), None).passed);
            assert!(!policy.evaluate(Duration::from_secs(11), None).passed);
        }

        #[test]
        fn boundary_passes() {
            let policy = RequirementPolicy::fixed_threshold(ms(10));
            assert!(policy.evaluate(ms(10), None).passed);
        }

        #[test]
        fn ignores_baseline() {
            let policy = RequirementPolicy::fixed_threshold(ms(10));
            assert!(!policy.needs_baseline());
            let verdict = policy.evaluate(ms(50), Some(&baseline()));
            assert!(!verdict.passed);
            assert!(!verdict.without_baseline());
        }

        #[test]
        fn from_time_unit() {
            let policy = RequirementPolicy::max_response_time(1.5, TimeUnit::Seconds).unwrap();
            assert_eq!(policy, RequirementPolicy::fixed_threshold(ms(1_500)));
            assert!(RequirementPolicy::max_response_time(-1.0, TimeUnit::Seconds).is_err());
        }
    }

    mod zscore {
        use super::*;

        #[test]
        fn at_mean_passes() {
            let policy = RequirementPolicy::zscore_percentile(0.95).unwrap();
            let verdict = policy.evaluate(ms(100), Some(&baseline()));
            assert!(verdict.passed);
            assert!((zscore_probability(ms(100), &baseline()) - 0.5).abs() < 1e-6);
        }

        #[test]
        fn three_sigma_fails() {
            let policy = RequirementPolicy::zscore_percentile(0.95).unwrap();
            let p = zscore_probability(ms(130), &baseline());
            assert!((p - 0.99865).abs() < 1e-4);
            assert!(!policy.evaluate(ms(130), Some(&baseline())).passed);
        }

        #[test]
        fn zero_stddev_is_a_step() {
            let flat = HistoricalStats::new(ms(100), Duration::ZERO);
            let policy = RequirementPolicy::zscore_percentile(0.5).unwrap();
            assert_eq!(zscore_probability(ms(100), &flat), 0.0);
            assert_eq!(zscore_probability(ms(101), &flat), 1.0);
            assert!(policy.evaluate(ms(100), Some(&flat)).passed);
            assert!(!policy.evaluate(ms(101), Some(&flat)).passed);
        }

        #[test]
        fn missing_baseline_passes() {
            let policy = RequirementPolicy::zscore_percentile(0.95).unwrap();
            let verdict = policy.evaluate(Duration::from_secs(3_600), None);
            assert!(verdict.passed);
            assert!(verdict.without_baseline());
        }

        #[test]
        fn percentile_range() {
            for bad in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
                assert!(RequirementPolicy::zscore_percentile(bad).is_err(), "{bad}");
            }
        }
    }

    mod degradation {
        use super::*;

        #[test]
        fn twenty_percent() {
            let policy = RequirementPolicy::percentage_degradation(20.0).unwrap();
            assert!(policy.evaluate(ms(115), Some(&baseline())).passed);
            assert!(!policy.evaluate(ms(125), Some(&baseline())).passed);
        }

        #[test]
        fn exact_limit_passes() {
            let policy = RequirementPolicy::percentage_degradation(40.0).unwrap();
            let verdict = policy.evaluate(ms(140), Some(&baseline()));
            assert!(verdict.passed, "{}", verdict.detail);
            assert!(policy.evaluate(ms(120), Some(&baseline())).passed);
            assert!(!policy.evaluate(ms(140) + Duration::from_nanos(1), Some(&baseline())).passed);
        }

        #[test]
        fn exact_limit_passes_for_every_integral_percentage() {
            for mean_ms in 1..500u64 {
                let stats = HistoricalStats::new(ms(mean_ms), ms(1));
                for percentage in 1..200u64 {
                    let policy =
                        RequirementPolicy::percentage_degradation(percentage as f64).unwrap();
                    let limit = Duration::from_nanos(mean_ms * 10_000 * (100 + percentage));
                    assert!(
                        policy.evaluate(limit, Some(&stats)).passed,
                        "mean {mean_ms}ms +{percentage}%"
                    );
                    assert!(
                        !policy
                            .evaluate(limit + Duration::from_nanos(1), Some(&stats))
                            .passed
                    );
                }
            }
        }

        #[test]
        fn must_be_positive() {
            assert!(RequirementPolicy::percentage_degradation(0.0).is_err());
            assert!(RequirementPolicy::percentage_degradation(-5.0).is_err());
        }

        #[test]
        fn missing_baseline_passes() {
            let policy = RequirementPolicy::percentage_degradation(1.0).unwrap();
            assert!(policy.needs_baseline());
            assert!(policy.evaluate(Duration::from_secs(60), None).passed);
        }
    }

    #[test]
    fn normal_cdf_shape() {
        assert_eq!(normal_cdf(-9.0), 0.0);
        assert_eq!(normal_cdf(9.0), 1.0);
        assert!((normal_cdf(1.0) - 0.841_344_7).abs() < 1e-6);
        assert!((normal_cdf(-1.0) - 0.158_655_3).abs() < 1e-6);
        assert!((normal_cdf(1.644_853_6) - 0.95).abs() < 1e-6);
    }

    #[test]
    fn options_into_policies() {
        let options: RequirementOptions = serde_json::from_str(
            r#"{"max_response_time": 250, "time_unit": "milliseconds", "zscore_percentile": 0.9}"#,
        )
        .unwrap();
        let policies = options.into_policies().unwrap();
        assert_eq!(
            policies,
            vec![
                RequirementPolicy::fixed_threshold(ms(250)),
                RequirementPolicy::ZScorePercentile { percentile: 0.9 },
            ]
        );
    }

    #[test]
    fn zero_max_response_time_means_none() {
        let options = RequirementOptions {
            max_response_time: Some(0.0),
            ..Default::default()
        };
        assert!(options.into_policies().unwrap().is_empty());
    }

    #[test]
    fn invalid_options_are_rejected() {
        let options = RequirementOptions {
            zscore_percentile: Some(95.0),
            ..Default::default()
        };
        assert!(options.into_policies().is_err());
    }

    #[test]
    fn defaults_from_lookup() {
        let defaults = RequirementDefaults::from_lookup(|key| {
            (key == PERCENTAGE_DEGRADATION_ENV).then(|| " 35 ".to_string())
        })
        .unwrap();
        assert_eq!(defaults.zscore_percentile, 0.99);
        assert_eq!(defaults.percentage_degradation, 35.0);

        let bad = RequirementDefaults::from_lookup(|key| {
            (key == ZSCORE_PERCENTILE_ENV).then(|| "high".to_string())
        });
        assert!(bad.is_err());
    }

    #[test]
    fn policies_serialize_tagged() {
        let json = serde_json::to_value(RequirementPolicy::PercentageDegradation {
            percentage: 10.0,
        })
        .unwrap();
        assert_eq!(json["kind"], "percentage_degradation");
    }

    proptest! {
        #[test]
        fn evaluation_is_deterministic(
            duration_ms in 0u64..10_000,
            mean_ms in 0u64..10_000,
            stddev_ms in 0u64..1_000,
            percentile in 0.01f64..0.99,
            percentage in 0.1f64..500.0,
        ) {
            let stats = HistoricalStats::new(ms(mean_ms), ms(stddev_ms));
            let policies = [
                RequirementPolicy::fixed_threshold(ms(mean_ms)),
                RequirementPolicy::zscore_percentile(percentile).unwrap(),
                RequirementPolicy::percentage_degradation(percentage).unwrap(),
            ];
            for policy in policies {
                let a = policy.evaluate(ms(duration_ms), Some(&stats));
                let b = policy.evaluate(ms(duration_ms), Some(&stats));
                prop_assert_eq!(a, b);
            }
        }

        #[test]
        fn cdf_is_a_probability(x in -20.0f64..20.0) {
            let p = normal_cdf(x);
            prop_assert!((0.0..=1.0).contains(&p));
        }
    }
}
