//! Schedule configuration.
//!
//! [`ScheduleOptions`] is the raw, declarative surface a host fills in from its own
//! metadata (every field has the documented default). Converting it into a
//! [`ScheduleConfig`] validates it; a `ScheduleConfig` that exists is valid.
//!
//! Counts are per worker loop: every one of the `threads` loops runs
//! `warmup_invocations + invocations` iterations.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    distribution::{DistributionRegistry, DistributionSpec},
    error::ConfigurationError,
};

pub const INVOCATIONS_DEFAULT: usize = 1;
pub const WARMUP_INVOCATIONS_DEFAULT: usize = 0;
pub const THREADS_DEFAULT: usize = 1;

/// Distribution name plus parameters (milliseconds), before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct DistributionOptions {
    #[builder(setter(into), default = String::from("null"))]
    pub kind: String,
    #[builder(default)]
    pub parameters: Vec<f64>,
}

impl Default for DistributionOptions {
    fn default() -> Self {
        Self {
            kind: String::from("null"),
            parameters: Vec::new(),
        }
    }
}

/// How a test should be invoked.
///
/// ```rust
/// use cadence::config::{DistributionOptions, ScheduleConfig, ScheduleOptions};
///
/// let config = ScheduleConfig::try_from(
///     ScheduleOptions::builder()
///         .invocations(30)
///         .threads(10)
///         .distribution(
///             DistributionOptions::builder()
///                 .kind("uniform")
///                 .parameters(vec![5.0, 15.0])
///                 .build(),
///         )
///         .build(),
/// )
/// .unwrap();
/// assert_eq!(config.total_invocations(), 300);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct ScheduleOptions {
    /// Measured invocations per worker loop.
    #[builder(default = INVOCATIONS_DEFAULT)]
    pub invocations: usize,
    /// Unmeasured invocations run by each worker loop before its measured ones.
    #[builder(default = WARMUP_INVOCATIONS_DEFAULT)]
    pub warmup_invocations: usize,
    /// Number of concurrent worker loops.
    #[builder(default = THREADS_DEFAULT)]
    pub threads: usize,
    #[builder(default)]
    pub distribution: DistributionOptions,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            invocations: INVOCATIONS_DEFAULT,
            warmup_invocations: WARMUP_INVOCATIONS_DEFAULT,
            threads: THREADS_DEFAULT,
            distribution: DistributionOptions::default(),
        }
    }
}

impl ScheduleOptions {
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validate, resolving the distribution through `registry`.
    pub fn into_config_with(
        self,
        registry: &DistributionRegistry,
    ) -> Result<ScheduleConfig, ConfigurationError> {
        let distribution =
            registry.build(&self.distribution.kind, self.distribution.parameters)?;
        ScheduleConfig::new(
            self.invocations,
            self.warmup_invocations,
            self.threads,
            distribution,
        )
    }
}

impl TryFrom<ScheduleOptions> for ScheduleConfig {
    type Error = ConfigurationError;

    fn try_from(options: ScheduleOptions) -> Result<Self, Self::Error> {
        options.into_config_with(&DistributionRegistry::default())
    }
}

/// Validated schedule. Read-only once built.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    invocations: usize,
    warmup_invocations: usize,
    threads: usize,
    distribution: DistributionSpec,
}

impl ScheduleConfig {
    pub fn new(
        invocations: usize,
        warmup_invocations: usize,
        threads: usize,
        distribution: DistributionSpec,
    ) -> Result<Self, ConfigurationError> {
        let config = Self {
            invocations,
            warmup_invocations,
            threads,
            distribution,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.invocations < 1 {
            return Err(ConfigurationError::InvalidInvocations(self.invocations));
        }
        if self.threads < 1 {
            return Err(ConfigurationError::InvalidThreads(self.threads));
        }
        self.warmup_invocations
            .checked_add(self.invocations)
            .and_then(|per_thread| per_thread.checked_mul(self.threads))
            .ok_or(ConfigurationError::TooManyInvocations {
                invocations: self.invocations,
                warmup_invocations: self.warmup_invocations,
                threads: self.threads,
            })?;
        Ok(())
    }

    pub fn invocations(&self) -> usize {
        self.invocations
    }

    pub fn warmup_invocations(&self) -> usize {
        self.warmup_invocations
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn distribution(&self) -> &DistributionSpec {
        &self.distribution
    }

    /// Iterations each worker loop runs. Cannot overflow once validated.
    pub fn iterations_per_thread(&self) -> usize {
        self.warmup_invocations + self.invocations
    }

    /// Invocations across all worker loops, warmups included.
    pub fn total_invocations(&self) -> usize {
        self.iterations_per_thread() * self.threads
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            invocations: INVOCATIONS_DEFAULT,
            warmup_invocations: WARMUP_INVOCATIONS_DEFAULT,
            threads: THREADS_DEFAULT,
            distribution: DistributionSpec::null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::DistributionKind;

    #[test]
    fn defaults() {
        let config = ScheduleConfig::try_from(ScheduleOptions::default()).unwrap();
        assert_eq!(config.invocations(), 1);
        assert_eq!(config.warmup_invocations(), 0);
        assert_eq!(config.threads(), 1);
        assert_eq!(config.distribution().kind(), &DistributionKind::Null);
    }

    #[test]
    fn rejects_zero_invocations() {
        let err = ScheduleConfig::new(0, 3, 1, DistributionSpec::null()).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidInvocations(0)));
    }

    #[test]
    fn rejects_zero_threads() {
        let err = ScheduleConfig::new(1, 0, 0, DistributionSpec::null()).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidThreads(0)));
    }

    #[test]
    fn rejects_overflowing_iterations() {
        let err = ScheduleConfig::new(1, usize::MAX, 1, DistributionSpec::null()).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::TooManyInvocations {
                warmup_invocations: usize::MAX,
                ..
            }
        ));
    }

    #[test]
    fn rejects_overflowing_total() {
        let err =
            ScheduleConfig::new(usize::MAX / 2, 0, 3, DistributionSpec::null()).unwrap_err();
        assert!(matches!(err, ConfigurationError::TooManyInvocations { threads: 3, .. }));
    }

    #[test]
    fn largest_schedule_is_accepted() {
        let config = ScheduleConfig::new(usize::MAX - 1, 1, 1, DistributionSpec::null()).unwrap();
        assert_eq!(config.total_invocations(), usize::MAX);
    }

    #[test]
    fn per_thread_counts() {
        let config = ScheduleConfig::new(4, 2, 3, DistributionSpec::null()).unwrap();
        assert_eq!(config.iterations_per_thread(), 6);
        assert_eq!(config.total_invocations(), 18);
    }

    #[test]
    fn from_json_fills_defaults() {
        let options = ScheduleOptions::from_json(r#"{"threads": 4}"#).unwrap();
        assert_eq!(options.threads, 4);
        assert_eq!(options.invocations, INVOCATIONS_DEFAULT);
        assert_eq!(options.distribution, DistributionOptions::default());
    }

    #[test]
    fn from_json_with_distribution() {
        let options = ScheduleOptions::from_json(
            r#"{"invocations": 5, "distribution": {"kind": "gaussian", "parameters": [10.0, 2.0]}}"#,
        )
        .unwrap();
        let config = ScheduleConfig::try_from(options).unwrap();
        assert_eq!(config.distribution().kind(), &DistributionKind::Gaussian);
        assert_eq!(config.distribution().parameters(), &[10.0, 2.0]);
    }

    #[test]
    fn invalid_distribution_fails_conversion() {
        let options = ScheduleOptions::builder()
            .distribution(
                DistributionOptions::builder()
                    .kind("gaussian")
                    .parameters(vec![10.0, -2.0])
                    .build(),
            )
            .build();
        assert!(ScheduleConfig::try_from(options).is_err());
    }

    #[test]
    fn negative_counts_are_parse_errors() {
        let err = ScheduleOptions::from_json(r#"{"warmup_invocations": -1}"#).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidOptions(_)));
    }
}
