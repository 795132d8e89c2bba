//! Delay distributions: pacing between consecutive invocations of a worker loop.
//!
//! A [`DelayDistribution`] produces the (non-negative) pause a worker loop takes before
//! each invocation except its first. Distributions are described by a
//! [`DistributionKind`] plus an ordered vector of numeric parameters, and validated once
//! when the [`DistributionSpec`] is built: a spec that exists can always be sampled.
//!
//! All parameters are expressed in **milliseconds**.
//!
//! | kind          | parameters        | delay                                   |
//! |---------------|-------------------|-----------------------------------------|
//! | `null`        | none              | always zero (the default)               |
//! | `constant`    | `[delay]`         | always `delay`                          |
//! | `uniform`     | `[min, max]`      | uniform draw from `[min, max]`          |
//! | `gaussian`    | `[mean, stddev]`  | normal draw, clamped at zero            |
//! | `exponential` | `[mean]`          | exponential draw with the given mean    |
//! | `poisson`     | `[mean]`          | poisson draw with the given mean        |
//!
//! Further kinds can be plugged in by name through a [`DistributionRegistry`]; the
//! scheduler only ever sees the resulting [`DistributionSpec`].
//!
//! Sampling uses the calling thread's own random source, so a spec can be shared by any
//! number of worker loops without locking.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use rand::distr::Uniform;
use rand_distr::{Distribution as _, Exp, Normal, Poisson};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Source of pacing delays.
///
/// Implementations must be callable concurrently from several worker loops.
pub trait DelayDistribution: Send + Sync + fmt::Debug {
    /// Draw the next delay.
    fn sample(&self) -> Duration;
}

/// Name of a delay distribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DistributionKind {
    Null,
    Constant,
    Uniform,
    Gaussian,
    Exponential,
    Poisson,
    /// A kind provided through a [`DistributionRegistry`].
    Custom(String),
}

impl DistributionKind {
    pub fn name(&self) -> &str {
        match self {
            Self::Null => "null",
            Self::Constant => "constant",
            Self::Uniform => "uniform",
            Self::Gaussian => "gaussian",
            Self::Exponential => "exponential",
            Self::Poisson => "poisson",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for DistributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for DistributionKind {
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "null" | "none" => Self::Null,
            "constant" => Self::Constant,
            "uniform" => Self::Uniform,
            "gaussian" | "normal" => Self::Gaussian,
            "exponential" => Self::Exponential,
            "poisson" => Self::Poisson,
            _ => Self::Custom(name.trim().to_string()),
        }
    }
}

impl From<String> for DistributionKind {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<DistributionKind> for String {
    fn from(kind: DistributionKind) -> Self {
        kind.name().to_string()
    }
}

/// A validated distribution: its kind, the parameters it was built from, and a ready
/// sampler.
#[derive(Debug, Clone)]
pub struct DistributionSpec {
    kind: DistributionKind,
    parameters: Vec<f64>,
    sampler: Arc<dyn DelayDistribution>,
}

impl DistributionSpec {
    /// Build one of the built-in kinds.
    ///
    /// Custom kinds must go through [`DistributionRegistry::build`].
    pub fn new(kind: DistributionKind, parameters: Vec<f64>) -> Result<Self, ConfigurationError> {
        let sampler = builtin(&kind, &parameters)?;
        Ok(Self {
            kind,
            parameters,
            sampler,
        })
    }

    /// The zero-delay default.
    pub fn null() -> Self {
        Self {
            kind: DistributionKind::Null,
            parameters: Vec::new(),
            sampler: Arc::new(NullDistribution),
        }
    }

    pub fn constant(delay: Duration) -> Result<Self, ConfigurationError> {
        Self::new(DistributionKind::Constant, vec![as_millis(delay)])
    }

    pub fn uniform(min: Duration, max: Duration) -> Result<Self, ConfigurationError> {
        Self::new(
            DistributionKind::Uniform,
            vec![as_millis(min), as_millis(max)],
        )
    }

    pub fn gaussian(mean: Duration, stddev: Duration) -> Result<Self, ConfigurationError> {
        Self::new(
            DistributionKind::Gaussian,
            vec![as_millis(mean), as_millis(stddev)],
        )
    }

    pub fn kind(&self) -> &DistributionKind {
        &self.kind
    }

    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    pub fn sample(&self) -> Duration {
        self.sampler.sample()
    }
}

impl Default for DistributionSpec {
    fn default() -> Self {
        Self::null()
    }
}

/// Builds a sampler from a parameter vector, validating it.
pub type DistributionFactory =
    Arc<dyn Fn(&[f64]) -> Result<Arc<dyn DelayDistribution>, ConfigurationError> + Send + Sync>;

/// Maps distribution names to factories.
///
/// [`DistributionRegistry::default`] knows every built-in kind; register more with
/// [`DistributionRegistry::register`].
///
/// # Example
/// ```rust
/// use std::{sync::Arc, time::Duration};
/// use cadence::distribution::{DelayDistribution, DistributionRegistry};
///
/// #[derive(Debug)]
/// struct Fixed(Duration);
///
/// impl DelayDistribution for Fixed {
///     fn sample(&self) -> Duration {
///         self.0
///     }
/// }
///
/// let mut registry = DistributionRegistry::default();
/// registry.register("fixed", |params: &[f64]| {
///     let ms = params.first().copied().unwrap_or(0.0);
///     Ok(Arc::new(Fixed(Duration::from_millis(ms as u64))) as Arc<dyn DelayDistribution>)
/// });
/// let spec = registry.build("fixed", vec![5.0]).unwrap();
/// assert_eq!(spec.sample(), Duration::from_millis(5));
/// ```
#[derive(Clone)]
pub struct DistributionRegistry {
    factories: HashMap<String, DistributionFactory>,
}

impl DistributionRegistry {
    /// A registry without any kinds, not even the built-ins.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&[f64]) -> Result<Arc<dyn DelayDistribution>, ConfigurationError>
            + Send
            + Sync
            + 'static,
    {
        let kind = DistributionKind::from(name);
        self.factories
            .insert(kind.name().to_string(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .contains_key(DistributionKind::from(name).name())
    }

    /// Build a spec for the kind registered under `name`.
    pub fn build(
        &self,
        name: &str,
        parameters: Vec<f64>,
    ) -> Result<DistributionSpec, ConfigurationError> {
        let kind = DistributionKind::from(name);
        let factory = self
            .factories
            .get(kind.name())
            .ok_or_else(|| ConfigurationError::UnknownDistribution(kind.name().to_string()))?;
        let sampler = factory(&parameters)?;
        Ok(DistributionSpec {
            kind,
            parameters,
            sampler,
        })
    }
}

impl Default for DistributionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for kind in [
            DistributionKind::Null,
            DistributionKind::Constant,
            DistributionKind::Uniform,
            DistributionKind::Gaussian,
            DistributionKind::Exponential,
            DistributionKind::Poisson,
        ] {
            let name = kind.name().to_string();
            registry.register(&name, move |params: &[f64]| builtin(&kind, params));
        }
        registry
    }
}

impl fmt::Debug for DistributionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("DistributionRegistry")
            .field("kinds", &names)
            .finish()
    }
}

fn builtin(
    kind: &DistributionKind,
    params: &[f64],
) -> Result<Arc<dyn DelayDistribution>, ConfigurationError> {
    if let Some(bad) = params.iter().find(|p| !p.is_finite()) {
        return Err(ConfigurationError::distribution(
            kind,
            format!("parameter {bad} is not finite"),
        ));
    }

    let sampler: Arc<dyn DelayDistribution> = match kind {
        DistributionKind::Null => {
            expect_len(kind, params, 0)?;
            Arc::new(NullDistribution)
        }
        DistributionKind::Constant => {
            expect_len(kind, params, 1)?;
            if params[0] < 0.0 {
                return Err(ConfigurationError::distribution(kind, "delay must be >= 0"));
            }
            Arc::new(ConstantDistribution {
                delay: from_millis(params[0]),
            })
        }
        DistributionKind::Uniform => {
            expect_len(kind, params, 2)?;
            let (min, max) = (params[0], params[1]);
            if min < 0.0 || max < 0.0 {
                return Err(ConfigurationError::distribution(kind, "bounds must be >= 0"));
            }
            if min > max {
                return Err(ConfigurationError::distribution(
                    kind,
                    format!("min {min} is greater than max {max}"),
                ));
            }
            let uniform = Uniform::new_inclusive(min, max)
                .map_err(|e| ConfigurationError::distribution(kind, e.to_string()))?;
            Arc::new(UniformDistribution { uniform })
        }
        DistributionKind::Gaussian => {
            expect_len(kind, params, 2)?;
            let (mean, stddev) = (params[0], params[1]);
            if stddev < 0.0 {
                return Err(ConfigurationError::distribution(kind, "stddev must be >= 0"));
            }
            let normal = Normal::new(mean, stddev)
                .map_err(|e| ConfigurationError::distribution(kind, e.to_string()))?;
            Arc::new(GaussianDistribution { normal })
        }
        DistributionKind::Exponential => {
            expect_len(kind, params, 1)?;
            if params[0] <= 0.0 {
                return Err(ConfigurationError::distribution(kind, "mean must be > 0"));
            }
            let exp = Exp::new(1.0 / params[0])
                .map_err(|e| ConfigurationError::distribution(kind, e.to_string()))?;
            Arc::new(ExponentialDistribution { exp })
        }
        DistributionKind::Poisson => {
            expect_len(kind, params, 1)?;
            if params[0] <= 0.0 {
                return Err(ConfigurationError::distribution(kind, "mean must be > 0"));
            }
            let poisson = Poisson::new(params[0])
                .map_err(|e| ConfigurationError::distribution(kind, e.to_string()))?;
            Arc::new(PoissonDistribution { poisson })
        }
        DistributionKind::Custom(name) => {
            return Err(ConfigurationError::UnknownDistribution(name.clone()));
        }
    };
    Ok(sampler)
}

fn expect_len(
    kind: &DistributionKind,
    params: &[f64],
    expected: usize,
) -> Result<(), ConfigurationError> {
    if params.len() != expected {
        return Err(ConfigurationError::distribution(
            kind,
            format!("expected {expected} parameters, got {}", params.len()),
        ));
    }
    Ok(())
}

/// Convert a (possibly negative) millisecond draw to a delay, clamping at zero.
fn from_millis(ms: f64) -> Duration {
    let nanos = (ms.max(0.0) * 1_000_000.0).round();
    if nanos >= u64::MAX as f64 {
        return Duration::from_nanos(u64::MAX);
    }
    Duration::from_nanos(nanos as u64)
}

fn as_millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullDistribution;

impl DelayDistribution for NullDistribution {
    fn sample(&self) -> Duration {
        Duration::ZERO
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantDistribution {
    delay: Duration,
}

impl DelayDistribution for ConstantDistribution {
    fn sample(&self) -> Duration {
        self.delay
    }
}

#[derive(Debug, Clone)]
pub struct UniformDistribution {
    uniform: Uniform<f64>,
}

impl DelayDistribution for UniformDistribution {
    fn sample(&self) -> Duration {
        from_millis(self.uniform.sample(&mut rand::rng()))
    }
}

/// Normal draws, clamped at zero since a negative pause is meaningless.
#[derive(Debug, Clone)]
pub struct GaussianDistribution {
    normal: Normal<f64>,
}

impl DelayDistribution for GaussianDistribution {
    fn sample(&self) -> Duration {
        from_millis(self.normal.sample(&mut rand::rng()))
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialDistribution {
    exp: Exp<f64>,
}

impl DelayDistribution for ExponentialDistribution {
    fn sample(&self) -> Duration {
        from_millis(self.exp.sample(&mut rand::rng()))
    }
}

#[derive(Debug, Clone)]
pub struct PoissonDistribution {
    poisson: Poisson<f64>,
}

impl DelayDistribution for PoissonDistribution {
    fn sample(&self) -> Duration {
        from_millis(self.poisson.sample(&mut rand::rng()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn null_is_always_zero() {
        let spec = DistributionSpec::default();
        assert_eq!(spec.kind(), &DistributionKind::Null);
        for _ in 0..100 {
            assert_eq!(spec.sample(), Duration::ZERO);
        }
    }

    #[test]
    fn null_rejects_parameters() {
        let err = DistributionSpec::new(DistributionKind::Null, vec![1.0]).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidDistribution { .. }));
    }

    #[test]
    fn constant_returns_its_delay() {
        let spec = DistributionSpec::constant(Duration::from_millis(7)).unwrap();
        assert_eq!(spec.sample(), Duration::from_millis(7));
        assert_eq!(spec.parameters(), &[7.0]);
    }

    #[test]
    fn uniform_validation() {
        assert!(DistributionSpec::new(DistributionKind::Uniform, vec![5.0, 1.0]).is_err());
        assert!(DistributionSpec::new(DistributionKind::Uniform, vec![-1.0, 1.0]).is_err());
        assert!(DistributionSpec::new(DistributionKind::Uniform, vec![1.0]).is_err());
        assert!(DistributionSpec::new(DistributionKind::Uniform, vec![0.0, f64::NAN]).is_err());
        assert!(DistributionSpec::new(DistributionKind::Uniform, vec![3.0, 3.0]).is_ok());
    }

    #[test]
    fn degenerate_uniform_is_constant() {
        let spec = DistributionSpec::new(DistributionKind::Uniform, vec![3.0, 3.0]).unwrap();
        assert_eq!(spec.sample(), Duration::from_millis(3));
    }

    #[test]
    fn gaussian_rejects_negative_stddev() {
        let err = DistributionSpec::new(DistributionKind::Gaussian, vec![10.0, -1.0]).unwrap_err();
        assert!(err.to_string().contains("stddev"));
    }

    #[test]
    fn gaussian_clamps_negative_draws() {
        // every draw lands far below zero
        let spec = DistributionSpec::new(DistributionKind::Gaussian, vec![-1_000.0, 1.0]).unwrap();
        for _ in 0..100 {
            assert_eq!(spec.sample(), Duration::ZERO);
        }
    }

    #[test]
    fn zero_stddev_gaussian_is_its_mean() {
        let spec = DistributionSpec::gaussian(Duration::from_millis(4), Duration::ZERO).unwrap();
        assert_eq!(spec.sample(), Duration::from_millis(4));
    }

    #[test]
    fn exponential_and_poisson_require_positive_mean() {
        assert!(DistributionSpec::new(DistributionKind::Exponential, vec![0.0]).is_err());
        assert!(DistributionSpec::new(DistributionKind::Poisson, vec![-2.0]).is_err());
        assert!(DistributionSpec::new(DistributionKind::Exponential, vec![2.0]).is_ok());
        assert!(DistributionSpec::new(DistributionKind::Poisson, vec![2.0]).is_ok());
    }

    #[test]
    fn custom_kind_needs_registry() {
        let kind = DistributionKind::from("zipf");
        assert_eq!(kind, DistributionKind::Custom("zipf".into()));
        let err = DistributionSpec::new(kind, vec![]).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownDistribution(name) if name == "zipf"));
    }

    #[test]
    fn kind_names_round_trip() {
        for name in ["null", "constant", "uniform", "gaussian", "exponential", "poisson"] {
            assert_eq!(DistributionKind::from(name).name(), name);
        }
        assert_eq!(DistributionKind::from("Normal"), DistributionKind::Gaussian);
        assert_eq!(DistributionKind::from(""), DistributionKind::Null);
    }

    mod registry {
        use super::*;

        #[derive(Debug)]
        struct Doubling(Duration);

        impl DelayDistribution for Doubling {
            fn sample(&self) -> Duration {
                self.0 * 2
            }
        }

        #[test]
        fn default_knows_builtins() {
            let registry = DistributionRegistry::default();
            for name in ["null", "constant", "uniform", "gaussian", "exponential", "poisson"] {
                assert!(registry.contains(name), "{name} missing");
            }
            let spec = registry.build("uniform", vec![1.0, 2.0]).unwrap();
            assert_eq!(spec.kind(), &DistributionKind::Uniform);
        }

        #[test]
        fn builtin_validation_applies() {
            let registry = DistributionRegistry::default();
            assert!(registry.build("gaussian", vec![1.0, -1.0]).is_err());
        }

        #[test]
        fn custom_kinds_can_be_registered() {
            let mut registry = DistributionRegistry::default();
            registry.register("doubling", |params: &[f64]| {
                let [ms] = params else {
                    return Err(ConfigurationError::distribution("doubling", "one parameter"));
                };
                Ok(Arc::new(Doubling(from_millis(*ms))) as Arc<dyn DelayDistribution>)
            });

            let spec = registry.build("doubling", vec![5.0]).unwrap();
            assert_eq!(spec.kind(), &DistributionKind::Custom("doubling".into()));
            assert_eq!(spec.sample(), Duration::from_millis(10));
            assert!(registry.build("doubling", vec![]).is_err());
        }

        #[test]
        fn unknown_kind() {
            let err = DistributionRegistry::empty().build("null", vec![]).unwrap_err();
            assert!(matches!(err, ConfigurationError::UnknownDistribution(_)));
        }
    }

    proptest! {
        #[test]
        fn uniform_draws_stay_in_bounds(min in 0.0f64..1_000.0, width in 0.0f64..1_000.0) {
            let max = min + width;
            let spec = DistributionSpec::new(DistributionKind::Uniform, vec![min, max]).unwrap();
            for _ in 0..16 {
                let ms = spec.sample().as_secs_f64() * 1_000.0;
                prop_assert!(ms >= min - 1e-3 && ms <= max + 1e-3);
            }
        }

        #[test]
        fn gaussian_construction_never_fails_for_valid_stddev(
            mean in -1_000.0f64..1_000.0,
            stddev in 0.0f64..500.0,
        ) {
            let spec = DistributionSpec::new(DistributionKind::Gaussian, vec![mean, stddev]);
            prop_assert!(spec.is_ok());
        }
    }
}
