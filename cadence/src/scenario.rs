use std::{
    fmt,
    future::Future,
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use typed_builder::TypedBuilder;

use crate::{
    cancel::CancelSignal,
    error::BoxError,
    record::MeasurementRecord,
    requirement::RequirementPolicy,
    stats::{DEFAULT_WINDOW_DAYS, NoBaseline, StatsProvider},
};

/// Stable identity of a unit of work across runs, typically the fully qualified name of
/// the test. Historical baselines are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Disambiguate one repetition of the same test.
    pub fn with_repetition(&self, repetition: usize) -> Self {
        Self(format!("{}[{repetition}]", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

type Hook = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// Teardown run exactly once per run, after every worker loop is done.
#[derive(Default)]
pub struct AfterOnce(Mutex<Option<Hook>>);

impl AfterOnce {
    pub fn new(hook: impl FnOnce() -> Result<(), BoxError> + Send + 'static) -> Self {
        Self(Mutex::new(Some(Box::new(hook))))
    }

    /// Take the hook out; later calls get `None`.
    pub(crate) fn take(&self) -> Option<Hook> {
        self.0.lock().ok().and_then(|mut hook| hook.take())
    }
}

/// A `Scenario` is what gets scheduled: a test identity, the action measured on every
/// invocation, and the requirements its trials are judged against.
///
/// The action is stored once and shared by every worker loop; nothing is cloned or
/// isolated per thread. Any state the action captures is touched concurrently when the
/// schedule uses more than one thread, and synchronizing it is up to the caller.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use cadence::{RequirementPolicy, Scenario};
///
/// let scenario = Scenario::builder()
///     .test_id("com.example.Checkout.submit")
///     .action(|| async {
///         tokio::time::sleep(Duration::from_millis(1)).await;
///         Ok(())
///     })
///     .policies(vec![RequirementPolicy::fixed_threshold(Duration::from_secs(1))])
///     .build();
/// assert_eq!(scenario.test_id.as_str(), "com.example.Checkout.submit");
/// ```
#[derive(TypedBuilder)]
pub struct Scenario<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    #[builder(setter(into))]
    pub test_id: TestId,
    /// The unit of work. One call is one invocation.
    #[builder(setter(transform = |action: F| Arc::new(action)))]
    pub action: Arc<F>,
    /// Every policy must pass on every trial for the run to pass.
    #[builder(default)]
    pub policies: Vec<RequirementPolicy>,
    /// Source of baselines for the baseline-relative policies.
    #[builder(default = Arc::new(NoBaseline))]
    pub stats: Arc<dyn StatsProvider>,
    #[builder(default = DEFAULT_WINDOW_DAYS)]
    pub baseline_window_days: u32,
    /// When false, verdicts are still recorded but never fail the run.
    #[builder(default = true)]
    pub verify_response_time: bool,
    #[builder(default)]
    pub cancel: CancelSignal,
    /// Receives a copy of every record as soon as it is created.
    #[builder(default, setter(strip_option))]
    pub record_sink: Option<mpsc::UnboundedSender<MeasurementRecord>>,
    #[builder(default)]
    pub after_once: AfterOnce,
    #[builder(default, setter(skip))]
    output: PhantomData<fn() -> Fut>,
}

impl<F, Fut> Scenario<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    /// Whether any attached policy needs historical statistics.
    pub fn needs_baseline(&self) -> bool {
        self.policies.iter().any(RequirementPolicy::needs_baseline)
    }
}
