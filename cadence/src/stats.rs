//! Historical baselines consumed by the baseline-relative requirement policies.
//!
//! Storing measurements is someone else's job: a host plugs its store in through
//! [`StatsProvider`]. During a run each test identity is fetched at most once and the
//! outcome, success or failure, is remembered until the run ends ([`BaselineCache`]).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::StatsUnavailable;

/// Window used when a scenario does not pick one.
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Mean and spread of past measurements of one test identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalStats {
    pub mean: Duration,
    pub stddev: Duration,
    pub sample_count: u64,
    pub window_days: u32,
}

impl HistoricalStats {
    pub fn new(mean: Duration, stddev: Duration) -> Self {
        Self {
            mean,
            stddev,
            sample_count: 0,
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

/// Supplies historical statistics for a test identity.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use async_trait::async_trait;
/// use cadence::{HistoricalStats, StatsProvider, StatsUnavailable};
///
/// struct Fixed;
///
/// #[async_trait]
/// impl StatsProvider for Fixed {
///     async fn fetch(&self, _: &str, window_days: u32) -> Result<HistoricalStats, StatsUnavailable> {
///         Ok(HistoricalStats {
///             mean: Duration::from_millis(100),
///             stddev: Duration::from_millis(10),
///             sample_count: 42,
///             window_days,
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait StatsProvider: Send + Sync {
    async fn fetch(
        &self,
        test_id: &str,
        window_days: u32,
    ) -> Result<HistoricalStats, StatsUnavailable>;
}

/// Provider for hosts without a measurement store: there is never a baseline.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBaseline;

#[async_trait]
impl StatsProvider for NoBaseline {
    async fn fetch(&self, test_id: &str, _: u32) -> Result<HistoricalStats, StatsUnavailable> {
        Err(StatsUnavailable::new(test_id, "no historical store configured"))
    }
}

type Slot = Arc<OnceCell<Result<HistoricalStats, StatsUnavailable>>>;

/// Per-run cache giving populate-once semantics per test identity.
///
/// The first caller for an identity performs the fetch; concurrent callers wait for it
/// and everyone after reuses the stored outcome.
pub struct BaselineCache {
    provider: Arc<dyn StatsProvider>,
    window_days: u32,
    slots: Mutex<HashMap<String, Slot>>,
}

impl BaselineCache {
    pub fn new(provider: Arc<dyn StatsProvider>, window_days: u32) -> Self {
        Self {
            provider,
            window_days,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, test_id: &str) -> Result<HistoricalStats, StatsUnavailable> {
        let slot = self.slot(test_id)?;
        slot.get_or_init(|| async {
            tracing::debug!("Fetching baseline for {test_id} ({} days)", self.window_days);
            let fetched = self.provider.fetch(test_id, self.window_days).await;
            if let Err(e) = &fetched {
                tracing::warn!("{e}");
            }
            fetched
        })
        .await
        .clone()
    }

    fn slot(&self, test_id: &str) -> Result<Slot, StatsUnavailable> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| StatsUnavailable::new(test_id, "baseline cache poisoned"))?;
        Ok(slots.entry(test_id.to_string()).or_default().clone())
    }
}
