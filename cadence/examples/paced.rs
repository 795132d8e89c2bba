use std::time::Duration;

use async_trait::async_trait;
use cadence::{
    Executor, HistoricalStats, Reporter, RequirementPolicy, RunReport, Scenario,
    ScheduleConfig, ScheduleExecutor, ScheduleOptions, StatsProvider, StatsUnavailable, StdoutReporter,
};
use rand::Rng;
use tracing_subscriber::EnvFilter;

// Stands in for whatever store keeps past measurements
struct FixedHistory;

#[async_trait]
impl StatsProvider for FixedHistory {
    async fn fetch(
        &self,
        _test_id: &str,
        window_days: u32,
    ) -> Result<HistoricalStats, StatsUnavailable> {
        Ok(HistoricalStats {
            mean: Duration::from_millis(12),
            stddev: Duration::from_millis(3),
            sample_count: 500,
            window_days,
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("cadence=info".parse().unwrap()))
        .init();

    let config: ScheduleConfig = ScheduleOptions::from_json(
        r#"{
            "invocations": 20,
            "warmup_invocations": 3,
            "threads": 4,
            "distribution": { "kind": "gaussian", "parameters": [5.0, 1.5] }
        }"#,
    )
    .unwrap()
    .try_into()
    .unwrap();

    let scenario = Scenario::builder()
        .test_id("com.example.Inventory.reserve")
        .action(|| async {
            // Pretend to talk to a service
            let latency = rand::rng().random_range(8..20);
            tokio::time::sleep(Duration::from_millis(latency)).await;
            Ok(())
        })
        .policies(vec![
            RequirementPolicy::fixed_threshold(Duration::from_millis(50)),
            RequirementPolicy::zscore_percentile(0.99).unwrap(),
            RequirementPolicy::percentage_degradation(60.0).unwrap(),
        ])
        .stats(std::sync::Arc::new(FixedHistory))
        .build();

    let result = ScheduleExecutor::new(config)
        .exec(&scenario)
        .await
        .unwrap();

    for violation in result.violations() {
        println!("{violation}");
    }

    StdoutReporter.report(&RunReport::from(&result)).await.unwrap();
}
