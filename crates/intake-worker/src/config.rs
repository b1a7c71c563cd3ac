use std::collections::BTreeMap;
use std::time::Duration;

use intake_core::{Config, PipelineStage};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent `process` calls per stage.
    pub concurrency: usize,
    pub queue_capacity: usize,
    /// Extra attempts after the first one fails with a recoverable error.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub stage_timeouts: BTreeMap<PipelineStage, Duration>,
    /// Zero disables the stale sweep.
    pub stale_sweep_interval: Duration,
    pub stale_threshold_secs: i64,
    pub finalize_max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_capacity: 1024,
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
            stage_timeouts: PipelineStage::ALL
                .into_iter()
                .map(|stage| (stage, Duration::from_secs(60)))
                .collect(),
            stale_sweep_interval: Duration::from_secs(60),
            stale_threshold_secs: 300,
            finalize_max_attempts: 5,
        }
    }
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.worker_concurrency().max(1),
            queue_capacity: config.stage_queue_capacity().max(1),
            max_retries: config.stage_max_retries(),
            retry_delay: Duration::from_millis(config.stage_retry_delay_ms()),
            stage_timeouts: PipelineStage::ALL
                .into_iter()
                .map(|stage| (stage, Duration::from_secs(config.stage_timeout_secs(stage))))
                .collect(),
            stale_sweep_interval: Duration::from_secs(config.stale_sweep_interval_secs()),
            stale_threshold_secs: config.stale_record_threshold_secs(),
            finalize_max_attempts: config.finalize_max_attempts(),
        }
    }

    pub fn timeout_for(&self, stage: PipelineStage) -> Duration {
        self.stage_timeouts
            .get(&stage)
            .copied()
            .unwrap_or(Duration::from_secs(60))
    }
}
