use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// Knobs of the async host. Every field has a default so `[runtime]` may be
/// omitted.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of each pipeline's bounded event queue.
    pub pipeline_queue: usize,
    /// Capacity of the bounded queue between pipelines and the output task.
    pub output_queue: usize,
    /// Default cap on distinct dimension keys per condition and per metric.
    pub dimension_hard_limit: usize,
    /// Engine start time in nanoseconds. Unactivated metrics align their
    /// bucket grid here. When absent the first event's timestamp is used.
    pub start_time: Option<i64>,
    /// Wall-clock cadence of eager timer ticks in live mode.
    pub tick_interval: HumanDuration,
    pub sink_retry: SinkRetryConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pipeline_queue: 1024,
            output_queue: 256,
            dimension_hard_limit: 800,
            start_time: None,
            tick_interval: HumanDuration::from(std::time::Duration::from_secs(1)),
            sink_retry: SinkRetryConfig::default(),
        }
    }
}

/// Bounded exponential backoff for rejected sink writes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkRetryConfig {
    /// Total attempts per record, including the first.
    pub max_attempts: u32,
    pub initial_backoff: HumanDuration,
    pub max_backoff: HumanDuration,
}

impl Default for SinkRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: HumanDuration::from(std::time::Duration::from_millis(10)),
            max_backoff: HumanDuration::from(std::time::Duration::from_secs(1)),
        }
    }
}
