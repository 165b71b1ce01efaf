use serde::Serialize;

use crate::sample::DropCounters;

/// Recoverable-error and throughput counters of one engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineHealth {
    pub events_processed: u64,
    /// Out-of-order events and events a condition rejected.
    pub event_drops: DropCounters,
    pub metrics: Vec<MetricHealth>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricHealth {
    pub metric_id: String,
    pub active: bool,
    pub samples_accepted: u64,
    pub drops: DropCounters,
    pub buckets_emitted: u64,
    pub skipped_emitted: u64,
    pub alerts_emitted: u64,
    pub events_emitted: u64,
}

impl EngineHealth {
    /// Engine-level and per-metric drops merged.
    pub fn total_drops(&self) -> DropCounters {
        let mut all = self.event_drops.clone();
        for m in &self.metrics {
            all.merge(&m.drops);
        }
        all
    }

    pub fn metric(&self, metric_id: &str) -> Option<&MetricHealth> {
        self.metrics.iter().find(|m| m.metric_id == metric_id)
    }
}
