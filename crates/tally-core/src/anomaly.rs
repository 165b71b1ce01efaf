//! Sum-over-recent-buckets anomaly detection on a metric's output.

use std::collections::{HashMap, VecDeque};

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tally_config::AlertDef;

use crate::dimension::DimensionKey;

/// Fired when a dimension's value summed over the last `num_buckets`
/// buckets exceeds the alert threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    /// SHA-256 content hash (16 hex) of alert, metric, dimension and bucket.
    pub record_id: String,
    pub alert_id: String,
    pub metric_id: String,
    pub dimension: DimensionKey,
    pub bucket_num: u64,
    pub window_sum: f64,
    pub threshold: f64,
    pub fired_at_nanos: i64,
    /// RFC 3339 UTC rendering of `fired_at_nanos`.
    pub fired_at: String,
}

#[derive(Debug)]
pub struct AnomalyTracker {
    alert_id: String,
    metric_id: String,
    /// Past buckets kept besides the current one.
    past_len: usize,
    threshold: f64,
    refractory_nanos: i64,
    past: VecDeque<(u64, HashMap<DimensionKey, f64>)>,
    /// Retained sum per key, with the number of retained buckets holding it.
    past_sums: HashMap<DimensionKey, (f64, usize)>,
    refractory_until: HashMap<DimensionKey, i64>,
}

impl AnomalyTracker {
    pub fn new(def: &AlertDef) -> Self {
        Self {
            alert_id: def.id.clone(),
            metric_id: def.metric.clone(),
            past_len: def.num_buckets.saturating_sub(1),
            threshold: def.trigger_if_sum_gt,
            refractory_nanos: def
                .refractory_period
                .map(|p| p.as_nanos_i64())
                .unwrap_or(0),
            past: VecDeque::new(),
            past_sums: HashMap::new(),
            refractory_until: HashMap::new(),
        }
    }

    /// Feed one flushed bucket. Buckets must arrive in increasing `bucket_num`.
    pub fn on_bucket(
        &mut self,
        bucket_num: u64,
        fired_at: i64,
        rows: &[(DimensionKey, f64)],
    ) -> Vec<AlertRecord> {
        let oldest_kept = bucket_num.saturating_sub(self.past_len as u64);
        while self.past.front().is_some_and(|(num, _)| *num < oldest_kept) {
            if let Some((_, values)) = self.past.pop_front() {
                self.forget(values);
            }
        }

        let mut alerts = Vec::new();
        for (key, value) in rows {
            let window_sum = self.past_sum(key) + value;
            if window_sum <= self.threshold {
                continue;
            }
            if self
                .refractory_until
                .get(key)
                .is_some_and(|&until| fired_at < until)
            {
                continue;
            }
            self.refractory_until
                .insert(key.clone(), fired_at.saturating_add(self.refractory_nanos));
            alerts.push(self.record(key, bucket_num, window_sum, fired_at));
        }

        self.refractory_until.retain(|_, until| fired_at < *until);

        if self.past_len > 0 {
            let mut values: HashMap<DimensionKey, f64> = HashMap::with_capacity(rows.len());
            for (key, value) in rows {
                *values.entry(key.clone()).or_insert(0.0) += value;
            }
            for (key, value) in &values {
                let slot = self.past_sums.entry(key.clone()).or_insert((0.0, 0));
                slot.0 += value;
                slot.1 += 1;
            }
            self.past.push_back((bucket_num, values));
            while self.past.len() > self.past_len {
                if let Some((_, values)) = self.past.pop_front() {
                    self.forget(values);
                }
            }
        }
        alerts
    }

    /// Sum of retained past buckets for `key`.
    pub fn past_sum(&self, key: &DimensionKey) -> f64 {
        self.past_sums.get(key).map_or(0.0, |(sum, _)| *sum)
    }

    fn forget(&mut self, values: HashMap<DimensionKey, f64>) {
        for (key, value) in values {
            if let Some((sum, buckets)) = self.past_sums.get_mut(&key) {
                *sum -= value;
                *buckets -= 1;
                if *buckets == 0 {
                    self.past_sums.remove(&key);
                }
            }
        }
    }

    fn record(
        &self,
        key: &DimensionKey,
        bucket_num: u64,
        window_sum: f64,
        fired_at: i64,
    ) -> AlertRecord {
        let num = bucket_num.to_string();
        let mut hasher = Sha256::new();
        for part in [
            self.alert_id.as_str(),
            self.metric_id.as_str(),
            key.canonical(),
            num.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update(b"|");
        }
        let digest = hasher.finalize();
        let record_id = digest[..8].iter().map(|b| format!("{b:02x}")).collect();

        AlertRecord {
            record_id,
            alert_id: self.alert_id.clone(),
            metric_id: self.metric_id.clone(),
            dimension: key.clone(),
            bucket_num,
            window_sum,
            threshold: self.threshold,
            fired_at_nanos: fired_at,
            fired_at: Utc
                .timestamp_nanos(fired_at)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
