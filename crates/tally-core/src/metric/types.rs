use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::dimension::DimensionKey;
use crate::event::{Event, Value};

/// Aggregate of one dimension key over one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BucketValue {
    Long(i64),
    Double(f64),
}

impl BucketValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            BucketValue::Long(v) => *v as f64,
            BucketValue::Double(v) => *v,
        }
    }
}

impl fmt::Display for BucketValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketValue::Long(v) => write!(f, "{v}"),
            BucketValue::Double(v) => write!(f, "{v}"),
        }
    }
}

/// A finalized bucket for one dimension key: `[start_nanos, end_nanos)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketRecord {
    pub metric_id: String,
    pub dimension: DimensionKey,
    pub start_nanos: i64,
    pub end_nanos: i64,
    pub value: BucketValue,
    /// Samples folded in (value/count) or accrued interval segments (duration).
    pub sample_count: u64,
    /// Flushed at shutdown before its nominal end.
    pub partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Active, but nothing qualified.
    NoData,
    /// Samples arrived but the condition was unknown for all of them.
    ConditionUnknown,
}

/// One qualifying event of an `event` metric, fields sorted by path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub metric_id: String,
    pub dimension: DimensionKey,
    pub atom_id: i32,
    pub timestamp_nanos: i64,
    pub fields: BTreeMap<String, Value>,
}

impl EventRecord {
    pub(crate) fn new(metric_id: &str, dimension: DimensionKey, event: &Event) -> Self {
        Self {
            metric_id: metric_id.to_string(),
            dimension,
            atom_id: event.atom_id,
            timestamp_nanos: event.timestamp_nanos,
            fields: event
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// One or more consecutive buckets during which the metric was active but no
/// dimension key contributed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedBucket {
    pub metric_id: String,
    pub start_nanos: i64,
    pub end_nanos: i64,
    pub bucket_count: u64,
    pub reason: SkipReason,
}
