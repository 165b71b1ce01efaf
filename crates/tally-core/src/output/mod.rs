//! Records leaving the engine and synchronous destinations for them.

pub mod sink;

use serde::Serialize;

use crate::anomaly::AlertRecord;
use crate::metric::{BucketRecord, EventRecord, SkippedBucket};

/// Everything the engine emits, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputRecord {
    Bucket(BucketRecord),
    Skipped(SkippedBucket),
    Alert(AlertRecord),
    Event(EventRecord),
}

impl OutputRecord {
    pub fn metric_id(&self) -> &str {
        match self {
            OutputRecord::Bucket(b) => &b.metric_id,
            OutputRecord::Skipped(s) => &s.metric_id,
            OutputRecord::Alert(a) => &a.metric_id,
            OutputRecord::Event(e) => &e.metric_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutputRecord::Bucket(_) => "bucket",
            OutputRecord::Skipped(_) => "skipped",
            OutputRecord::Alert(_) => "alert",
            OutputRecord::Event(_) => "event",
        }
    }

    pub fn as_bucket(&self) -> Option<&BucketRecord> {
        match self {
            OutputRecord::Bucket(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_skipped(&self) -> Option<&SkippedBucket> {
        match self {
            OutputRecord::Skipped(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_alert(&self) -> Option<&AlertRecord> {
        match self {
            OutputRecord::Alert(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&EventRecord> {
        match self {
            OutputRecord::Event(e) => Some(e),
            _ => None,
        }
    }
}
