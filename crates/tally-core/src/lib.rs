pub mod activation;
pub mod anomaly;
pub mod condition;
pub mod dimension;
pub mod engine;
pub mod error;
pub mod event;
mod graph;
pub mod matcher;
pub mod metric;
pub mod output;
pub mod sample;

pub use anomaly::AlertRecord;
pub use condition::ConditionState;
pub use dimension::DimensionKey;
pub use engine::{EngineHealth, EngineOptions, Ingest, MetricEngine, MetricHealth};
pub use error::{CoreError, CoreReason, CoreResult};
pub use event::{Event, EventDecodeError, Value};
pub use metric::{BucketRecord, BucketValue, EventRecord, SkipReason, SkippedBucket};
pub use output::OutputRecord;
pub use output::sink::{
    FanOutSink, FileRecordSink, RecordSink, StdoutRecordSink, build_record_sink,
};
pub use sample::{DropCounters, DropReason};
