use std::collections::BTreeMap;

use tally_config::ValueAggregation;

use crate::dimension::DimensionKey;
use crate::event::{Event, Value};
use crate::matcher::MatcherIdx;
use crate::sample::DropReason;

use super::types::BucketValue;

/// Integer sums stay exact until they overflow, then continue as `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Enum(e) => Some(Num::Int(i64::from(*e))),
            Value::Float(f) => Some(Num::Float(*f)),
            Value::Str(_) => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn add(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_add(b)
                .map_or(Num::Float(a as f64 + b as f64), Num::Int),
            (a, b) => Num::Float(a.as_f64() + b.as_f64()),
        }
    }

    fn min(self, other: Num) -> Num {
        if other.lt(self) { other } else { self }
    }

    fn max(self, other: Num) -> Num {
        if self.lt(other) { other } else { self }
    }

    fn lt(self, other: Num) -> bool {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a < b,
            (a, b) => a.as_f64() < b.as_f64(),
        }
    }

    fn into_bucket_value(self) -> BucketValue {
        match self {
            Num::Int(i) => BucketValue::Long(i),
            Num::Float(f) => BucketValue::Double(f),
        }
    }
}

#[derive(Debug, Clone)]
struct Accumulator {
    sum: Num,
    min: Num,
    max: Num,
    count: u64,
}

impl Accumulator {
    fn new(first: Num) -> Self {
        Self {
            sum: first,
            min: first,
            max: first,
            count: 1,
        }
    }

    fn push(&mut self, n: Num) {
        self.sum = self.sum.add(n);
        self.min = self.min.min(n);
        self.max = self.max.max(n);
        self.count += 1;
    }
}

#[derive(Debug)]
pub(crate) enum ValueMode {
    /// Aggregate a numeric field.
    Field {
        field: String,
        aggregation: ValueAggregation,
    },
    /// One per qualifying event.
    Count,
}

/// Per-dimension accumulators of value and count metrics for the open bucket.
#[derive(Debug)]
pub(crate) struct ValueAggregator {
    pub(crate) what: MatcherIdx,
    mode: ValueMode,
    accs: BTreeMap<DimensionKey, Accumulator>,
}

impl ValueAggregator {
    pub(crate) fn new(what: MatcherIdx, mode: ValueMode) -> Self {
        Self {
            what,
            mode,
            accs: BTreeMap::new(),
        }
    }

    /// Numeric sample carried by `event`.
    pub(crate) fn sample(&self, event: &Event) -> Result<Num, DropReason> {
        match &self.mode {
            ValueMode::Count => Ok(Num::Int(1)),
            ValueMode::Field { field, .. } => {
                let v = event.field(field).ok_or(DropReason::MissingField)?;
                Num::from_value(v).ok_or(DropReason::UnparseableValue)
            }
        }
    }

    pub(crate) fn add(
        &mut self,
        key: DimensionKey,
        n: Num,
        max_keys: usize,
    ) -> Result<(), DropReason> {
        if let Some(acc) = self.accs.get_mut(&key) {
            acc.push(n);
            return Ok(());
        }
        if self.accs.len() >= max_keys {
            return Err(DropReason::DimensionLimit);
        }
        self.accs.insert(key, Accumulator::new(n));
        Ok(())
    }

    /// Finalize the open bucket, ordered by dimension key, and reset.
    pub(crate) fn take_bucket(&mut self) -> Vec<(DimensionKey, BucketValue, u64)> {
        let accs = std::mem::take(&mut self.accs);
        accs.into_iter()
            .map(|(key, acc)| {
                let value = match &self.mode {
                    ValueMode::Count => BucketValue::Long(acc.count as i64),
                    ValueMode::Field { aggregation, .. } => match aggregation {
                        ValueAggregation::Sum => acc.sum.into_bucket_value(),
                        ValueAggregation::Min => acc.min.into_bucket_value(),
                        ValueAggregation::Max => acc.max.into_bucket_value(),
                        ValueAggregation::Avg => {
                            BucketValue::Double(acc.sum.as_f64() / acc.count as f64)
                        }
                    },
                };
                (key, value, acc.count)
            })
            .collect()
    }
}
