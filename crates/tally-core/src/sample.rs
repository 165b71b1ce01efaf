use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Why a sample (or a whole event) was not applied. Recoverable: the event is
/// dropped for the affected pipeline and processing continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Timestamp older than the latest one already seen.
    OutOfOrder,
    /// A dimension, link or value field is absent from the event.
    MissingField,
    /// The value field is present but not numeric.
    UnparseableValue,
    /// The metric's condition was UNKNOWN for this sample.
    ConditionUnknown,
    /// The event matched both start and stop of a condition.
    AmbiguousCondition,
    /// A new dimension key would exceed the configured hard limit.
    DimensionLimit,
}

impl DropReason {
    pub const ALL: [DropReason; 6] = [
        DropReason::OutOfOrder,
        DropReason::MissingField,
        DropReason::UnparseableValue,
        DropReason::ConditionUnknown,
        DropReason::AmbiguousCondition,
        DropReason::DimensionLimit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::OutOfOrder => "out_of_order",
            DropReason::MissingField => "missing_field",
            DropReason::UnparseableValue => "unparseable_value",
            DropReason::ConditionUnknown => "condition_unknown",
            DropReason::AmbiguousCondition => "ambiguous_condition",
            DropReason::DimensionLimit => "dimension_limit",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drop tally keyed by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DropCounters(BTreeMap<DropReason, u64>);

impl DropCounters {
    pub fn record(&mut self, reason: DropReason) {
        *self.0.entry(reason).or_insert(0) += 1;
    }

    pub fn get(&self, reason: DropReason) -> u64 {
        self.0.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DropReason, u64)> + '_ {
        self.0.iter().map(|(r, n)| (*r, *n))
    }

    pub fn merge(&mut self, other: &DropCounters) {
        for (reason, n) in other.iter() {
            *self.0.entry(reason).or_insert(0) += n;
        }
    }
}
