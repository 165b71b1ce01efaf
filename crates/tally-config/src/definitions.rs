//! Metric-definition graph as written in TOML: matchers, conditions,
//! metrics with their activations, and anomaly alerts.
//!
//! These types carry ids as strings. Reference resolution, duplicate and
//! cycle detection happen when `tally-core` compiles an engine from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

// ---------------------------------------------------------------------------
// Literals
// ---------------------------------------------------------------------------

/// A literal in a field constraint. TOML integers stay integers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Int(v) => write!(f, "{v}"),
            ConfigValue::Float(v) => write!(f, "{v}"),
            ConfigValue::Str(v) => write!(f, "{v:?}"),
        }
    }
}

/// Logical operator shared by combination matchers and combination conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
    Not,
    Nand,
    Nor,
}

impl LogicalOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
            LogicalOp::Not => "not",
            LogicalOp::Nand => "nand",
            LogicalOp::Nor => "nor",
        }
    }
}

// ---------------------------------------------------------------------------
// Matchers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MatcherDef {
    pub id: String,
    #[serde(flatten)]
    pub rule: MatcherRule,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MatcherRule {
    /// Event type id plus a conjunction of field constraints.
    Simple {
        atom: i32,
        #[serde(default, rename = "where")]
        constraints: Vec<FieldConstraintDef>,
    },
    Combination {
        op: LogicalOp,
        children: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldConstraintDef {
    pub field: String,
    #[serde(flatten)]
    pub test: FieldTest,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTest {
    Eq(ConfigValue),
    Lt(ConfigValue),
    Gt(ConfigValue),
    Lte(ConfigValue),
    Gte(ConfigValue),
    OneOf(Vec<ConfigValue>),
    NotOneOf(Vec<ConfigValue>),
    /// Shell-style pattern (`*`, `?`) over string fields.
    Wildcard(String),
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConditionDef {
    pub id: String,
    #[serde(flatten)]
    pub rule: ConditionRule,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConditionRule {
    Simple(SimpleConditionDef),
    Combination { op: LogicalOp, children: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimpleConditionDef {
    pub start: String,
    pub stop: String,
    #[serde(default)]
    pub stop_all: Option<String>,
    /// Count overlapping starts; the condition clears after as many stops.
    #[serde(default)]
    pub nested: bool,
    /// Field paths that slice the condition into one signal per key.
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub initial: InitialState,
    #[serde(default)]
    pub max_dimensions: Option<usize>,
}

/// State reported for a dimension key before any start/stop was seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialState {
    #[default]
    Unknown,
    False,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricDef {
    pub id: String,
    #[serde(flatten)]
    pub kind: MetricKindDef,
    /// Required for every kind except `event`.
    #[serde(default)]
    pub bucket: Option<HumanDuration>,
    #[serde(default)]
    pub condition: Option<String>,
    /// Maps this metric's event fields onto a sliced condition's dimensions.
    #[serde(default)]
    pub links: Vec<ConditionLinkDef>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default, rename = "activation")]
    pub activations: Vec<ActivationDef>,
    #[serde(default)]
    pub max_dimensions: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricKindDef {
    Value {
        what: String,
        value_field: String,
        #[serde(default)]
        aggregation: ValueAggregation,
    },
    Count {
        what: String,
    },
    Duration {
        start: String,
        stop: String,
        #[serde(default)]
        stop_all: Option<String>,
        #[serde(default)]
        nested: bool,
        #[serde(default)]
        aggregation: DurationAggregation,
    },
    /// Every qualifying event is emitted as is; no bucket grid.
    Event {
        what: String,
    },
}

impl MetricKindDef {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKindDef::Value { .. } => "value",
            MetricKindDef::Count { .. } => "count",
            MetricKindDef::Duration { .. } => "duration",
            MetricKindDef::Event { .. } => "event",
        }
    }

    pub fn is_bucketed(&self) -> bool {
        !matches!(self, MetricKindDef::Event { .. })
    }
}

/// `sum` adds every interval's overlap with a bucket. `max_sparse` reports,
/// in the bucket where an interval ends, the longest interval of each key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationAggregation {
    #[default]
    Sum,
    MaxSparse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueAggregation {
    #[default]
    Sum,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConditionLinkDef {
    /// Field path on the metric's event.
    pub what: String,
    /// Dimension field path of the condition.
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActivationDef {
    pub matcher: String,
    pub ttl: HumanDuration,
    #[serde(default)]
    pub deactivate: Option<String>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AlertDef {
    pub id: String,
    pub metric: String,
    pub num_buckets: usize,
    pub trigger_if_sum_gt: f64,
    #[serde(default)]
    pub refractory_period: Option<HumanDuration>,
}

// ---------------------------------------------------------------------------
// DefinitionSet
// ---------------------------------------------------------------------------

/// Everything an engine is compiled from. Also the shape of an include file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DefinitionSet {
    #[serde(default, rename = "matcher")]
    pub matchers: Vec<MatcherDef>,
    #[serde(default, rename = "condition")]
    pub conditions: Vec<ConditionDef>,
    #[serde(default, rename = "metric")]
    pub metrics: Vec<MetricDef>,
    #[serde(default, rename = "alert")]
    pub alerts: Vec<AlertDef>,
}

impl DefinitionSet {
    pub fn merge(&mut self, other: DefinitionSet) {
        self.matchers.extend(other.matchers);
        self.conditions.extend(other.conditions);
        self.metrics.extend(other.metrics);
        self.alerts.extend(other.alerts);
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Restrict to one metric and the alerts watching it. Matchers and
    /// conditions are kept whole; unused ones cost nothing but evaluation.
    pub fn for_metric(&self, metric_id: &str) -> Option<DefinitionSet> {
        let metric = self.metrics.iter().find(|m| m.id == metric_id)?.clone();
        Some(DefinitionSet {
            matchers: self.matchers.clone(),
            conditions: self.conditions.clone(),
            metrics: vec![metric],
            alerts: self
                .alerts
                .iter()
                .filter(|a| a.metric == metric_id)
                .cloned()
                .collect(),
        })
    }
}
