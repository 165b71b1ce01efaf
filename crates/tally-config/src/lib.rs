pub mod config;
pub mod definitions;
pub mod logging;
pub mod output;
pub mod runtime;
pub mod types;
mod validate;

pub use config::{TallyConfig, resolve_glob};
pub use definitions::{
    ActivationDef, AlertDef, ConditionDef, ConditionLinkDef, ConditionRule, ConfigValue,
    DefinitionSet, DurationAggregation, FieldConstraintDef, FieldTest, InitialState, LogicalOp,
    MatcherDef, MatcherRule, MetricDef, MetricKindDef, SimpleConditionDef, ValueAggregation,
};
pub use logging::{LogFormat, LoggingConfig};
pub use output::{OutputConfig, SinkUri, parse_sink_uri};
pub use runtime::{RuntimeConfig, SinkRetryConfig};
pub use types::HumanDuration;
