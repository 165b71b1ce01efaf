use std::collections::{HashMap, HashSet};

use tally_config::DefinitionSet;

use crate::activation::ActivationTracker;
use crate::anomaly::AnomalyTracker;
use crate::condition::ConditionSet;
use crate::error::{CoreResult, config_error};
use crate::matcher::MatcherSet;
use crate::metric::MetricPipeline;

use super::EngineOptions;

pub(super) struct Compiled {
    pub matchers: MatcherSet,
    pub conditions: ConditionSet,
    pub activations: ActivationTracker,
    pub pipelines: Vec<MetricPipeline>,
    pub index: HashMap<String, usize>,
}

/// Resolve every id reference of `defs` and build the trackers. Any dangling
/// reference, duplicate id or cycle is fatal.
pub(super) fn compile(defs: &DefinitionSet, options: &EngineOptions) -> CoreResult<Compiled> {
    if defs.metrics.is_empty() {
        return Err(config_error("no metrics defined"));
    }
    if options.dimension_hard_limit == 0 {
        return Err(config_error("dimension_hard_limit must be > 0"));
    }

    let matchers = MatcherSet::compile(&defs.matchers)?;
    let conditions =
        ConditionSet::compile(&defs.conditions, &matchers, options.dimension_hard_limit)?;

    let mut index = HashMap::with_capacity(defs.metrics.len());
    for (i, metric) in defs.metrics.iter().enumerate() {
        if index.insert(metric.id.clone(), i).is_some() {
            return Err(config_error(format!("duplicate metric id {:?}", metric.id)));
        }
    }

    let mut alert_ids = HashSet::with_capacity(defs.alerts.len());
    for alert in &defs.alerts {
        if !alert_ids.insert(alert.id.as_str()) {
            return Err(config_error(format!("duplicate alert id {:?}", alert.id)));
        }
        if !index.contains_key(&alert.metric) {
            return Err(config_error(format!(
                "alert {:?} references unknown metric {:?}",
                alert.id, alert.metric
            )));
        }
        if alert.num_buckets == 0 {
            return Err(config_error(format!(
                "alert {:?}: num_buckets must be >= 1",
                alert.id
            )));
        }
    }

    let mut activations = ActivationTracker::default();
    let mut pipelines = Vec::with_capacity(defs.metrics.len());
    for metric in &defs.metrics {
        let slot = activations.add_metric(&metric.id, &metric.activations, &matchers)?;
        let alerts = defs
            .alerts
            .iter()
            .filter(|a| a.metric == metric.id)
            .map(AnomalyTracker::new)
            .collect();
        pipelines.push(MetricPipeline::compile(
            metric,
            slot,
            &matchers,
            &conditions,
            options.dimension_hard_limit,
            alerts,
        )?);
    }

    Ok(Compiled {
        matchers,
        conditions,
        activations,
        pipelines,
        index,
    })
}
