use crate::config::TallyConfig;
use crate::definitions::{ConditionRule, MetricKindDef};

/// Scalar checks, called automatically during `TallyConfig::from_toml` / `load`.
/// Reference integrity and cycles are checked when the engine is compiled.
pub(crate) fn validate(config: &TallyConfig) -> anyhow::Result<()> {
    let rt = &config.runtime;
    if rt.pipeline_queue == 0 {
        anyhow::bail!("runtime.pipeline_queue must be > 0");
    }
    if rt.output_queue == 0 {
        anyhow::bail!("runtime.output_queue must be > 0");
    }
    if rt.dimension_hard_limit == 0 {
        anyhow::bail!("runtime.dimension_hard_limit must be > 0");
    }
    if rt.tick_interval.is_zero() {
        anyhow::bail!("runtime.tick_interval must be > 0");
    }
    if rt.sink_retry.max_attempts == 0 {
        anyhow::bail!("runtime.sink_retry.max_attempts must be >= 1");
    }
    if rt.sink_retry.initial_backoff > rt.sink_retry.max_backoff {
        anyhow::bail!(
            "runtime.sink_retry.initial_backoff ({}) exceeds max_backoff ({})",
            rt.sink_retry.initial_backoff,
            rt.sink_retry.max_backoff,
        );
    }

    // output.sinks must be non-empty and each URI must be parseable
    if config.output.sinks.is_empty() {
        anyhow::bail!("output.sinks must contain at least one sink URI");
    }
    for (i, uri) in config.output.sinks.iter().enumerate() {
        crate::output::parse_sink_uri(uri)
            .map_err(|e| anyhow::anyhow!("output.sinks[{}]: {}", i, e))?;
    }

    let defs = &config.definitions;
    if defs.metrics.is_empty() {
        anyhow::bail!("no [[metric]] definitions (inline or included)");
    }

    for cond in &defs.conditions {
        if let ConditionRule::Simple(simple) = &cond.rule
            && simple.max_dimensions == Some(0)
        {
            anyhow::bail!("condition {:?}: max_dimensions must be > 0", cond.id);
        }
    }

    for metric in &defs.metrics {
        match (metric.kind.is_bucketed(), metric.bucket) {
            (true, None) => anyhow::bail!("metric {:?}: bucket is required", metric.id),
            (true, Some(bucket)) if bucket.is_zero() => {
                anyhow::bail!("metric {:?}: bucket must be > 0", metric.id)
            }
            (false, Some(_)) => {
                anyhow::bail!("metric {:?}: event metrics take no bucket", metric.id)
            }
            _ => {}
        }
        if metric.max_dimensions == Some(0) {
            anyhow::bail!("metric {:?}: max_dimensions must be > 0", metric.id);
        }
        if let MetricKindDef::Value { value_field, .. } = &metric.kind
            && value_field.is_empty()
        {
            anyhow::bail!("metric {:?}: value_field must not be empty", metric.id);
        }
        if !metric.links.is_empty() && metric.condition.is_none() {
            anyhow::bail!("metric {:?}: links given without a condition", metric.id);
        }
        for (i, act) in metric.activations.iter().enumerate() {
            if act.ttl.is_zero() {
                anyhow::bail!("metric {:?}: activation[{}].ttl must be > 0", metric.id, i);
            }
        }
    }

    for alert in &defs.alerts {
        if alert.num_buckets == 0 {
            anyhow::bail!("alert {:?}: num_buckets must be >= 1", alert.id);
        }
        if defs
            .metrics
            .iter()
            .any(|m| m.id == alert.metric && !m.kind.is_bucketed())
        {
            anyhow::bail!("alert {:?}: metric {:?} is not bucketed", alert.id, alert.metric);
        }
        if !alert.trigger_if_sum_gt.is_finite() {
            anyhow::bail!("alert {:?}: trigger_if_sum_gt must be finite", alert.id);
        }
    }

    Ok(())
}
