use std::path::Path;

use orion_error::prelude::*;

use tally_config::TallyConfig;
use tally_core::{EngineOptions, MetricEngine};

use crate::error::{RuntimeReason, RuntimeResult};
use crate::sink::build_sinks;

use super::types::BootstrapData;

/// Compile every metric and open the sinks.
///
/// The full definition set is compiled once so graph errors (dangling ids,
/// cycles, duplicates) surface before any task starts; each metric then gets
/// its own engine compiled from the slice of definitions it depends on.
pub(super) async fn load_and_compile(
    config: &TallyConfig,
    base_dir: &Path,
) -> RuntimeResult<BootstrapData> {
    let options = EngineOptions::from(&config.runtime);
    let defs = &config.definitions;

    MetricEngine::new(defs, options.clone()).err_conv()?;
    tl_debug!(
        conf,
        matchers = defs.matchers.len(),
        conditions = defs.conditions.len(),
        metrics = defs.metrics.len(),
        alerts = defs.alerts.len(),
        "definition graph compiled"
    );

    let mut engines = Vec::with_capacity(defs.metrics.len());
    for metric in &defs.metrics {
        let slice = defs.for_metric(&metric.id).ok_or_else(|| {
            StructError::from(RuntimeReason::Bootstrap)
                .with_detail(format!("metric {:?} vanished from definitions", metric.id))
        })?;
        let engine = MetricEngine::new(&slice, options.clone()).err_conv()?;
        engines.push((metric.id.clone(), engine));
    }

    let sinks = build_sinks(&config.output.sinks, base_dir).await?;
    tl_debug!(conf, sinks = sinks.len(), "output sinks opened");

    Ok(BootstrapData { engines, sinks })
}
