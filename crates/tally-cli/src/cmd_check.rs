use anyhow::Result;

use tally_config::TallyConfig;
use tally_core::{EngineOptions, MetricEngine};

/// Compile every definition and print a one-line inventory.
pub fn run(config: &TallyConfig) -> Result<()> {
    let engine = compile(config)?;
    let defs = &config.definitions;
    println!(
        "ok: {} matchers, {} conditions, {} metrics ({}), {} alerts, {} included files",
        defs.matchers.len(),
        defs.conditions.len(),
        defs.metrics.len(),
        engine.metric_ids().collect::<Vec<_>>().join(", "),
        defs.alerts.len(),
        config.included.len(),
    );
    Ok(())
}

pub fn compile(config: &TallyConfig) -> Result<MetricEngine> {
    MetricEngine::new(&config.definitions, EngineOptions::from(&config.runtime))
        .map_err(|e| anyhow::anyhow!("{e}"))
}
