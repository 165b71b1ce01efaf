use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use tally_config::SinkRetryConfig;
use tally_core::{MetricEngine, OutputRecord};

use crate::metrics::RuntimeMetrics;
use crate::output_task::run_output_dispatcher;
use crate::pipeline_task::{PipelineInput, PipelineTaskConfig, run_pipeline_task};
use crate::sink::OutputSink;

use super::types::{PipelineHandle, TaskGroup};

/// Spawn the output consumer. Returns its sender and task group.
pub(super) fn spawn_output_task(
    sinks: Vec<Box<dyn OutputSink>>,
    retry: SinkRetryConfig,
    queue: usize,
    metrics: Arc<RuntimeMetrics>,
) -> (mpsc::Sender<OutputRecord>, TaskGroup) {
    let (tx, rx) = mpsc::channel(queue);
    let mut group = TaskGroup::new("output");
    group.push(tokio::spawn(async move {
        run_output_dispatcher(rx, sinks, retry, metrics).await;
        Ok(())
    }));
    (tx, group)
}

/// Spawn one task per metric engine, each with its own bounded input queue.
pub(super) fn spawn_pipeline_tasks(
    engines: Vec<(String, MetricEngine)>,
    output_tx: mpsc::Sender<OutputRecord>,
    queue: usize,
    metrics: &Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> (Vec<PipelineHandle>, TaskGroup) {
    let mut group = TaskGroup::new("pipelines");
    let mut handles = Vec::with_capacity(engines.len());

    for (metric_id, engine) in engines {
        let (tx, rx) = mpsc::channel(queue);
        let (health_tx, health_rx) = watch::channel(engine.health());
        let active = Arc::new(AtomicBool::new(
            engine.is_active(&metric_id).unwrap_or(false),
        ));

        group.push(tokio::spawn(run_pipeline_task(PipelineTaskConfig {
            metric_id: metric_id.clone(),
            engine,
            rx,
            output_tx: output_tx.clone(),
            active: Arc::clone(&active),
            health_tx,
            metrics: Arc::clone(metrics),
            cancel: cancel.child_token(),
        })));
        handles.push(PipelineHandle {
            metric_id,
            tx: Some(tx),
            active,
            health: health_rx,
        });
    }

    // the output channel closes once every pipeline task is gone
    drop(output_tx);

    (handles, group)
}

/// Spawn the wall-clock ticker that drives timers while no events arrive.
pub(super) fn spawn_clock_task(
    senders: Vec<mpsc::Sender<PipelineInput>>,
    interval: Duration,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> TaskGroup {
    let mut group = TaskGroup::new("clock");
    group.push(tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let now = now_epoch_nanos();
                    metrics.inc_ticks();
                    for tx in &senders {
                        // a full queue means events are flowing; they advance time anyway
                        let _ = tx.try_send(PipelineInput::Tick(now));
                    }
                }
            }
        }
        Ok(())
    }));
    group
}

fn now_epoch_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
