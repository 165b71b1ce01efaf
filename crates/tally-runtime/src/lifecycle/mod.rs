mod bootstrap;
mod signal;
mod spawn;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use orion_error::op_context;
use orion_error::prelude::*;
use tokio_util::sync::CancellationToken;

use tally_config::TallyConfig;
use tally_core::{EngineHealth, Event};

use crate::error::{RuntimeReason, RuntimeResult};
use crate::metrics::RuntimeMetrics;
use crate::pipeline_task::PipelineInput;

pub use signal::wait_for_signal;

use bootstrap::load_and_compile;
use spawn::{spawn_clock_task, spawn_output_task, spawn_pipeline_tasks};
use types::{PipelineHandle, TaskGroup};

/// Async host for a set of metric pipelines.
///
/// Every metric runs in its own task over its own engine; events are shared
/// read-only (`Arc<Event>`) and fanned out to every pipeline queue. Records
/// flow into a single bounded output queue consumed by the sink task.
///
/// Shutdown is ordered: [`shutdown`](Self::shutdown) (or cancellation) makes
/// every pipeline flush its open bucket, then [`wait`](Self::wait) joins the
/// task groups in reverse start order so the output task drains last.
pub struct Runtime {
    cancel: CancellationToken,
    clock_cancel: CancellationToken,
    pipelines: Vec<PipelineHandle>,
    groups: Vec<TaskGroup>,
    metrics: Arc<RuntimeMetrics>,
}

impl Runtime {
    /// Compile the definitions, open sinks and spawn all tasks. Configuration
    /// errors surface here; no event is accepted before this returns `Ok`.
    #[tracing::instrument(name = "runtime.start", skip_all, fields(metrics = config.definitions.metrics.len()))]
    pub async fn start(config: TallyConfig, base_dir: &Path) -> RuntimeResult<Self> {
        let mut op = op_context!("runtime-bootstrap").with_auto_log();
        op.record("base_dir", base_dir.display().to_string().as_str());

        let cancel = CancellationToken::new();
        let clock_cancel = cancel.child_token();

        let data = load_and_compile(&config, base_dir).await?;
        let metric_ids: Vec<String> = data.engines.iter().map(|(id, _)| id.clone()).collect();
        let metrics = Arc::new(RuntimeMetrics::new(&metric_ids));

        let mut groups = Vec::with_capacity(3);
        let (output_tx, output_group) = spawn_output_task(
            data.sinks,
            config.runtime.sink_retry.clone(),
            config.runtime.output_queue,
            Arc::clone(&metrics),
        );
        groups.push(output_group);

        let (pipelines, pipeline_group) = spawn_pipeline_tasks(
            data.engines,
            output_tx,
            config.runtime.pipeline_queue,
            &metrics,
            cancel.child_token(),
        );
        groups.push(pipeline_group);

        tl_info!(
            sys,
            metrics = pipelines.len(),
            sinks = config.output.sinks.len(),
            "runtime started"
        );
        op.mark_suc();
        Ok(Self {
            cancel,
            clock_cancel,
            pipelines,
            groups,
            metrics,
        })
    }

    /// Drive timers from the wall clock every `interval` until shutdown.
    /// Only meaningful when event timestamps are epoch nanoseconds.
    pub fn start_clock(&mut self, interval: Duration) {
        let senders = self
            .pipelines
            .iter()
            .filter_map(|p| p.tx.clone())
            .collect();
        self.groups.push(spawn_clock_task(
            senders,
            interval,
            Arc::clone(&self.metrics),
            self.clock_cancel.clone(),
        ));
        tl_debug!(sys, interval_ms = interval.as_millis() as u64, "wall clock started");
    }

    /// Fan `event` out to every pipeline. Waits while a pipeline queue is
    /// full; fails only once the runtime is shutting down.
    pub async fn ingest(&self, event: Event) -> RuntimeResult<()> {
        let event = Arc::new(event);
        for p in &self.pipelines {
            let Some(tx) = &p.tx else {
                self.metrics.inc_events_rejected();
                return Err(closed(&p.metric_id));
            };
            if tx.send(PipelineInput::Event(Arc::clone(&event))).await.is_err() {
                self.metrics.inc_events_rejected();
                return Err(closed(&p.metric_id));
            }
        }
        self.metrics.inc_events_ingested();
        Ok(())
    }

    /// Fire, in every pipeline, the timers due strictly before `now`.
    pub async fn tick(&self, now: i64) -> RuntimeResult<()> {
        for p in &self.pipelines {
            let Some(tx) = &p.tx else {
                return Err(closed(&p.metric_id));
            };
            tx.send(PipelineInput::Tick(now))
                .await
                .map_err(|_| closed(&p.metric_id))?;
        }
        self.metrics.inc_ticks();
        Ok(())
    }

    /// Whether the metric is gated on as of the last input its pipeline
    /// processed. `None` for an unknown metric.
    pub fn is_active(&self, metric_id: &str) -> Option<bool> {
        self.pipelines
            .iter()
            .find(|p| p.metric_id == metric_id)
            .map(|p| p.active.load(Ordering::Relaxed))
    }

    /// Latest health snapshot of every pipeline, in definition order.
    pub fn health(&self) -> Vec<EngineHealth> {
        self.pipelines
            .iter()
            .map(|p| p.health.borrow().clone())
            .collect()
    }

    pub fn metrics(&self) -> Arc<RuntimeMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Ask every pipeline to flush at `now` (default: its watermark) and stop
    /// accepting input. Inputs queued before this call are still processed.
    pub async fn shutdown(&mut self, now: Option<i64>) {
        tl_info!(sys, "initiating graceful shutdown");
        self.clock_cancel.cancel();
        for p in &mut self.pipelines {
            if let Some(tx) = p.tx.take() {
                // a pipeline that already exited has flushed on its own
                let _ = tx.send(PipelineInput::Shutdown(now)).await;
            }
        }
    }

    /// Join every task group, newest first.
    pub async fn wait(mut self) -> RuntimeResult<()> {
        // without an explicit shutdown, closing every input ends the pipelines
        self.clock_cancel.cancel();
        for p in &mut self.pipelines {
            p.tx = None;
        }
        while let Some(group) = self.groups.pop() {
            let name = group.name;
            tl_debug!(sys, task_group = name, "waiting for task group to finish");
            group.wait().await?;
            tl_debug!(sys, task_group = name, "task group finished");
        }
        tl_info!(sys, summary = %self.metrics.summary_line(), "runtime stopped");
        Ok(())
    }

    /// Root cancellation token, for signal integration. Cancelling it makes
    /// every pipeline flush at its watermark.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

fn closed(metric_id: &str) -> crate::error::RuntimeError {
    StructError::from(RuntimeReason::Closed).with_detail(format!("pipeline {metric_id:?} is closed"))
}
