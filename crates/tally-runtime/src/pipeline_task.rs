use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use tally_core::{EngineHealth, Event, Ingest, MetricEngine, OutputRecord};

use crate::metrics::RuntimeMetrics;

/// What a pipeline task consumes, in arrival order.
#[derive(Debug, Clone)]
pub(crate) enum PipelineInput {
    Event(Arc<Event>),
    /// Fire timers due strictly before this instant.
    Tick(i64),
    /// Flush open buckets at this instant (default: the watermark) and exit.
    Shutdown(Option<i64>),
}

/// Everything one metric pipeline task owns.
///
/// The engine is owned exclusively by the task; the outside world only sees
/// the activity flag and the health snapshot it publishes after each input.
pub(crate) struct PipelineTaskConfig {
    pub metric_id: String,
    pub engine: MetricEngine,
    pub rx: mpsc::Receiver<PipelineInput>,
    pub output_tx: mpsc::Sender<OutputRecord>,
    pub active: Arc<AtomicBool>,
    pub health_tx: watch::Sender<EngineHealth>,
    pub metrics: Arc<RuntimeMetrics>,
    pub cancel: CancellationToken,
}

struct PipelineTask {
    metric_id: String,
    engine: MetricEngine,
    output_tx: mpsc::Sender<OutputRecord>,
    active: Arc<AtomicBool>,
    health_tx: watch::Sender<EngineHealth>,
    metrics: Arc<RuntimeMetrics>,
}

#[tracing::instrument(name = "pipeline", skip_all, fields(metric = %config.metric_id))]
pub(crate) async fn run_pipeline_task(config: PipelineTaskConfig) -> anyhow::Result<()> {
    let PipelineTaskConfig {
        metric_id,
        engine,
        mut rx,
        output_tx,
        active,
        health_tx,
        metrics,
        cancel,
    } = config;
    let mut task = PipelineTask {
        metric_id,
        engine,
        output_tx,
        active,
        health_tx,
        metrics,
    };
    task.publish();

    let shutdown_at = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // take what is already queued before flushing
                let mut at = None;
                while let Ok(input) = rx.try_recv() {
                    if let PipelineInput::Shutdown(now) = input {
                        at = now;
                        break;
                    }
                    task.apply(input);
                }
                break at;
            }
            input = rx.recv() => match input {
                Some(PipelineInput::Shutdown(now)) => break now,
                Some(input) => task.apply(input),
                None => break None,
            },
        }
    };

    task.finish(shutdown_at);
    tl_debug!(pipe, metric = %task.metric_id, "pipeline task finished");
    Ok(())
}

impl PipelineTask {
    fn apply(&mut self, input: PipelineInput) {
        match input {
            PipelineInput::Event(event) => {
                if let Ingest::Dropped(reason) = self.engine.process(&event) {
                    self.metrics.add_samples_dropped(&self.metric_id, reason, 1);
                    tl_trace!(pipe, metric = %self.metric_id, ts = event.timestamp_nanos, %reason, "event dropped");
                }
            }
            PipelineInput::Tick(now) => self.engine.advance_to(now),
            PipelineInput::Shutdown(_) => {}
        }
        self.forward();
        self.publish();
    }

    fn finish(&mut self, at: Option<i64>) {
        match at.or(self.engine.watermark()) {
            Some(now) => self.engine.shutdown(now),
            None => {
                tl_debug!(pipe, metric = %self.metric_id, "no input seen, nothing to flush");
                return;
            }
        }
        self.forward();
        self.publish();
        let health = self.engine.health();
        tl_info!(
            pipe,
            metric = %self.metric_id,
            events = health.events_processed,
            drops = health.total_drops().total(),
            "pipeline flushed"
        );
    }

    /// Hand every pending record to the output task without waiting. A full or
    /// closed queue drops the record and counts it.
    fn forward(&mut self) {
        let records = self.engine.drain();
        if records.is_empty() {
            return;
        }
        let n = records.len();
        for record in records {
            self.metrics.inc_record_emitted(&record);
            match self.output_tx.try_send(record) {
                Ok(()) => {}
                Err(TrySendError::Full(r)) => {
                    self.metrics.inc_flush_dropped(&self.metric_id);
                    tl_warn!(pipe, metric = %self.metric_id, kind = r.kind(), "output queue full, record dropped");
                }
                Err(TrySendError::Closed(r)) => {
                    self.metrics.inc_flush_dropped(&self.metric_id);
                    tl_warn!(pipe, metric = %self.metric_id, kind = r.kind(), "output queue closed, record dropped");
                }
            }
        }
        tl_debug!(pipe, metric = %self.metric_id, records = n, "records flushed");
    }

    fn publish(&self) {
        let active = self.engine.is_active(&self.metric_id).unwrap_or(false);
        self.active.store(active, Ordering::Relaxed);
        self.health_tx.send_replace(self.engine.health());
    }
}
