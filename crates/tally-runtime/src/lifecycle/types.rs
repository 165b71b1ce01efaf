use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use orion_error::prelude::*;
use orion_error::ErrorOweBase;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use tally_core::{EngineHealth, MetricEngine};

use crate::error::{RuntimeReason, RuntimeResult};
use crate::pipeline_task::PipelineInput;
use crate::sink::OutputSink;

/// A named group of tasks shut down together.
///
/// Groups are kept in start order and joined in reverse:
///
///   start:  output → pipelines → clock
///   join:   clock → pipelines → output
///
/// so producers exit before the consumer that drains them.
pub(crate) struct TaskGroup {
    pub(super) name: &'static str,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

impl TaskGroup {
    pub(super) fn new(name: &'static str) -> Self {
        Self {
            name,
            handles: Vec::new(),
        }
    }

    pub(super) fn push(&mut self, handle: JoinHandle<anyhow::Result<()>>) {
        self.handles.push(handle);
    }

    /// Join every task, returning the first error.
    pub(super) async fn wait(self) -> RuntimeResult<()> {
        for handle in self.handles {
            handle
                .await
                .map_err(|e| {
                    StructError::from(RuntimeReason::Shutdown)
                        .with_detail(format!("task join error: {e}"))
                })?
                .owe(RuntimeReason::Shutdown)?;
        }
        Ok(())
    }
}

/// The runtime's side of one pipeline task.
pub(super) struct PipelineHandle {
    pub metric_id: String,
    /// `None` once shutdown was requested.
    pub tx: Option<mpsc::Sender<PipelineInput>>,
    pub active: Arc<AtomicBool>,
    pub health: watch::Receiver<EngineHealth>,
}

/// Artifacts of the bootstrap phase, ready for task spawning.
pub(super) struct BootstrapData {
    /// One single-metric engine per definition, in definition order.
    pub engines: Vec<(String, MetricEngine)>,
    pub sinks: Vec<Box<dyn OutputSink>>,
}
