#[macro_use]
mod log_macros;

pub mod error;
pub mod lifecycle;
pub mod metrics;
mod output_task;
mod pipeline_task;
pub mod sink;
pub mod tracing_init;

pub use error::{RuntimeError, RuntimeReason, RuntimeResult};
pub use lifecycle::{Runtime, wait_for_signal};
pub use metrics::RuntimeMetrics;
