use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use tally_config::SinkRetryConfig;
use tally_core::OutputRecord;

use crate::metrics::RuntimeMetrics;
use crate::sink::OutputSink;

/// Consume output records and write each to every sink.
///
/// A failed write is retried with exponential backoff up to
/// `retry.max_attempts` attempts, then counted and abandoned; one bad sink
/// never blocks the others for longer than its backoff budget. Exits when all
/// pipeline senders are dropped, then stops every sink.
pub(crate) async fn run_output_dispatcher(
    mut rx: mpsc::Receiver<OutputRecord>,
    mut sinks: Vec<Box<dyn OutputSink>>,
    retry: SinkRetryConfig,
    metrics: Arc<RuntimeMetrics>,
) {
    while let Some(record) = rx.recv().await {
        let json = match serde_json::to_string(&record) {
            Ok(j) => j,
            Err(e) => {
                metrics.inc_serialize_failed();
                tl_warn!(sink, metric = record.metric_id(), error = %e, "record serialize error");
                continue;
            }
        };
        for sink in sinks.iter_mut() {
            deliver(sink.as_mut(), &json, &retry, &metrics).await;
        }
    }

    for sink in sinks.iter_mut() {
        if let Err(e) = sink.stop().await {
            tl_warn!(sink, sink = sink.name(), error = %e, "sink stop failed");
        }
    }
    tl_debug!(sink, "output dispatcher finished");
}

async fn deliver(
    sink: &mut dyn OutputSink,
    json: &str,
    retry: &SinkRetryConfig,
    metrics: &RuntimeMetrics,
) {
    let attempts = retry.max_attempts.max(1);
    let mut backoff = retry.initial_backoff.as_duration();
    let cap = retry.max_backoff.as_duration();
    for attempt in 1..=attempts {
        match sink.send(json).await {
            Ok(()) => {
                metrics.inc_sink_write();
                return;
            }
            Err(e) if attempt < attempts => {
                metrics.inc_sink_retry();
                tl_debug!(sink, sink = sink.name(), attempt, error = %e, "sink write failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff, cap);
            }
            Err(e) => {
                metrics.inc_sink_write_failed();
                tl_error!(sink, sink = sink.name(), attempts, error = %e, "sink write abandoned");
            }
        }
    }
}

fn next_backoff(current: Duration, cap: Duration) -> Duration {
    current.saturating_mul(2).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tally_config::HumanDuration;
    use tally_core::{SkipReason, SkippedBucket};

    /// Fails the first `failures` sends, then records the rest.
    struct FlakySink {
        failures: u32,
        lines: Arc<Mutex<Vec<String>>>,
        stopped: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl OutputSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn send(&mut self, json: &str) -> anyhow::Result<()> {
            if self.failures > 0 {
                self.failures -= 1;
                anyhow::bail!("transient");
            }
            self.lines.lock().unwrap().push(json.to_string());
            Ok(())
        }

        async fn stop(&mut self) -> anyhow::Result<()> {
            *self.stopped.lock().unwrap() = true;
            Ok(())
        }
    }

    fn retry(max_attempts: u32) -> SinkRetryConfig {
        SinkRetryConfig {
            max_attempts,
            initial_backoff: HumanDuration::from(Duration::from_millis(10)),
            max_backoff: HumanDuration::from(Duration::from_millis(40)),
        }
    }

    fn record(start: i64) -> OutputRecord {
        OutputRecord::Skipped(SkippedBucket {
            metric_id: "m".into(),
            start_nanos: start,
            end_nanos: start + 10,
            bucket_count: 1,
            reason: SkipReason::NoData,
        })
    }

    fn flaky(failures: u32) -> (FlakySink, Arc<Mutex<Vec<String>>>, Arc<Mutex<bool>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(Mutex::new(false));
        let sink = FlakySink {
            failures,
            lines: Arc::clone(&lines),
            stopped: Arc::clone(&stopped),
        };
        (sink, lines, stopped)
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let cap = Duration::from_millis(40);
        let mut b = Duration::from_millis(10);
        b = next_backoff(b, cap);
        assert_eq!(b, Duration::from_millis(20));
        b = next_backoff(b, cap);
        b = next_backoff(b, cap);
        assert_eq!(b, cap);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let metrics = Arc::new(RuntimeMetrics::new(&["m".to_string()]));
        let (sink, lines, stopped) = flaky(2);
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(run_output_dispatcher(
            rx,
            vec![Box::new(sink)],
            retry(3),
            Arc::clone(&metrics),
        ));
        tx.send(record(0)).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(lines.lock().unwrap().len(), 1);
        assert!(*stopped.lock().unwrap());
        assert_eq!(metrics.sink_retries(), 2);
        assert_eq!(metrics.sink_write_failed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_counted_and_skipped() {
        let metrics = Arc::new(RuntimeMetrics::new(&["m".to_string()]));
        let (sink, lines, _) = flaky(2);
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(run_output_dispatcher(
            rx,
            vec![Box::new(sink)],
            retry(2),
            Arc::clone(&metrics),
        ));
        tx.send(record(0)).await.unwrap();
        tx.send(record(10)).await.unwrap();
        drop(tx);
        task.await.unwrap();

        // first record burns both failures; the second goes through
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"start_nanos\":10"));
        assert_eq!(metrics.sink_write_failed(), 1);
        assert_eq!(metrics.sink_retries(), 1);
    }
}
