use std::path::Path;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use tally_config::TallyConfig;
use tally_core::Event;
use tally_runtime::{Runtime, wait_for_signal};

/// Feed events into the async runtime until input ends or a signal arrives,
/// then flush and wait for every task.
pub async fn run(
    config: TallyConfig,
    base_dir: &Path,
    events: &str,
    live: bool,
    until: Option<i64>,
) -> Result<()> {
    let tick_interval = config.runtime.tick_interval.as_duration();
    let mut runtime = Runtime::start(config, base_dir)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    if live {
        runtime.start_clock(tick_interval);
    }

    let cancel = runtime.cancel_token();
    let fed = if events == "-" {
        let input = BufReader::new(tokio::io::stdin());
        tokio::select! {
            res = feed(&runtime, input) => Some(res),
            _ = wait_for_signal(cancel) => None,
        }
    } else {
        let file = tokio::fs::File::open(events)
            .await
            .map_err(|e| anyhow::anyhow!("failed to open {events}: {e}"))?;
        tokio::select! {
            res = feed(&runtime, BufReader::new(file)) => Some(res),
            _ = wait_for_signal(cancel) => None,
        }
    };

    match fed {
        Some(res) => {
            let n = res?;
            tracing::info!(domain = "sys", events = n, "input exhausted");
            runtime.shutdown(until).await;
        }
        None => tracing::info!(domain = "sys", "interrupted, flushing at watermark"),
    }

    let metrics = runtime.metrics();
    runtime.wait().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    eprintln!("{}", metrics.summary_line());
    Ok(())
}

/// Decode and ingest every line. Returns the number of events ingested.
async fn feed<R: AsyncBufRead + Unpin>(runtime: &Runtime, reader: R) -> Result<u64> {
    let mut lines = reader.lines();
    let mut n = 0u64;
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Event::from_json_line(line) {
            Ok(event) => {
                runtime
                    .ingest(event)
                    .await
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                n += 1;
            }
            Err(e) => {
                tracing::warn!(domain = "conf", line = line_no, error = %e, "skipping undecodable event");
            }
        }
    }
    Ok(n)
}
