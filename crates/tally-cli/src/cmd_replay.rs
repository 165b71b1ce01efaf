use std::io::{BufRead, BufReader, IsTerminal};
use std::path::Path;

use anyhow::Result;

use tally_config::TallyConfig;
use tally_core::{DropCounters, EngineHealth, Event, Ingest, OutputRecord, RecordSink, build_record_sink};

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const YELLOW: &str = "\x1b[1;38;5;208m";
const RESET: &str = "\x1b[0m";

/// Outcome of replaying an event stream through one engine.
pub struct ReplayResult {
    pub records: Vec<OutputRecord>,
    pub event_count: u64,
    pub accepted: u64,
    pub dropped: DropCounters,
    /// Lines that were not valid events.
    pub decode_errors: u64,
    pub health: EngineHealth,
}

/// CLI entry point: replay `events`, write every record to the configured
/// sinks, print a summary to stderr.
pub fn run(config: &TallyConfig, base_dir: &Path, events: &Path, until: Option<i64>) -> Result<()> {
    let reader = BufReader::new(
        std::fs::File::open(events)
            .map_err(|e| anyhow::anyhow!("failed to open {}: {e}", events.display()))?,
    );
    let result = replay_events(config, reader, until)?;

    let sink = build_record_sink(&config.output.sinks, base_dir).map_err(|e| anyhow::anyhow!("{e}"))?;
    let mut sink_errors = 0u64;
    for record in &result.records {
        if let Err(e) = sink.send(record) {
            sink_errors += 1;
            tracing::warn!(domain = "sink", metric = record.metric_id(), error = %e, "record write failed");
        }
    }

    print_summary(&result, sink_errors, std::io::stderr().is_terminal());
    Ok(())
}

/// Pure replay: compile `config`, feed every line of `reader`, then flush at
/// `until` (default: the last accepted timestamp). Blank lines and lines
/// starting with `#` are skipped.
pub fn replay_events<R: BufRead>(
    config: &TallyConfig,
    reader: R,
    until: Option<i64>,
) -> Result<ReplayResult> {
    let mut engine = crate::cmd_check::compile(config)?;
    let mut event_count = 0u64;
    let mut accepted = 0u64;
    let mut dropped = DropCounters::default();
    let mut decode_errors = 0u64;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event = match Event::from_json_line(line) {
            Ok(e) => e,
            Err(e) => {
                decode_errors += 1;
                tracing::warn!(domain = "conf", line = idx + 1, error = %e, "skipping undecodable event");
                continue;
            }
        };
        event_count += 1;
        match engine.process(&event) {
            Ingest::Accepted => accepted += 1,
            Ingest::Dropped(reason) => dropped.record(reason),
            Ingest::Closed => break,
        }
    }

    if let Some(end) = until.or(engine.watermark()) {
        engine.shutdown(end);
    }

    Ok(ReplayResult {
        records: engine.drain(),
        event_count,
        accepted,
        dropped,
        decode_errors,
        health: engine.health(),
    })
}

fn print_summary(result: &ReplayResult, sink_errors: u64, color: bool) {
    let records = result.records.len();
    let dropped = result.dropped.total();
    eprintln!("---");
    if color {
        eprint!(
            "{BOLD}Replay complete:{RESET} {} events, {} accepted, {records} records",
            result.event_count, result.accepted
        );
        if dropped + result.decode_errors + sink_errors > 0 {
            eprintln!(
                ", {YELLOW}{dropped} dropped, {} undecodable, {sink_errors} sink errors{RESET}",
                result.decode_errors
            );
        } else {
            eprintln!(", {DIM}0 dropped{RESET}");
        }
    } else {
        eprintln!(
            "Replay complete: {} events, {} accepted, {records} records, {dropped} dropped, {} undecodable, {sink_errors} sink errors",
            result.event_count, result.accepted, result.decode_errors
        );
    }
    for (reason, n) in result.health.total_drops().iter() {
        eprintln!("  {reason}: {n}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{BucketValue, DropReason};

    const CFG: &str = r#"
[runtime]
start_time = 0

[[matcher]]
id = "crumb"
atom = 47

[[metric]]
id = "crumb_sum"
kind = "value"
what = "crumb"
value_field = "n"
bucket = "10ns"
"#;

    fn replay(input: &str, until: Option<i64>) -> ReplayResult {
        let config: TallyConfig = CFG.parse().unwrap();
        replay_events(&config, input.as_bytes(), until).unwrap()
    }

    #[test]
    fn sums_per_bucket() {
        let input = r#"
{"atom": 47, "ts": 1, "fields": {"n": 3}}
{"atom": 47, "ts": 4, "fields": {"n": 5}}
# comment
{"atom": 47, "ts": 12, "fields": {"n": 2}}
"#;
        let r = replay(input, Some(20));
        assert_eq!(r.event_count, 3);
        assert_eq!(r.accepted, 3);
        let buckets: Vec<_> = r.records.iter().filter_map(|r| r.as_bucket()).collect();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].value, BucketValue::Long(8));
        assert_eq!(buckets[1].value, BucketValue::Long(2));
        assert!(!buckets[1].partial);
    }

    #[test]
    fn bad_lines_are_counted_not_fatal() {
        let input = r#"
not json
{"atom": 47, "ts": 5, "fields": {"n": "abc"}}
{"atom": 47, "ts": 3, "fields": {"n": 1}}
{"ts": 6}
"#;
        let r = replay(input, None);
        assert_eq!(r.decode_errors, 2);
        assert_eq!(r.event_count, 2);
        assert_eq!(r.dropped.get(DropReason::UnparseableValue), 1);
        assert_eq!(r.dropped.get(DropReason::OutOfOrder), 1);
        assert_eq!(r.health.total_drops().total(), 2);
    }

    #[test]
    fn empty_input_emits_nothing() {
        let r = replay("", None);
        assert!(r.records.is_empty());
        assert_eq!(r.event_count, 0);
    }
}
