use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use tally_core::{DropReason, OutputRecord};

/// Host-side counters shared by the pipeline and output tasks.
///
/// Engine-internal health (samples accepted, drops per metric) lives in
/// `EngineHealth`; these count what only the runtime sees: ingestion, ticks,
/// queue overflow and sink delivery. Per-metric label sets are fixed at
/// startup so hot-path updates never allocate.
pub struct RuntimeMetrics {
    events_ingested_total: AtomicU64,
    events_rejected_total: AtomicU64,
    ticks_total: AtomicU64,

    records_emitted_total: BTreeMap<String, BTreeMap<&'static str, AtomicU64>>,
    samples_dropped_total: BTreeMap<String, BTreeMap<DropReason, AtomicU64>>,
    flush_dropped_total: BTreeMap<String, AtomicU64>,

    sink_writes_total: AtomicU64,
    sink_write_failed_total: AtomicU64,
    sink_retries_total: AtomicU64,
    serialize_failed_total: AtomicU64,
}

const RECORD_KINDS: [&str; 4] = ["bucket", "skipped", "alert", "event"];

impl RuntimeMetrics {
    pub fn new(metric_ids: &[String]) -> Self {
        Self {
            events_ingested_total: AtomicU64::new(0),
            events_rejected_total: AtomicU64::new(0),
            ticks_total: AtomicU64::new(0),
            records_emitted_total: metric_ids
                .iter()
                .map(|id| {
                    let kinds = RECORD_KINDS
                        .iter()
                        .map(|k| (*k, AtomicU64::new(0)))
                        .collect();
                    (id.clone(), kinds)
                })
                .collect(),
            samples_dropped_total: metric_ids
                .iter()
                .map(|id| {
                    let reasons = DropReason::ALL
                        .iter()
                        .map(|r| (*r, AtomicU64::new(0)))
                        .collect();
                    (id.clone(), reasons)
                })
                .collect(),
            flush_dropped_total: metric_ids
                .iter()
                .map(|id| (id.clone(), AtomicU64::new(0)))
                .collect(),
            sink_writes_total: AtomicU64::new(0),
            sink_write_failed_total: AtomicU64::new(0),
            sink_retries_total: AtomicU64::new(0),
            serialize_failed_total: AtomicU64::new(0),
        }
    }

    pub fn inc_events_ingested(&self) {
        self.events_ingested_total.fetch_add(1, Ordering::Relaxed);
    }

    /// An event no pipeline queue would take (runtime closed).
    pub fn inc_events_rejected(&self) {
        self.events_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ticks(&self) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_record_emitted(&self, record: &OutputRecord) {
        if let Some(kinds) = self.records_emitted_total.get(record.metric_id())
            && let Some(counter) = kinds.get(record.kind())
        {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_samples_dropped(&self, metric_id: &str, reason: DropReason, n: u64) {
        if let Some(reasons) = self.samples_dropped_total.get(metric_id)
            && let Some(counter) = reasons.get(&reason)
        {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Output queue full or closed; the record is lost.
    pub fn inc_flush_dropped(&self, metric_id: &str) {
        if let Some(counter) = self.flush_dropped_total.get(metric_id) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_sink_write(&self) {
        self.sink_writes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sink_write_failed(&self) {
        self.sink_write_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sink_retry(&self) {
        self.sink_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_serialize_failed(&self) {
        self.serialize_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_ingested(&self) -> u64 {
        self.events_ingested_total.load(Ordering::Relaxed)
    }

    pub fn sink_write_failed(&self) -> u64 {
        self.sink_write_failed_total.load(Ordering::Relaxed)
    }

    pub fn sink_retries(&self) -> u64 {
        self.sink_retries_total.load(Ordering::Relaxed)
    }

    pub fn flush_dropped(&self) -> u64 {
        sum(self.flush_dropped_total.values())
    }

    pub fn records_emitted(&self, metric_id: &str, kind: &str) -> u64 {
        self.records_emitted_total
            .get(metric_id)
            .and_then(|kinds| kinds.get(kind))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Prometheus text exposition of every counter.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let mut rendered_types = BTreeSet::new();

        render_counter(
            &mut out,
            &mut rendered_types,
            "tally_events_ingested_total",
            self.events_ingested_total.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            &mut rendered_types,
            "tally_events_rejected_total",
            self.events_rejected_total.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            &mut rendered_types,
            "tally_ticks_total",
            self.ticks_total.load(Ordering::Relaxed),
        );

        for (metric, kinds) in &self.records_emitted_total {
            for (kind, value) in kinds {
                render_counter_labeled(
                    &mut out,
                    &mut rendered_types,
                    "tally_records_emitted_total",
                    &[("metric", metric.as_str()), ("kind", *kind)],
                    value.load(Ordering::Relaxed),
                );
            }
        }
        for (metric, reasons) in &self.samples_dropped_total {
            for (reason, value) in reasons {
                render_counter_labeled(
                    &mut out,
                    &mut rendered_types,
                    "tally_samples_dropped_total",
                    &[("metric", metric.as_str()), ("reason", reason.as_str())],
                    value.load(Ordering::Relaxed),
                );
            }
        }
        for (metric, value) in &self.flush_dropped_total {
            render_counter_labeled(
                &mut out,
                &mut rendered_types,
                "tally_flush_dropped_total",
                &[("metric", metric.as_str())],
                value.load(Ordering::Relaxed),
            );
        }

        render_counter(
            &mut out,
            &mut rendered_types,
            "tally_sink_writes_total",
            self.sink_writes_total.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            &mut rendered_types,
            "tally_sink_write_failed_total",
            self.sink_write_failed_total.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            &mut rendered_types,
            "tally_sink_retries_total",
            self.sink_retries_total.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            &mut rendered_types,
            "tally_serialize_failed_total",
            self.serialize_failed_total.load(Ordering::Relaxed),
        );
        out
    }

    /// One-line digest for the shutdown log.
    pub fn summary_line(&self) -> String {
        let records: u64 = self
            .records_emitted_total
            .values()
            .map(|kinds| sum(kinds.values()))
            .sum();
        let dropped: u64 = self
            .samples_dropped_total
            .values()
            .map(|reasons| sum(reasons.values()))
            .sum();
        format!(
            "events={} ticks={} records={} samples_dropped={} flush_dropped={} sink_failed={} sink_retries={}",
            self.events_ingested_total.load(Ordering::Relaxed),
            self.ticks_total.load(Ordering::Relaxed),
            records,
            dropped,
            self.flush_dropped(),
            self.sink_write_failed_total.load(Ordering::Relaxed),
            self.sink_retries_total.load(Ordering::Relaxed),
        )
    }
}

fn sum<'a>(counters: impl Iterator<Item = &'a AtomicU64>) -> u64 {
    counters.map(|c| c.load(Ordering::Relaxed)).sum()
}

fn render_counter(out: &mut String, rendered_types: &mut BTreeSet<String>, name: &str, value: u64) {
    render_type_once(out, rendered_types, name, "counter");
    let _ = writeln!(out, "{name} {value}");
}

fn render_counter_labeled(
    out: &mut String,
    rendered_types: &mut BTreeSet<String>,
    name: &str,
    labels: &[(&str, &str)],
    value: u64,
) {
    render_type_once(out, rendered_types, name, "counter");
    let _ = writeln!(out, "{name}{} {value}", format_labels(labels));
}

fn render_type_once(out: &mut String, rendered_types: &mut BTreeSet<String>, name: &str, kind: &str) {
    if rendered_types.insert(name.to_string()) {
        let _ = writeln!(out, "# TYPE {name} {kind}");
    }
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let body = labels
        .iter()
        .map(|(key, value)| {
            let escaped = value
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n");
            format!("{key}=\"{escaped}\"")
        })
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{body}}}")
}
