use super::*;
use crate::event::Value;
use crate::metric::{BucketRecord, BucketValue, SkipReason, SkippedBucket};

const SEC: i64 = 1_000_000_000;
const MS: i64 = 1_000_000;

/// Atom 1: breadcrumb with `state` (0 unspecified, 1 start, 2 stop) and
/// `label`. Atom 2: boot. Atom 10: plug (`state` 1 plugged, 0 unplugged).
/// Atom 20: screen (`state` 2 on, 1 off).
const MATCHERS: &str = r#"
[[matcher]]
id = "what"
atom = 1
where = [{ field = "state", eq = 0 }]

[[matcher]]
id = "start"
atom = 1
where = [{ field = "state", eq = 1 }]

[[matcher]]
id = "stop"
atom = 1
where = [{ field = "state", eq = 2 }]

[[matcher]]
id = "boot"
atom = 2

[[matcher]]
id = "plug"
atom = 10
where = [{ field = "state", eq = 1 }]

[[matcher]]
id = "unplug"
atom = 10
where = [{ field = "state", eq = 0 }]

[[matcher]]
id = "screen_on"
atom = 20
where = [{ field = "state", eq = 2 }]

[[matcher]]
id = "screen_off"
atom = 20
where = [{ field = "state", eq = 1 }]
"#;

fn defs(extra: &str) -> DefinitionSet {
    toml::from_str(&format!("{MATCHERS}\n{extra}")).unwrap()
}

fn engine_at(extra: &str, start: Option<i64>) -> MetricEngine {
    MetricEngine::new(
        &defs(extra),
        EngineOptions {
            start_nanos: start,
            ..EngineOptions::default()
        },
    )
    .unwrap()
}

fn compile_err(extra: &str) -> String {
    match MetricEngine::new(&defs(extra), EngineOptions::default()) {
        Ok(_) => panic!("expected a configuration error"),
        Err(e) => format!("{e:?}"),
    }
}

fn crumb(state: i64, label: i64, ts: i64) -> Event {
    Event::new(1, ts)
        .with_field("state", state)
        .with_field("label", label)
}

fn what(label: i64, ts: i64) -> Event {
    crumb(0, label, ts)
}

fn boot(ts: i64) -> Event {
    Event::new(2, ts)
}

fn plug(state: i64, ts: i64) -> Event {
    Event::new(10, ts).with_field("state", state)
}

fn screen(state: i64, ts: i64) -> Event {
    Event::new(20, ts).with_field("state", state)
}

fn buckets(records: &[OutputRecord]) -> Vec<&BucketRecord> {
    records.iter().filter_map(|r| r.as_bucket()).collect()
}

fn skipped(records: &[OutputRecord]) -> Vec<&SkippedBucket> {
    records.iter().filter_map(|r| r.as_skipped()).collect()
}

fn long(value: &BucketValue) -> i64 {
    match value {
        BucketValue::Long(v) => *v,
        BucketValue::Double(v) => panic!("expected an integer value, got {v}"),
    }
}

const VALUE_METRIC: &str = r#"
[[metric]]
id = "m"
kind = "value"
what = "what"
value_field = "label"
bucket = "10ns"
"#;

// ---------------------------------------------------------------------------
// Value metrics
// ---------------------------------------------------------------------------

#[test]
fn two_pairs_in_one_bucket_sum() {
    let mut engine = engine_at(
        r#"
[[metric]]
id = "m"
kind = "value"
what = "stop"
value_field = "label"
bucket = "1m"
"#,
        None,
    );
    for (i, v) in [3, 5].into_iter().enumerate() {
        let base = i as i64 * SEC;
        assert_eq!(engine.process(&crumb(1, v, base)), Ingest::Accepted);
        assert_eq!(engine.process(&crumb(2, v, base + MS)), Ingest::Accepted);
    }
    engine.advance_to(61 * SEC);

    let out = engine.drain();
    let rows = buckets(&out);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, BucketValue::Long(8));
    assert_eq!(rows[0].sample_count, 2);
    assert_eq!((rows[0].start_nanos, rows[0].end_nanos), (0, 60 * SEC));
    assert!(!rows[0].partial);
}

#[test]
fn sums_conserved_across_buckets() {
    let mut engine = engine_at(VALUE_METRIC, Some(0));
    let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut next = move |m: u64| {
        seed = seed
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (seed >> 33) % m
    };

    let mut ts = 0;
    let mut expected = 0;
    for i in 0..300 {
        // occasional gaps spanning several buckets
        ts += if i % 40 == 39 { 37 } else { next(6) as i64 };
        let v = next(101) as i64 - 50;
        expected += v;
        assert_eq!(engine.process(&what(v, ts)), Ingest::Accepted);
    }
    engine.shutdown(ts + 1);

    let out = engine.drain();
    let rows = buckets(&out);
    assert_eq!(rows.iter().map(|r| long(&r.value)).sum::<i64>(), expected);
    for pair in rows.windows(2) {
        assert!(pair[0].end_nanos <= pair[1].start_nanos);
    }
    assert!(skipped(&out).iter().all(|s| s.reason == SkipReason::NoData));
    assert_eq!(engine.health().total_drops().total(), 0);
}

#[test]
fn dimensions_partition_the_aggregate() {
    let mut engine = engine_at(&VALUE_METRIC.replace("bucket", "dimensions = [\"uid\"]\nbucket"), Some(0));
    for (uid, v, ts) in [(1, 2, 1), (2, 3, 2), (1, 4, 3)] {
        engine.process(&what(v, ts).with_field("uid", uid));
    }
    assert_eq!(
        engine.process(&what(1, 4)),
        Ingest::Dropped(DropReason::MissingField)
    );
    engine.shutdown(10);

    let out = engine.drain();
    let rows: Vec<(String, i64)> = buckets(&out)
        .iter()
        .map(|r| (r.dimension.to_string(), long(&r.value)))
        .collect();
    assert_eq!(rows, vec![("uid=1".into(), 6), ("uid=2".into(), 3)]);
}

#[test]
fn out_of_order_events_are_dropped() {
    let mut engine = engine_at(VALUE_METRIC, None);
    assert_eq!(engine.process(&what(1, 10)), Ingest::Accepted);
    assert_eq!(
        engine.process(&what(1, 5)),
        Ingest::Dropped(DropReason::OutOfOrder)
    );
    assert_eq!(engine.process(&what(1, 10)), Ingest::Accepted);

    let health = engine.health();
    assert_eq!(health.events_processed, 2);
    assert_eq!(health.event_drops.get(DropReason::OutOfOrder), 1);
    assert_eq!(health.metric("m").unwrap().samples_accepted, 2);
}

#[test]
fn configured_start_rejects_earlier_events() {
    let mut engine = engine_at(VALUE_METRIC, Some(100));
    assert_eq!(
        engine.process(&what(1, 50)),
        Ingest::Dropped(DropReason::OutOfOrder)
    );
    assert_eq!(engine.process(&what(1, 105)), Ingest::Accepted);
    assert_eq!(engine.next_deadline(), Some(110));
}

#[test]
fn unparseable_value_dropped() {
    let mut engine = engine_at(VALUE_METRIC, Some(0));
    let ev = Event::new(1, 1)
        .with_field("state", 0)
        .with_field("label", Value::from("x"));
    assert_eq!(
        engine.process(&ev),
        Ingest::Dropped(DropReason::UnparseableValue)
    );
}

// ---------------------------------------------------------------------------
// Bucket boundaries
// ---------------------------------------------------------------------------

#[test]
fn boundary_event_lands_in_new_bucket() {
    let mut engine = engine_at(VALUE_METRIC, Some(0));
    engine.process(&what(1, 9));
    engine.process(&what(2, 10));
    engine.shutdown(20);

    let out = engine.drain();
    let rows = buckets(&out);
    assert_eq!(rows.len(), 2);
    assert_eq!((rows[0].start_nanos, long(&rows[0].value)), (0, 1));
    assert_eq!((rows[1].start_nanos, long(&rows[1].value)), (10, 2));
    assert!(!rows[1].partial);
}

#[test]
fn tick_at_boundary_waits_for_events_at_that_instant() {
    let mut engine = engine_at(VALUE_METRIC, Some(0));
    engine.process(&what(1, 3));
    engine.advance_to(10);
    assert!(engine.drain().is_empty());
    engine.process(&what(2, 10));
    engine.advance_to(11);

    let out = engine.drain();
    assert_eq!(buckets(&out).len(), 1);
    assert_eq!(long(&buckets(&out)[0].value), 1);
}

#[test]
fn empty_buckets_coalesce_into_one_skip() {
    let mut engine = engine_at(VALUE_METRIC, Some(0));
    engine.process(&what(5, 5));
    engine.process(&what(7, 45));

    let out = engine.drain();
    assert_eq!(out.len(), 2);
    assert_eq!(long(&out[0].as_bucket().unwrap().value), 5);
    let skip = out[1].as_skipped().unwrap();
    assert_eq!(
        (skip.start_nanos, skip.end_nanos, skip.bucket_count),
        (10, 40, 3)
    );
    assert_eq!(skip.reason, SkipReason::NoData);

    engine.shutdown(50);
    let out = engine.drain();
    let rows = buckets(&out);
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].start_nanos, rows[0].end_nanos), (40, 50));
    assert!(!rows[0].partial);
    assert!(skipped(&out).is_empty());
}

#[test]
fn shutdown_flushes_partial_bucket() {
    let mut engine = engine_at(&VALUE_METRIC.replace("10ns", "60ns"), Some(0));
    engine.process(&what(3, 10));
    engine.shutdown(30);
    assert!(engine.is_closed());
    assert_eq!(engine.process(&what(1, 40)), Ingest::Closed);

    let out = engine.drain();
    let rows = buckets(&out);
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].start_nanos, rows[0].end_nanos), (0, 30));
    assert!(rows[0].partial);
    assert_eq!(long(&rows[0].value), 3);
}

#[test]
fn shutdown_at_bucket_start_skips_zero_length_bucket() {
    let mut engine = engine_at(VALUE_METRIC, Some(0));
    engine.process(&what(3, 1));
    engine.process(&boot(10));
    engine.shutdown(10);

    let out = engine.drain();
    assert_eq!(out.len(), 1);
    assert_eq!(buckets(&out)[0].end_nanos, 10);
}

// ---------------------------------------------------------------------------
// Activations
// ---------------------------------------------------------------------------

const ACTIVATED_COUNT: &str = r#"
[[metric]]
id = "m"
kind = "count"
what = "what"
bucket = "10ns"

[[metric.activation]]
matcher = "boot"
ttl = "5ns"
"#;

#[test]
fn ttl_window_gates_samples_within_one_bucket() {
    let mut engine = engine_at(
        &VALUE_METRIC
            .replace("10ns", "1m")
            .replace("value_field", "activation = [{ matcher = \"boot\", ttl = \"5s\" }]\nvalue_field"),
        None,
    );
    engine.process(&boot(0));
    assert_eq!(engine.process(&what(4, 4 * SEC)), Ingest::Accepted);
    engine.process(&what(6, 6 * SEC));
    engine.process(&boot(7 * SEC));
    engine.process(&what(8, 8 * SEC));
    engine.advance_to(61 * SEC);

    let out = engine.drain();
    assert_eq!(out.len(), 1);
    let row = out[0].as_bucket().unwrap();
    assert_eq!(row.value, BucketValue::Long(12));
    assert_eq!(row.sample_count, 2);
    assert_eq!((row.start_nanos, row.end_nanos), (0, 60 * SEC));
    assert_eq!(engine.health().metric("m").unwrap().samples_accepted, 2);
}

#[test]
fn deactivated_metric_emits_nothing_until_reactivated() {
    let mut engine = engine_at(ACTIVATED_COUNT, None);
    engine.process(&boot(0));
    engine.process(&what(1, 1));
    engine.process(&what(1, 50));
    engine.advance_to(100);

    let out = engine.drain();
    assert_eq!(out.len(), 1);
    assert_eq!(buckets(&out)[0].end_nanos, 10);

    // reactivation re-anchors the grid
    engine.process(&boot(105));
    engine.process(&what(1, 106));
    engine.advance_to(200);
    let out = engine.drain();
    assert_eq!(out.len(), 1);
    let row = buckets(&out)[0];
    assert_eq!((row.start_nanos, row.end_nanos), (105, 115));
    assert_eq!(row.value, BucketValue::Long(1));

    // active without data is a skipped bucket
    engine.process(&boot(300));
    engine.advance_to(400);
    let out = engine.drain();
    assert_eq!(out.len(), 1);
    let skip = out[0].as_skipped().unwrap();
    assert_eq!((skip.start_nanos, skip.end_nanos), (300, 310));
    assert_eq!(skip.reason, SkipReason::NoData);
}

#[test]
fn activation_is_evaluated_lazily() {
    let mut engine = engine_at(ACTIVATED_COUNT, None);
    assert_eq!(engine.is_active("m"), Some(false));
    engine.process(&boot(0));
    assert_eq!(engine.is_active("m"), Some(true));
    assert_eq!(engine.is_active_at("m", 4), Some(true));
    assert_eq!(engine.is_active_at("m", 5), Some(false));
    assert_eq!(engine.is_active("nope"), None);
    assert_eq!(engine.next_deadline(), Some(5));
}

#[test]
fn unactivated_metric_is_always_active() {
    let engine = engine_at(VALUE_METRIC, None);
    assert_eq!(engine.is_active("m"), Some(true));
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

const CHARGING: &str = r#"
[[condition]]
id = "charging"
start = "plug"
stop = "unplug"
"#;

#[test]
fn unknown_condition_drops_samples_for_the_window() {
    let mut engine = engine_at(
        &format!("{CHARGING}\n{}", VALUE_METRIC.replace("bucket", "condition = \"charging\"\nbucket")),
        Some(0),
    );
    assert_eq!(
        engine.process(&what(5, 1)),
        Ingest::Dropped(DropReason::ConditionUnknown)
    );
    engine.process(&plug(1, 2));
    // the window opened while UNKNOWN
    assert_eq!(
        engine.process(&what(7, 3)),
        Ingest::Dropped(DropReason::ConditionUnknown)
    );
    assert_eq!(engine.process(&what(9, 12)), Ingest::Accepted);
    engine.process(&plug(0, 14));
    assert_eq!(engine.process(&what(11, 15)), Ingest::Accepted);
    engine.advance_to(21);

    let out = engine.drain();
    assert_eq!(out.len(), 2);
    let skip = out[0].as_skipped().unwrap();
    assert_eq!((skip.start_nanos, skip.end_nanos), (0, 10));
    assert_eq!(skip.reason, SkipReason::ConditionUnknown);
    let row = out[1].as_bucket().unwrap();
    assert_eq!((row.start_nanos, long(&row.value)), (10, 9));

    let health = engine.health();
    assert_eq!(
        health.metric("m").unwrap().drops.get(DropReason::ConditionUnknown),
        2
    );
}

#[test]
fn condition_and_activation_together() {
    let mut engine = engine_at(
        r#"
[[matcher]]
id = "cond_start"
atom = 1
where = [{ field = "state", eq = 1 }, { field = "label", eq = 2 }]

[[matcher]]
id = "cond_stop"
atom = 1
where = [{ field = "state", eq = 2 }, { field = "label", eq = 2 }]

[[matcher]]
id = "activate"
atom = 1
where = [{ field = "state", eq = 1 }, { field = "label", eq = 5 }]

[[condition]]
id = "predicate"
start = "cond_start"
stop = "cond_stop"

[[metric]]
id = "m"
kind = "value"
what = "what"
value_field = "label"
bucket = "1m"
condition = "predicate"

[[metric.activation]]
matcher = "activate"
ttl = "5s"
"#,
        None,
    );

    let steps = [
        (crumb(1, 5, 0), Ingest::Accepted),
        (crumb(1, 2, 10 * MS), Ingest::Accepted),
        (what(10, 20 * MS), Ingest::Dropped(DropReason::ConditionUnknown)),
        (what(200, 30 * MS), Ingest::Dropped(DropReason::ConditionUnknown)),
        (crumb(2, 2, 40 * MS), Ingest::Accepted),
        (what(3_000, 50 * MS), Ingest::Dropped(DropReason::ConditionUnknown)),
        (what(40_000, 5_060 * MS), Ingest::Accepted),
        (crumb(1, 2, 5_070 * MS), Ingest::Accepted),
        (what(500_000, 5_080 * MS), Ingest::Accepted),
        (crumb(1, 5, 5_090 * MS), Ingest::Accepted),
        (what(6_000_000, 5_100 * MS), Ingest::Accepted),
        (what(70_000_000, 10_110 * MS), Ingest::Accepted),
    ];
    for (event, expected) in &steps {
        assert_eq!(engine.process(event), *expected, "at {}", event.timestamp_nanos);
    }
    engine.advance_to(12_110 * MS);
    assert_eq!(engine.is_active("m"), Some(false));
    engine.shutdown(12_110 * MS);

    let out = engine.drain();
    assert!(skipped(&out).is_empty());
    let rows = buckets(&out);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, BucketValue::Long(6_000_000));
    assert_eq!(rows[0].sample_count, 1);
    assert!(rows[0].partial);
    assert_eq!(engine.health().metric("m").unwrap().samples_accepted, 1);
}

#[test]
fn linked_condition_slices_by_metric_field() {
    let mut engine = engine_at(
        r#"
[[condition]]
id = "charging"
start = "plug"
stop = "unplug"
dimensions = ["uid"]
initial = "false"

[[metric]]
id = "m"
kind = "count"
what = "what"
bucket = "100ns"
condition = "charging"
links = [{ what = "app_uid", condition = "uid" }]
"#,
        Some(0),
    );
    engine.process(&plug(1, 1).with_field("uid", 1));
    assert_eq!(
        engine.process(&what(0, 2).with_field("app_uid", 1)),
        Ingest::Accepted
    );
    // FALSE is excluded silently
    assert_eq!(
        engine.process(&what(0, 3).with_field("app_uid", 2)),
        Ingest::Accepted
    );
    assert_eq!(
        engine.process(&what(0, 4)),
        Ingest::Dropped(DropReason::MissingField)
    );
    engine.shutdown(10);

    let out = engine.drain();
    let rows = buckets(&out);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, BucketValue::Long(1));
}

#[test]
fn linked_slice_is_judged_on_its_own_when_overall_state_unknown() {
    let mut engine = engine_at(
        r#"
[[condition]]
id = "charging"
start = "plug"
stop = "unplug"
dimensions = ["uid"]

[[metric]]
id = "m"
kind = "count"
what = "what"
bucket = "50ns"
condition = "charging"
links = [{ what = "app_uid", condition = "uid" }]
"#,
        Some(0),
    );
    engine.process(&plug(1, 1).with_field("uid", 1));
    assert_eq!(
        engine.process(&what(0, 2).with_field("app_uid", 1)),
        Ingest::Accepted
    );
    // uid 2 was never seen
    assert_eq!(
        engine.process(&what(0, 3).with_field("app_uid", 2)),
        Ingest::Dropped(DropReason::ConditionUnknown)
    );
    engine.shutdown(50);

    let out = engine.drain();
    assert!(skipped(&out).is_empty());
    let rows = buckets(&out);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, BucketValue::Long(1));
    assert!(!rows[0].partial);
}

#[test]
fn ambiguous_condition_event_is_dropped() {
    let mut engine = engine_at(
        r#"
[[matcher]]
id = "any_plug"
atom = 10

[[condition]]
id = "odd"
start = "plug"
stop = "any_plug"

[[metric]]
id = "m"
kind = "count"
what = "what"
bucket = "10ns"
"#,
        Some(0),
    );
    assert_eq!(
        engine.process(&plug(1, 1)),
        Ingest::Dropped(DropReason::AmbiguousCondition)
    );
    assert_eq!(
        engine
            .health()
            .event_drops
            .get(DropReason::AmbiguousCondition),
        1
    );
}

// ---------------------------------------------------------------------------
// Duration metrics
// ---------------------------------------------------------------------------

const DURATION_METRIC: &str = r#"
[[metric]]
id = "d"
kind = "duration"
start = "start"
stop = "stop"
bucket = "10ns"
"#;

#[test]
fn duration_splits_across_boundaries() {
    let mut engine = engine_at(DURATION_METRIC, Some(0));
    engine.process(&crumb(1, 0, 5));
    engine.process(&crumb(2, 0, 37));
    engine.advance_to(41);

    let out = engine.drain();
    let parts: Vec<(i64, i64)> = buckets(&out)
        .iter()
        .map(|r| (r.start_nanos, long(&r.value)))
        .collect();
    assert_eq!(parts, vec![(0, 5), (10, 10), (20, 10), (30, 7)]);
    assert_eq!(parts.iter().map(|(_, v)| v).sum::<i64>(), 37 - 5);
}

#[test]
fn duration_accrues_only_while_condition_true() {
    let mut engine = engine_at(
        &format!(
            r#"
[[condition]]
id = "screen"
start = "screen_on"
stop = "screen_off"
initial = "false"
{}"#,
            DURATION_METRIC
                .replace("10ns", "100ns")
                .replace("bucket", "condition = \"screen\"\nbucket")
        ),
        Some(0),
    );
    engine.process(&crumb(1, 0, 10));
    engine.process(&screen(2, 20));
    engine.process(&screen(1, 30));
    engine.process(&screen(2, 40));
    engine.process(&crumb(2, 0, 45));
    engine.shutdown(100);

    let out = engine.drain();
    let rows = buckets(&out);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, BucketValue::Long(15));
    assert_eq!(rows[0].sample_count, 2);
}

#[test]
fn max_duration_lands_in_the_bucket_where_it_ends() {
    let mut engine = engine_at(
        &DURATION_METRIC.replace("bucket", "aggregation = \"max_sparse\"\nbucket"),
        Some(0),
    );
    engine.process(&crumb(1, 0, 5));
    engine.process(&crumb(2, 0, 37));
    engine.advance_to(41);

    let out = engine.drain();
    let rows = buckets(&out);
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].start_nanos, long(&rows[0].value)), (30, 32));
    let skips = skipped(&out);
    assert_eq!(skips.len(), 1);
    assert_eq!((skips[0].start_nanos, skips[0].end_nanos), (0, 30));
    assert_eq!(skips[0].bucket_count, 3);
}

#[test]
fn max_duration_counts_only_condition_true_time() {
    let mut engine = engine_at(
        &format!(
            r#"
[[condition]]
id = "screen"
start = "screen_on"
stop = "screen_off"
initial = "false"
{}"#,
            DURATION_METRIC
                .replace("10ns", "100ns")
                .replace("bucket", "condition = \"screen\"\naggregation = \"max_sparse\"\nbucket")
        ),
        Some(0),
    );
    engine.process(&crumb(1, 0, 10));
    engine.process(&screen(2, 20));
    engine.process(&screen(1, 30));
    engine.process(&screen(2, 40));
    engine.process(&crumb(2, 0, 45));
    engine.process(&crumb(1, 0, 50));
    engine.process(&crumb(2, 0, 53));
    engine.shutdown(100);

    let out = engine.drain();
    let rows = buckets(&out);
    assert_eq!(rows.len(), 1);
    // 20..30 + 40..45 beats 50..53
    assert_eq!(rows[0].value, BucketValue::Long(15));
    assert_eq!(rows[0].sample_count, 2);
    assert!(!rows[0].partial);
}

#[test]
fn duration_open_at_shutdown_counts_to_now() {
    let mut engine = engine_at(DURATION_METRIC, Some(0));
    engine.process(&crumb(1, 0, 12));
    engine.shutdown(16);

    let out = engine.drain();
    let rows = buckets(&out);
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].start_nanos, rows[0].end_nanos), (10, 16));
    assert_eq!(rows[0].value, BucketValue::Long(4));
    assert!(rows[0].partial);
    // [0, 10) had no interval
    assert_eq!(skipped(&out).len(), 1);
}

#[test]
fn duration_pauses_while_inactive() {
    let mut engine = engine_at(
        &format!(
            "{}\n[[metric.activation]]\nmatcher = \"boot\"\nttl = \"5ns\"\n",
            DURATION_METRIC.replace("10ns", "100ns")
        ),
        None,
    );
    engine.process(&boot(0));
    engine.process(&crumb(1, 0, 2));
    engine.process(&boot(20));
    engine.process(&crumb(2, 0, 23));
    engine.advance_to(101);

    let out = engine.drain();
    let rows = buckets(&out);
    assert_eq!(rows.len(), 1);
    // 2..5 and 20..23
    assert_eq!(rows[0].value, BucketValue::Long(6));
}

#[test]
fn duration_start_and_stop_on_one_event_is_dropped() {
    let mut engine = engine_at(
        r#"
[[matcher]]
id = "labelled"
atom = 1
where = [{ field = "label", eq = 9 }]

[[metric]]
id = "d"
kind = "duration"
start = "start"
stop = "labelled"
bucket = "10ns"
"#,
        Some(0),
    );
    assert_eq!(
        engine.process(&crumb(1, 9, 1)),
        Ingest::Dropped(DropReason::AmbiguousCondition)
    );
}

// ---------------------------------------------------------------------------
// Event metrics
// ---------------------------------------------------------------------------

#[test]
fn event_metric_emits_qualifying_events_unbucketed() {
    let mut engine = engine_at(
        r#"
[[condition]]
id = "screen"
start = "screen_on"
stop = "screen_off"
initial = "false"

[[metric]]
id = "seen"
kind = "event"
what = "what"
condition = "screen"
"#,
        Some(0),
    );
    assert_eq!(engine.process(&what(5, 1)), Ingest::Accepted);
    engine.process(&screen(2, 2));
    engine.process(&what(7, 3));
    engine.process(&screen(1, 4));
    engine.process(&what(9, 5));
    assert_eq!(engine.next_deadline(), None);
    engine.shutdown(1_000);

    let out = engine.drain();
    assert_eq!(out.len(), 1);
    let rec = out[0].as_event().unwrap();
    assert_eq!(rec.metric_id, "seen");
    assert_eq!(rec.timestamp_nanos, 3);
    assert_eq!(rec.fields.get("label"), Some(&Value::Int(7)));
    let health = engine.health();
    assert_eq!(health.metric("seen").unwrap().events_emitted, 1);
    assert_eq!(health.metric("seen").unwrap().buckets_emitted, 0);
}

#[test]
fn event_metric_follows_activation() {
    let mut engine = engine_at(
        r#"
[[metric]]
id = "seen"
kind = "event"
what = "what"

[[metric.activation]]
matcher = "boot"
ttl = "5ns"
"#,
        None,
    );
    engine.process(&what(1, 0));
    engine.process(&boot(1));
    engine.process(&what(2, 3));
    engine.process(&what(3, 6));
    assert_eq!(engine.is_active("seen"), Some(false));

    let out = engine.drain();
    let stamps: Vec<i64> = out
        .iter()
        .filter_map(|r| r.as_event())
        .map(|e| e.timestamp_nanos)
        .collect();
    assert_eq!(stamps, vec![3]);
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[test]
fn alert_fires_over_window_of_buckets() {
    let mut engine = engine_at(
        r#"
[[metric]]
id = "m"
kind = "count"
what = "what"
bucket = "10ns"

[[alert]]
id = "busy"
metric = "m"
num_buckets = 2
trigger_if_sum_gt = 3.0
"#,
        Some(0),
    );
    for ts in [1, 2, 11, 12] {
        engine.process(&what(0, ts));
    }
    engine.advance_to(21);

    let out = engine.drain();
    let alerts: Vec<_> = out.iter().filter_map(|r| r.as_alert()).collect();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].bucket_num, 1);
    assert_eq!(alerts[0].window_sum, 4.0);
    assert_eq!(alerts[0].fired_at_nanos, 20);
    assert!(out.last().unwrap().as_alert().is_some());
    assert_eq!(engine.health().metric("m").unwrap().alerts_emitted, 1);
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[test]
fn configuration_errors_are_fatal() {
    assert!(compile_err(&VALUE_METRIC.replace("what = \"what\"", "what = \"nope\"")).contains("unknown matcher"));
    assert!(compile_err(&format!("{VALUE_METRIC}{VALUE_METRIC}")).contains("duplicate metric id"));
    assert!(compile_err(&format!(
        "{VALUE_METRIC}\n[[alert]]\nid = \"a\"\nmetric = \"other\"\nnum_buckets = 1\ntrigger_if_sum_gt = 1.0\n"
    ))
    .contains("unknown metric"));
    assert!(compile_err(&VALUE_METRIC.replace("bucket", "condition = \"nope\"\nbucket")).contains("unknown condition"));
    assert!(compile_err(&DURATION_METRIC.replace("stop = \"stop\"", "stop = \"start\"")).contains("same matcher"));
    assert!(compile_err(&format!(
        "{CHARGING}\n{}",
        VALUE_METRIC.replace("bucket", "condition = \"charging\"\nlinks = [{ what = \"uid\", condition = \"uid\" }]\nbucket")
    ))
    .contains("links require"));
    assert!(compile_err("").contains("no metrics"));
    assert!(compile_err(
        "[[metric]]\nid = \"e\"\nkind = \"event\"\nwhat = \"what\"\n\n[[alert]]\nid = \"a\"\nmetric = \"e\"\nnum_buckets = 1\ntrigger_if_sum_gt = 1.0\n"
    )
    .contains("bucketed"));
}
