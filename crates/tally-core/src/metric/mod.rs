//! Per-metric bucket pipelines: the bucket grid, accumulation windows,
//! skipped-bucket bookkeeping and anomaly feeding.

mod bucket;
mod duration;
mod types;
mod value;

use tally_config::{MetricDef, MetricKindDef};

use crate::activation::ActivationTracker;
use crate::anomaly::AnomalyTracker;
use crate::condition::{ConditionIdx, ConditionSet, ConditionState, ConditionUpdate};
use crate::dimension::DimensionKey;
use crate::error::{CoreResult, config_error};
use crate::event::Event;
use crate::matcher::{MatchResults, MatcherIdx, MatcherSet};
use crate::output::OutputRecord;
use crate::sample::{DropCounters, DropReason};

use bucket::{BucketClock, BucketSpan};
use duration::DurationAggregator;
use value::{ValueAggregator, ValueMode};

pub use types::{BucketRecord, BucketValue, EventRecord, SkipReason, SkippedBucket};

/// Shared tracker state a pipeline reads but never mutates.
#[derive(Clone, Copy)]
pub(crate) struct Env<'a> {
    pub conditions: &'a ConditionSet,
    pub activations: &'a ActivationTracker,
}

/// What one event did to one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SampleOutcome {
    /// The event was not a sample of this metric, or was silently excluded.
    Ignored,
    Accepted,
    Dropped(DropReason),
}

#[derive(Debug)]
struct ConditionBinding {
    idx: ConditionIdx,
    /// `(metric field, condition dimension)` in the condition's dimension order.
    links: Vec<(String, String)>,
}

#[derive(Debug)]
enum Aggregator {
    Value(ValueAggregator),
    Duration(DurationAggregator),
    /// Unbucketed: qualifying events are emitted as they arrive.
    Event { what: MatcherIdx },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub samples_accepted: u64,
    pub buckets_emitted: u64,
    pub skipped_emitted: u64,
    pub alerts_emitted: u64,
    pub events_emitted: u64,
}

#[derive(Debug)]
pub(crate) struct MetricPipeline {
    id: String,
    slot: usize,
    dimensions: Vec<String>,
    max_dimensions: usize,
    condition: Option<ConditionBinding>,
    aggregator: Aggregator,
    clock: BucketClock,
    active: bool,
    /// The unlinked condition was UNKNOWN when the current accumulation
    /// window opened.
    window_unknown: bool,
    bucket_unknown_drops: u64,
    pending_skip: Option<SkippedBucket>,
    alerts: Vec<AnomalyTracker>,
    drops: DropCounters,
    stats: PipelineStats,
}

impl MetricPipeline {
    pub(crate) fn compile(
        def: &MetricDef,
        slot: usize,
        matchers: &MatcherSet,
        conditions: &ConditionSet,
        default_limit: usize,
        alerts: Vec<AnomalyTracker>,
    ) -> CoreResult<Self> {
        let referrer = format!("metric {:?}", def.id);
        let bucket_nanos = def.bucket.map_or(0, |b| b.as_nanos_i64());
        if def.kind.is_bucketed() && bucket_nanos <= 0 {
            return Err(config_error(format!("{referrer}: bucket size must be positive")));
        }
        if !def.kind.is_bucketed() && !alerts.is_empty() {
            return Err(config_error(format!(
                "{referrer}: alerts need a bucketed metric"
            )));
        }

        let aggregator = match &def.kind {
            MetricKindDef::Value {
                what,
                value_field,
                aggregation,
            } => Aggregator::Value(ValueAggregator::new(
                matchers.resolve(what, &referrer)?,
                ValueMode::Field {
                    field: value_field.clone(),
                    aggregation: *aggregation,
                },
            )),
            MetricKindDef::Count { what } => Aggregator::Value(ValueAggregator::new(
                matchers.resolve(what, &referrer)?,
                ValueMode::Count,
            )),
            MetricKindDef::Duration {
                start,
                stop,
                stop_all,
                nested,
                aggregation,
            } => {
                if start == stop {
                    return Err(config_error(format!(
                        "{referrer}: start and stop use the same matcher {start:?}"
                    )));
                }
                Aggregator::Duration(DurationAggregator::new(
                    matchers.resolve(start, &referrer)?,
                    matchers.resolve(stop, &referrer)?,
                    stop_all
                        .as_deref()
                        .map(|id| matchers.resolve(id, &referrer))
                        .transpose()?,
                    *nested,
                    *aggregation,
                ))
            }
            MetricKindDef::Event { what } => Aggregator::Event {
                what: matchers.resolve(what, &referrer)?,
            },
        };

        let condition = match &def.condition {
            Some(id) => {
                let idx = conditions.resolve(id, &referrer)?;
                let links = bind_links(def, conditions.dimensions(idx), &referrer)?;
                Some(ConditionBinding { idx, links })
            }
            None if !def.links.is_empty() => {
                return Err(config_error(format!("{referrer}: links without a condition")));
            }
            None => None,
        };

        Ok(Self {
            id: def.id.clone(),
            slot,
            dimensions: def.dimensions.clone(),
            max_dimensions: def.max_dimensions.unwrap_or(default_limit),
            condition,
            aggregator,
            clock: BucketClock::new(bucket_nanos),
            active: false,
            window_unknown: false,
            bucket_unknown_drops: 0,
            pending_skip: None,
            alerts,
            drops: DropCounters::default(),
            stats: PipelineStats::default(),
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    /// Activation state as of the last time advance this pipeline saw.
    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn drops(&self) -> &DropCounters {
        &self.drops
    }

    pub(crate) fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Engine start: unactivated metrics open their first bucket here.
    pub(crate) fn start(&mut self, now: i64, env: Env<'_>) {
        if env.activations.is_active(self.slot, now) {
            self.activate(now, env);
        }
    }

    /// Earliest instant at which this pipeline changes state on its own.
    pub(crate) fn next_deadline(&self, env: Env<'_>) -> Option<i64> {
        let bucket_end = self.clock.current().map(|span| span.end);
        let expiry = if self.active && env.activations.has_activations(self.slot) {
            env.activations.deactivation_at(self.slot, i64::MIN)
        } else {
            None
        };
        match (bucket_end, expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire every deadline before `limit`, or up to and including it when
    /// `inclusive`.
    pub(crate) fn advance(
        &mut self,
        limit: i64,
        inclusive: bool,
        env: Env<'_>,
        out: &mut Vec<OutputRecord>,
    ) {
        while let Some(deadline) = self.next_deadline(env) {
            if deadline > limit || (!inclusive && deadline == limit) {
                break;
            }
            if !self.fire(deadline, env, out) {
                break;
            }
        }
    }

    fn fire(&mut self, at: i64, env: Env<'_>, out: &mut Vec<OutputRecord>) -> bool {
        if let Some(span) = self.clock.current()
            && span.end <= at
        {
            self.roll(span, env, out);
            return true;
        }
        if self.active && !env.activations.is_active(self.slot, at) {
            self.deactivate(at);
            return true;
        }
        false
    }

    /// Close `span` at its nominal end. The next bucket opens only if the
    /// metric is still active at the boundary.
    fn roll(&mut self, span: BucketSpan, env: Env<'_>, out: &mut Vec<OutputRecord>) {
        if let Aggregator::Duration(d) = &mut self.aggregator {
            d.accrue_to(span.end);
        }
        self.flush_bucket(span, span.end, true, out);
        if self.active && env.activations.is_active(self.slot, span.end) {
            self.clock.roll();
            self.open_window(env);
        } else {
            self.clock.close();
            if self.active {
                self.deactivate(span.end);
            }
        }
    }

    fn bucketed(&self) -> bool {
        !matches!(self.aggregator, Aggregator::Event { .. })
    }

    fn activate(&mut self, at: i64, env: Env<'_>) {
        self.active = true;
        if self.bucketed() && self.clock.current().is_none() {
            self.clock.open_at(at);
        }
        self.open_window(env);
        let condition = &self.condition;
        if let Aggregator::Duration(d) = &mut self.aggregator {
            d.regate(at, |link| gate_open(true, condition, env, link));
        }
    }

    fn deactivate(&mut self, at: i64) {
        self.active = false;
        if let Aggregator::Duration(d) = &mut self.aggregator {
            d.regate(at, |_| false);
        }
    }

    /// Linked metrics are judged per slice at each sample; only the overall
    /// state can poison a window.
    fn open_window(&mut self, env: Env<'_>) {
        let bucketed = self.bucketed();
        self.window_unknown = self.condition.as_ref().is_some_and(|b| {
            bucketed
                && b.links.is_empty()
                && env.conditions.query(b.idx, None) == ConditionState::Unknown
        });
    }

    /// Emit the rows of `span`, ending at `end`. An empty bucket becomes (or
    /// extends) the pending skipped record when `emit_empty` is set.
    fn flush_bucket(
        &mut self,
        span: BucketSpan,
        end: i64,
        emit_empty: bool,
        out: &mut Vec<OutputRecord>,
    ) {
        let rows = match &mut self.aggregator {
            Aggregator::Value(v) => v.take_bucket(),
            Aggregator::Duration(d) => d.take_bucket(),
            Aggregator::Event { .. } => Vec::new(),
        };
        let unknown_drops = std::mem::take(&mut self.bucket_unknown_drops);

        if rows.is_empty() {
            if emit_empty {
                let reason = if unknown_drops > 0 {
                    SkipReason::ConditionUnknown
                } else {
                    SkipReason::NoData
                };
                self.skip(span.start, end, reason, out);
            }
            return;
        }

        self.flush_pending(out);
        let partial = end < span.end;
        let window: Vec<(DimensionKey, f64)> = rows
            .iter()
            .map(|(key, value, _)| (key.clone(), value.as_f64()))
            .collect();
        for (dimension, value, sample_count) in rows {
            out.push(OutputRecord::Bucket(BucketRecord {
                metric_id: self.id.clone(),
                dimension,
                start_nanos: span.start,
                end_nanos: end,
                value,
                sample_count,
                partial,
            }));
            self.stats.buckets_emitted += 1;
        }
        for tracker in &mut self.alerts {
            for alert in tracker.on_bucket(span.num, end, &window) {
                out.push(OutputRecord::Alert(alert));
                self.stats.alerts_emitted += 1;
            }
        }
    }

    fn skip(&mut self, start: i64, end: i64, reason: SkipReason, out: &mut Vec<OutputRecord>) {
        if let Some(pending) = &mut self.pending_skip
            && pending.end_nanos == start
            && pending.reason == reason
        {
            pending.end_nanos = end;
            pending.bucket_count += 1;
            return;
        }
        self.flush_pending(out);
        self.pending_skip = Some(SkippedBucket {
            metric_id: self.id.clone(),
            start_nanos: start,
            end_nanos: end,
            bucket_count: 1,
            reason,
        });
    }

    /// Emit the coalesced skipped record, if any. Called once per time advance.
    pub(crate) fn flush_pending(&mut self, out: &mut Vec<OutputRecord>) {
        if let Some(skipped) = self.pending_skip.take() {
            out.push(OutputRecord::Skipped(skipped));
            self.stats.skipped_emitted += 1;
        }
    }

    /// Apply one event. Trackers have already seen it; timers before its
    /// timestamp have already fired.
    pub(crate) fn on_event(
        &mut self,
        event: &Event,
        matches: &MatchResults,
        update: &ConditionUpdate,
        env: Env<'_>,
        out: &mut Vec<OutputRecord>,
    ) -> SampleOutcome {
        let ts = event.timestamp_nanos;
        while let Some(span) = self.clock.current()
            && span.end <= ts
        {
            self.roll(span, env, out);
        }

        match (self.active, env.activations.is_active(self.slot, ts)) {
            (false, true) => self.activate(ts, env),
            (true, false) => self.deactivate(ts),
            _ => {}
        }

        let what = match &self.aggregator {
            Aggregator::Value(v) => Some(v.what),
            Aggregator::Event { what } => Some(*what),
            Aggregator::Duration(_) => None,
        };
        let outcome = match what {
            Some(what) if !matches.get(what) => SampleOutcome::Ignored,
            Some(_) => match self.try_sample(event, env, out) {
                Ok(true) => SampleOutcome::Accepted,
                Ok(false) => SampleOutcome::Ignored,
                Err(reason) => SampleOutcome::Dropped(reason),
            },
            None => self.on_duration_event(event, matches, update, env),
        };
        match outcome {
            SampleOutcome::Accepted => self.stats.samples_accepted += 1,
            SampleOutcome::Dropped(reason) => self.drops.record(reason),
            SampleOutcome::Ignored => {}
        }
        outcome
    }

    /// `Ok(false)` when the sample is excluded without being an error: the
    /// metric is inactive or the condition is FALSE.
    fn try_sample(
        &mut self,
        event: &Event,
        env: Env<'_>,
        out: &mut Vec<OutputRecord>,
    ) -> Result<bool, DropReason> {
        if !self.active {
            return Ok(false);
        }
        let key = DimensionKey::extract(event, &self.dimensions).ok_or(DropReason::MissingField)?;
        if let Some(binding) = &self.condition {
            let state = if binding.links.is_empty() {
                env.conditions.query(binding.idx, None)
            } else {
                let link = DimensionKey::extract_linked(event, &binding.links)
                    .ok_or(DropReason::MissingField)?;
                env.conditions.query(binding.idx, Some(&link))
            };
            if self.window_unknown || state == ConditionState::Unknown {
                self.bucket_unknown_drops += 1;
                return Err(DropReason::ConditionUnknown);
            }
            if !state.is_true() {
                return Ok(false);
            }
        }
        match &mut self.aggregator {
            Aggregator::Value(agg) => {
                let n = agg.sample(event)?;
                agg.add(key, n, self.max_dimensions)?;
            }
            Aggregator::Event { .. } => {
                out.push(OutputRecord::Event(EventRecord::new(&self.id, key, event)));
                self.stats.events_emitted += 1;
            }
            Aggregator::Duration(_) => return Ok(false),
        }
        Ok(true)
    }

    fn on_duration_event(
        &mut self,
        event: &Event,
        matches: &MatchResults,
        update: &ConditionUpdate,
        env: Env<'_>,
    ) -> SampleOutcome {
        let ts = event.timestamp_nanos;
        let active = self.active;
        let condition = &self.condition;
        let Aggregator::Duration(d) = &mut self.aggregator else {
            return SampleOutcome::Ignored;
        };

        if let Some(binding) = condition
            && update.changed(binding.idx)
        {
            d.regate(ts, |link| gate_open(active, condition, env, link));
        }
        if let Some(stop_all) = d.stop_all
            && matches.get(stop_all)
        {
            d.stop_all(ts);
        }

        let is_start = matches.get(d.start);
        let is_stop = matches.get(d.stop);
        if is_start && is_stop {
            log::warn!(
                "metric {:?}: event at {ts} matched both duration start and stop; ignored",
                self.id
            );
            return SampleOutcome::Dropped(DropReason::AmbiguousCondition);
        }
        if !is_start && !is_stop {
            return SampleOutcome::Ignored;
        }

        let Some(key) = DimensionKey::extract(event, &self.dimensions) else {
            return SampleOutcome::Dropped(DropReason::MissingField);
        };
        if is_stop {
            d.stop(&key, ts);
            return SampleOutcome::Accepted;
        }

        let link = match condition {
            Some(binding) if !binding.links.is_empty() => {
                match DimensionKey::extract_linked(event, &binding.links) {
                    Some(link) => Some(link),
                    None => return SampleOutcome::Dropped(DropReason::MissingField),
                }
            }
            _ => None,
        };
        let open = gate_open(active, condition, env, link.as_ref());
        match d.start(key, link, ts, open, self.max_dimensions) {
            Ok(()) => SampleOutcome::Accepted,
            Err(reason) => SampleOutcome::Dropped(reason),
        }
    }

    /// Flush the open bucket as a partial one ending at `now` and stop the
    /// grid. Deadlines at `now` itself are not fired.
    pub(crate) fn shutdown(&mut self, now: i64, env: Env<'_>, out: &mut Vec<OutputRecord>) {
        self.advance(now, false, env, out);
        if let Some(span) = self.clock.current() {
            let end = now.max(span.start);
            if let Aggregator::Duration(d) = &mut self.aggregator {
                d.settle(end);
            }
            self.flush_bucket(span, end, end > span.start, out);
            self.clock.close();
        }
        self.flush_pending(out);
    }
}

/// Whether time may accrue for an interval keyed into the condition by `link`.
fn gate_open(
    active: bool,
    condition: &Option<ConditionBinding>,
    env: Env<'_>,
    link: Option<&DimensionKey>,
) -> bool {
    active
        && condition
            .as_ref()
            .is_none_or(|b| env.conditions.query(b.idx, link).is_true())
}

/// Order a metric's links by the condition's dimensions; every dimension
/// must be linked exactly once.
fn bind_links(
    def: &MetricDef,
    condition_dims: &[String],
    referrer: &str,
) -> CoreResult<Vec<(String, String)>> {
    if def.links.is_empty() {
        return Ok(Vec::new());
    }
    if condition_dims.is_empty() {
        return Err(config_error(format!(
            "{referrer}: links require a dimensioned simple condition"
        )));
    }
    if def.links.len() != condition_dims.len() {
        return Err(config_error(format!(
            "{referrer}: links must cover the condition dimensions {condition_dims:?} exactly once"
        )));
    }
    condition_dims
        .iter()
        .map(|dim| {
            def.links
                .iter()
                .find(|l| &l.condition == dim)
                .map(|l| (l.what.clone(), dim.clone()))
                .ok_or_else(|| {
                    config_error(format!("{referrer}: condition dimension {dim:?} is not linked"))
                })
        })
        .collect()
}
