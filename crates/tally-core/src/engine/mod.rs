//! The deterministic metric engine.
//!
//! [`MetricEngine`] owns the matcher arena, the condition and activation
//! trackers, and one bucket pipeline per metric. Time only moves through
//! event timestamps, [`MetricEngine::advance_to`] and
//! [`MetricEngine::shutdown`]; the engine never reads a clock.
//!
//! For an event at `ts` the engine first fires every timer due strictly
//! before `ts`, then applies the event, then fires timers due at `ts`.

mod compile;
mod health;
#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};

use tally_config::{DefinitionSet, RuntimeConfig};

use crate::activation::ActivationTracker;
use crate::condition::ConditionSet;
use crate::error::CoreResult;
use crate::event::Event;
use crate::matcher::MatcherSet;
use crate::metric::{Env, MetricPipeline, SampleOutcome};
use crate::output::OutputRecord;
use crate::sample::{DropCounters, DropReason};

pub use health::{EngineHealth, MetricHealth};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Initial watermark and grid anchor of unactivated metrics. Defaults to
    /// the first event's timestamp.
    pub start_nanos: Option<i64>,
    pub dimension_hard_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            start_nanos: None,
            dimension_hard_limit: 800,
        }
    }
}

impl From<&RuntimeConfig> for EngineOptions {
    fn from(rt: &RuntimeConfig) -> Self {
        Self {
            start_nanos: rt.start_time,
            dimension_hard_limit: rt.dimension_hard_limit,
        }
    }
}

/// Result of offering one event to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Accepted,
    /// Rejected by the watermark, or every metric it addressed dropped it.
    Dropped(DropReason),
    /// The engine was shut down.
    Closed,
}

pub struct MetricEngine {
    matchers: MatcherSet,
    conditions: ConditionSet,
    activations: ActivationTracker,
    pipelines: Vec<MetricPipeline>,
    index: HashMap<String, usize>,
    start_nanos: Option<i64>,
    /// Latest instant the engine has advanced to; `None` before the first
    /// event or tick.
    watermark: Option<i64>,
    closed: bool,
    output: VecDeque<OutputRecord>,
    events_processed: u64,
    event_drops: DropCounters,
}

impl MetricEngine {
    /// Compile `defs`. Every configuration error surfaces here, before any
    /// event is accepted.
    pub fn new(defs: &DefinitionSet, options: EngineOptions) -> CoreResult<Self> {
        let compiled = compile::compile(defs, &options)?;
        Ok(Self {
            matchers: compiled.matchers,
            conditions: compiled.conditions,
            activations: compiled.activations,
            pipelines: compiled.pipelines,
            index: compiled.index,
            start_nanos: options.start_nanos,
            watermark: None,
            closed: false,
            output: VecDeque::new(),
            events_processed: 0,
            event_drops: DropCounters::default(),
        })
    }

    pub fn metric_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.pipelines.iter().map(|p| p.id())
    }

    pub fn watermark(&self) -> Option<i64> {
        self.watermark
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn process(&mut self, event: &Event) -> Ingest {
        if self.closed {
            return Ingest::Closed;
        }
        let ts = event.timestamp_nanos;
        let watermark = self.ensure_started(ts);
        if ts < watermark {
            self.event_drops.record(DropReason::OutOfOrder);
            return Ingest::Dropped(DropReason::OutOfOrder);
        }
        self.events_processed += 1;

        let mut out = Vec::new();
        {
            let env = Env {
                conditions: &self.conditions,
                activations: &self.activations,
            };
            for p in &mut self.pipelines {
                p.advance(ts, false, env, &mut out);
            }
        }

        let matches = self.matchers.evaluate(event);
        let update = self.conditions.on_event(event, &matches);
        self.activations.on_event(ts, &matches);
        for (_, reason) in &update.dropped {
            self.event_drops.record(*reason);
        }

        let env = Env {
            conditions: &self.conditions,
            activations: &self.activations,
        };
        let mut accepted = false;
        let mut first_drop = None;
        for p in &mut self.pipelines {
            match p.on_event(event, &matches, &update, env, &mut out) {
                SampleOutcome::Accepted => accepted = true,
                SampleOutcome::Dropped(reason) => {
                    first_drop.get_or_insert(reason);
                }
                SampleOutcome::Ignored => {}
            }
            p.advance(ts, true, env, &mut out);
            p.flush_pending(&mut out);
        }

        self.watermark = Some(ts);
        self.output.extend(out);
        let first_drop = first_drop.or_else(|| update.dropped.first().map(|(_, r)| *r));
        match first_drop {
            Some(reason) if !accepted => Ingest::Dropped(reason),
            _ => Ingest::Accepted,
        }
    }

    /// Fire every timer due strictly before `now`. Timers due at `now` fire
    /// with the next event or advance past it, so events stamped `now` are
    /// still accepted and ordered before them. Calls behind the watermark are
    /// ignored.
    pub fn advance_to(&mut self, now: i64) {
        if self.closed {
            return;
        }
        let watermark = self.ensure_started(now);
        if now < watermark {
            return;
        }
        let env = Env {
            conditions: &self.conditions,
            activations: &self.activations,
        };
        let mut out = Vec::new();
        for p in &mut self.pipelines {
            p.advance(now, false, env, &mut out);
            p.flush_pending(&mut out);
        }
        self.watermark = Some(now);
        self.output.extend(out);
    }

    /// Earliest instant at which some pipeline changes state on its own.
    pub fn next_deadline(&self) -> Option<i64> {
        let env = Env {
            conditions: &self.conditions,
            activations: &self.activations,
        };
        self.pipelines
            .iter()
            .filter_map(|p| p.next_deadline(env))
            .min()
    }

    /// Whether `metric_id` is gated on at the watermark. `None` for an
    /// unknown metric.
    pub fn is_active(&self, metric_id: &str) -> Option<bool> {
        let now = self.watermark.or(self.start_nanos).unwrap_or(i64::MIN);
        self.is_active_at(metric_id, now)
    }

    pub fn is_active_at(&self, metric_id: &str, now: i64) -> Option<bool> {
        let p = &self.pipelines[*self.index.get(metric_id)?];
        Some(self.activations.is_active(p.slot(), now))
    }

    /// Flush every open bucket as ending at `now` and close the engine.
    /// `now` behind the watermark is raised to it.
    pub fn shutdown(&mut self, now: i64) {
        if self.closed {
            return;
        }
        let watermark = self.ensure_started(now);
        let now = now.max(watermark);
        let env = Env {
            conditions: &self.conditions,
            activations: &self.activations,
        };
        let mut out = Vec::new();
        for p in &mut self.pipelines {
            p.shutdown(now, env, &mut out);
        }
        self.watermark = Some(now);
        self.closed = true;
        self.output.extend(out);
    }

    /// Take every record emitted so far, in emission order.
    pub fn drain(&mut self) -> Vec<OutputRecord> {
        self.output.drain(..).collect()
    }

    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            events_processed: self.events_processed,
            event_drops: self.event_drops.clone(),
            metrics: self
                .pipelines
                .iter()
                .map(|p| {
                    let stats = p.stats();
                    MetricHealth {
                        metric_id: p.id().to_string(),
                        active: p.is_active(),
                        samples_accepted: stats.samples_accepted,
                        drops: p.drops().clone(),
                        buckets_emitted: stats.buckets_emitted,
                        skipped_emitted: stats.skipped_emitted,
                        alerts_emitted: stats.alerts_emitted,
                        events_emitted: stats.events_emitted,
                    }
                })
                .collect(),
        }
    }

    /// Start the pipelines on first contact and return the watermark.
    fn ensure_started(&mut self, first: i64) -> i64 {
        if let Some(w) = self.watermark {
            return w;
        }
        let start = self.start_nanos.unwrap_or(first);
        let env = Env {
            conditions: &self.conditions,
            activations: &self.activations,
        };
        for p in &mut self.pipelines {
            p.start(start, env);
        }
        self.watermark = Some(start);
        start
    }
}
