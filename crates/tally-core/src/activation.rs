//! TTL windows that gate whether a metric records.

use tally_config::ActivationDef;

use crate::error::CoreResult;
use crate::matcher::{MatchResults, MatcherIdx, MatcherSet};

#[derive(Debug, Clone)]
struct Activation {
    trigger: MatcherIdx,
    deactivate: Option<MatcherIdx>,
    ttl_nanos: i64,
    expiry: Option<i64>,
}

/// Activation state of every metric, indexed by metric position.
#[derive(Debug, Default)]
pub struct ActivationTracker {
    metrics: Vec<Vec<Activation>>,
}

impl ActivationTracker {
    /// Register the activations of the next metric; returns its slot.
    pub fn add_metric(
        &mut self,
        metric_id: &str,
        defs: &[ActivationDef],
        matchers: &MatcherSet,
    ) -> CoreResult<usize> {
        let referrer = format!("metric {metric_id:?} activation");
        let mut activations = Vec::with_capacity(defs.len());
        for def in defs {
            activations.push(Activation {
                trigger: matchers.resolve(&def.matcher, &referrer)?,
                deactivate: def
                    .deactivate
                    .as_deref()
                    .map(|id| matchers.resolve(id, &referrer))
                    .transpose()?,
                ttl_nanos: def.ttl.as_nanos_i64(),
                expiry: None,
            });
        }
        self.metrics.push(activations);
        Ok(self.metrics.len() - 1)
    }

    /// A trigger sets expiry to `ts + ttl`, never shortening a later one.
    /// A matching `deactivate` then cancels the window.
    pub fn on_event(&mut self, ts: i64, matches: &MatchResults) {
        for act in self.metrics.iter_mut().flatten() {
            if matches.get(act.trigger) {
                let until = ts.saturating_add(act.ttl_nanos);
                act.expiry = Some(act.expiry.map_or(until, |e| e.max(until)));
            }
            if let Some(d) = act.deactivate
                && matches.get(d)
            {
                act.expiry = None;
            }
        }
    }

    pub fn has_activations(&self, metric: usize) -> bool {
        self.metrics.get(metric).is_some_and(|a| !a.is_empty())
    }

    /// Always true without activations; else `now < expiry` for any of them.
    pub fn is_active(&self, metric: usize, now: i64) -> bool {
        match self.metrics.get(metric) {
            Some(acts) if !acts.is_empty() => acts
                .iter()
                .any(|a| a.expiry.is_some_and(|expiry| now < expiry)),
            _ => true,
        }
    }

    /// Instant the metric stops being active if nothing re-triggers it:
    /// the latest expiry still in the future of `now`.
    pub fn deactivation_at(&self, metric: usize, now: i64) -> Option<i64> {
        self.metrics
            .get(metric)?
            .iter()
            .filter_map(|a| a.expiry)
            .filter(|&e| e > now)
            .max()
    }
}
