use std::collections::BTreeMap;

use tally_config::DurationAggregation;

use crate::dimension::DimensionKey;
use crate::matcher::MatcherIdx;
use crate::sample::DropReason;

use super::types::BucketValue;

#[derive(Debug)]
struct Interval {
    nesting: u32,
    /// Start of the currently accruing segment; `None` while gated off.
    running_since: Option<i64>,
    /// Key into a sliced condition, when the metric links one.
    link: Option<DimensionKey>,
    /// Gated nanoseconds over the interval's whole life (`max_sparse`).
    lifetime: i64,
}

#[derive(Debug, Default)]
struct Total {
    nanos: i64,
    segments: u64,
}

/// Open start/stop intervals per dimension key and the nanoseconds they
/// accrued in the open bucket.
///
/// Time accrues only while the gate is open (metric active and condition
/// TRUE). With `Sum`, running segments are cut at each bucket boundary, so an
/// interval spanning several buckets contributes to each exactly its
/// overlap. With `MaxSparse`, an interval is credited whole to the bucket in
/// which it ends, and each key reports its longest interval there.
#[derive(Debug)]
pub(crate) struct DurationAggregator {
    pub(crate) start: MatcherIdx,
    pub(crate) stop: MatcherIdx,
    pub(crate) stop_all: Option<MatcherIdx>,
    nested: bool,
    aggregation: DurationAggregation,
    intervals: BTreeMap<DimensionKey, Interval>,
    totals: BTreeMap<DimensionKey, Total>,
}

impl DurationAggregator {
    pub(crate) fn new(
        start: MatcherIdx,
        stop: MatcherIdx,
        stop_all: Option<MatcherIdx>,
        nested: bool,
        aggregation: DurationAggregation,
    ) -> Self {
        Self {
            start,
            stop,
            stop_all,
            nested,
            aggregation,
            intervals: BTreeMap::new(),
            totals: BTreeMap::new(),
        }
    }

    pub(crate) fn start(
        &mut self,
        key: DimensionKey,
        link: Option<DimensionKey>,
        ts: i64,
        gate_open: bool,
        max_keys: usize,
    ) -> Result<(), DropReason> {
        if let Some(iv) = self.intervals.get_mut(&key) {
            iv.nesting = if self.nested { iv.nesting + 1 } else { 1 };
            if gate_open && iv.running_since.is_none() {
                iv.running_since = Some(ts);
            }
            return Ok(());
        }
        if self.intervals.len() >= max_keys {
            return Err(DropReason::DimensionLimit);
        }
        self.intervals.insert(
            key,
            Interval {
                nesting: 1,
                running_since: gate_open.then_some(ts),
                link,
                lifetime: 0,
            },
        );
        Ok(())
    }

    /// Stop on a key with no open interval is ignored.
    pub(crate) fn stop(&mut self, key: &DimensionKey, ts: i64) {
        let Some(iv) = self.intervals.get_mut(key) else {
            return;
        };
        iv.nesting = if self.nested {
            iv.nesting.saturating_sub(1)
        } else {
            0
        };
        if iv.nesting > 0 {
            return;
        }
        if let Some(mut iv) = self.intervals.remove(key) {
            self.end_interval(key, &mut iv, ts);
        }
    }

    pub(crate) fn stop_all(&mut self, ts: i64) {
        for (key, mut iv) in std::mem::take(&mut self.intervals) {
            self.end_interval(&key, &mut iv, ts);
        }
    }

    fn end_interval(&mut self, key: &DimensionKey, iv: &mut Interval, ts: i64) {
        if let Some(since) = iv.running_since.take() {
            accrue(&mut self.totals, self.aggregation, key, iv, ts - since);
        }
        if self.aggregation == DurationAggregation::MaxSparse {
            record_max(&mut self.totals, key, iv.lifetime);
        }
    }

    /// Re-evaluate the gate of every open interval at `ts`.
    pub(crate) fn regate(&mut self, ts: i64, gate: impl Fn(Option<&DimensionKey>) -> bool) {
        for (key, iv) in self.intervals.iter_mut() {
            let open = gate(iv.link.as_ref());
            match (open, iv.running_since) {
                (true, None) => iv.running_since = Some(ts),
                (false, Some(since)) => {
                    accrue(&mut self.totals, self.aggregation, key, iv, ts - since);
                    iv.running_since = None;
                }
                _ => {}
            }
        }
    }

    /// Cut running segments at `ts`, crediting the open bucket (`Sum`) or
    /// the intervals themselves (`MaxSparse`).
    pub(crate) fn accrue_to(&mut self, ts: i64) {
        for (key, iv) in self.intervals.iter_mut() {
            if let Some(since) = iv.running_since {
                accrue(&mut self.totals, self.aggregation, key, iv, ts - since);
                iv.running_since = Some(ts);
            }
        }
    }

    /// Final cut at shutdown: open intervals count as ending at `ts`.
    pub(crate) fn settle(&mut self, ts: i64) {
        self.accrue_to(ts);
        if self.aggregation == DurationAggregation::MaxSparse {
            for (key, iv) in &self.intervals {
                record_max(&mut self.totals, key, iv.lifetime);
            }
        }
    }

    pub(crate) fn take_bucket(&mut self) -> Vec<(DimensionKey, BucketValue, u64)> {
        std::mem::take(&mut self.totals)
            .into_iter()
            .filter(|(_, total)| total.nanos > 0)
            .map(|(key, total)| (key, BucketValue::Long(total.nanos), total.segments))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn open_intervals(&self) -> usize {
        self.intervals.len()
    }
}

fn accrue(
    totals: &mut BTreeMap<DimensionKey, Total>,
    aggregation: DurationAggregation,
    key: &DimensionKey,
    iv: &mut Interval,
    nanos: i64,
) {
    if nanos <= 0 {
        return;
    }
    match aggregation {
        DurationAggregation::Sum => {
            let total = totals.entry(key.clone()).or_default();
            total.nanos += nanos;
            total.segments += 1;
        }
        DurationAggregation::MaxSparse => iv.lifetime += nanos,
    }
}

/// `segments` counts the intervals that ended in the bucket.
fn record_max(totals: &mut BTreeMap<DimensionKey, Total>, key: &DimensionKey, nanos: i64) {
    if nanos <= 0 {
        return;
    }
    let total = totals.entry(key.clone()).or_default();
    total.nanos = total.nanos.max(nanos);
    total.segments += 1;
}
