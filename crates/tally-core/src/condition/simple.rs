use std::collections::HashMap;

use crate::dimension::DimensionKey;
use crate::event::Event;
use crate::matcher::{MatchResults, MatcherIdx};
use crate::sample::DropReason;

use super::state::ConditionState;

/// Outcome of feeding one event to a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionEffect {
    Unchanged,
    Changed,
    Dropped(DropReason),
}

/// Start/stop driven condition, optionally sliced by dimension and nested.
///
/// Each seen key holds a start counter: `> 0` is TRUE, `0` is FALSE. Keys
/// never seen report `default_state`, which starts as the configured initial
/// state and becomes FALSE after a stop-all.
#[derive(Debug)]
pub(crate) struct SimpleCondition {
    pub(crate) start: MatcherIdx,
    pub(crate) stop: MatcherIdx,
    pub(crate) stop_all: Option<MatcherIdx>,
    pub(crate) nested: bool,
    pub(crate) dimensions: Vec<String>,
    pub(crate) max_dimensions: usize,
    pub(crate) default_state: ConditionState,
    pub(crate) slices: HashMap<DimensionKey, u32>,
}

impl SimpleCondition {
    pub(crate) fn on_event(&mut self, event: &Event, matches: &MatchResults) -> ConditionEffect {
        if let Some(stop_all) = self.stop_all
            && matches.get(stop_all)
        {
            let changed = self.default_state != ConditionState::False
                || self.slices.values().any(|&count| count > 0);
            self.slices.clear();
            self.default_state = ConditionState::False;
            return if changed {
                ConditionEffect::Changed
            } else {
                ConditionEffect::Unchanged
            };
        }

        let is_start = matches.get(self.start);
        let is_stop = matches.get(self.stop);
        if !is_start && !is_stop {
            return ConditionEffect::Unchanged;
        }
        if is_start && is_stop {
            return ConditionEffect::Dropped(DropReason::AmbiguousCondition);
        }

        let Some(key) = DimensionKey::extract(event, &self.dimensions) else {
            return ConditionEffect::Dropped(DropReason::MissingField);
        };
        let forgettable = self.default_state == ConditionState::False;
        if !self.slices.contains_key(&key) {
            if is_stop && forgettable {
                return ConditionEffect::Unchanged;
            }
            if self.slices.len() >= self.max_dimensions {
                return ConditionEffect::Dropped(DropReason::DimensionLimit);
            }
        }

        let before = self.state_of(&key);
        let count = self.slices.entry(key.clone()).or_insert(0);
        if is_start {
            *count = if self.nested { *count + 1 } else { 1 };
        } else if self.nested {
            *count = count.saturating_sub(1);
        } else {
            *count = 0;
        }
        // a FALSE slice reads the same as an unseen one
        if *count == 0 && forgettable {
            self.slices.remove(&key);
        }

        if self.state_of(&key) == before {
            ConditionEffect::Unchanged
        } else {
            ConditionEffect::Changed
        }
    }

    pub(crate) fn state_of(&self, key: &DimensionKey) -> ConditionState {
        match self.slices.get(key) {
            Some(&count) => ConditionState::from_bool(count > 0),
            None => self.default_state,
        }
    }

    /// Unsliced: the single slot. Sliced: TRUE if any slice is TRUE, FALSE if
    /// slices exist and all are FALSE, otherwise the default state.
    pub(crate) fn overall(&self) -> ConditionState {
        if self.dimensions.is_empty() {
            return self.state_of(&DimensionKey::empty());
        }
        if self.slices.values().any(|&count| count > 0) {
            ConditionState::True
        } else if !self.slices.is_empty() {
            ConditionState::False
        } else {
            self.default_state
        }
    }
}
