//! Named three-valued conditions driven by start/stop matchers.

mod simple;
mod state;

use std::collections::HashMap;

use tally_config::{ConditionDef, ConditionRule, LogicalOp};

use crate::dimension::DimensionKey;
use crate::error::{CoreResult, config_error};
use crate::event::Event;
use crate::graph::{describe_cycle, topo_order};
use crate::matcher::{MatchResults, MatcherSet, check_arity};
use crate::sample::DropReason;

pub use simple::ConditionEffect;
pub use state::ConditionState;

use simple::SimpleCondition;

pub type ConditionIdx = usize;

#[derive(Debug)]
enum ConditionNode {
    Simple(SimpleCondition),
    Combination {
        op: LogicalOp,
        children: Vec<ConditionIdx>,
    },
}

#[derive(Debug)]
pub struct ConditionSet {
    names: Vec<String>,
    index: HashMap<String, ConditionIdx>,
    nodes: Vec<ConditionNode>,
    order: Vec<ConditionIdx>,
}

/// Which conditions may have changed on one event, and which rejected it.
/// A combination is reported changed whenever any child changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionUpdate {
    changed: Vec<bool>,
    pub dropped: Vec<(ConditionIdx, DropReason)>,
}

impl ConditionUpdate {
    pub fn changed(&self, idx: ConditionIdx) -> bool {
        self.changed.get(idx).copied().unwrap_or(false)
    }
}

impl ConditionSet {
    pub fn compile(
        defs: &[ConditionDef],
        matchers: &MatcherSet,
        default_limit: usize,
    ) -> CoreResult<Self> {
        let mut names = Vec::with_capacity(defs.len());
        let mut index = HashMap::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            if index.insert(def.id.clone(), i).is_some() {
                return Err(config_error(format!("duplicate condition id {:?}", def.id)));
            }
            names.push(def.id.clone());
        }

        let mut nodes = Vec::with_capacity(defs.len());
        for def in defs {
            let referrer = format!("condition {:?}", def.id);
            let node = match &def.rule {
                ConditionRule::Simple(s) => {
                    if s.start == s.stop {
                        return Err(config_error(format!(
                            "{referrer}: start and stop use the same matcher {:?}",
                            s.start
                        )));
                    }
                    ConditionNode::Simple(SimpleCondition {
                        start: matchers.resolve(&s.start, &referrer)?,
                        stop: matchers.resolve(&s.stop, &referrer)?,
                        stop_all: s
                            .stop_all
                            .as_deref()
                            .map(|id| matchers.resolve(id, &referrer))
                            .transpose()?,
                        nested: s.nested,
                        dimensions: s.dimensions.clone(),
                        max_dimensions: s.max_dimensions.unwrap_or(default_limit),
                        default_state: s.initial.into(),
                        slices: HashMap::new(),
                    })
                }
                ConditionRule::Combination { op, children } => {
                    check_arity(&def.id, "condition", *op, children.len())?;
                    let children = children
                        .iter()
                        .map(|child| {
                            index.get(child).copied().ok_or_else(|| {
                                config_error(format!(
                                    "{referrer} references unknown condition {child:?}"
                                ))
                            })
                        })
                        .collect::<CoreResult<Vec<_>>>()?;
                    ConditionNode::Combination { op: *op, children }
                }
            };
            nodes.push(node);
        }

        let edges: Vec<Vec<ConditionIdx>> = nodes
            .iter()
            .map(|n| match n {
                ConditionNode::Simple(_) => Vec::new(),
                ConditionNode::Combination { children, .. } => children.clone(),
            })
            .collect();
        let order = topo_order(&edges).map_err(|cycle| {
            config_error(format!(
                "condition cycle: {}",
                describe_cycle(&cycle, &names)
            ))
        })?;

        Ok(Self {
            names,
            index,
            nodes,
            order,
        })
    }

    pub fn resolve(&self, id: &str, referrer: &str) -> CoreResult<ConditionIdx> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| config_error(format!("{referrer} references unknown condition {id:?}")))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Dimension fields of a simple condition; empty for combinations.
    pub fn dimensions(&self, idx: ConditionIdx) -> &[String] {
        match &self.nodes[idx] {
            ConditionNode::Simple(s) => &s.dimensions,
            ConditionNode::Combination { .. } => &[],
        }
    }

    pub fn on_event(&mut self, event: &Event, matches: &MatchResults) -> ConditionUpdate {
        let mut update = ConditionUpdate {
            changed: vec![false; self.nodes.len()],
            dropped: Vec::new(),
        };
        for &idx in &self.order {
            let changed = match &mut self.nodes[idx] {
                ConditionNode::Simple(cond) => match cond.on_event(event, matches) {
                    ConditionEffect::Unchanged => false,
                    ConditionEffect::Changed => true,
                    ConditionEffect::Dropped(reason) => {
                        if reason == DropReason::AmbiguousCondition {
                            log::warn!(
                                "condition {:?}: event at {} matched both start and stop; ignored",
                                self.names[idx],
                                event.timestamp_nanos
                            );
                        }
                        update.dropped.push((idx, reason));
                        false
                    }
                },
                ConditionNode::Combination { children, .. } => {
                    children.iter().any(|&c| update.changed[c])
                }
            };
            update.changed[idx] = changed;
        }
        update
    }

    /// State for `key` on a simple condition, or the overall state when `key`
    /// is `None`. Combinations always combine their children's overall state.
    pub fn query(&self, idx: ConditionIdx, key: Option<&DimensionKey>) -> ConditionState {
        match &self.nodes[idx] {
            ConditionNode::Simple(cond) => match key {
                Some(key) => cond.state_of(key),
                None => cond.overall(),
            },
            ConditionNode::Combination { op, children } => {
                ConditionState::combine(*op, children.iter().map(|&c| self.query(c, None)))
            }
        }
    }
}
