//! Event classification against named match rules.
//!
//! Matchers are compiled into an arena indexed by [`MatcherIdx`]. Combination
//! matchers refer to children by index and the whole set is evaluated once
//! per event in children-first order, so shared sub-matchers are computed a
//! single time.

mod field;

use std::collections::HashMap;

use tally_config::{LogicalOp, MatcherDef, MatcherRule};

use crate::error::{CoreResult, config_error};
use crate::event::Event;
use crate::graph::{describe_cycle, topo_order};

use field::FieldConstraint;

pub type MatcherIdx = usize;

#[derive(Debug)]
enum MatcherNode {
    Simple {
        atom_id: i32,
        constraints: Vec<FieldConstraint>,
    },
    Combination {
        op: LogicalOp,
        children: Vec<MatcherIdx>,
    },
}

#[derive(Debug)]
pub struct MatcherSet {
    index: HashMap<String, MatcherIdx>,
    nodes: Vec<MatcherNode>,
    order: Vec<MatcherIdx>,
}

/// Per-event outcome of every matcher, indexed by [`MatcherIdx`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResults(Vec<bool>);

impl MatchResults {
    pub fn get(&self, idx: MatcherIdx) -> bool {
        self.0.get(idx).copied().unwrap_or(false)
    }
}

impl MatcherSet {
    pub fn compile(defs: &[MatcherDef]) -> CoreResult<Self> {
        let mut names = Vec::with_capacity(defs.len());
        let mut index = HashMap::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            if index.insert(def.id.clone(), i).is_some() {
                return Err(config_error(format!("duplicate matcher id {:?}", def.id)));
            }
            names.push(def.id.clone());
        }

        let mut nodes = Vec::with_capacity(defs.len());
        for def in defs {
            let node = match &def.rule {
                MatcherRule::Simple { atom, constraints } => MatcherNode::Simple {
                    atom_id: *atom,
                    constraints: constraints
                        .iter()
                        .map(|c| FieldConstraint::compile(&def.id, c))
                        .collect::<CoreResult<_>>()?,
                },
                MatcherRule::Combination { op, children } => {
                    check_arity(&def.id, "matcher", *op, children.len())?;
                    let children = children
                        .iter()
                        .map(|child| {
                            index.get(child).copied().ok_or_else(|| {
                                config_error(format!(
                                    "matcher {:?} references unknown matcher {child:?}",
                                    def.id
                                ))
                            })
                        })
                        .collect::<CoreResult<Vec<_>>>()?;
                    MatcherNode::Combination { op: *op, children }
                }
            };
            nodes.push(node);
        }

        let edges: Vec<Vec<MatcherIdx>> = nodes
            .iter()
            .map(|n| match n {
                MatcherNode::Simple { .. } => Vec::new(),
                MatcherNode::Combination { children, .. } => children.clone(),
            })
            .collect();
        let order = topo_order(&edges).map_err(|cycle| {
            config_error(format!(
                "matcher cycle: {}",
                describe_cycle(&cycle, &names)
            ))
        })?;

        Ok(Self {
            index,
            nodes,
            order,
        })
    }

    /// Look up a matcher referenced by `referrer` (used in error messages).
    pub fn resolve(&self, id: &str, referrer: &str) -> CoreResult<MatcherIdx> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| config_error(format!("{referrer} references unknown matcher {id:?}")))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn evaluate(&self, event: &Event) -> MatchResults {
        let mut hits = vec![false; self.nodes.len()];
        for &idx in &self.order {
            let hit = match &self.nodes[idx] {
                MatcherNode::Simple {
                    atom_id,
                    constraints,
                } => event.atom_id == *atom_id && constraints.iter().all(|c| c.matches(event)),
                MatcherNode::Combination { op, children } => {
                    combine(*op, children.iter().map(|&c| hits[c]))
                }
            };
            hits[idx] = hit;
        }
        MatchResults(hits)
    }
}

fn combine(op: LogicalOp, mut children: impl Iterator<Item = bool>) -> bool {
    match op {
        LogicalOp::And => children.all(|b| b),
        LogicalOp::Or => children.any(|b| b),
        LogicalOp::Not => !children.next().unwrap_or(false),
        LogicalOp::Nand => !children.all(|b| b),
        LogicalOp::Nor => !children.any(|b| b),
    }
}

pub(crate) fn check_arity(id: &str, kind: &str, op: LogicalOp, n: usize) -> CoreResult<()> {
    match op {
        LogicalOp::Not if n != 1 => Err(config_error(format!(
            "{kind} {id:?}: not takes exactly one child, got {n}"
        ))),
        _ if n == 0 => Err(config_error(format!(
            "{kind} {id:?}: {} needs at least one child",
            op.as_str()
        ))),
        _ => Ok(()),
    }
}
