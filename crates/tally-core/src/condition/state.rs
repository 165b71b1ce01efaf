use std::fmt;

use serde::Serialize;
use tally_config::{InitialState, LogicalOp};

/// Three-valued condition signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionState {
    True,
    False,
    Unknown,
}

impl ConditionState {
    pub fn from_bool(b: bool) -> Self {
        if b {
            ConditionState::True
        } else {
            ConditionState::False
        }
    }

    pub fn is_true(self) -> bool {
        self == ConditionState::True
    }

    pub fn negate(self) -> Self {
        match self {
            ConditionState::True => ConditionState::False,
            ConditionState::False => ConditionState::True,
            ConditionState::Unknown => ConditionState::Unknown,
        }
    }

    /// Kleene logic: a known dominating child decides, otherwise UNKNOWN
    /// propagates.
    pub fn combine(op: LogicalOp, children: impl IntoIterator<Item = ConditionState>) -> Self {
        match op {
            LogicalOp::And => and(children),
            LogicalOp::Or => or(children),
            LogicalOp::Not => children
                .into_iter()
                .next()
                .map_or(ConditionState::Unknown, ConditionState::negate),
            LogicalOp::Nand => and(children).negate(),
            LogicalOp::Nor => or(children).negate(),
        }
    }
}

fn and(children: impl IntoIterator<Item = ConditionState>) -> ConditionState {
    let mut unknown = false;
    for c in children {
        match c {
            ConditionState::False => return ConditionState::False,
            ConditionState::Unknown => unknown = true,
            ConditionState::True => {}
        }
    }
    if unknown {
        ConditionState::Unknown
    } else {
        ConditionState::True
    }
}

fn or(children: impl IntoIterator<Item = ConditionState>) -> ConditionState {
    let mut unknown = false;
    for c in children {
        match c {
            ConditionState::True => return ConditionState::True,
            ConditionState::Unknown => unknown = true,
            ConditionState::False => {}
        }
    }
    if unknown {
        ConditionState::Unknown
    } else {
        ConditionState::False
    }
}

impl From<InitialState> for ConditionState {
    fn from(s: InitialState) -> Self {
        match s {
            InitialState::Unknown => ConditionState::Unknown,
            InitialState::False => ConditionState::False,
        }
    }
}

impl fmt::Display for ConditionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConditionState::True => "true",
            ConditionState::False => "false",
            ConditionState::Unknown => "unknown",
        })
    }
}
