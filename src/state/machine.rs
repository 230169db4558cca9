//! Lifecycle states and the legal transitions between them

use crate::error::{VesError, VesResult};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a transaction's attestation.
///
/// The discriminant is the one-byte tag written into attestation content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum StateType {
    Inited = 1,
    Open = 2,
    Opened = 3,
    Closed = 4,
}

impl StateType {
    /// All states in lifecycle order
    pub const ALL: [StateType; 4] = [
        StateType::Inited,
        StateType::Open,
        StateType::Opened,
        StateType::Closed,
    ];

    /// The only legal initial state
    pub fn initial() -> Self {
        StateType::Inited
    }

    /// Immediate successor, `None` for the terminal state
    pub fn next(self) -> Option<Self> {
        match self {
            StateType::Inited => Some(StateType::Open),
            StateType::Open => Some(StateType::Opened),
            StateType::Opened => Some(StateType::Closed),
            StateType::Closed => None,
        }
    }

    /// State a transaction must hold before it can enter `self`
    pub fn previous(self) -> Option<Self> {
        match self {
            StateType::Inited => None,
            StateType::Open => Some(StateType::Inited),
            StateType::Opened => Some(StateType::Open),
            StateType::Closed => Some(StateType::Opened),
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }

    /// Whether the receiving party answers with a countersignature.
    /// `opened` and `closed` are accepted after verification alone.
    pub fn requires_countersign(self) -> bool {
        matches!(self, StateType::Inited | StateType::Open)
    }

    /// A transition is legal only to the immediate successor
    pub fn can_transition(from: Option<StateType>, to: StateType) -> bool {
        match from {
            None => to == StateType::initial(),
            Some(from) => from.next() == Some(to),
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StateType::Inited => "inited",
            StateType::Open => "open",
            StateType::Opened => "opened",
            StateType::Closed => "closed",
        }
    }
}

impl TryFrom<u64> for StateType {
    type Error = VesError;

    fn try_from(value: u64) -> VesResult<Self> {
        match value {
            1 => Ok(StateType::Inited),
            2 => Ok(StateType::Open),
            3 => Ok(StateType::Opened),
            4 => Ok(StateType::Closed),
            other => Err(VesError::DecodeFail(format!("unknown state tag: {}", other))),
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked lifecycle position of one transaction intent.
///
/// `None` means no attestation has been accepted yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionState {
    current: Option<StateType>,
}

impl TransactionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<StateType> {
        self.current
    }

    /// Advance to `to`, rejecting anything but the immediate successor
    pub fn advance(&mut self, to: StateType) -> VesResult<StateType> {
        if !StateType::can_transition(self.current, to) {
            return Err(VesError::InvalidStateTransition {
                from: describe(self.current),
                to,
            });
        }
        self.current = Some(to);
        Ok(to)
    }
}

/// Human readable form of an optional state
pub fn describe(state: Option<StateType>) -> String {
    state
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string())
}
