//! E84 State Machine states (spec §4.2) and the ring buffer of recent
//! transitions the Controller Facade exposes to observers (spec §4.5).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::table::Trigger;
use crate::timer::TimerId;

/// Default capacity of the transition history ring buffer (spec §4.2).
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadDirection {
    Load,
    Unload,
}

/// The finite set of E84 states (spec §4.2). Error states are distinct per
/// faulting timer, per spec's "distinct error state per timer fault".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Idle,
    Selected,
    TransferReady,
    /// `TRANSFER_READY'` in spec.md: `READY` asserted, awaiting `BUSY`.
    TransferReadyPrime,
    TransferInProgress,
    TransferComplete,
    HandoffComplete,
    ErrorTimer(TimerId),
    ErrorInvalidCs,
    ErrorPort,
    EsAsserted,
}

impl State {
    /// Only the error states and `ES_ASSERTED` are terminal — they require
    /// an explicit operator `reset` to leave (spec §4.2).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            State::ErrorTimer(_) | State::ErrorInvalidCs | State::ErrorPort | State::EsAsserted
        )
    }

    pub fn is_error(self) -> bool {
        matches!(self, State::ErrorTimer(_) | State::ErrorInvalidCs | State::ErrorPort)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Idle => write!(f, "IDLE"),
            State::Selected => write!(f, "SELECTED"),
            State::TransferReady => write!(f, "TRANSFER_READY"),
            State::TransferReadyPrime => write!(f, "TRANSFER_READY'"),
            State::TransferInProgress => write!(f, "TRANSFER_IN_PROGRESS"),
            State::TransferComplete => write!(f, "TRANSFER_COMPLETE"),
            State::HandoffComplete => write!(f, "HANDOFF_COMPLETE"),
            State::ErrorTimer(t) => {
                let label = match t {
                    TimerId::Tp1 => "TP1",
                    TimerId::Tp2 => "TP2",
                    TimerId::Tp3 => "TP3",
                    TimerId::Tp4 => "TP4",
                    TimerId::Tp5 => "TP5",
                };
                write!(f, "ERROR_{label}")
            }
            State::ErrorInvalidCs => write!(f, "ERROR_INVALID_CS"),
            State::ErrorPort => write!(f, "ERROR_PORT"),
            State::EsAsserted => write!(f, "ES_ASSERTED"),
        }
    }
}

/// One entry in the bounded transition history (spec §4.5 "last N
/// transitions").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: State,
    pub to: State,
    pub trigger: String,
    pub at: DateTime<Utc>,
}

/// Owns only the current state, the latched load direction, and the
/// bounded transition history. All guard evaluation, I/O, and timer
/// arming lives in [`crate::engine::Engine`], which is the sole mutator —
/// this keeps the machine trivially testable against a recorded trace
/// (spec §9 "must be passed explicitly as collaborators... to keep the
/// machine testable").
pub struct StateMachine {
    current: State,
    direction: Option<LoadDirection>,
    history: VecDeque<TransitionRecord>,
    history_capacity: usize,
}

impl StateMachine {
    pub fn new(history_capacity: usize) -> Self {
        StateMachine {
            current: State::Idle,
            direction: None,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
        }
    }

    pub fn current(&self) -> State {
        self.current
    }

    pub fn direction(&self) -> Option<LoadDirection> {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Option<LoadDirection>) {
        self.direction = direction;
    }

    pub fn history(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.history.iter()
    }

    /// Apply a transition already selected by the engine's table lookup.
    /// Returns the previous state.
    pub fn apply(&mut self, to: State, trigger: Trigger) -> State {
        let from = self.current;
        self.current = to;
        if to == State::Idle {
            self.direction = None;
        }
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(TransitionRecord {
            from,
            to,
            trigger: format!("{:?}", trigger),
            at: Utc::now(),
        });
        from
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_with_no_direction() {
        let m = StateMachine::new(DEFAULT_HISTORY_CAPACITY);
        assert_eq!(m.current(), State::Idle);
        assert_eq!(m.direction(), None);
    }

    #[test]
    fn returning_to_idle_clears_direction() {
        let mut m = StateMachine::new(DEFAULT_HISTORY_CAPACITY);
        m.set_direction(Some(LoadDirection::Load));
        m.apply(State::Idle, Trigger::OperatorReset);
        assert_eq!(m.direction(), None);
    }

    #[test]
    fn history_is_bounded() {
        let mut m = StateMachine::new(2);
        m.apply(State::Selected, Trigger::Cs1(crate::table::Edge::Rising));
        m.apply(State::TransferReady, Trigger::Valid(crate::table::Edge::Rising));
        m.apply(State::TransferReadyPrime, Trigger::TrReq(crate::table::Edge::Rising));
        assert_eq!(m.history().count(), 2);
    }
}
