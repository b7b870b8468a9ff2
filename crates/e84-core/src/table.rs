//! Transition Table (spec §4.3).
//!
//! Declarative `Vec<Transition>` data built once by [`TransitionTable::build`],
//! not a `match` over states. `StateMachine::evaluate` walks the rows for the
//! current state in table order and takes the first whose guard is
//! satisfied — first-match-wins, with `AmbiguousGuard` raised as a
//! diagnostic (not a second transition) whenever more than one non-error row
//! would also have matched.

use crate::state::{LoadDirection, State};
use crate::timer::TimerId;

/// What caused this evaluation pass. Mirrors the signals and synthetic
/// events the engine can post (spec §4.2, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Cs0(Edge),
    Cs1(Edge),
    Valid(Edge),
    TrReq(Edge),
    Busy(Edge),
    Compt(Edge),
    Cont(Edge),
    Es(Edge),
    TimerFired(TimerId),
    PortFault,
    OperatorReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Read-only snapshot of everything a guard might need: the signal that
/// triggered re-evaluation plus the current level of every E84 signal this
/// core cares about, and a few derived facts (mode, port readiness, reset
/// gating) the guards are written against rather than the raw registry.
#[derive(Debug, Clone, Copy)]
pub struct GuardView {
    pub trigger: Trigger,
    pub cs0: bool,
    pub cs1: bool,
    pub valid: bool,
    pub tr_req: bool,
    pub busy: bool,
    pub compt: bool,
    pub cont: bool,
    pub es: bool,
    pub mode_auto: bool,
    pub port_ready: bool,
    pub inputs_idle: bool,
    pub port_clean: bool,
}

impl GuardView {
    /// Exactly one of `cs0`/`cs1` high selects a direction; both or
    /// neither is the `ERROR_INVALID_CS` case (spec §4.2, resolved Open
    /// Question in SPEC_FULL.md).
    pub fn selected_direction(&self) -> Option<LoadDirection> {
        match (self.cs0, self.cs1) {
            (false, true) => Some(LoadDirection::Load),
            (true, false) => Some(LoadDirection::Unload),
            _ => None,
        }
    }
}

pub type Guard = fn(&GuardView) -> bool;

/// What a matched row does besides changing state. Kept as plain data
/// (spec §9 "favor data... over a large switch") so the machine interprets
/// it rather than branching on the row's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Assert `L_REQ` or `U_REQ`, whichever matches the direction latched
    /// when `SELECTED` was entered.
    AssertRequestForDirection,
    AssertReady,
    DropReady,
    /// Drop both `L_REQ` and `U_REQ` unconditionally.
    DropRequests,
    /// `DropRequests` + `DropReady`, used by error/ES rows that must
    /// drop every handshake output at once.
    DropAllHandshakeOutputs,
    /// Tell the Load Port Coordinator to begin preparing for the latched
    /// direction. Fire-and-forget from the machine's perspective; the
    /// outcome arrives later as `EngineInput::PortOutcome`.
    PreparePort,
    PortEmergencySafe,
}

/// Where a matched row sends the machine. Most rows go to a fixed state;
/// the per-timer error states and the `ES` wildcard need information only
/// known at match time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Fixed(State),
    /// `ERROR_<TPn>` for whichever timer the trigger names.
    ErrorForFiredTimer,
}

#[derive(Clone, Copy)]
pub struct Transition {
    pub from: State,
    pub guard: Guard,
    pub to: Target,
    pub actions: &'static [Action],
    pub arms: Option<TimerId>,
}

/// Rows that apply from *every* non-terminal-error, non-`ES_ASSERTED` state,
/// checked before any state-specific row (spec §4.2 "any | ES falling").
pub struct TransitionTable {
    wildcard: Vec<Transition>,
    rows: Vec<Transition>,
}

impl TransitionTable {
    pub fn build() -> Self {
        TransitionTable {
            wildcard: vec![Transition {
                from: State::Idle, // placeholder; wildcard rows ignore `from`
                guard: |v| matches!(v.trigger, Trigger::Es(Edge::Falling)),
                to: Target::Fixed(State::EsAsserted),
                actions: &[Action::DropAllHandshakeOutputs, Action::PortEmergencySafe],
                arms: None,
            }],
            rows: vec![
                // IDLE -> SELECTED
                Transition {
                    from: State::Idle,
                    guard: |v| {
                        matches!(v.trigger, Trigger::Cs0(Edge::Rising) | Trigger::Cs1(Edge::Rising))
                            && (v.cs0 || v.cs1)
                            && v.mode_auto
                            && v.port_ready
                    },
                    to: Target::Fixed(State::Selected),
                    actions: &[Action::PreparePort],
                    arms: Some(TimerId::Tp1),
                },
                // SELECTED -> ERROR_PORT (coordinator faulted while docking,
                // before VALID arrived — see DESIGN.md for why this, and not
                // spec.md §8 scenario 5's literal ERROR_TP2, is authoritative)
                Transition {
                    from: State::Selected,
                    guard: |v| matches!(v.trigger, Trigger::PortFault),
                    to: Target::Fixed(State::ErrorPort),
                    actions: &[Action::DropAllHandshakeOutputs],
                    arms: None,
                },
                // SELECTED -> TRANSFER_READY (valid direction)
                Transition {
                    from: State::Selected,
                    guard: |v| {
                        matches!(v.trigger, Trigger::Valid(Edge::Rising))
                            && v.valid
                            && v.selected_direction().is_some()
                    },
                    to: Target::Fixed(State::TransferReady),
                    actions: &[Action::AssertRequestForDirection],
                    arms: Some(TimerId::Tp2),
                },
                // SELECTED -> ERROR_INVALID_CS (both or neither CS line high)
                Transition {
                    from: State::Selected,
                    guard: |v| {
                        matches!(v.trigger, Trigger::Valid(Edge::Rising))
                            && v.valid
                            && v.selected_direction().is_none()
                    },
                    to: Target::Fixed(State::ErrorInvalidCs),
                    actions: &[Action::DropAllHandshakeOutputs],
                    arms: None,
                },
                // SELECTED -> ERROR_TP1
                Transition {
                    from: State::Selected,
                    guard: |v| matches!(v.trigger, Trigger::TimerFired(TimerId::Tp1)),
                    to: Target::ErrorForFiredTimer,
                    actions: &[Action::DropAllHandshakeOutputs],
                    arms: None,
                },
                // TRANSFER_READY -> TRANSFER_READY'
                Transition {
                    from: State::TransferReady,
                    guard: |v| matches!(v.trigger, Trigger::TrReq(Edge::Rising)) && v.tr_req,
                    to: Target::Fixed(State::TransferReadyPrime),
                    actions: &[Action::AssertReady],
                    arms: Some(TimerId::Tp3),
                },
                // TRANSFER_READY -> ERROR_TP2
                Transition {
                    from: State::TransferReady,
                    guard: |v| matches!(v.trigger, Trigger::TimerFired(TimerId::Tp2)),
                    to: Target::ErrorForFiredTimer,
                    actions: &[Action::DropAllHandshakeOutputs],
                    arms: None,
                },
                // TRANSFER_READY -> ERROR_PORT
                Transition {
                    from: State::TransferReady,
                    guard: |v| matches!(v.trigger, Trigger::PortFault),
                    to: Target::Fixed(State::ErrorPort),
                    actions: &[Action::DropAllHandshakeOutputs],
                    arms: None,
                },
                // TRANSFER_READY' -> TRANSFER_IN_PROGRESS
                Transition {
                    from: State::TransferReadyPrime,
                    guard: |v| matches!(v.trigger, Trigger::Busy(Edge::Rising)) && v.busy,
                    to: Target::Fixed(State::TransferInProgress),
                    actions: &[],
                    arms: Some(TimerId::Tp4),
                },
                // TRANSFER_READY' -> ERROR_TP3
                Transition {
                    from: State::TransferReadyPrime,
                    guard: |v| matches!(v.trigger, Trigger::TimerFired(TimerId::Tp3)),
                    to: Target::ErrorForFiredTimer,
                    actions: &[Action::DropAllHandshakeOutputs],
                    arms: None,
                },
                // TRANSFER_READY' -> ERROR_PORT
                Transition {
                    from: State::TransferReadyPrime,
                    guard: |v| matches!(v.trigger, Trigger::PortFault),
                    to: Target::Fixed(State::ErrorPort),
                    actions: &[Action::DropAllHandshakeOutputs],
                    arms: None,
                },
                // TRANSFER_IN_PROGRESS -> TRANSFER_COMPLETE
                Transition {
                    from: State::TransferInProgress,
                    guard: |v| {
                        matches!(
                            v.trigger,
                            Trigger::Busy(Edge::Falling) | Trigger::Compt(Edge::Rising)
                        ) && !v.busy
                            && v.compt
                    },
                    to: Target::Fixed(State::TransferComplete),
                    actions: &[Action::DropRequests, Action::DropReady],
                    arms: Some(TimerId::Tp5),
                },
                // TRANSFER_IN_PROGRESS -> ERROR_TP4
                Transition {
                    from: State::TransferInProgress,
                    guard: |v| matches!(v.trigger, Trigger::TimerFired(TimerId::Tp4)),
                    to: Target::ErrorForFiredTimer,
                    actions: &[Action::DropAllHandshakeOutputs],
                    arms: None,
                },
                // TRANSFER_IN_PROGRESS -> ERROR_PORT
                Transition {
                    from: State::TransferInProgress,
                    guard: |v| matches!(v.trigger, Trigger::PortFault),
                    to: Target::Fixed(State::ErrorPort),
                    actions: &[Action::DropAllHandshakeOutputs],
                    arms: None,
                },
                // TRANSFER_COMPLETE -> HANDOFF_COMPLETE
                Transition {
                    from: State::TransferComplete,
                    guard: |v| matches!(v.trigger, Trigger::Valid(Edge::Falling)) && !v.valid,
                    to: Target::Fixed(State::HandoffComplete),
                    actions: &[],
                    arms: None,
                },
                // TRANSFER_COMPLETE -> ERROR_TP5
                Transition {
                    from: State::TransferComplete,
                    guard: |v| matches!(v.trigger, Trigger::TimerFired(TimerId::Tp5)),
                    to: Target::ErrorForFiredTimer,
                    actions: &[Action::DropAllHandshakeOutputs],
                    arms: None,
                },
                // HANDOFF_COMPLETE -> IDLE
                Transition {
                    from: State::HandoffComplete,
                    guard: |v| {
                        matches!(v.trigger, Trigger::Cs0(Edge::Falling) | Trigger::Cs1(Edge::Falling))
                            && !v.cs0
                            && !v.cs1
                    },
                    to: Target::Fixed(State::Idle),
                    actions: &[],
                    arms: None,
                },
                // error states and ES_ASSERTED -> IDLE on operator reset
                Transition {
                    from: State::ErrorInvalidCs,
                    guard: reset_guard,
                    to: Target::Fixed(State::Idle),
                    actions: &[],
                    arms: None,
                },
                Transition {
                    from: State::ErrorPort,
                    guard: reset_guard,
                    to: Target::Fixed(State::Idle),
                    actions: &[],
                    arms: None,
                },
                Transition {
                    from: State::EsAsserted,
                    guard: |v| reset_guard(v) && v.es,
                    to: Target::Fixed(State::Idle),
                    actions: &[],
                    arms: None,
                },
                Transition {
                    from: State::ErrorTimer(TimerId::Tp1),
                    guard: reset_guard,
                    to: Target::Fixed(State::Idle),
                    actions: &[],
                    arms: None,
                },
                Transition {
                    from: State::ErrorTimer(TimerId::Tp2),
                    guard: reset_guard,
                    to: Target::Fixed(State::Idle),
                    actions: &[],
                    arms: None,
                },
                Transition {
                    from: State::ErrorTimer(TimerId::Tp3),
                    guard: reset_guard,
                    to: Target::Fixed(State::Idle),
                    actions: &[],
                    arms: None,
                },
                Transition {
                    from: State::ErrorTimer(TimerId::Tp4),
                    guard: reset_guard,
                    to: Target::Fixed(State::Idle),
                    actions: &[],
                    arms: None,
                },
                Transition {
                    from: State::ErrorTimer(TimerId::Tp5),
                    guard: reset_guard,
                    to: Target::Fixed(State::Idle),
                    actions: &[],
                    arms: None,
                },
            ],
        }
    }

    /// True while `state` is eligible for the `ES falling` wildcard row
    /// (every state except the two that already mean "outputs are safe").
    fn wildcard_applies(state: State) -> bool {
        !matches!(state, State::EsAsserted)
    }

    /// First-match-wins row lookup for `state` against `trigger`. Returns
    /// the matched row plus whether a *different*, later-ranked row also
    /// matched (spec §4.2 Edge policy: `AmbiguousGuard` is raised, but the
    /// first match still wins).
    pub fn evaluate(&self, state: State, view: &GuardView) -> (Option<&Transition>, bool) {
        if Self::wildcard_applies(state) {
            if let Some(row) = self.wildcard.iter().find(|t| (t.guard)(view)) {
                return (Some(row), false);
            }
        }

        let mut matched: Option<&Transition> = None;
        let mut ambiguous = false;
        for row in self.rows.iter().filter(|t| t.from == state) {
            if (row.guard)(view) {
                if matched.is_some() {
                    ambiguous = true;
                    continue;
                }
                matched = Some(row);
            }
        }
        (matched, ambiguous)
    }

    /// Operator `reset` is accepted only when all AMHS inputs are idle and
    /// the port reports a clean state (spec §7, §8 scenario 6). Used both
    /// by table rows and by `ControllerFacade::reset` to reject early with
    /// `Error::ResetNotPermitted`-shaped feedback before even posting the
    /// event.
    pub fn reset_permitted(view: &GuardView) -> bool {
        reset_guard(view)
    }
}

fn reset_guard(v: &GuardView) -> bool {
    matches!(v.trigger, Trigger::OperatorReset) && v.inputs_idle && v.port_clean
}
