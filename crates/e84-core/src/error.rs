//! Error kinds for the E84 core (spec §7).
//!
//! Grouped the way the spec groups them — Protocol / Port / Transport /
//! Configuration / System — so callers can match on the group without
//! enumerating every leaf variant.

use crate::timer::TimerId;
use thiserror::Error;

/// Top-level error type returned by every fallible operation in this crate.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// AMHS emergency stop. Always wins over any other event (spec §7).
    #[error("emergency stop asserted")]
    EmergencyStop,

    /// A callback attempted a signal write while already one level deep in
    /// dispatch. See `SignalRegistry`'s deferred-write queue.
    #[error("reentrant dispatch: signal write attempted from within a nested callback")]
    ReentrantDispatch,

    /// Caller tried to write (or claim a writer token for) a signal under
    /// a direction that doesn't match how it was registered (spec §4.1).
    #[error("wrong direction for signal '{0}'")]
    WrongDirection(String),

    /// Signal name collides with one already registered (spec §4.1/§7).
    #[error("signal '{0}' already registered")]
    DuplicateSignal(String),
}

#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("{0:?} expired")]
    TimerExpiry(TimerId),

    #[error("invalid carrier stage selection: CS_0 and CS_1 both {0}")]
    InvalidCarrierStage(&'static str),

    #[error("ambiguous guard: more than one transition matched in state {state}")]
    AmbiguousGuard { state: String },

    #[error("unexpected input {signal} in state {state}")]
    UnexpectedInputInState { signal: String, state: String },

    /// Operator `reset` rejected: AMHS inputs aren't all idle, or the port
    /// doesn't report a clean state (spec §7, §8 scenario 6).
    #[error("reset not permitted: {reason}")]
    ResetNotPermitted { reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum PortError {
    #[error("actuator timed out")]
    ActuatorTimeout,

    #[error("sensor readings are mutually inconsistent: {0}")]
    SensorInconsistent(String),

    #[error("carrier placement failed: {0}")]
    PlacementFailure(String),
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("serial request timed out")]
    SerialTimeout,

    #[error("serial framing error: {0}")]
    SerialFraming(String),

    #[error("digital I/O unavailable: {0}")]
    DigitalIoUnavailable(String),
}

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("signal '{0}' referenced in config but never registered")]
    UnmappedSignal(String),

    #[error("invalid timer value for {timer:?}: {reason}")]
    InvalidTimerValue { timer: TimerId, reason: String },
}
