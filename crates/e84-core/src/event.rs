//! Observer events (spec §6 "Operator surface": `state_changed`,
//! `signal_changed`, `timer_armed`, `timer_fired`, `fault`). Broadcast to
//! any number of subscribers the way the teacher's `QemuSupervisor`
//! broadcasts `QemuEvent` — cloned out to the GUI/daemon layer, never a
//! live reference into the Engine's state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::State;
use crate::timer::TimerId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    StateChanged {
        from: State,
        to: State,
        at: DateTime<Utc>,
    },
    SignalChanged {
        name: String,
        level: bool,
        at: DateTime<Utc>,
    },
    TimerArmed {
        timer: TimerId,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    TimerFired {
        timer: TimerId,
        at: DateTime<Utc>,
    },
    Fault {
        kind: String,
        detail: String,
        at: DateTime<Utc>,
    },
}
