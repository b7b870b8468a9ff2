//! Scenario/trace replay harness (spec §4.3: the Engine is "replayed and
//! unit-tested against recorded signal traces"). Spawns a live Engine over
//! a caller-supplied port coordinator, replays a timed sequence of AMHS
//! signal stimuli against it, and captures every broadcast event plus the
//! final snapshot for assertion — the same role the teacher's
//! `crates/testing` plays for the kernel, driving it through recorded
//! sessions rather than poking internals directly.

pub mod fixtures;

use std::time::Duration;

use tokio::sync::broadcast;

use e84_core::{ControllerConfig, ControllerEvent, Engine, Error, LoadPortCoordinator, State, StatusSnapshot};

/// One stimulus in a recorded trace: wait `after`, then drive `signal` to
/// `level`.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioStep {
    pub after: Duration,
    pub signal: &'static str,
    pub level: bool,
}

impl ScenarioStep {
    pub const fn new(after: Duration, signal: &'static str, level: bool) -> Self {
        ScenarioStep { after, signal, level }
    }
}

/// Shorthand for a trace entry fired with no delay since the previous one.
pub const fn step(signal: &'static str, level: bool) -> ScenarioStep {
    ScenarioStep::new(Duration::ZERO, signal, level)
}

/// Everything observed while replaying a trace.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub events: Vec<ControllerEvent>,
    pub status: StatusSnapshot,
}

impl ScenarioOutcome {
    /// The sequence of states entered, in order, as recorded by
    /// `state_changed` events (spec §8 scenario traces read off this).
    pub fn state_trace(&self) -> Vec<State> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ControllerEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    /// Every `fault` event's `kind` field, in order.
    pub fn fault_kinds(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ControllerEvent::Fault { kind, .. } => Some(kind.clone()),
                _ => None,
            })
            .collect()
    }

    /// True if `signal` was ever observed asserted (`level == true`).
    pub fn signal_was_asserted(&self, signal: &str) -> bool {
        self.events.iter().any(|e| {
            matches!(e, ControllerEvent::SignalChanged { name, level, .. } if name == signal && *level)
        })
    }
}

/// Spawn an Engine over `port`, replay `steps` against it in order, then
/// wait `settle` for any trailing timers/events before snapshotting.
pub async fn run_scenario<P: LoadPortCoordinator + 'static>(
    config: &ControllerConfig,
    port: P,
    steps: &[ScenarioStep],
    settle: Duration,
) -> Result<ScenarioOutcome, Error> {
    let handle = Engine::spawn(config, port)?;
    let mut rx = handle.subscribe_events();
    let mut events = Vec::new();

    for step in steps {
        tokio::time::sleep(step.after).await;
        handle.set_amhs_signal(step.signal, step.level);
        // give the single-threaded Engine task a chance to process and
        // rebroadcast before the next stimulus is driven.
        tokio::task::yield_now().await;
        drain_available(&mut rx, &mut events);
    }

    tokio::time::sleep(settle).await;
    drain_available(&mut rx, &mut events);

    let status = handle.status().await;
    Ok(ScenarioOutcome { events, status })
}

fn drain_available(rx: &mut broadcast::Receiver<ControllerEvent>, out: &mut Vec<ControllerEvent>) {
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => break,
        }
    }
}
