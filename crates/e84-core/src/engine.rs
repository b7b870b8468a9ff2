//! Engine actor (SPEC_FULL.md [ENGINE]): ties the Signal Registry,
//! Transition Table, State Machine, Timer Service, and Load Port
//! Coordinator together behind one `tokio::task` that drains events in
//! strict arrival order (spec §5). Grounded on the teacher's
//! `ShellExecutor` (mpsc command queue + oneshot responses, one task
//! owning all mutable state) and `QemuSupervisor` (`broadcast` event
//! fan-out).

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, instrument, warn};

use crate::config::ControllerConfig;
use crate::error::{Error, PortError, ProtocolError};
use crate::event::ControllerEvent;
use crate::facade::ControllerMode;
use crate::port::{LoadPortCoordinator, PortReport, PrepareOutcome};
use crate::signal::{Direction, SignalHandle, SignalRegistry, SignalSnapshot, WriteToken};
use crate::state::{LoadDirection, State, StateMachine, TransitionRecord};
use crate::table::{Edge, GuardView, Target, Trigger, TransitionTable};
use crate::timer::{TimerFired, TimerGenerations, TimerId, TimerService};

const AMHS_INPUTS: [&str; 8] =
    ["VALID", "CS_0", "CS_1", "TR_REQ", "BUSY", "COMPT", "CONT", "ES"];
const AMHS_OUTPUTS: [&str; 4] = ["L_REQ", "U_REQ", "READY", "HO_AVBL"];
const PORT_INTERNALS: [&str; 4] = ["CARRIER_PRESENT", "CLAMPED", "DOCKED", "PLACEMENT_OK"];

/// Read-only view handed to API/GUI callers (spec §4.5 observer surface).
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub state: State,
    pub direction: Option<LoadDirection>,
    pub mode: ControllerMode,
    pub armed_timer: Option<TimerId>,
    pub signals: std::collections::BTreeMap<String, SignalSnapshot>,
    pub history: Vec<TransitionRecord>,
    pub port: PortReport,
}

enum EngineCommand {
    /// An AMHS input line changed level. Posted by the transport layer
    /// (or, in tests/the scenario runner, directly).
    Amhs { name: &'static str, level: bool },
    TimerFired(TimerFired),
    Reset(oneshot::Sender<Result<(), Error>>),
    SetMode(ControllerMode, oneshot::Sender<Result<(), Error>>),
    RequestStop(oneshot::Sender<Result<(), Error>>),
    Status(oneshot::Sender<StatusSnapshot>),
}

/// Cheap, cloneable, `Send` handle to the Engine's task. Never exposes the
/// registry itself (spec §9 "must be passed explicitly as collaborators...
/// to keep the machine testable with a fake registry") — only
/// `EngineCommand`s cross the boundary.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl EngineHandle {
    /// Drive an AMHS input signal to `level`. In production this is called
    /// by the digital-line or ASCII transport's input thread; in tests and
    /// the scenario runner (`e84-testing`) it is called directly.
    pub fn set_amhs_signal(&self, name: &'static str, level: bool) {
        let _ = self.cmd_tx.send(EngineCommand::Amhs { name, level });
    }

    pub async fn reset(&self) -> Result<(), Error> {
        self.call(EngineCommand::Reset).await
    }

    pub async fn set_mode(&self, mode: ControllerMode) -> Result<(), Error> {
        self.call(|tx| EngineCommand::SetMode(mode, tx)).await
    }

    pub async fn request_stop(&self) -> Result<(), Error> {
        self.call(EngineCommand::RequestStop).await
    }

    pub async fn status(&self) -> StatusSnapshot {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(EngineCommand::Status(tx));
        rx.await.unwrap_or(StatusSnapshot {
            state: State::Idle,
            direction: None,
            mode: ControllerMode::Fault,
            armed_timer: None,
            signals: Default::default(),
            history: Vec::new(),
            port: PortReport::idle(),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.event_tx.subscribe()
    }

    async fn call<F>(&self, make: F) -> Result<(), Error>
    where
        F: FnOnce(oneshot::Sender<Result<(), Error>>) -> EngineCommand,
    {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(make(tx)).is_err() {
            return Err(Error::Port(PortError::SensorInconsistent(
                "engine task has shut down".to_string(),
            )));
        }
        rx.await.unwrap_or(Err(Error::Port(PortError::SensorInconsistent(
            "engine task dropped the response channel".to_string(),
        ))))
    }
}

struct SignalWiring {
    handles: HashMap<&'static str, SignalHandle>,
    tokens: HashMap<&'static str, WriteToken>,
}

/// Owns the registry, table, state machine, timers, and port coordinator.
/// Lives entirely inside the task spawned by [`Engine::spawn`]; nothing
/// outside that task ever touches its fields directly (spec §5 "the
/// Signal Registry is touched only by the dispatch thread").
pub struct Engine<P: LoadPortCoordinator> {
    registry: SignalRegistry,
    wiring: SignalWiring,
    table: TransitionTable,
    machine: StateMachine,
    timers: TimerService,
    timer_gens: TimerGenerations,
    armed: Option<(TimerId, u64)>,
    durations: HashMap<TimerId, Duration>,
    port: P,
    mode: ControllerMode,
    event_tx: broadcast::Sender<ControllerEvent>,
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl<P: LoadPortCoordinator + 'static> Engine<P> {
    /// Construct and spawn the Engine task, returning a handle callers use
    /// to drive it. `port` is already the chosen variant (digital or
    /// ASCII) — picking one is a startup decision (spec §4.4).
    pub fn spawn(config: &ControllerConfig, port: P) -> Result<EngineHandle, Error> {
        let durations = config.timers.resolve()?;
        let (event_tx, _) = broadcast::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (fired_tx, fired_rx) = mpsc::channel(32);
        let (timers, timer_gens) = TimerService::spawn(fired_tx);

        let mut registry = SignalRegistry::new();
        let wiring = Self::wire_signals(&mut registry, &event_tx)?;

        let engine = Engine {
            registry,
            wiring,
            table: TransitionTable::build(),
            machine: StateMachine::new(config.history_capacity),
            timers,
            timer_gens,
            armed: None,
            durations,
            port,
            mode: config.mode,
            event_tx: event_tx.clone(),
            cmd_tx: cmd_tx.clone(),
        };

        tokio::spawn(engine.run(cmd_rx, fired_rx));

        Ok(EngineHandle { cmd_tx, event_tx })
    }

    fn wire_signals(
        registry: &mut SignalRegistry,
        event_tx: &broadcast::Sender<ControllerEvent>,
    ) -> Result<SignalWiring, Error> {
        let mut handles = HashMap::new();
        let mut tokens = HashMap::new();

        for name in AMHS_INPUTS {
            let h = registry.register(name, Direction::InputFromPeer, false)?;
            let token = registry.claim_writer(h, Direction::InputFromPeer)?;
            handles.insert(name, h);
            tokens.insert(name, token);
        }
        for name in AMHS_OUTPUTS {
            let h = registry.register(name, Direction::OutputToPeer, false)?;
            let token = registry.claim_writer(h, Direction::OutputToPeer)?;
            handles.insert(name, h);
            tokens.insert(name, token);
        }
        for name in PORT_INTERNALS {
            let h = registry.register(name, Direction::Internal, false)?;
            let token = registry.claim_writer(h, Direction::Internal)?;
            handles.insert(name, h);
            tokens.insert(name, token);
        }

        for name in AMHS_INPUTS.into_iter().chain(AMHS_OUTPUTS).chain(PORT_INTERNALS) {
            let tx = event_tx.clone();
            let owned_name = name.to_string();
            registry.subscribe(name, move |ev, _deferred| {
                let _ = tx.send(ControllerEvent::SignalChanged {
                    name: owned_name.clone(),
                    level: ev.level,
                    at: ev.at,
                });
            });
        }

        Ok(SignalWiring { handles, tokens })
    }

    #[instrument(skip(self, cmd_rx, fired_rx), name = "engine_run")]
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
        mut fired_rx: mpsc::Receiver<TimerFired>,
    ) {
        info!("engine started in IDLE");
        self.recompute_ho_avbl();
        loop {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                fired = fired_rx.recv() => {
                    match fired {
                        Some(fired) => self.handle_timer_fired(fired).await,
                        None => break,
                    }
                }
            }
        }
        info!("engine shut down");
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Amhs { name, level } => self.handle_amhs(name, level).await,
            EngineCommand::TimerFired(fired) => self.handle_timer_fired(fired).await,
            EngineCommand::Reset(tx) => {
                let _ = tx.send(self.handle_reset().await);
            }
            EngineCommand::SetMode(mode, tx) => {
                let _ = tx.send(self.handle_set_mode(mode));
            }
            EngineCommand::RequestStop(tx) => {
                let _ = tx.send(self.handle_request_stop());
            }
            EngineCommand::Status(tx) => {
                let _ = tx.send(self.snapshot());
            }
        }
    }

    /// `ES` falling always wins over any other event (spec §7): checked
    /// ahead of the ordinary table evaluation for every `Amhs` event, not
    /// merely as one more table row race.
    async fn handle_amhs(&mut self, name: &'static str, level: bool) {
        let handle = self.wiring.handles[name];
        let old = self.registry.read(handle);
        if old == level {
            return;
        }
        let token = self.wiring.tokens[name];
        if self.registry.write(&token, level).is_err() {
            return;
        }

        if name == "ES" && !level {
            self.evaluate_and_apply(Trigger::Es(Edge::Falling)).await;
            return;
        }

        let trigger = match (name, level) {
            ("CS_0", true) => Trigger::Cs0(Edge::Rising),
            ("CS_0", false) => Trigger::Cs0(Edge::Falling),
            ("CS_1", true) => Trigger::Cs1(Edge::Rising),
            ("CS_1", false) => Trigger::Cs1(Edge::Falling),
            ("VALID", true) => Trigger::Valid(Edge::Rising),
            ("VALID", false) => Trigger::Valid(Edge::Falling),
            ("TR_REQ", true) => Trigger::TrReq(Edge::Rising),
            ("TR_REQ", false) => Trigger::TrReq(Edge::Falling),
            ("BUSY", true) => Trigger::Busy(Edge::Rising),
            ("BUSY", false) => Trigger::Busy(Edge::Falling),
            ("COMPT", true) => Trigger::Compt(Edge::Rising),
            ("COMPT", false) => Trigger::Compt(Edge::Falling),
            ("CONT", true) => Trigger::Cont(Edge::Rising),
            ("CONT", false) => Trigger::Cont(Edge::Falling),
            ("ES", true) => Trigger::Es(Edge::Rising),
            _ => return,
        };
        self.evaluate_and_apply(trigger).await;
    }

    async fn handle_timer_fired(&mut self, fired: TimerFired) {
        let Some((armed_id, armed_gen)) = self.armed else { return };
        if armed_id != fired.id || armed_gen != fired.generation {
            // stale: already cancelled/re-armed behind this event in the
            // queue (spec §5 "the machine detects the stale id on dequeue
            // and discards it").
            return;
        }
        self.armed = None;
        self.broadcast(ControllerEvent::TimerFired { timer: fired.id, at: Utc::now() });
        self.evaluate_and_apply(Trigger::TimerFired(fired.id)).await;
    }

    // Reached via evaluate_and_apply -> run_action -> dispatch_prepare, so
    // the `Trigger::PortFault` re-entry below is indirect recursion into
    // evaluate_and_apply; `Box::pin` breaks the otherwise-infinite future
    // size that recursive async fns produce.
    fn handle_port_outcome<'a>(
        &'a mut self,
        outcome: Result<PrepareOutcome, Error>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match outcome {
                Ok(PrepareOutcome::Ready) => {
                    // Informational; the handshake continues to be driven
                    // by AMHS signals, not by port readiness alone.
                }
                Ok(PrepareOutcome::Fault(reason)) => {
                    self.broadcast(ControllerEvent::Fault {
                        kind: "PlacementFailure".to_string(),
                        detail: reason,
                        at: Utc::now(),
                    });
                    self.evaluate_and_apply(Trigger::PortFault).await;
                }
                Err(e) => {
                    self.broadcast(ControllerEvent::Fault {
                        kind: "PortError".to_string(),
                        detail: e.to_string(),
                        at: Utc::now(),
                    });
                    self.evaluate_and_apply(Trigger::PortFault).await;
                }
            }
        })
    }

    async fn handle_reset(&mut self) -> Result<(), Error> {
        if self.machine.current() == State::Idle {
            // Idempotent no-op (spec §8 law); emits no events.
            return Ok(());
        }
        let view = self.build_guard_view(Trigger::OperatorReset);
        if !TransitionTable::reset_permitted(&view) {
            let reason = if !view.inputs_idle {
                "AMHS inputs are not idle".to_string()
            } else {
                "port does not report a clean state".to_string()
            };
            return Err(Error::Protocol(ProtocolError::ResetNotPermitted { reason }));
        }
        self.evaluate_and_apply(Trigger::OperatorReset).await;
        // Best-effort: tell the port collaborator the reset went through so
        // an ASCII port can clear its own latched fault over the wire too
        // (spec §6 `RESET`). Never blocks the operator's reset on it.
        let _ = self.port.notify_reset().await;
        self.sync_port_signals();
        // A successful reset is what clears a latched fault (spec §7 "only
        // by explicit operator reset"); `ControllerMode::Fault` is itself
        // part of that latch, so restore `AUTO` here rather than leaving
        // the machine sitting in IDLE but still gated out of HO_AVBL.
        if self.mode == ControllerMode::Fault {
            self.mode = ControllerMode::Auto;
            self.recompute_ho_avbl();
        }
        Ok(())
    }

    fn handle_set_mode(&mut self, mode: ControllerMode) -> Result<(), Error> {
        if mode == ControllerMode::Auto {
            let port = self.port.report();
            if !port.is_ready() && self.machine.current() != State::Idle {
                return Err(Error::Port(PortError::SensorInconsistent(
                    "port not ready for AUTO".to_string(),
                )));
            }
            if !self.registry.read(self.wiring.handles["ES"]) {
                return Err(Error::EmergencyStop);
            }
        }
        self.mode = mode;
        self.recompute_ho_avbl();
        Ok(())
    }

    fn handle_request_stop(&mut self) -> Result<(), Error> {
        self.mode = ControllerMode::Manual;
        self.recompute_ho_avbl();
        Ok(())
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.machine.current(),
            direction: self.machine.direction(),
            mode: self.mode,
            armed_timer: self.armed.map(|(id, _)| id),
            signals: self.registry.snapshot(),
            history: self.machine.history().cloned().collect(),
            port: self.port.report(),
        }
    }

    fn build_guard_view(&self, trigger: Trigger) -> GuardView {
        let read = |name: &str| self.registry.read(self.wiring.handles[name]);
        let inputs_idle =
            !read("CS_0") && !read("CS_1") && !read("VALID") && !read("TR_REQ") && !read("BUSY") && !read("COMPT");
        GuardView {
            trigger,
            cs0: read("CS_0"),
            cs1: read("CS_1"),
            valid: read("VALID"),
            tr_req: read("TR_REQ"),
            busy: read("BUSY"),
            compt: read("COMPT"),
            cont: read("CONT"),
            es: read("ES"),
            mode_auto: self.mode == ControllerMode::Auto,
            port_ready: self.port.report().is_ready(),
            inputs_idle,
            port_clean: self.port.report().is_clean(),
        }
    }

    /// Drain whatever sensor-change reports the coordinator has queued
    /// since the last drain and reflect each field through the registry's
    /// `CARRIER_PRESENT`/`CLAMPED`/`DOCKED`/`PLACEMENT_OK` internal signals
    /// (spec §3 Data Model, §4.4 "on_change" — both the digital and ASCII
    /// variants drive these same four signals).
    fn sync_port_signals(&mut self) {
        for report in self.port.drain_changes() {
            self.write_output("CARRIER_PRESENT", report.carrier_present);
            self.write_output("CLAMPED", report.clamped);
            self.write_output("DOCKED", report.docked);
            self.write_output("PLACEMENT_OK", report.placement_ok);
        }
    }

    #[instrument(skip(self), fields(state = %self.machine.current()))]
    async fn evaluate_and_apply(&mut self, trigger: Trigger) {
        self.sync_port_signals();
        let view = self.build_guard_view(trigger);
        let (matched, ambiguous) = self.table.evaluate(self.machine.current(), &view);

        if ambiguous {
            self.broadcast(ControllerEvent::Fault {
                kind: "AmbiguousGuard".to_string(),
                detail: format!("multiple rows matched in {}", self.machine.current()),
                at: Utc::now(),
            });
        }

        let Some(row) = matched else { return };

        // Copy what's needed out of `row` before taking any `&mut self` —
        // `row` borrows `self.table`, which must not still be borrowed once
        // we start mutating other fields below.
        let to = match row.to {
            Target::Fixed(s) => s,
            Target::ErrorForFiredTimer => match trigger {
                Trigger::TimerFired(id) => State::ErrorTimer(id),
                _ => return,
            },
        };
        let actions = row.actions;
        let arms = row.arms;

        if to == State::Selected {
            self.machine.set_direction(view.selected_direction());
        }

        self.cancel_armed();
        for action in actions {
            self.run_action(*action, &view).await;
        }
        self.sync_port_signals();
        if let Some(timer) = arms {
            self.arm(timer);
        }

        let from = self.machine.apply(to, trigger);
        self.broadcast(ControllerEvent::StateChanged { from, to, at: Utc::now() });
        self.recompute_ho_avbl();

        if to.is_terminal() {
            self.broadcast(ControllerEvent::Fault {
                kind: fault_kind(to),
                detail: format!("entered {to}"),
                at: Utc::now(),
            });
        }
        if to.is_error() {
            self.mode = ControllerMode::Fault;
        }
    }

    async fn run_action(&mut self, action: crate::table::Action, view: &GuardView) {
        use crate::table::Action::*;
        match action {
            AssertRequestForDirection => match self.machine.direction() {
                Some(LoadDirection::Load) => self.write_output("L_REQ", true),
                Some(LoadDirection::Unload) => self.write_output("U_REQ", true),
                None => warn!("AssertRequestForDirection with no latched direction"),
            },
            AssertReady => self.write_output("READY", true),
            DropReady => self.write_output("READY", false),
            DropRequests => {
                self.write_output("L_REQ", false);
                self.write_output("U_REQ", false);
            }
            DropAllHandshakeOutputs => {
                self.write_output("L_REQ", false);
                self.write_output("U_REQ", false);
                self.write_output("READY", false);
            }
            PreparePort => self.dispatch_prepare(view).await,
            PortEmergencySafe => {
                self.port.emergency_safe();
                let _ = self.port.flush_pending().await;
            }
        }
    }

    fn write_output(&mut self, name: &str, level: bool) {
        let token = self.wiring.tokens[name];
        let _ = self.registry.write(&token, level);
    }

    /// Drive `prepare_for_load`/`prepare_for_unload` to completion and feed
    /// the outcome straight back through `handle_port_outcome`. A real
    /// serial coordinator would rather report its outcome from a task of
    /// its own, but this core's boundary stops at the `LoadPortCoordinator`
    /// trait (spec §1, §4.4) — whatever implements it owns its own
    /// internal timeouts, so awaiting it here never blocks the engine
    /// task's event loop beyond that coordinator's own bounded latency.
    async fn dispatch_prepare(&mut self, view: &GuardView) {
        let Some(direction) = view.selected_direction() else { return };
        let outcome = match direction {
            LoadDirection::Load => self.port.prepare_for_load().await,
            LoadDirection::Unload => self.port.prepare_for_unload().await,
        };
        self.handle_port_outcome(outcome).await;
    }

    fn cancel_armed(&mut self) {
        if let Some((id, _)) = self.armed.take() {
            self.timers.cancel(id, &self.timer_gens);
        }
    }

    fn arm(&mut self, id: TimerId) {
        let duration = self.durations[&id];
        let generation = self.timers.arm(id, duration, &self.timer_gens);
        self.armed = Some((id, generation));
        self.broadcast(ControllerEvent::TimerArmed {
            timer: id,
            duration_ms: duration.as_millis() as u64,
            at: Utc::now(),
        });
    }

    /// `HO_AVBL` is asserted only when every startup/runtime gate spec §4.5
    /// requires is satisfied: `IDLE`, `AUTO`, the port reporting ready, and
    /// `ES` de-asserted (read `true`, per this codebase's ES-falling =
    /// emergency convention — see `handle_set_mode`'s identical check).
    /// Called both from `spawn` (so a default/minimal config never boots
    /// straight into `HO_AVBL=1` without confirming these) and after every
    /// transition/mode change.
    fn recompute_ho_avbl(&mut self) {
        let desired = self.machine.current() == State::Idle
            && self.mode == ControllerMode::Auto
            && self.port.report().is_ready()
            && self.registry.read(self.wiring.handles["ES"]);
        self.write_output("HO_AVBL", desired);
    }

    fn broadcast(&self, event: ControllerEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Stable machine-readable fault identifier for a terminal state (spec §8
/// scenario 2's `TP1_EXPIRY`, scenario 3/5's state names).
fn fault_kind(state: State) -> String {
    match state {
        State::ErrorTimer(id) => format!("{}_EXPIRY", format!("{id:?}").to_uppercase()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{AsciiLoadPortCoordinator, MockLineTransport};

    fn test_config() -> ControllerConfig {
        ControllerConfig {
            interface: crate::config::InterfaceKind::Ascii,
            ascii: Some(crate::config::AsciiConfig { port: "mock".to_string(), baud: 9600 }),
            digital_mapping: vec![],
            timers: crate::config::TimerOverrides {
                tp1_ms: Some(50),
                tp2_ms: Some(50),
                tp3_ms: Some(5_000),
                tp4_ms: Some(5_000),
                tp5_ms: Some(50),
            },
            mode: ControllerMode::Auto,
            log_level: "info".to_string(),
            history_capacity: 256,
        }
    }

    fn spawn_happy_port() -> AsciiLoadPortCoordinator<MockLineTransport> {
        let mut transport = MockLineTransport::new();
        transport.push_response("OK");
        AsciiLoadPortCoordinator::new(transport, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn happy_load_round_trip_returns_to_idle() {
        let cfg = test_config();
        let port = spawn_happy_port();
        let handle = Engine::spawn(&cfg, port).unwrap();
        let mut events = handle.subscribe_events();

        handle.set_amhs_signal("ES", true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.set_amhs_signal("CS_1", true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.set_amhs_signal("VALID", true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.set_amhs_signal("TR_REQ", true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.set_amhs_signal("BUSY", true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.set_amhs_signal("BUSY", false);
        handle.set_amhs_signal("COMPT", true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.set_amhs_signal("VALID", false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.set_amhs_signal("CS_1", false);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = handle.status().await;
        assert_eq!(status.state, State::Idle);
        assert_eq!(status.signals["HO_AVBL"].level, true);
        assert_eq!(status.signals["L_REQ"].level, false);
        assert_eq!(status.signals["READY"].level, false);

        // Drain a few events just to prove the broadcast channel is alive.
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn tp1_timeout_latches_error() {
        let cfg = test_config();
        let port = spawn_happy_port();
        let handle = Engine::spawn(&cfg, port).unwrap();

        handle.set_amhs_signal("ES", true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.set_amhs_signal("CS_1", true);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let status = handle.status().await;
        assert_eq!(status.state, State::ErrorTimer(TimerId::Tp1));
        assert_eq!(status.signals["HO_AVBL"].level, false);
    }

    #[tokio::test]
    async fn invalid_carrier_stage_is_rejected() {
        let cfg = test_config();
        let port = spawn_happy_port();
        let handle = Engine::spawn(&cfg, port).unwrap();

        handle.set_amhs_signal("ES", true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.set_amhs_signal("CS_0", true);
        handle.set_amhs_signal("CS_1", true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.set_amhs_signal("VALID", true);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let status = handle.status().await;
        assert_eq!(status.state, State::ErrorInvalidCs);
    }

    #[tokio::test]
    async fn emergency_stop_forces_outputs_safe() {
        let cfg = test_config();
        let port = spawn_happy_port();
        let handle = Engine::spawn(&cfg, port).unwrap();

        handle.set_amhs_signal("ES", true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.set_amhs_signal("CS_1", true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.set_amhs_signal("VALID", true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.set_amhs_signal("TR_REQ", true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.set_amhs_signal("BUSY", true);
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle.set_amhs_signal("ES", false);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let status = handle.status().await;
        assert_eq!(status.state, State::EsAsserted);
        assert_eq!(status.signals["L_REQ"].level, false);
        assert_eq!(status.signals["READY"].level, false);
        assert_eq!(status.signals["HO_AVBL"].level, false);
    }

    #[tokio::test]
    async fn reset_is_rejected_while_cs_still_high() {
        let cfg = test_config();
        let port = spawn_happy_port();
        let handle = Engine::spawn(&cfg, port).unwrap();

        handle.set_amhs_signal("ES", true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.set_amhs_signal("CS_1", true);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(handle.status().await.state, State::ErrorTimer(TimerId::Tp1));

        let err = handle.reset().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::ResetNotPermitted { .. })));

        handle.set_amhs_signal("CS_1", false);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.reset().await.is_ok());
        assert_eq!(handle.status().await.state, State::Idle);
    }

    #[tokio::test]
    async fn reset_in_idle_is_a_idempotent_no_op() {
        let cfg = test_config();
        let port = spawn_happy_port();
        let handle = Engine::spawn(&cfg, port).unwrap();
        assert!(handle.reset().await.is_ok());
        assert_eq!(handle.status().await.state, State::Idle);
    }
}
