//! Load Port Coordinator (spec §4.4): one contract, two transport-bound
//! implementations. The State Machine and Engine are written only against
//! [`LoadPortCoordinator`] — swapping `digital` for `ascii` is a startup
//! decision (config `interface`), never a machine-level one.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, PortError, TransportError};
use crate::state::LoadDirection;

/// Physical load-port state machine (spec §3 "Load Port State").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPortState {
    Idle,
    Docking,
    DockedEmpty,
    DockedLoaded,
    Undocking,
    Fault,
}

/// Sensor snapshot reported by either coordinator variant; drives the
/// `CARRIER_PRESENT`/`CLAMPED`/`DOCKED`/`PLACEMENT_OK` internal signals
/// (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortReport {
    pub state: LoadPortState,
    pub carrier_present: bool,
    pub clamped: bool,
    pub docked: bool,
    pub placement_ok: bool,
}

impl PortReport {
    pub const fn idle() -> Self {
        PortReport {
            state: LoadPortState::Idle,
            carrier_present: false,
            clamped: false,
            docked: false,
            placement_ok: false,
        }
    }

    /// "Port reports a clean state" (spec §7, §8 reset gating): no carrier
    /// latched, nothing clamped or docked, and not faulted.
    pub fn is_clean(&self) -> bool {
        self.state != LoadPortState::Fault
            && !self.carrier_present
            && !self.clamped
            && !self.docked
    }

    /// "Port reports ready" (spec §4.2 IDLE -> SELECTED guard; spec §4.5
    /// controller startup/`HO_AVBL` gating): stable and not faulted. A
    /// docked carrier (empty or loaded) is still a ready, settled state —
    /// only an in-flight actuator motion (`Docking`/`Undocking`) or a fault
    /// makes the port not ready.
    pub fn is_ready(&self) -> bool {
        !matches!(self.state, LoadPortState::Fault | LoadPortState::Docking | LoadPortState::Undocking)
    }
}

/// Outcome of an asynchronous `prepare_for_load`/`prepare_for_unload`
/// request, delivered later as `EngineInput::PortOutcome` — never as a
/// blocking call into the state machine (spec §4.4, §5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    Ready,
    Fault(String),
}

/// The contract spec §4.4 defines. `on_change` is modeled as a queue the
/// Engine drains rather than a synchronous callback, matching §5's "no
/// suspension points inside a callback" and keeping the coordinator
/// `Send`-able across the Engine's task boundary.
#[async_trait]
pub trait LoadPortCoordinator: Send {
    async fn prepare_for_load(&mut self) -> Result<PrepareOutcome, Error>;
    async fn prepare_for_unload(&mut self) -> Result<PrepareOutcome, Error>;

    fn report(&self) -> PortReport;

    /// Drain sensor-change notifications accumulated since the last call.
    /// The Engine polls this after every `EngineInput` it processes that
    /// could plausibly have moved the port (spec §4.4 "on_change").
    fn drain_changes(&mut self) -> Vec<PortReport>;

    /// Synchronous; drives the port to the safest reachable state. Must be
    /// re-entrant (spec §4.4) — calling it twice in a row, or while a
    /// `prepare_for_*` is in flight, is always safe and idempotent.
    fn emergency_safe(&mut self);

    /// Deliver whatever `emergency_safe` queued for the transport. No-op by
    /// default: variants where `emergency_safe` already acts directly (the
    /// digital one) have nothing to flush. The ASCII variant uses this to
    /// actually send `STOP` without making `emergency_safe` itself async.
    async fn flush_pending(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Tell the collaborator an operator reset was accepted, so it can clear
    /// any fault latched on its own side (spec §4.4, §6 `RESET` verb).
    /// No-op by default.
    async fn notify_reset(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Digital variant
// ---------------------------------------------------------------------

/// One row of `digital.mapping` (spec §6): which card/port/bit a named
/// signal is wired to, and whether the line is active-low.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalMapping {
    pub signal_name: String,
    pub card: u8,
    pub port: u8,
    pub bit: u8,
    #[serde(default)]
    pub polarity_active_low: bool,
}

/// Abstract 16-in/16-out digital I/O capability the core is handed at
/// startup (spec §6). Concrete card drivers are out of scope (spec §1);
/// this is the boundary they implement against.
pub trait DigitalIoPort: Send {
    fn read_line(&self, card: u8, port: u8, bit: u8) -> Result<bool, Error>;
    fn write_line(&mut self, card: u8, port: u8, bit: u8, level: bool) -> Result<(), Error>;
}

/// Maps physical sensors/actuators directly onto registry-shaped state;
/// reads and writes are immediate (spec §4.4 "Digital variant").
pub struct DigitalLoadPortCoordinator<I: DigitalIoPort> {
    io: I,
    mapping: Vec<DigitalMapping>,
    report: PortReport,
    pending_changes: Vec<PortReport>,
    actuator_timeout: Duration,
}

impl<I: DigitalIoPort> DigitalLoadPortCoordinator<I> {
    pub fn new(io: I, mapping: Vec<DigitalMapping>, actuator_timeout: Duration) -> Self {
        DigitalLoadPortCoordinator {
            io,
            mapping,
            report: PortReport::idle(),
            pending_changes: Vec::new(),
            actuator_timeout,
        }
    }

    fn mapping_for(&self, signal_name: &str) -> Option<&DigitalMapping> {
        self.mapping.iter().find(|m| m.signal_name == signal_name)
    }

    /// Read the four sensor lines this coordinator owns and fold them into
    /// a fresh `PortReport`, queuing it as a change if it differs from the
    /// last one observed.
    pub fn poll_sensors(&mut self) -> Result<(), Error> {
        let carrier_present = self.read_mapped("CARRIER_PRESENT")?;
        let clamped = self.read_mapped("CLAMPED")?;
        let docked = self.read_mapped("DOCKED")?;
        let placement_ok = self.read_mapped("PLACEMENT_OK")?;

        let state = match (docked, clamped, carrier_present) {
            (false, _, _) => LoadPortState::Idle,
            (true, true, true) => LoadPortState::DockedLoaded,
            (true, _, false) => LoadPortState::DockedEmpty,
            (true, false, true) => LoadPortState::Docking,
        };

        let next = PortReport { state, carrier_present, clamped, docked, placement_ok };
        if next != self.report {
            self.report = next;
            self.pending_changes.push(next);
        }
        Ok(())
    }

    fn read_mapped(&self, name: &str) -> Result<bool, Error> {
        let m = self
            .mapping_for(name)
            .ok_or_else(|| Error::Config(crate::error::ConfigError::UnmappedSignal(name.to_string())))?;
        let raw = self.io.read_line(m.card, m.port, m.bit)?;
        Ok(raw ^ m.polarity_active_low)
    }

    fn write_mapped(&mut self, name: &str, level: bool) -> Result<(), Error> {
        let m = self
            .mapping_for(name)
            .ok_or_else(|| Error::Config(crate::error::ConfigError::UnmappedSignal(name.to_string())))?
            .clone();
        self.io.write_line(m.card, m.port, m.bit, level ^ m.polarity_active_low)
    }
}

impl Clone for DigitalMapping {
    fn clone(&self) -> Self {
        DigitalMapping {
            signal_name: self.signal_name.clone(),
            card: self.card,
            port: self.port,
            bit: self.bit,
            polarity_active_low: self.polarity_active_low,
        }
    }
}

#[async_trait]
impl<I: DigitalIoPort> LoadPortCoordinator for DigitalLoadPortCoordinator<I> {
    async fn prepare_for_load(&mut self) -> Result<PrepareOutcome, Error> {
        self.write_mapped("DOCK_ACTUATOR", true).ok();
        match tokio::time::timeout(self.actuator_timeout, async { self.poll_sensors() }).await {
            Ok(Ok(())) if self.report.is_ready() || self.report.docked => Ok(PrepareOutcome::Ready),
            Ok(Ok(())) => Ok(PrepareOutcome::Fault(
                "actuator command accepted but port not yet docked".to_string(),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Port(PortError::ActuatorTimeout)),
        }
    }

    async fn prepare_for_unload(&mut self) -> Result<PrepareOutcome, Error> {
        self.prepare_for_load().await
    }

    fn report(&self) -> PortReport {
        self.report
    }

    fn drain_changes(&mut self) -> Vec<PortReport> {
        std::mem::take(&mut self.pending_changes)
    }

    fn emergency_safe(&mut self) {
        let _ = self.write_mapped("DOCK_ACTUATOR", false);
        let _ = self.write_mapped("CLAMP_ACTUATOR", false);
    }
}

// ---------------------------------------------------------------------
// ASCII variant
// ---------------------------------------------------------------------

/// The "line-oriented request/response collaborator" spec §1/§4.4 place
/// out of scope: this core supplies the trait boundary, not a real serial
/// driver.
#[async_trait]
pub trait LineTransport: Send {
    async fn send_line(&mut self, line: &str) -> Result<String, Error>;
}

/// In-memory transport used by tests and the scenario runner (spec
/// SPEC_FULL.md [PORT]). Responses are queued in advance; an empty queue
/// is a `SerialTimeout`.
#[derive(Default)]
pub struct MockLineTransport {
    responses: VecDeque<Result<String, Error>>,
    pub sent: Vec<String>,
}

impl MockLineTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&mut self, response: &str) {
        self.responses.push_back(Ok(response.to_string()));
    }

    pub fn push_error(&mut self, error: Error) {
        self.responses.push_back(Err(error));
    }
}

#[async_trait]
impl LineTransport for MockLineTransport {
    async fn send_line(&mut self, line: &str) -> Result<String, Error> {
        self.sent.push(line.to_string());
        self.responses
            .pop_front()
            .unwrap_or(Err(Error::Transport(TransportError::SerialTimeout)))
    }
}

/// Minimum verb set spec §6 lists as authoritative (SPEC_FULL.md resolved
/// Open Question 2): `LOAD`, `UNLOAD`, `STATUS`, `RESET`, `STOP`.
fn verb_for(direction: LoadDirection) -> &'static str {
    match direction {
        LoadDirection::Load => "LOAD\r",
        LoadDirection::Unload => "UNLOAD\r",
    }
}

const STOP_VERB: &str = "STOP\r";
const STATUS_VERB: &str = "STATUS\r";
const RESET_VERB: &str = "RESET\r";

/// At-most-one-in-flight command queue over a [`LineTransport`], with a
/// per-command timeout and single retry on transport error before
/// surfacing a port-level fault (spec §4.4, §7).
pub struct AsciiLoadPortCoordinator<T: LineTransport> {
    transport: T,
    command_timeout: Duration,
    report: PortReport,
    pending_changes: Vec<PortReport>,
    pending_commands: VecDeque<String>,
}

impl<T: LineTransport> AsciiLoadPortCoordinator<T> {
    pub fn new(transport: T, command_timeout: Duration) -> Self {
        AsciiLoadPortCoordinator {
            transport,
            command_timeout,
            report: PortReport::idle(),
            pending_changes: Vec::new(),
            pending_commands: VecDeque::new(),
        }
    }

    async fn send_with_retry(&mut self, line: &str) -> Result<String, Error> {
        match tokio::time::timeout(self.command_timeout, self.transport.send_line(line)).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) | Err(_) => {
                // single retry on transport error (spec §4.4/§7)
                match tokio::time::timeout(self.command_timeout, self.transport.send_line(line)).await
                {
                    Ok(Ok(resp)) => Ok(resp),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(Error::Transport(TransportError::SerialTimeout)),
                }
            }
        }
    }

    async fn prepare(&mut self, direction: LoadDirection) -> Result<PrepareOutcome, Error> {
        let line = verb_for(direction);
        match self.send_with_retry(line).await {
            Ok(resp) => self.interpret(&resp),
            Err(_) => Err(Error::Port(PortError::PlacementFailure(
                "serial transport exhausted retry".to_string(),
            ))),
        }
    }

    fn interpret(&mut self, resp: &str) -> Result<PrepareOutcome, Error> {
        if let Some(code) = resp.strip_prefix("ERR:") {
            self.report.state = LoadPortState::Fault;
            self.pending_changes.push(self.report);
            return Ok(PrepareOutcome::Fault(code.to_string()));
        }
        match resp {
            "OK" | "READY" | "DONE" => {
                self.report = PortReport {
                    state: LoadPortState::DockedEmpty,
                    carrier_present: true,
                    clamped: true,
                    docked: true,
                    placement_ok: true,
                };
                self.pending_changes.push(self.report);
                Ok(PrepareOutcome::Ready)
            }
            "BUSY" => Ok(PrepareOutcome::Fault("port busy".to_string())),
            other => Err(Error::Transport(TransportError::SerialFraming(other.to_string()))),
        }
    }

    /// Send `STATUS` and fold the four-bit reply (`STATUS:<carrier><clamp
    /// ed><docked><placement>`, each `0`/`1`) into a fresh `PortReport`,
    /// queuing it as a change if it differs from the last one observed.
    pub async fn refresh_status(&mut self) -> Result<(), Error> {
        let resp = self.send_with_retry(STATUS_VERB).await?;
        let bits = resp
            .strip_prefix("STATUS:")
            .filter(|b| b.len() == 4 && b.chars().all(|c| c == '0' || c == '1'))
            .ok_or_else(|| Error::Transport(TransportError::SerialFraming(resp.clone())))?;
        let bits: Vec<bool> = bits.chars().map(|c| c == '1').collect();
        let (carrier_present, clamped, docked, placement_ok) = (bits[0], bits[1], bits[2], bits[3]);
        let state = if !docked {
            LoadPortState::Idle
        } else if clamped && carrier_present {
            LoadPortState::DockedLoaded
        } else {
            LoadPortState::DockedEmpty
        };
        let next = PortReport { state, carrier_present, clamped, docked, placement_ok };
        if next != self.report {
            self.report = next;
            self.pending_changes.push(next);
        }
        Ok(())
    }
}

#[async_trait]
impl<T: LineTransport> LoadPortCoordinator for AsciiLoadPortCoordinator<T> {
    async fn prepare_for_load(&mut self) -> Result<PrepareOutcome, Error> {
        self.prepare(LoadDirection::Load).await
    }

    async fn prepare_for_unload(&mut self) -> Result<PrepareOutcome, Error> {
        self.prepare(LoadDirection::Unload).await
    }

    fn report(&self) -> PortReport {
        self.report
    }

    fn drain_changes(&mut self) -> Vec<PortReport> {
        std::mem::take(&mut self.pending_changes)
    }

    fn emergency_safe(&mut self) {
        // STOP is queued rather than sent directly since emergency_safe
        // must be synchronous (spec §4.4) and this coordinator's transport
        // is async; the Engine drains it right after via `flush_pending`.
        // The Engine always also forces outputs safe through the registry
        // regardless of whether this ever reaches the port.
        self.report.state = LoadPortState::Fault;
        self.pending_changes.push(self.report);
        self.pending_commands.push_back(STOP_VERB.to_string());
    }

    async fn flush_pending(&mut self) -> Result<(), Error> {
        while let Some(line) = self.pending_commands.pop_front() {
            let _ = self.send_with_retry(&line).await;
        }
        Ok(())
    }

    async fn notify_reset(&mut self) -> Result<(), Error> {
        let resp = self.send_with_retry(RESET_VERB).await?;
        if resp != "OK" && resp != "DONE" {
            return Err(Error::Transport(TransportError::SerialFraming(resp)));
        }
        let _ = self.refresh_status().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ascii_happy_prepare_reports_ready() {
        let mut transport = MockLineTransport::new();
        transport.push_response("OK");
        let mut coord = AsciiLoadPortCoordinator::new(transport, Duration::from_millis(100));
        let outcome = coord.prepare_for_load().await.unwrap();
        assert_eq!(outcome, PrepareOutcome::Ready);
        assert!(coord.report().is_clean() == false);
    }

    #[tokio::test]
    async fn ascii_dock_fail_surfaces_as_fault() {
        let mut transport = MockLineTransport::new();
        transport.push_response("ERR:DOCK_FAIL");
        let mut coord = AsciiLoadPortCoordinator::new(transport, Duration::from_millis(100));
        let outcome = coord.prepare_for_load().await.unwrap();
        assert_eq!(outcome, PrepareOutcome::Fault("DOCK_FAIL".to_string()));
    }

    #[tokio::test]
    async fn ascii_retries_once_then_fails() {
        let mut transport = MockLineTransport::new();
        transport.push_error(Error::Transport(TransportError::SerialTimeout));
        transport.push_error(Error::Transport(TransportError::SerialTimeout));
        let mut coord = AsciiLoadPortCoordinator::new(transport, Duration::from_millis(50));
        let err = coord.prepare_for_load().await.unwrap_err();
        assert!(matches!(err, Error::Port(PortError::PlacementFailure(_))));
    }

    #[tokio::test]
    async fn ascii_emergency_safe_dispatches_stop_on_flush() {
        let mut transport = MockLineTransport::new();
        transport.push_response("OK");
        let mut coord = AsciiLoadPortCoordinator::new(transport, Duration::from_millis(100));
        coord.emergency_safe();
        assert_eq!(coord.report().state, LoadPortState::Fault);
        coord.flush_pending().await.unwrap();
        assert_eq!(coord.transport.sent, vec!["STOP\r".to_string()]);
    }

    #[tokio::test]
    async fn ascii_notify_reset_sends_reset_then_status() {
        let mut transport = MockLineTransport::new();
        transport.push_response("OK");
        transport.push_response("STATUS:0000");
        let mut coord = AsciiLoadPortCoordinator::new(transport, Duration::from_millis(100));
        coord.notify_reset().await.unwrap();
        assert_eq!(coord.transport.sent, vec!["RESET\r".to_string(), "STATUS\r".to_string()]);
        assert_eq!(coord.report(), PortReport::idle());
    }

    #[tokio::test]
    async fn ascii_refresh_status_reports_docked_loaded() {
        let mut transport = MockLineTransport::new();
        transport.push_response("STATUS:1110");
        let mut coord = AsciiLoadPortCoordinator::new(transport, Duration::from_millis(100));
        coord.refresh_status().await.unwrap();
        let report = coord.report();
        assert_eq!(report.state, LoadPortState::DockedLoaded);
        assert!(report.carrier_present && report.clamped && report.docked && !report.placement_ok);
    }
}
