//! The literal scenarios and laws of spec §8, replayed through the public
//! scenario runner rather than against `Engine` internals (those are
//! covered directly in `e84-core::engine`'s own unit tests; this crate
//! exercises the same behavior the way an integrator driving the daemon
//! over its wire surface would observe it).

use std::time::Duration;

use e84_core::{ControllerMode, Error, ProtocolError, State};
use e84_testing::{fixtures, run_scenario, ScenarioStep};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Scenario 1: happy load round trip returns to IDLE with `HO_AVBL` the
/// only output left high.
#[tokio::test]
async fn happy_load_round_trip() {
    let config = fixtures::default_test_config();
    let port = fixtures::happy_port();

    let steps = [
        ScenarioStep::new(ms(0), "ES", true),
        ScenarioStep::new(ms(0), "CS_1", true),
        ScenarioStep::new(ms(10), "VALID", true),
        ScenarioStep::new(ms(10), "TR_REQ", true),
        ScenarioStep::new(ms(10), "BUSY", true),
        ScenarioStep::new(ms(50), "BUSY", false),
        ScenarioStep::new(ms(0), "COMPT", true),
        ScenarioStep::new(ms(10), "VALID", false),
        ScenarioStep::new(ms(10), "CS_1", false),
    ];

    let outcome = run_scenario(&config, port, &steps, ms(100)).await.unwrap();

    let trace = outcome.state_trace();
    assert!(trace.contains(&State::Selected));
    assert!(trace.contains(&State::TransferReady));
    assert!(trace.contains(&State::TransferInProgress));
    assert!(trace.contains(&State::TransferComplete));
    assert!(trace.contains(&State::HandoffComplete));
    assert_eq!(*trace.last().unwrap(), State::Idle);

    assert_eq!(outcome.status.state, State::Idle);
    assert_eq!(outcome.status.signals["HO_AVBL"].level, true);
    assert_eq!(outcome.status.signals["L_REQ"].level, false);
    assert_eq!(outcome.status.signals["U_REQ"].level, false);
    assert_eq!(outcome.status.signals["READY"].level, false);
    assert_eq!(outcome.status.armed_timer, None);
}

/// Scenario 2: TP1 expires with nothing after `CS_1`. Outputs drop to
/// zero and a `TP1_EXPIRY` fault is emitted.
#[tokio::test]
async fn tp1_timeout_latches_error_tp1() {
    let config = fixtures::short_timer_config(30, 50, 5_000, 5_000, 50);
    let port = fixtures::happy_port();

    let steps = [
        ScenarioStep::new(ms(0), "ES", true),
        ScenarioStep::new(ms(0), "CS_1", true),
    ];

    let outcome = run_scenario(&config, port, &steps, ms(150)).await.unwrap();

    assert_eq!(outcome.status.state, State::ErrorTimer(e84_core::TimerId::Tp1));
    assert_eq!(outcome.status.mode, ControllerMode::Fault);
    assert_eq!(outcome.status.signals["HO_AVBL"].level, false);
    assert_eq!(outcome.status.signals["L_REQ"].level, false);
    assert!(outcome.fault_kinds().contains(&"TP1_EXPIRY".to_string()));
}

/// Scenario 3: both carrier-stage lines high at once is rejected before
/// TP1 would ever fire.
#[tokio::test]
async fn invalid_carrier_stage_is_rejected() {
    let config = fixtures::short_timer_config(5_000, 50, 5_000, 5_000, 50);
    let port = fixtures::happy_port();

    let steps = [
        ScenarioStep::new(ms(0), "ES", true),
        ScenarioStep::new(ms(0), "CS_0", true),
        ScenarioStep::new(ms(0), "CS_1", true),
        ScenarioStep::new(ms(10), "VALID", true),
    ];

    let outcome = run_scenario(&config, port, &steps, ms(100)).await.unwrap();

    assert_eq!(outcome.status.state, State::ErrorInvalidCs);
    assert_eq!(outcome.status.mode, ControllerMode::Fault);
}

/// Scenario 4: dropping `ES` mid-transfer forces every handshake output
/// low immediately, regardless of protocol phase.
#[tokio::test]
async fn emergency_stop_forces_outputs_safe() {
    let config = fixtures::default_test_config();
    let port = fixtures::happy_port();

    let steps = [
        ScenarioStep::new(ms(0), "ES", true),
        ScenarioStep::new(ms(0), "CS_1", true),
        ScenarioStep::new(ms(10), "VALID", true),
        ScenarioStep::new(ms(10), "TR_REQ", true),
        ScenarioStep::new(ms(10), "BUSY", true),
        ScenarioStep::new(ms(10), "ES", false),
    ];

    let outcome = run_scenario(&config, port, &steps, ms(100)).await.unwrap();

    assert_eq!(outcome.status.state, State::EsAsserted);
    assert_eq!(outcome.status.signals["L_REQ"].level, false);
    assert_eq!(outcome.status.signals["U_REQ"].level, false);
    assert_eq!(outcome.status.signals["READY"].level, false);
    assert_eq!(outcome.status.signals["HO_AVBL"].level, false);
}

/// Scenario 5: the ASCII collaborator reports a dock failure while the
/// machine is preparing the port. `PreparePort` runs at `SELECTED` entry
/// (spec §4.4); a fault outcome surfaces a `PlacementFailure` fault and
/// drives the machine straight to `ERROR_PORT` rather than leaving it to
/// idle out the TP2 window.
#[tokio::test]
async fn ascii_port_fault_during_prepare_latches_error_port() {
    let config = fixtures::short_timer_config(5_000, 30, 5_000, 5_000, 50);
    let port = fixtures::faulting_port("DOCK_FAIL");

    let steps = [
        ScenarioStep::new(ms(0), "ES", true),
        ScenarioStep::new(ms(0), "CS_1", true),
    ];

    let outcome = run_scenario(&config, port, &steps, ms(100)).await.unwrap();

    assert!(outcome.fault_kinds().contains(&"PlacementFailure".to_string()));
    assert_eq!(outcome.status.state, State::ErrorPort);
    assert_eq!(outcome.status.mode, ControllerMode::Fault);
}

/// Scenario 6: reset is rejected while `CS_1` is still asserted, and
/// succeeds once it drops, restoring `HO_AVBL`.
#[tokio::test]
async fn reset_gating_after_tp1_timeout() {
    let config = fixtures::short_timer_config(30, 50, 5_000, 5_000, 50);
    let port = fixtures::happy_port();

    let steps = [
        ScenarioStep::new(ms(0), "ES", true),
        ScenarioStep::new(ms(0), "CS_1", true),
    ];

    let handle = e84_core::Engine::spawn(&config, port).unwrap();
    for step in &steps {
        tokio::time::sleep(step.after).await;
        handle.set_amhs_signal(step.signal, step.level);
    }
    tokio::time::sleep(ms(100)).await;

    let status = handle.status().await;
    assert_eq!(status.state, State::ErrorTimer(e84_core::TimerId::Tp1));

    let err = handle.reset().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::ResetNotPermitted { .. })));

    handle.set_amhs_signal("CS_1", false);
    tokio::time::sleep(ms(20)).await;
    handle.reset().await.unwrap();

    let status = handle.status().await;
    assert_eq!(status.state, State::Idle);
    assert_eq!(status.signals["HO_AVBL"].level, true);
}

/// Law: reset in IDLE is an idempotent no-op and emits no state-change or
/// fault events.
#[tokio::test]
async fn reset_in_idle_is_idempotent() {
    let config = fixtures::default_test_config();
    let port = fixtures::happy_port();

    let outcome = run_scenario(&config, port, &[], ms(20)).await.unwrap();
    let handle_events_before = outcome.events.len();
    assert_eq!(outcome.status.state, State::Idle);
    // There is no running handle left to call `reset` on through the
    // scenario runner (it only returns a snapshot), so the idempotence
    // itself is asserted directly against a live handle below.
    let _ = handle_events_before;

    let handle = e84_core::Engine::spawn(&config, fixtures::happy_port()).unwrap();
    let mut rx = handle.subscribe_events();
    handle.reset().await.unwrap();
    tokio::time::sleep(ms(20)).await;
    assert!(rx.try_recv().is_err());
}
