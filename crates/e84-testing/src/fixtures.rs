//! Reusable test fixtures: shortened-timer configs and canned port
//! coordinators, mirroring the core crate's own internal test helpers
//! (`e84-core::engine` tests) at crate-boundary scope so both the core's
//! unit tests and this harness's scenario tests describe the same ports
//! the same way.

use std::time::Duration;

use e84_core::config::{AsciiConfig, InterfaceKind, TimerOverrides};
use e84_core::port::{AsciiLoadPortCoordinator, MockLineTransport};
use e84_core::{ControllerConfig, ControllerMode};

/// A controller config wired for the ASCII interface with every protocol
/// timer shortened to millisecond scale, suitable for tests that need to
/// observe a real expiry without waiting out the 2s/60s protocol defaults
/// (spec §4.2).
pub fn short_timer_config(tp1_ms: u64, tp2_ms: u64, tp3_ms: u64, tp4_ms: u64, tp5_ms: u64) -> ControllerConfig {
    ControllerConfig {
        interface: InterfaceKind::Ascii,
        ascii: Some(AsciiConfig { port: "mock".to_string(), baud: 9600 }),
        digital_mapping: Vec::new(),
        timers: TimerOverrides {
            tp1_ms: Some(tp1_ms),
            tp2_ms: Some(tp2_ms),
            tp3_ms: Some(tp3_ms),
            tp4_ms: Some(tp4_ms),
            tp5_ms: Some(tp5_ms),
        },
        mode: ControllerMode::Auto,
        log_level: "info".to_string(),
        history_capacity: 256,
    }
}

/// The default short-timer config used by most scenario tests: fast
/// select/valid/handoff timers (TP1/TP2/TP5) and generous transfer timers
/// (TP3/TP4) so a held `BUSY` signal doesn't race the test itself.
pub fn default_test_config() -> ControllerConfig {
    short_timer_config(50, 50, 5_000, 5_000, 50)
}

/// An ASCII port pre-queued with a single `OK` response: the happy path
/// for any scenario that only asks the port to prepare once.
pub fn happy_port() -> AsciiLoadPortCoordinator<MockLineTransport> {
    let mut transport = MockLineTransport::new();
    transport.push_response("OK");
    AsciiLoadPortCoordinator::new(transport, Duration::from_millis(200))
}

/// An ASCII port whose single prepare attempt comes back as the named
/// ASCII fault code (spec §8 scenario 5).
pub fn faulting_port(code: &str) -> AsciiLoadPortCoordinator<MockLineTransport> {
    let mut transport = MockLineTransport::new();
    transport.push_response(&format!("ERR:{code}"));
    AsciiLoadPortCoordinator::new(transport, Duration::from_millis(200))
}
