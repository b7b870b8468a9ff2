//! Controller Facade (spec §4.5). Thin: owns nothing beyond a handle to
//! the running [`crate::engine::Engine`] and the startup gating spec §4.5
//! describes. All the actual state lives in the Engine's task.

use serde::{Deserialize, Serialize};

use crate::engine::{EngineHandle, StatusSnapshot};
use crate::error::Error;
use crate::event::ControllerEvent;

/// Operating mode (spec §3). Only `Auto` permits the state machine to
/// assert `HO_AVBL` (Invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerMode {
    Auto,
    Manual,
    Maintenance,
    Fault,
}

impl Default for ControllerMode {
    fn default() -> Self {
        ControllerMode::Manual
    }
}

/// The operator-facing surface spec §4.5 and §6 ("Operator surface")
/// describe. Every call is a round trip to the Engine's single-threaded
/// task; the facade itself holds no machine state.
pub struct ControllerFacade {
    engine: EngineHandle,
}

impl ControllerFacade {
    pub fn new(engine: EngineHandle) -> Self {
        ControllerFacade { engine }
    }

    pub fn handle(&self) -> EngineHandle {
        self.engine.clone()
    }

    /// Gated per §7/§8 scenario 6: rejected with `Error::ResetNotPermitted`-
    /// shaped feedback unless all AMHS inputs are idle and the port reports
    /// a clean state. A no-op (no events emitted) when already `IDLE`
    /// (§8 law "Idempotence of reset").
    pub async fn reset(&self) -> Result<(), Error> {
        self.engine.reset().await
    }

    /// Dropping out of `Auto` forces `HO_AVBL` low on the next recompute
    /// (Invariant 1). Entering `Auto` is refused unless the port reports
    /// ready and `ES` is de-asserted (spec §4.5 "Refuses to start... unless
    /// mode=AUTO and port ready and ES de-asserted").
    pub async fn set_mode(&self, mode: ControllerMode) -> Result<(), Error> {
        self.engine.set_mode(mode).await
    }

    /// Operator-initiated graceful stop, distinct from the AMHS-driven
    /// emergency stop (`ES` falling).
    pub async fn request_stop(&self) -> Result<(), Error> {
        self.engine.request_stop().await
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.engine.status().await
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ControllerEvent> {
        self.engine.subscribe_events()
    }
}
