//! SEMI E84 parallel load-port handshake controller core (spec §1).
//!
//! Pure state/logic library: no serial port, no digital I/O card driver,
//! no network surface. Those live in `e84-daemon`; this crate is exactly
//! the Signal Registry, Transition Table, State Machine, Timer Service,
//! Load Port Coordinator contract, and the single-task Engine that ties
//! them together (spec §4, §5).

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod facade;
pub mod port;
pub mod signal;
pub mod state;
pub mod table;
pub mod timer;

pub use config::ControllerConfig;
pub use engine::{Engine, EngineHandle, StatusSnapshot};
pub use error::{ConfigError, Error, PortError, ProtocolError, TransportError};
pub use event::ControllerEvent;
pub use facade::{ControllerFacade, ControllerMode};
pub use port::{
    AsciiLoadPortCoordinator, DigitalIoPort, DigitalLoadPortCoordinator, DigitalMapping,
    LoadPortCoordinator, LoadPortState, LineTransport, MockLineTransport, PortReport,
    PrepareOutcome,
};
pub use signal::{Direction, SignalHandle, SignalRegistry, SubscriptionId, WriteToken};
pub use state::{LoadDirection, State};
pub use timer::TimerId;
