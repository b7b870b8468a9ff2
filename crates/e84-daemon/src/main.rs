//! SEMI E84 Load-Port Handshake Controller Daemon (e84ctl)
//!
//! Standalone service that:
//! - Runs the E84 Engine against a digital or ASCII load port
//! - Exposes a REST API and WebSocket event stream
//!
//! Default bind: 127.0.0.1:8884
//! WebSocket: /events
//! REST API: /health, /status, /reset, /mode, /stop

mod api;
mod config;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use e84_core::{
    AsciiLoadPortCoordinator, ControllerConfig, ControllerFacade, DigitalIoPort,
    DigitalLoadPortCoordinator, Engine, Error, LoadPortCoordinator,
};

use config::DaemonConfig;
use transport::TcpLineTransport;

/// No real digital I/O card driver ships with this core (spec §1); this
/// stub always reports the line as unavailable so a misconfigured
/// `digital` interface fails loudly at first read rather than silently
/// reporting everything low.
struct UnavailableDigitalIoPort;

impl DigitalIoPort for UnavailableDigitalIoPort {
    fn read_line(&self, card: u8, port: u8, bit: u8) -> Result<bool, Error> {
        Err(Error::Transport(e84_core::TransportError::DigitalIoUnavailable(format!(
            "no digital I/O card driver configured (card {card} port {port} bit {bit})"
        ))))
    }

    fn write_line(&mut self, card: u8, port: u8, bit: u8, _level: bool) -> Result<(), Error> {
        Err(Error::Transport(e84_core::TransportError::DigitalIoUnavailable(format!(
            "no digital I/O card driver configured (card {card} port {port} bit {bit})"
        ))))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let daemon_config = DaemonConfig::from_env();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{},e84_daemon=debug", daemon_config.log_level))),
        )
        .init();

    info!("starting e84ctl");
    info!("version: {}", env!("CARGO_PKG_VERSION"));

    let controller_config = config::load_controller_config(&daemon_config.controller_config_path)?;

    match controller_config.interface {
        e84_core::config::InterfaceKind::Ascii => {
            let ascii = controller_config
                .ascii
                .clone()
                .expect("validated controller config carries ascii settings");
            info!("connecting to ASCII load port at {}", ascii.port);
            let transport = TcpLineTransport::connect(&ascii.port).await?;
            let coordinator = AsciiLoadPortCoordinator::new(transport, Duration::from_secs(5));
            run(daemon_config, controller_config, coordinator).await
        }
        e84_core::config::InterfaceKind::Digital => {
            info!("digital interface selected; no card driver is wired in this build");
            let coordinator = DigitalLoadPortCoordinator::new(
                UnavailableDigitalIoPort,
                controller_config.digital_mapping.clone(),
                Duration::from_secs(5),
            );
            run(daemon_config, controller_config, coordinator).await
        }
    }
}

async fn run<P: LoadPortCoordinator + 'static>(
    daemon_config: DaemonConfig,
    controller_config: ControllerConfig,
    port: P,
) -> Result<()> {
    let bind_addr: std::net::SocketAddr = daemon_config.bind_addr.parse()?;

    let handle = Engine::spawn(&controller_config, port).map_err(|e| anyhow::anyhow!(e))?;
    let facade = Arc::new(ControllerFacade::new(handle));

    let app = api::create_router(facade);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("e84ctl listening on http://{bind_addr}");
    info!("event stream: ws://{bind_addr}/events");
    info!("swagger UI: http://{bind_addr}/swagger-ui");

    axum::serve(listener, app).await?;
    Ok(())
}
