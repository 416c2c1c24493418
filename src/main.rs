//! # Hovercraft Link
//!
//! Bench runner for the hovercraft link.
//!
//! Connects a link session to the simulated peripheral, arms it and drives a
//! slow throttle/rudder sweep so the full command and telemetry path can be
//! watched in the logs.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (first argument, or built-in defaults)
//!    - Set up console and optional daily file logging
//!    - Start the session on the simulated peripheral
//!
//! 2. **Main Loop**
//!    - Update throttle and rudder every 50 ms
//!    - Log link status every 5 seconds
//!    - Handle Ctrl+C for graceful shutdown
//!
//! 3. **Graceful Shutdown**
//!    - Emergency stop frame, disconnect, end the session
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- config/hovercraft.toml
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::time::{interval, timeout, Duration, Instant};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use hovercraft_link::config::{Config, LoggingConfig};
use hovercraft_link::control::settings::CalibrationStore;
use hovercraft_link::link::LinkSession;
use hovercraft_link::telemetry::TelemetryLogger;
use hovercraft_link::transport::event_channel;
use hovercraft_link::transport::sim::SimulatedPeripheral;

/// Input update period of the demo sweep
const SWEEP_STEP: Duration = Duration::from_millis(50);

/// Period between status log messages
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Extra wait on top of the connect timeout before giving up
const CONNECT_GRACE: Duration = Duration::from_secs(1);

const LOG_FILE_NAME: &str = "hovercraft-link.log";

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };
    let _log_guard = init_logging(&config.logging);

    info!("Hovercraft Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let calibration = CalibrationStore::new(config.control.calibration());
    let (events_tx, events_rx) = event_channel();
    let peripheral = Arc::new(SimulatedPeripheral::new(events_tx));

    let mut session = LinkSession::new(peripheral.clone(), calibration.subscribe())
        .with_options(config.session_options());
    if config.telemetry.enabled {
        session = session.with_recorder(TelemetryLogger::from_config(&config.telemetry)?);
    }
    let (link, task) = session.spawn(events_rx);

    link.connect(config.link.address.clone());
    let wait = Duration::from_millis(config.link.connect_timeout_ms) + CONNECT_GRACE;
    let mut connection = link.watch_connection();
    let connected = matches!(
        timeout(wait, connection.wait_for(|state| state.is_connected())).await,
        Ok(Ok(_))
    );
    if !connected {
        link.shutdown();
        task.await?;
        bail!(
            "Could not connect to {}: {}",
            config.link.address,
            link.last_error().unwrap_or_else(|| "no response".to_string())
        );
    }

    link.arm();
    info!(
        "Armed; streaming at {}Hz. Press Ctrl+C to exit",
        config.control.command_rate_hz
    );

    let started = Instant::now();
    let mut sweep = interval(SWEEP_STEP);
    let mut status_log = interval(STATUS_LOG_INTERVAL);

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                let (throttle, rudder) = sweep_inputs(started.elapsed().as_secs_f32());
                link.input().set_throttle(throttle);
                link.input().set_rudder(rudder);
            }

            _ = status_log.tick() => {
                let battery = link.battery();
                info!(
                    "{} | battery {:?}mV ({:?}%) | RSSI {:?} dBm | {} frames at peripheral",
                    link.connection_state(),
                    battery.voltage_mv,
                    battery.percent,
                    link.rssi(),
                    peripheral.frames_received()
                );
                if !link.connection_state().is_connected() {
                    info!("Link is down, exiting");
                    break;
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    link.stop();
    link.disconnect();
    link.shutdown();
    task.await?;

    info!(
        "Total frames received by peripheral: {} ({} rejected)",
        peripheral.frames_received(),
        peripheral.frames_rejected()
    );
    Ok(())
}

/// Console logging plus an optional daily-rotated file.
///
/// `RUST_LOG` overrides the configured level. The returned guard must stay
/// alive for the file writer to flush.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}

/// Gentle throttle pulse and slow rudder sweep at `t` seconds
fn sweep_inputs(t: f32) -> (f32, f32) {
    let throttle = 0.3 + 0.2 * (t * 0.5).sin();
    let rudder = (t * 0.25).sin();
    (throttle, rudder)
}
