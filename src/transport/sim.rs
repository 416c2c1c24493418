//! # Simulated Peripheral
//!
//! In-process stand-in for the hovercraft so the link can run without a
//! radio. It validates every command frame it receives, reports a slowly
//! discharging battery once voltage notifications are enabled and answers
//! signal-strength reads with a jittering value.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::{EventSender, Transport, TransportEvent};
use crate::error::{LinkError, Result};
use crate::frame::decoder::parse_command;
use crate::frame::protocol::{
    CharacteristicId, CommandFrame, BATTERY_LEVEL_CHAR, COMMAND_CHAR, TELEMETRY_CHAR,
    VOLTAGE_CHAR,
};

/// Status reported for a connect to an empty address
const SIM_GATT_ERROR: i32 = 133;

/// Fully charged 2S pack
const START_VOLTAGE_MV: u16 = 8_400;

/// Voltage floor of the discharge model
const MIN_VOLTAGE_MV: u16 = 6_000;

/// Baseline signal strength (dBm)
const BASE_RSSI: i16 = -58;

#[derive(Debug, Default)]
struct SimState {
    connected_to: Option<String>,
    frames_received: u64,
    frames_rejected: u64,
    last_frame: Option<CommandFrame>,
    voltage_mv: u16,
    rssi_reads: u32,
    notifier: Option<JoinHandle<()>>,
}

/// Simulated hovercraft peripheral
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    events: EventSender,
    state: Arc<Mutex<SimState>>,
    connect_latency: Duration,
    notify_interval: Duration,
}

impl SimulatedPeripheral {
    pub fn new(events: EventSender) -> Self {
        Self::with_timing(events, Duration::from_millis(250), Duration::from_secs(1))
    }

    /// Custom connect latency and voltage notification period
    pub fn with_timing(
        events: EventSender,
        connect_latency: Duration,
        notify_interval: Duration,
    ) -> Self {
        let state = SimState {
            voltage_mv: START_VOLTAGE_MV,
            ..SimState::default()
        };
        Self {
            events,
            state: Arc::new(Mutex::new(state)),
            connect_latency,
            notify_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock_state(&self.state)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().connected_to.is_some()
    }

    /// Valid command frames received
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.lock().frames_received
    }

    /// Writes that failed frame validation
    #[must_use]
    pub fn frames_rejected(&self) -> u64 {
        self.lock().frames_rejected
    }

    #[must_use]
    pub fn last_frame(&self) -> Option<CommandFrame> {
        self.lock().last_frame
    }

    /// Simulates the peripheral going out of range
    pub fn drop_link(&self) {
        let dropped = {
            let mut state = self.lock();
            stop_notifier(&mut state);
            state.connected_to.take()
        };
        if let Some(address) = dropped {
            warn!("Simulated peripheral dropped the link to {}", address);
            let _ = self.events.send(TransportEvent::ConnectionLost {
                address,
                error: Some(LinkError::ConnectionLost),
            });
        }
    }

    fn start_voltage_notifications(&self, address: String) {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let period = self.notify_interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let voltage_mv = {
                    let mut state = lock_state(&state);
                    let load = state
                        .last_frame
                        .filter(|frame| frame.is_armed())
                        .map_or(0, |frame| u16::from(frame.throttle()) / 20);
                    state.voltage_mv = state.voltage_mv.saturating_sub(1 + load).max(MIN_VOLTAGE_MV);
                    state.voltage_mv
                };
                trace!("Simulated voltage {}mV", voltage_mv);

                let event = TransportEvent::Value {
                    address: address.clone(),
                    characteristic: VOLTAGE_CHAR,
                    payload: Bytes::copy_from_slice(&voltage_mv.to_le_bytes()),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        });

        let mut state = self.lock();
        stop_notifier(&mut state);
        state.notifier = Some(task);
    }
}

fn lock_state(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn stop_notifier(state: &mut SimState) {
    if let Some(task) = state.notifier.take() {
        task.abort();
    }
}

#[async_trait]
impl Transport for SimulatedPeripheral {
    async fn connect(&self, address: &str) -> Result<()> {
        if address.is_empty() {
            return Err(LinkError::ConnectFailed(SIM_GATT_ERROR));
        }
        sleep(self.connect_latency).await;
        info!("Simulated peripheral accepted connection as {}", address);
        self.lock().connected_to = Some(address.to_string());
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.lock();
        stop_notifier(&mut state);
        if state.connected_to.take().is_some() {
            debug!("Simulated peripheral disconnected");
        }
    }

    async fn discover(&self) -> Result<Vec<CharacteristicId>> {
        if !self.is_connected() {
            return Err(LinkError::ServiceDiscoveryFailed("not connected".to_string()));
        }
        Ok(vec![COMMAND_CHAR, TELEMETRY_CHAR, VOLTAGE_CHAR, BATTERY_LEVEL_CHAR])
    }

    async fn subscribe(&self, characteristic: CharacteristicId) -> Result<()> {
        let address = self
            .lock()
            .connected_to
            .clone()
            .ok_or(LinkError::ConnectionLost)?;
        // Descriptor write round trip
        sleep(Duration::from_millis(15)).await;
        if characteristic == VOLTAGE_CHAR {
            self.start_voltage_notifications(address);
        }
        Ok(())
    }

    async fn read_signal_strength(&self) -> Result<i16> {
        let mut state = self.lock();
        if state.connected_to.is_none() {
            return Err(LinkError::ConnectionLost);
        }
        state.rssi_reads = state.rssi_reads.wrapping_add(1);
        Ok(BASE_RSSI - (state.rssi_reads % 7) as i16)
    }

    fn send(&self, characteristic: CharacteristicId, data: &[u8]) -> bool {
        let mut state = self.lock();
        if state.connected_to.is_none() || characteristic != COMMAND_CHAR {
            return false;
        }

        match parse_command(data) {
            Ok(frame) => {
                state.frames_received += 1;
                state.last_frame = Some(frame);
            }
            Err(e) => {
                // Accepted by the radio, dropped by the firmware
                state.frames_rejected += 1;
                warn!("Simulated peripheral dropped frame: {}", e);
            }
        }
        true
    }
}
