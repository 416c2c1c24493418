//! # Link Session
//!
//! Owns the connection lifecycle and everything that hangs off it: service
//! discovery, notification enables, signal-strength polling, telemetry
//! decoding and the command streamer.
//!
//! ## Concurrency
//!
//! All session state lives in one task. Operator calls on [`LinkHandle`],
//! transport events and completions of transport operations are all
//! messages into that task, so no two of them ever interleave. Transport
//! operations run as child tasks tagged with a connection epoch; teardown
//! aborts them and bumps the epoch, so a completion from an old connection
//! can never touch the new one. Transport events name their
//! peripheral and are dropped unless it is the current one.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──link up──▶ Connected
//!      ▲                        │                       │
//!      └────────failure─────────┴──disconnect / lost────┘
//! ```
//!
//! After the link is up:
//! 1. Discovery resolves the characteristics
//! 2. The command characteristic is cached for the streamer
//! 3. Notifications are enabled one at a time
//! 4. Signal-strength polling starts once the enables have drained

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::state::{ConnectionState, StreamStatus};
use super::streamer::{CommandSink, CommandStreamer, TerminalFrame};
use super::subscriptions::SubscriptionQueue;
use crate::control::calibration::Calibration;
use crate::control::input::{ControlInput, InputHandle};
use crate::error::{LinkError, Result};
use crate::frame::decoder::{decode_telemetry_with, Telemetry};
use crate::frame::protocol::{
    CharacteristicId, CommandFrame, COMMAND_CHAR, TELEMETRY_CHAR, VOLTAGE_CHAR,
};
use crate::telemetry::battery::{BatteryProfile, BatteryState};
use crate::telemetry::logger::TelemetryLogger;
use crate::transport::{EventReceiver, Transport, TransportEvent};

/// Characteristics whose notifications are enabled after discovery, in order
const NOTIFY_CHARACTERISTICS: [CharacteristicId; 2] = [VOLTAGE_CHAR, TELEMETRY_CHAR];

/// Default connect attempt limit
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default signal-strength polling period
pub const DEFAULT_RSSI_INTERVAL: Duration = Duration::from_secs(1);

/// Session timing and battery options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    pub rssi_interval: Duration,
    pub battery_profile: BatteryProfile,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            rssi_interval: DEFAULT_RSSI_INTERVAL,
            battery_profile: BatteryProfile::default(),
        }
    }
}

/// Operator requests
#[derive(Debug)]
enum Command {
    Connect(String),
    Disconnect,
    Arm,
    Disarm,
    ToggleArm,
    Stop,
    Shutdown,
}

/// Result of a transport operation run as a child task
#[derive(Debug)]
enum Completion {
    Connected(Result<()>),
    Discovered(Result<Vec<CharacteristicId>>),
    Subscribed(CharacteristicId, Result<()>),
    SignalStrength(Result<i16>),
}

/// Publishing side of the observable state
#[derive(Debug)]
struct Observers {
    connection: watch::Sender<ConnectionState>,
    battery: watch::Sender<BatteryState>,
    rssi: watch::Sender<Option<i16>>,
    last_error: watch::Sender<Option<String>>,
    status: watch::Sender<StreamStatus>,
}

impl Observers {
    fn new() -> Self {
        Self {
            connection: watch::channel(ConnectionState::Disconnected).0,
            battery: watch::channel(BatteryState::default()).0,
            rssi: watch::channel(None).0,
            last_error: watch::channel(None).0,
            status: watch::channel(StreamStatus::default()).0,
        }
    }
}

/// Publishes only real changes so watchers are not woken for nothing
fn publish<T: PartialEq>(tx: &watch::Sender<T>, value: T) {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

/// Operator-side handle to a running session.
///
/// Requests are queued to the session task and return immediately; their
/// effect shows up on the watch channels.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    commands: mpsc::UnboundedSender<Command>,
    input: InputHandle,
    connection: watch::Receiver<ConnectionState>,
    battery: watch::Receiver<BatteryState>,
    rssi: watch::Receiver<Option<i16>>,
    last_error: watch::Receiver<Option<String>>,
    status: watch::Receiver<StreamStatus>,
}

impl LinkHandle {
    fn request(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            debug!("Link session has stopped; dropping {:?}", e.0);
        }
    }

    /// Tear down any current connection and connect to `address`
    pub fn connect(&self, address: impl Into<String>) {
        self.request(Command::Connect(address.into()));
    }

    pub fn disconnect(&self) {
        self.request(Command::Disconnect);
    }

    /// Permit motor output. Ignored unless connected.
    pub fn arm(&self) {
        self.request(Command::Arm);
    }

    /// Withdraw motor permission; a neutral frame is sent.
    pub fn disarm(&self) {
        self.request(Command::Disarm);
    }

    pub fn toggle_arm(&self) {
        self.request(Command::ToggleArm);
    }

    /// Emergency stop: zero the controls, disarm and send a stop frame.
    pub fn stop(&self) {
        self.request(Command::Stop);
    }

    /// Disconnect and end the session task
    pub fn shutdown(&self) {
        self.request(Command::Shutdown);
    }

    /// Throttle/rudder writer
    #[must_use]
    pub fn input(&self) -> &InputHandle {
        &self.input
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.borrow().clone()
    }

    #[must_use]
    pub fn battery(&self) -> BatteryState {
        *self.battery.borrow()
    }

    /// Latest signal strength in dBm
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        *self.rssi.borrow()
    }

    /// Most recent error message
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    #[must_use]
    pub fn watch_battery(&self) -> watch::Receiver<BatteryState> {
        self.battery.clone()
    }

    #[must_use]
    pub fn watch_rssi(&self) -> watch::Receiver<Option<i16>> {
        self.rssi.clone()
    }

    #[must_use]
    pub fn watch_last_error(&self) -> watch::Receiver<Option<String>> {
        self.last_error.clone()
    }

    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<StreamStatus> {
        self.status.clone()
    }
}

/// Writes frames to the cached command characteristic
struct TransportSink<'a> {
    transport: &'a dyn Transport,
    characteristic: Option<CharacteristicId>,
}

impl CommandSink for TransportSink<'_> {
    fn send_command(&mut self, frame: &CommandFrame) -> Result<()> {
        let characteristic = self
            .characteristic
            .ok_or(LinkError::CharacteristicMissing(COMMAND_CHAR))?;
        if self.transport.send(characteristic, frame.as_bytes()) {
            Ok(())
        } else {
            Err(LinkError::SendRejected)
        }
    }
}

/// Session state machine. Build it, then [`spawn`](Self::spawn) it.
pub struct LinkSession {
    transport: Arc<dyn Transport>,
    calibration: watch::Receiver<Calibration>,
    options: SessionOptions,
    recorder: Option<TelemetryLogger>,
    input: Arc<watch::Sender<ControlInput>>,
    observers: Observers,
    state: ConnectionState,
    epoch: u64,
    tasks: JoinSet<(u64, Completion)>,
    command_char: Option<CharacteristicId>,
    subscriptions: SubscriptionQueue,
    rssi_pending_start: bool,
    rssi_ticker: Option<Interval>,
    rssi_in_flight: bool,
    streamer: CommandStreamer,
}

impl LinkSession {
    /// Create a session over `transport`, reading calibration from
    /// `calibration` on every frame.
    pub fn new(transport: Arc<dyn Transport>, calibration: watch::Receiver<Calibration>) -> Self {
        let (input, _) = watch::channel(ControlInput::neutral());
        Self {
            transport,
            calibration,
            options: SessionOptions::default(),
            recorder: None,
            input: Arc::new(input),
            observers: Observers::new(),
            state: ConnectionState::Disconnected,
            epoch: 0,
            tasks: JoinSet::new(),
            command_char: None,
            subscriptions: SubscriptionQueue::new(),
            rssi_pending_start: false,
            rssi_ticker: None,
            rssi_in_flight: false,
            streamer: CommandStreamer::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Record every battery update to a JSONL log
    #[must_use]
    pub fn with_recorder(mut self, recorder: TelemetryLogger) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Start the session task consuming `events` from the transport.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn(self, events: EventReceiver) -> (LinkHandle, JoinHandle<()>) {
        let (commands, requests) = mpsc::unbounded_channel();
        let handle = LinkHandle {
            commands,
            input: InputHandle::new(Arc::clone(&self.input)),
            connection: self.observers.connection.subscribe(),
            battery: self.observers.battery.subscribe(),
            rssi: self.observers.rssi.subscribe(),
            last_error: self.observers.last_error.subscribe(),
            status: self.observers.status.subscribe(),
        };
        let task = tokio::spawn(self.run(requests, events));
        (handle, task)
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Command>,
        mut events: EventReceiver,
    ) {
        info!("Link session started");
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;

                request = requests.recv() => match request {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },

                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("Transport event channel closed");
                        events_open = false;
                    }
                },

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => match joined {
                    Ok((epoch, completion)) if epoch == self.epoch => {
                        self.handle_completion(completion).await;
                    }
                    Ok((_, completion)) => trace!("Dropping stale completion {:?}", completion),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => warn!("Transport task failed: {}", e),
                },

                _ = self.streamer.next_tick(), if self.streamer.is_streaming() => self.send_tick(),

                _ = next_poll(&mut self.rssi_ticker), if self.rssi_ticker.is_some() => {
                    self.poll_signal_strength();
                }
            }
        }

        self.teardown().await;
        info!("Link session stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(address) => self.connect(address).await,
            Command::Disconnect => {
                info!("Disconnect requested");
                self.teardown().await;
            }
            Command::Arm => self.arm(),
            Command::Disarm => self.disarm(),
            Command::ToggleArm => {
                if self.input.borrow().armed {
                    self.disarm();
                } else {
                    self.arm();
                }
            }
            Command::Stop => self.stop(),
            Command::Shutdown => {}
        }
    }

    async fn connect(&mut self, address: String) {
        // Any previous connection is fully torn down first
        self.teardown().await;

        info!("Connecting to {}", address);
        self.last_error_clear();
        self.set_connection(ConnectionState::Connecting(address.clone()));

        let transport = Arc::clone(&self.transport);
        let limit = self.options.connect_timeout;
        self.spawn_op(async move {
            let result = timeout(limit, transport.connect(&address))
                .await
                .unwrap_or_else(|_| Err(LinkError::ConnectTimeout(limit.as_millis() as u64)));
            Completion::Connected(result)
        });
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Connected(Ok(())) => {
                let ConnectionState::Connecting(address) = &self.state else {
                    return;
                };
                let address = address.clone();
                info!("Connected to {}", address);
                self.set_connection(ConnectionState::Connected(address));
                self.update_stream();

                let transport = Arc::clone(&self.transport);
                self.spawn_op(async move { Completion::Discovered(transport.discover().await) });
            }
            Completion::Connected(Err(e)) => {
                self.report_error(&e);
                self.teardown().await;
            }
            Completion::Discovered(Ok(characteristics)) => self.on_discovered(&characteristics),
            Completion::Discovered(Err(e)) => {
                // Link stays up; commands are unavailable until reconnect
                self.report_error(&e);
            }
            Completion::Subscribed(characteristic, result) => {
                match result {
                    Ok(()) => debug!("Notifications enabled on {}", characteristic),
                    Err(e) => warn!("Enabling notifications on {} failed: {}", characteristic, e),
                }
                if let Some(next) = self.subscriptions.complete() {
                    self.spawn_subscribe(next);
                } else {
                    self.maybe_start_rssi();
                }
            }
            Completion::SignalStrength(result) => {
                self.rssi_in_flight = false;
                match result {
                    Ok(rssi) => {
                        trace!("RSSI {} dBm", rssi);
                        publish(&self.observers.rssi, Some(rssi));
                    }
                    Err(e) => debug!("Signal strength read failed: {}", e),
                }
            }
        }
    }

    fn on_discovered(&mut self, characteristics: &[CharacteristicId]) {
        debug!("Discovered {} characteristics", characteristics.len());

        if characteristics.contains(&COMMAND_CHAR) {
            self.command_char = Some(COMMAND_CHAR);
        } else {
            self.report_error(&LinkError::CharacteristicMissing(COMMAND_CHAR));
        }

        for characteristic in NOTIFY_CHARACTERISTICS {
            if !characteristics.contains(&characteristic) {
                info!("{} not present; notifications skipped", characteristic);
                continue;
            }
            if let Some(start) = self.subscriptions.enqueue(characteristic) {
                self.spawn_subscribe(start);
            }
        }

        self.rssi_pending_start = true;
        self.maybe_start_rssi();
    }

    fn spawn_subscribe(&mut self, characteristic: CharacteristicId) {
        debug!("Enabling notifications on {}", characteristic);
        let transport = Arc::clone(&self.transport);
        self.spawn_op(async move {
            Completion::Subscribed(characteristic, transport.subscribe(characteristic).await)
        });
    }

    /// Starts polling once discovery is done and no enable is outstanding
    fn maybe_start_rssi(&mut self) {
        if !self.rssi_pending_start || !self.subscriptions.is_idle() || !self.state.is_connected() {
            return;
        }
        self.rssi_pending_start = false;

        let mut ticker = interval(self.options.rssi_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.rssi_ticker = Some(ticker);
        debug!("Signal strength polling every {:?}", self.options.rssi_interval);
    }

    fn poll_signal_strength(&mut self) {
        if self.rssi_in_flight {
            return;
        }
        self.rssi_in_flight = true;
        let transport = Arc::clone(&self.transport);
        let limit = self.options.rssi_interval;
        self.spawn_op(async move {
            let result = timeout(limit, transport.read_signal_strength())
                .await
                .unwrap_or_else(|_| Err(LinkError::SignalStrengthTimeout(limit.as_millis() as u64)));
            Completion::SignalStrength(result)
        });
    }

    fn spawn_op<F>(&mut self, op: F)
    where
        F: std::future::Future<Output = Completion> + Send + 'static,
    {
        let epoch = self.epoch;
        self.tasks.spawn(async move { (epoch, op.await) });
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        if self.state.address() != Some(event.address()) {
            trace!("Dropping event from {}: {:?}", event.address(), event);
            return;
        }

        match event {
            TransportEvent::ConnectionLost { error, .. } => {
                match error {
                    Some(e) => self.report_error(&e),
                    None => info!("Peripheral disconnected"),
                }
                self.teardown().await;
            }
            TransportEvent::Value {
                characteristic,
                payload,
                ..
            } => self.on_value(characteristic, &payload),
        }
    }

    fn on_value(&mut self, characteristic: CharacteristicId, payload: &[u8]) {
        trace!("Value on {}: {:02X?}", characteristic, payload);
        if !self.state.is_connected() {
            trace!("Ignoring value while not connected");
            return;
        }

        match decode_telemetry_with(characteristic, payload, &self.options.battery_profile) {
            Ok(Telemetry::Battery(mut battery)) => {
                battery.timestamp_ms = Some(Utc::now().timestamp_millis());
                debug!(
                    "Battery {}mV ({}%)",
                    battery.voltage_mv.unwrap_or_default(),
                    battery.percent.unwrap_or_default()
                );
                publish(&self.observers.battery, battery);

                if let Some(recorder) = self.recorder.as_mut() {
                    if let Err(e) = recorder.record_battery(&battery) {
                        warn!("Failed to record telemetry: {}", e);
                    }
                }
            }
            Ok(Telemetry::Unknown) => trace!("Ignoring value on {}", characteristic),
            Err(e) => debug!("Dropping telemetry update: {}", e),
        }
    }

    fn arm(&mut self) {
        if !self.state.is_connected() {
            warn!("Arm ignored: not connected");
            return;
        }
        info!("Armed");
        self.input.send_modify(|input| {
            input.armed = true;
            input.stopped = false;
        });
        self.update_stream();
    }

    fn disarm(&mut self) {
        if !self.input.borrow().armed {
            return;
        }
        info!("Disarmed");
        self.input.send_modify(|input| {
            input.armed = false;
            input.stopped = false;
        });
        self.halt_stream(TerminalFrame::Neutral);
    }

    fn stop(&mut self) {
        warn!("Emergency stop");
        self.input.send_modify(|input| {
            *input = ControlInput {
                stopped: true,
                ..ControlInput::neutral()
            };
        });
        self.halt_stream(TerminalFrame::Stop);
    }

    /// Starts or halts streaming to match the arm/connection gate
    fn update_stream(&mut self) {
        let armed = self.input.borrow().armed;
        let connected = self.state.is_connected();
        let calibration = *self.calibration.borrow();
        let mut sink = TransportSink {
            transport: self.transport.as_ref(),
            characteristic: self.command_char,
        };
        self.streamer.update_gate(armed, connected, &calibration, &mut sink);
        self.publish_status();
    }

    fn halt_stream(&mut self, terminal: TerminalFrame) {
        let calibration = *self.calibration.borrow();
        let mut sink = TransportSink {
            transport: self.transport.as_ref(),
            characteristic: self.command_char,
        };
        self.streamer.halt(terminal, &calibration, &mut sink);
        self.publish_status();
    }

    fn send_tick(&mut self) {
        let input = *self.input.borrow();
        let calibration = *self.calibration.borrow();
        let mut sink = TransportSink {
            transport: self.transport.as_ref(),
            characteristic: self.command_char,
        };
        self.streamer.emit(&input, &calibration, &mut sink);
    }

    /// Returns the session to `Disconnected`.
    ///
    /// The final neutral frame goes out while the command characteristic is
    /// still cached; everything tied to the old connection is cancelled
    /// before the transport handle is released.
    async fn teardown(&mut self) {
        if self.streamer.is_streaming() {
            self.halt_stream(TerminalFrame::Neutral);
        }

        self.tasks.abort_all();
        self.epoch = self.epoch.wrapping_add(1);
        self.subscriptions.clear();
        self.rssi_pending_start = false;
        self.rssi_ticker = None;
        self.rssi_in_flight = false;

        if !self.state.is_disconnected() {
            info!("Disconnecting from {}", self.state.address().unwrap_or_default());
            self.transport.disconnect().await;
        }

        self.command_char = None;
        self.input.send_modify(|input| *input = ControlInput::neutral());
        publish(&self.observers.rssi, None);
        publish(&self.observers.battery, BatteryState::default());
        self.set_connection(ConnectionState::Disconnected);
        self.publish_status();
    }

    fn set_connection(&mut self, state: ConnectionState) {
        self.state = state.clone();
        publish(&self.observers.connection, state);
    }

    fn publish_status(&self) {
        let input = *self.input.borrow();
        publish(
            &self.observers.status,
            StreamStatus {
                armed: input.armed,
                streaming: self.streamer.is_streaming(),
                stopped: input.stopped,
            },
        );
    }

    fn report_error(&self, error: &LinkError) {
        warn!("{}", error);
        self.observers.last_error.send_replace(Some(error.to_string()));
    }

    fn last_error_clear(&self) {
        publish(&self.observers.last_error, None);
    }
}

/// Next RSSI tick. Pending forever while polling is off.
async fn next_poll(ticker: &mut Option<Interval>) {
    match ticker.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::control::settings::CalibrationStore;
    use crate::frame::decoder::parse_command;
    use crate::transport::event_channel;
    use crate::transport::mocks::MockTransport;
    use tokio::time::sleep;

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    struct Harness {
        link: LinkHandle,
        transport: MockTransport,
        calibration: CalibrationStore,
        task: JoinHandle<()>,
    }

    fn start_with(options: SessionOptions) -> Harness {
        let (events_tx, events_rx) = event_channel();
        let transport = MockTransport::new(events_tx);
        // 50 Hz keeps frame counts easy to reason about
        let calibration = CalibrationStore::new(Calibration::new(0.05, false, 90, 70, 50));
        let (link, task) = LinkSession::new(Arc::new(transport.clone()), calibration.subscribe())
            .with_options(options)
            .spawn(events_rx);
        Harness {
            link,
            transport,
            calibration,
            task,
        }
    }

    fn start() -> Harness {
        start_with(SessionOptions::default())
    }

    async fn wait_connected(link: &LinkHandle) {
        link.watch_connection()
            .wait_for(|state| state.is_connected())
            .await
            .unwrap();
    }

    async fn wait_disconnected(link: &LinkHandle) {
        link.watch_connection()
            .wait_for(|state| state.is_disconnected())
            .await
            .unwrap();
    }

    async fn connect(h: &Harness) {
        h.link.connect(ADDRESS);
        wait_connected(&h.link).await;
        // Let discovery and notification enables finish
        sleep(Duration::from_millis(100)).await;
    }

    fn frames(transport: &MockTransport) -> Vec<CommandFrame> {
        transport
            .sent_frames()
            .iter()
            .map(|bytes| parse_command(bytes).unwrap())
            .collect()
    }

    // ==================== Connection Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_connect_reaches_connected() {
        let h = start();
        assert_eq!(h.link.connection_state(), ConnectionState::Disconnected);

        h.link.connect(ADDRESS);
        h.link
            .watch_connection()
            .wait_for(|state| matches!(state, ConnectionState::Connecting(_)))
            .await
            .unwrap();

        wait_connected(&h.link).await;
        assert_eq!(h.link.connection_state().address(), Some(ADDRESS));
        assert_eq!(*h.transport.connects.lock().unwrap(), vec![ADDRESS.to_string()]);
        assert!(h.link.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_reports_error() {
        let h = start();
        h.transport.push_connect_result(Err(LinkError::ConnectFailed(133)));

        h.link.connect(ADDRESS);
        h.link
            .watch_last_error()
            .wait_for(|error| error.is_some())
            .await
            .unwrap();

        assert_eq!(h.link.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            h.link.last_error().as_deref(),
            Some("Connection failed with status 133")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let h = start_with(SessionOptions {
            connect_timeout: Duration::from_secs(1),
            ..SessionOptions::default()
        });
        h.transport.set_connect_delay(Duration::from_secs(30));

        h.link.connect(ADDRESS);
        sleep(Duration::from_millis(1500)).await;

        assert_eq!(h.link.connection_state(), ConnectionState::Disconnected);
        assert!(h.link.last_error().unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_connect_ignores_late_completion() {
        let h = start();
        h.transport.set_connect_delay(Duration::from_millis(200));

        h.link.connect(ADDRESS);
        sleep(Duration::from_millis(50)).await;
        h.link.disconnect();
        sleep(Duration::from_millis(500)).await;

        assert_eq!(h.link.connection_state(), ConnectionState::Disconnected);
        assert!(h.transport.subscriptions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_error_while_connecting() {
        let h = start();
        h.transport.set_connect_delay(Duration::from_millis(500));

        h.link.connect(ADDRESS);
        h.link
            .watch_connection()
            .wait_for(|state| matches!(state, ConnectionState::Connecting(_)))
            .await
            .unwrap();
        h.transport.drop_link_from(ADDRESS, Some(LinkError::ConnectFailed(8)));
        wait_disconnected(&h.link).await;

        assert_eq!(
            h.link.last_error().as_deref(),
            Some("Connection failed with status 8")
        );

        // The connect call resolving afterwards changes nothing
        sleep(Duration::from_secs(1)).await;
        assert_eq!(h.link.connection_state(), ConnectionState::Disconnected);
        assert!(h.transport.subscriptions.lock().unwrap().is_empty());
        assert_eq!(h.link.rssi(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_events_from_previous_peripheral_ignored() {
        const NEXT: &str = "11:22:33:44:55:66";
        let h = start();
        connect(&h).await;
        h.transport.set_connect_delay(Duration::from_millis(200));

        h.link.connect(NEXT);
        h.link
            .watch_connection()
            .wait_for(|state| *state == ConnectionState::Connecting(NEXT.to_string()))
            .await
            .unwrap();

        // The old link reports its close after the new attempt started
        h.transport.drop_link_from(ADDRESS, None);
        h.transport.notify_from(ADDRESS, VOLTAGE_CHAR, &[0x58, 0x1B]);
        wait_connected(&h.link).await;
        assert_eq!(h.link.connection_state(), ConnectionState::Connected(NEXT.to_string()));

        h.transport.drop_link_from(ADDRESS, Some(LinkError::ConnectionLost));
        h.transport.notify_from(ADDRESS, VOLTAGE_CHAR, &[0x58, 0x1B]);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.link.connection_state(), ConnectionState::Connected(NEXT.to_string()));
        assert_eq!(h.link.battery(), BatteryState::default());
        assert_eq!(h.link.last_error(), None);

        h.transport.notify(VOLTAGE_CHAR, &[0x58, 0x1B]);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.link.battery().voltage_mv, Some(7000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_tears_down_first() {
        let h = start();
        connect(&h).await;

        h.link.connect("11:22:33:44:55:66");
        h.link
            .watch_connection()
            .wait_for(|state| *state == ConnectionState::Connected("11:22:33:44:55:66".to_string()))
            .await
            .unwrap();

        assert_eq!(h.transport.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(h.transport.connects.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_resets_state() {
        let h = start();
        connect(&h).await;
        h.transport.notify(VOLTAGE_CHAR, &[0x58, 0x1B]);
        sleep(Duration::from_millis(10)).await;
        assert!(h.link.battery().voltage_mv.is_some());
        assert!(h.link.rssi().is_some());

        h.link.disconnect();
        wait_disconnected(&h.link).await;

        assert_eq!(h.link.battery(), BatteryState::default());
        assert_eq!(h.link.rssi(), None);
        assert_eq!(h.transport.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disconnects_and_ends_task() {
        let h = start();
        connect(&h).await;

        h.link.shutdown();
        h.task.await.unwrap();
        assert_eq!(h.transport.disconnects.load(Ordering::SeqCst), 1);
    }

    // ==================== Discovery & Subscription Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_notification_enables_are_serialized() {
        let h = start();
        h.transport
            .set_characteristics(vec![COMMAND_CHAR, VOLTAGE_CHAR, TELEMETRY_CHAR]);
        connect(&h).await;

        assert_eq!(
            *h.transport.subscriptions.lock().unwrap(),
            vec![VOLTAGE_CHAR, TELEMETRY_CHAR]
        );
        assert_eq!(h.transport.max_subscribe_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rssi_polling_waits_for_enables() {
        let h = start();
        h.transport
            .set_characteristics(vec![COMMAND_CHAR, VOLTAGE_CHAR, TELEMETRY_CHAR]);

        h.link.connect(ADDRESS);
        wait_connected(&h.link).await;
        // Two 20 ms enables are still outstanding
        sleep(Duration::from_millis(15)).await;
        assert_eq!(h.transport.rssi_reads.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(100)).await;
        assert!(h.transport.rssi_reads.load(Ordering::SeqCst) >= 1);
        assert!(h.link.rssi().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rssi_polled_periodically() {
        let h = start();
        connect(&h).await;
        let before = h.transport.rssi_reads.load(Ordering::SeqCst);

        sleep(Duration::from_millis(3_050)).await;
        let after = h.transport.rssi_reads.load(Ordering::SeqCst);
        assert_eq!(after - before, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_rssi_read_does_not_stop_polling() {
        let h = start();
        h.transport.stall_rssi.store(true, Ordering::SeqCst);
        connect(&h).await;

        sleep(Duration::from_millis(3_050)).await;
        assert!(h.transport.rssi_reads.load(Ordering::SeqCst) >= 2);
        assert_eq!(h.link.rssi(), None);
        assert!(h.link.connection_state().is_connected());

        h.transport.stall_rssi.store(false, Ordering::SeqCst);
        sleep(Duration::from_secs(3)).await;
        assert!(h.link.rssi().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_voltage_characteristic_is_not_fatal() {
        let h = start();
        h.transport.set_characteristics(vec![COMMAND_CHAR]);
        connect(&h).await;

        assert!(h.link.connection_state().is_connected());
        assert!(h.transport.subscriptions.lock().unwrap().is_empty());
        assert!(h.link.last_error().is_none());
        assert!(h.link.rssi().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_command_characteristic() {
        let h = start();
        h.transport.set_characteristics(vec![VOLTAGE_CHAR]);
        connect(&h).await;

        assert!(h.link.last_error().unwrap().contains("BEEF"));

        h.link.arm();
        sleep(Duration::from_millis(100)).await;
        assert!(h.transport.sent_frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_keeps_link() {
        let h = start();
        h.transport.discover_error.store(true, Ordering::SeqCst);
        connect(&h).await;

        assert!(h.link.connection_state().is_connected());
        assert!(h.link.last_error().unwrap().contains("Service discovery failed"));
    }

    // ==================== Streaming Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_arm_rejected_while_disconnected() {
        let h = start();
        h.link.arm();
        sleep(Duration::from_millis(100)).await;

        assert!(!h.link.status().armed);
        assert!(h.transport.sent_frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_at_command_rate() {
        let h = start();
        connect(&h).await;
        h.link.input().set_throttle(0.5);
        h.link.input().set_rudder(0.5);

        h.link.arm();
        sleep(Duration::from_millis(95)).await;

        let sent = frames(&h.transport);
        // Ticks at 0, 20, 40, 60, 80 ms
        assert_eq!(sent.len(), 5);
        for (i, frame) in sent.iter().enumerate() {
            assert_eq!(frame.sequence(), i as u8);
            assert!(frame.is_armed());
            assert_eq!(frame.throttle(), 50);
            assert_eq!(frame.rudder_angle(), 125);
        }
        let status = h.link.status();
        assert!(status.armed && status.streaming && !status.stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_changes_reach_next_frame() {
        let h = start();
        connect(&h).await;
        h.link.arm();
        sleep(Duration::from_millis(10)).await;

        h.link.input().set_throttle(0.8);
        sleep(Duration::from_millis(20)).await;

        let sent = frames(&h.transport);
        assert_eq!(sent.first().unwrap().throttle(), 0);
        assert_eq!(sent.last().unwrap().throttle(), 80);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_change_applies_without_restart() {
        let h = start();
        connect(&h).await;
        h.link.input().set_rudder(0.5);
        h.link.arm();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(frames(&h.transport).last().unwrap().rudder_angle(), 125);

        h.calibration.update(|cal| cal.set_invert_rudder(true));
        sleep(Duration::from_millis(20)).await;
        assert_eq!(frames(&h.transport).last().unwrap().rudder_angle(), 55);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_sends_neutral_and_stops() {
        let h = start();
        connect(&h).await;
        h.link.input().set_throttle(0.6);
        h.link.arm();
        sleep(Duration::from_millis(50)).await;

        h.link.disarm();
        sleep(Duration::from_millis(1)).await;
        let sent = frames(&h.transport);
        let last = sent.last().unwrap();
        assert!(!last.is_armed());
        assert_eq!(last.throttle(), 0);
        assert_eq!(last.rudder_angle(), 90);

        // Sequence is continuous through the terminal frame
        for pair in sent.windows(2) {
            assert_eq!(pair[1].sequence(), pair[0].sequence().wrapping_add(1));
        }

        sleep(Duration::from_millis(200)).await;
        assert_eq!(frames(&h.transport).len(), sent.len());
        assert!(!h.link.status().streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_arm() {
        let h = start();
        connect(&h).await;

        h.link.toggle_arm();
        h.link.watch_status().wait_for(|s| s.armed).await.unwrap();
        h.link.toggle_arm();
        h.link.watch_status().wait_for(|s| !s.armed).await.unwrap();
        assert!(!h.link.status().streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_sends_stop_frame() {
        let h = start();
        connect(&h).await;
        h.link.input().set_throttle(0.9);
        h.link.arm();
        sleep(Duration::from_millis(30)).await;

        h.link.stop();
        sleep(Duration::from_millis(1)).await;

        let last = *frames(&h.transport).last().unwrap();
        assert!(last.is_stop());
        assert!(!last.is_armed());
        assert_eq!(last.throttle(), 0);

        let status = h.link.status();
        assert!(status.stopped && !status.armed && !status.streaming);
        assert_eq!(h.link.input().snapshot().throttle, 0.0);

        // Re-arming clears the stop
        h.link.arm();
        h.link.watch_status().wait_for(|s| s.armed).await.unwrap();
        assert!(!h.link.status().stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_forces_neutral_frame() {
        let h = start();
        connect(&h).await;
        h.link.input().set_throttle(0.7);
        h.link.arm();
        sleep(Duration::from_millis(50)).await;

        h.transport.drop_link(Some(LinkError::ConnectionLost));
        wait_disconnected(&h.link).await;

        let sent = frames(&h.transport);
        let last = sent.last().unwrap();
        assert!(!last.is_armed());
        assert_eq!(last.throttle(), 0);
        assert_eq!(h.link.last_error().as_deref(), Some("Connection lost"));

        let status = h.link.status();
        assert!(!status.armed && !status.streaming);

        sleep(Duration::from_millis(500)).await;
        assert_eq!(frames(&h.transport).len(), sent.len(), "No frames after disconnect");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_wraps() {
        let h = start();
        connect(&h).await;
        h.link.arm();
        // 300 ticks at 20 ms
        sleep(Duration::from_millis(5_990)).await;

        let sent = frames(&h.transport);
        assert_eq!(sent.len(), 300);
        assert_eq!(sent[255].sequence(), 255);
        assert_eq!(sent[256].sequence(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_sends_keep_streaming() {
        let h = start();
        connect(&h).await;
        h.transport.reject_sends.store(true, Ordering::SeqCst);
        h.link.arm();
        sleep(Duration::from_millis(95)).await;

        assert_eq!(h.transport.sent_frames().len(), 5);
        assert!(h.link.status().streaming);
    }

    // ==================== Telemetry Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_voltage_notification_updates_battery() {
        let h = start();
        connect(&h).await;

        h.transport.notify(VOLTAGE_CHAR, &[0x58, 0x1B]);
        h.link
            .watch_battery()
            .wait_for(|b| b.voltage_mv.is_some())
            .await
            .unwrap();

        let battery = h.link.battery();
        assert_eq!(battery.voltage_mv, Some(7000));
        assert_eq!(battery.percent, Some(22));
        assert!(battery.timestamp_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_telemetry_keeps_previous_state() {
        let h = start();
        connect(&h).await;

        h.transport.notify(VOLTAGE_CHAR, &7.9f32.to_le_bytes());
        sleep(Duration::from_millis(5)).await;
        let before = h.link.battery();
        assert_eq!(before.voltage_mv, Some(7900));

        h.transport.notify(VOLTAGE_CHAR, &[0x01]);
        h.transport.notify(VOLTAGE_CHAR, &f32::NAN.to_le_bytes());
        sleep(Duration::from_millis(5)).await;

        assert_eq!(h.link.battery(), before);
        assert!(h.link.last_error().is_none());
        assert!(h.link.connection_state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_characteristic_ignored() {
        let h = start();
        connect(&h).await;

        h.transport.notify(CharacteristicId(0x1234), &[0x58, 0x1B]);
        h.transport.notify(TELEMETRY_CHAR, &[0x00, 0x01, 0x02]);
        sleep(Duration::from_millis(5)).await;

        assert_eq!(h.link.battery(), BatteryState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_values_ignored_while_disconnected() {
        let h = start();
        h.transport.notify(VOLTAGE_CHAR, &[0x58, 0x1B]);
        sleep(Duration::from_millis(5)).await;
        assert_eq!(h.link.battery(), BatteryState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_updates_are_recorded() {
        let temp = tempfile::TempDir::new().unwrap();
        let (events_tx, events_rx) = event_channel();
        let transport = MockTransport::new(events_tx);
        let calibration = CalibrationStore::default();
        let recorder = TelemetryLogger::new(temp.path(), 100, 2).unwrap();
        let (link, _task) = LinkSession::new(Arc::new(transport.clone()), calibration.subscribe())
            .with_recorder(recorder)
            .spawn(events_rx);

        link.connect(ADDRESS);
        wait_connected(&link).await;
        transport.notify(VOLTAGE_CHAR, &[0x58, 0x1B]);
        link.watch_battery()
            .wait_for(|b| b.voltage_mv.is_some())
            .await
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let contents = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(contents.contains("\"voltage_mv\":7000"));
    }
}
