//! # Command Streamer
//!
//! Send-side control loop. While streaming, every period it samples the
//! operator input and calibration, shapes the values, encodes a frame and
//! hands it to a [`CommandSink`].
//!
//! ## States
//!
//! ```text
//!   Idle ──(armed && connected)──▶ Streaming
//!    ▲                                 │
//!    └──(disarm / disconnect / stop)───┘  + one terminal frame
//! ```
//!
//! The period timer lives inside the streamer and is dropped on halt, so no
//! tick can fire after the terminal frame.

use std::future::pending;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::control::calibration::Calibration;
use crate::control::input::ControlInput;
use crate::error::Result;
use crate::frame::encoder::{encode_command, encode_neutral, encode_stop};
use crate::frame::protocol::CommandFrame;

/// Number of frames between status log messages
const LOG_INTERVAL_FRAMES: u64 = 1000;

/// Capability to hand a frame to the link
#[cfg_attr(test, mockall::automock)]
pub trait CommandSink {
    /// Deliver one frame. Errors are reported, never retried.
    fn send_command(&mut self, frame: &CommandFrame) -> Result<()>;
}

/// Wrapping 8-bit frame sequence number
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter(u8);

impl SequenceCounter {
    #[must_use]
    pub fn new() -> Self {
        Self(0)
    }

    /// Sequence number the next frame will carry
    #[must_use]
    pub fn peek(&self) -> u8 {
        self.0
    }

    /// Takes the current number and advances (mod 256)
    pub fn next(&mut self) -> u8 {
        let current = self.0;
        self.0 = self.0.wrapping_add(1);
        current
    }
}

/// Streamer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
}

/// Frame sent once when streaming halts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalFrame {
    /// Throttle 0, rudder centred, disarmed
    Neutral,
    /// Neutral with the stop flag raised
    Stop,
}

/// Periodic command frame scheduler
#[derive(Debug)]
pub struct CommandStreamer {
    state: StreamState,
    sequence: SequenceCounter,
    ticker: Option<Interval>,
    period: Duration,
    frames_sent: u64,
    send_failures: u64,
}

impl Default for CommandStreamer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandStreamer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StreamState::Idle,
            sequence: SequenceCounter::new(),
            ticker: None,
            period: Duration::ZERO,
            frames_sent: 0,
            send_failures: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state == StreamState::Streaming
    }

    /// Sequence number of the next frame
    #[must_use]
    pub fn next_sequence(&self) -> u8 {
        self.sequence.peek()
    }

    /// Frames the sink accepted
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Frames the sink rejected
    #[must_use]
    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }

    /// Current tick period (zero while idle and never started)
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Re-evaluates the arm/connection gate.
    ///
    /// Starts streaming when both hold; halts with a neutral frame when
    /// either drops while streaming.
    pub fn update_gate(
        &mut self,
        armed: bool,
        connected: bool,
        calibration: &Calibration,
        sink: &mut dyn CommandSink,
    ) -> StreamState {
        match (self.state, armed && connected) {
            (StreamState::Idle, true) => self.start(calibration),
            (StreamState::Streaming, false) => {
                self.halt(TerminalFrame::Neutral, calibration, sink)
            }
            _ => {}
        }
        self.state
    }

    fn start(&mut self, calibration: &Calibration) {
        self.period = calibration.command_period();
        // First tick completes immediately
        self.ticker = Some(make_ticker(Instant::now(), self.period));
        self.state = StreamState::Streaming;
        info!(
            "Command streaming started at {}Hz ({:?} period)",
            calibration.command_rate_hz(),
            self.period
        );
    }

    /// Cancels the periodic loop and sends one terminal frame.
    ///
    /// Also valid while idle, where it just sends the terminal frame.
    pub fn halt(
        &mut self,
        terminal: TerminalFrame,
        calibration: &Calibration,
        sink: &mut dyn CommandSink,
    ) {
        if self.ticker.take().is_some() {
            info!("Command streaming stopped after {} frames", self.frames_sent);
        }
        self.state = StreamState::Idle;

        let window = calibration.rudder_window();
        let sequence = self.sequence.next();
        let frame = match terminal {
            TerminalFrame::Neutral => encode_neutral(sequence, window),
            TerminalFrame::Stop => encode_stop(sequence, window),
        };
        debug!("Sending {:?} frame (seq {})", terminal, sequence);
        self.deliver(&frame, sink);
    }

    /// Waits for the next period tick. Never resolves while idle.
    pub async fn next_tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => pending::<()>().await,
        }
    }

    /// Sends one periodic frame built from the given snapshots.
    ///
    /// Does nothing while idle. A rate change in `calibration` re-times the
    /// following ticks.
    pub fn emit(
        &mut self,
        input: &ControlInput,
        calibration: &Calibration,
        sink: &mut dyn CommandSink,
    ) {
        if !self.is_streaming() {
            return;
        }

        let throttle = calibration.apply_throttle(input.throttle);
        let rudder = calibration.apply_rudder(input.rudder);
        let frame = encode_command(
            self.sequence.next(),
            throttle,
            rudder,
            input.armed,
            false,
            calibration.rudder_window(),
        );
        self.deliver(&frame, sink);

        let period = calibration.command_period();
        if period != self.period {
            debug!("Command period changed {:?} -> {:?}", self.period, period);
            self.period = period;
            self.ticker = Some(make_ticker(Instant::now() + period, period));
        }
    }

    fn deliver(&mut self, frame: &CommandFrame, sink: &mut dyn CommandSink) {
        match sink.send_command(frame) {
            Ok(()) => {
                self.frames_sent += 1;
                debug!("Sent command frame {:02X?}", frame.as_bytes());
                if self.frames_sent % LOG_INTERVAL_FRAMES == 0 {
                    info!(
                        "Sent {} frames ({} rejected)",
                        self.frames_sent, self.send_failures
                    );
                }
            }
            Err(e) => {
                // Stale control data is never retransmitted; the next tick carries fresh state
                self.send_failures += 1;
                debug!("Failed to send frame (seq {}): {}", frame.sequence(), e);
            }
        }
    }
}

fn make_ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
