//! # Control Input Module
//!
//! Operator control state and the handle used to write it.
//!
//! The operator side writes throttle and rudder whenever they change; the
//! session samples a copied snapshot on its own schedule and never waits for
//! input. Both sides share one `watch` channel, so every read sees a
//! consistent value.

use std::sync::Arc;

use tokio::sync::watch;

/// Operator control state at one instant.
///
/// # Examples
///
/// ```
/// use hovercraft_link::control::input::ControlInput;
///
/// let input = ControlInput::default();
/// assert_eq!(input.throttle, 0.0);
/// assert!(!input.armed);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlInput {
    /// Throttle (0.0 to 1.0)
    pub throttle: f32,
    /// Rudder (-1.0 full left to 1.0 full right)
    pub rudder: f32,
    /// Motor output permitted
    pub armed: bool,
    /// An explicit stop was issued and has not been cleared by re-arming
    pub stopped: bool,
}

impl ControlInput {
    /// Neutral, disarmed input
    #[must_use]
    pub fn neutral() -> Self {
        Self::default()
    }
}

/// Writer for throttle and rudder.
///
/// Cloning is cheap; all clones write the same channel. Arming is not exposed
/// here because it is gated by the connection state in the session.
#[derive(Debug, Clone)]
pub struct InputHandle {
    tx: Arc<watch::Sender<ControlInput>>,
}

impl InputHandle {
    pub(crate) fn new(tx: Arc<watch::Sender<ControlInput>>) -> Self {
        Self { tx }
    }

    /// Sets throttle, clamped to 0.0-1.0. NaN is ignored.
    pub fn set_throttle(&self, value: f32) {
        if value.is_nan() {
            return;
        }
        self.tx.send_modify(|input| input.throttle = value.clamp(0.0, 1.0));
    }

    /// Sets rudder, clamped to -1.0-1.0. NaN is ignored.
    pub fn set_rudder(&self, value: f32) {
        if value.is_nan() {
            return;
        }
        self.tx.send_modify(|input| input.rudder = value.clamp(-1.0, 1.0));
    }

    /// Consistent copy of the current input
    #[must_use]
    pub fn snapshot(&self) -> ControlInput {
        *self.tx.borrow()
    }

    /// Receiver notified on every input change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ControlInput> {
        self.tx.subscribe()
    }
}
