//! # Calibration Store
//!
//! Settings-side handle publishing [`Calibration`] snapshots. The session
//! reads the latest snapshot on every tick, so changes take effect on the
//! next frame without any reconfiguration call.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::calibration::Calibration;

/// Shared, observable calibration settings.
///
/// # Examples
///
/// ```
/// use hovercraft_link::control::settings::CalibrationStore;
///
/// let store = CalibrationStore::default();
/// store.update(|cal| cal.set_command_rate_hz(30));
/// assert_eq!(store.snapshot().command_rate_hz(), 30);
/// ```
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    tx: Arc<watch::Sender<Calibration>>,
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new(Calibration::default())
    }
}

impl CalibrationStore {
    #[must_use]
    pub fn new(initial: Calibration) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Applies an edit through the validating setters and publishes it.
    ///
    /// Subscribers are only notified when the value actually changed.
    pub fn update<F>(&self, edit: F)
    where
        F: FnOnce(&mut Calibration),
    {
        self.tx.send_if_modified(|cal| {
            let before = *cal;
            edit(cal);
            let changed = before != *cal;
            if changed {
                debug!("Calibration updated: {:?}", cal);
            }
            changed
        });
    }

    /// Replaces the whole calibration.
    pub fn replace(&self, calibration: Calibration) {
        self.update(|cal| *cal = calibration);
    }

    #[must_use]
    pub fn snapshot(&self) -> Calibration {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Calibration> {
        self.tx.subscribe()
    }
}
