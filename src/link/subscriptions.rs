//! Serialized notification-enable queue.
//!
//! The wireless stack accepts one descriptor write at a time; a second write
//! issued while one is outstanding is dropped silently. The queue keeps at
//! most one write in flight and hands out the next only when the previous
//! completes.

use std::collections::VecDeque;

use crate::frame::protocol::CharacteristicId;

#[derive(Debug, Default)]
pub struct SubscriptionQueue {
    pending: VecDeque<CharacteristicId>,
    in_flight: Option<CharacteristicId>,
}

impl SubscriptionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a write. Returns the characteristic to start now if the slot
    /// was free.
    pub fn enqueue(&mut self, characteristic: CharacteristicId) -> Option<CharacteristicId> {
        if self.in_flight.is_none() {
            self.in_flight = Some(characteristic);
            Some(characteristic)
        } else {
            self.pending.push_back(characteristic);
            None
        }
    }

    /// Marks the in-flight write finished (successfully or not) and returns
    /// the next one to start.
    pub fn complete(&mut self) -> Option<CharacteristicId> {
        self.in_flight = self.pending.pop_front();
        self.in_flight
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<CharacteristicId> {
        self.in_flight
    }

    /// Nothing in flight and nothing waiting
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_flight = None;
    }
}
