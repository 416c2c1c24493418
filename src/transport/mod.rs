//! # Transport Module
//!
//! The narrow capability set the link needs from the wireless stack.
//!
//! This module handles:
//! - Connecting to and disconnecting from a peripheral by address
//! - Resolving the peripheral's characteristics
//! - Enabling notifications on a characteristic
//! - Writing command frames and reading signal strength
//!
//! Asynchronous happenings (values, dropped links) arrive as
//! [`TransportEvent`]s on an unbounded channel the transport is built with.

pub mod sim;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{LinkError, Result};
use crate::frame::protocol::CharacteristicId;

/// Something the transport reports without being asked.
///
/// Every event names the peripheral it came from; a close or notification
/// from a link that has since been replaced is dropped by the session.
#[derive(Debug)]
pub enum TransportEvent {
    /// The link went away. `error` is set when it was not a clean close.
    ConnectionLost {
        address: String,
        error: Option<LinkError>,
    },
    /// A characteristic value arrived (notification or read response)
    Value {
        address: String,
        characteristic: CharacteristicId,
        payload: Bytes,
    },
}

impl TransportEvent {
    /// Peripheral the event belongs to
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::ConnectionLost { address, .. } | Self::Value { address, .. } => address,
        }
    }
}

/// Sending half handed to transport implementations
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half consumed by the link session
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Creates the event channel connecting a transport to a session
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Trait for wireless transport operations
///
/// Implementations own the platform connection handle; the session only
/// ever holds this capability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection. Resolves once the link is up.
    async fn connect(&self, address: &str) -> Result<()>;

    /// Close the connection and release platform handles
    async fn disconnect(&self);

    /// Resolve services and return the characteristics present
    async fn discover(&self) -> Result<Vec<CharacteristicId>>;

    /// Enable notifications on a characteristic (descriptor write)
    ///
    /// Callers issue at most one of these at a time.
    async fn subscribe(&self, characteristic: CharacteristicId) -> Result<()>;

    /// Read the current signal strength in dBm
    async fn read_signal_strength(&self) -> Result<i16>;

    /// Write without response. Returns `false` if the write was not accepted.
    fn send(&self, characteristic: CharacteristicId, data: &[u8]) -> bool;
}
