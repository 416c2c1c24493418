//! # Error Types
//!
//! Custom error types for Hovercraft Link using `thiserror`.
//!
//! None of these unwind across the session: each one is absorbed where it
//! happens and turned into a state transition or a last-error message.

use thiserror::Error;

use crate::frame::protocol::CharacteristicId;

/// Main error type for Hovercraft Link
#[derive(Debug, Error)]
pub enum LinkError {
    /// No radio or adapter present
    #[error("Wireless transport is not available on this device")]
    TransportUnavailable,

    /// The platform refused access to the radio
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The transport reported a failed connection attempt
    #[error("Connection failed with status {0}")]
    ConnectFailed(i32),

    /// The connection attempt did not complete in time
    #[error("Connection attempt timed out after {0} ms")]
    ConnectTimeout(u64),

    /// Service/characteristic resolution failed
    #[error("Service discovery failed: {0}")]
    ServiceDiscoveryFailed(String),

    /// A characteristic the feature needs is absent on the peripheral
    #[error("Characteristic not found: {0}")]
    CharacteristicMissing(CharacteristicId),

    /// A frame or telemetry payload could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The transport did not accept a command frame
    #[error("Command frame rejected by transport")]
    SendRejected,

    /// A signal-strength read did not complete within one polling period
    #[error("Signal strength read timed out after {0} ms")]
    SignalStrengthTimeout(u64),

    /// The link dropped underneath an operation
    #[error("Connection lost")]
    ConnectionLost,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Telemetry record serialization errors
    #[error("Telemetry encoding error: {0}")]
    TelemetryEncoding(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Hovercraft Link
pub type Result<T> = std::result::Result<T, LinkError>;
