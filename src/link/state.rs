//! Observable link state published to the operator side.

use std::fmt;

/// Connection lifecycle. The address travels with the state that uses it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting(String),
    Connected(String),
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Peripheral address, if any
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Disconnected => None,
            Self::Connecting(address) | Self::Connected(address) => Some(address),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting(address) => write!(f, "Connecting to {}", address),
            Self::Connected(address) => write!(f, "Connected to {}", address),
        }
    }
}

/// Arm/stream flags for status displays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatus {
    pub armed: bool,
    pub streaming: bool,
    pub stopped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address() {
        assert_eq!(ConnectionState::Disconnected.address(), None);
        let state = ConnectionState::Connecting("AA:BB".to_string());
        assert_eq!(state.address(), Some("AA:BB"));
        assert!(!state.is_connected());
        assert!(ConnectionState::Connected("AA:BB".to_string()).is_connected());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::default().to_string(), "Disconnected");
        assert_eq!(
            ConnectionState::Connected("AA:BB".to_string()).to_string(),
            "Connected to AA:BB"
        );
    }
}
