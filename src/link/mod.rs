//! # Link Module
//!
//! Connection lifecycle and the command/telemetry engine.
//!
//! This module handles:
//! - Connect, discovery, subscription and teardown ([`session`])
//! - Periodic command frame streaming ([`streamer`])
//! - One-at-a-time notification enables ([`subscriptions`])
//! - State published to the operator side ([`state`])

pub mod session;
pub mod state;
pub mod streamer;
pub mod subscriptions;

pub use session::{LinkHandle, LinkSession, SessionOptions};
pub use state::{ConnectionState, StreamStatus};
