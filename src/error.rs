//! # Error Module
//!
//! This module provides the error type shared by the bridge components.
//! It uses the `thiserror` crate for ergonomic error handling.
//!
//! Telemetry decode failures have their own type,
//! [`DecodeError`](crate::telemetry::DecodeError), since they are expected and
//! never leave the serial path.

use std::net::SocketAddr;
use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Failed to open serial port.
    #[error("Failed to open serial port '{port_name}': {reason}")]
    PortOpen { port_name: String, reason: String },

    /// Failed to read from serial port.
    #[error("Failed to read from serial port: {0}")]
    PortRead(String),

    /// Failed to write to serial port.
    #[error("Failed to write to serial port: {0}")]
    PortWrite(String),

    /// The serial half was already closed.
    #[error("Serial port is closed")]
    PortClosed,

    /// Failed to bind the TCP listener.
    #[error("Failed to bind TCP listener on {address}: {reason}")]
    Bind { address: String, reason: String },

    /// Failed to send to the linked TCP client.
    #[error("Failed to send to client {peer}: {reason}")]
    ClientSend { peer: SocketAddr, reason: String },

    /// No TCP client is linked.
    #[error("No client is linked")]
    NotLinked,

    /// Socket or stream I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeError {
    /// Creates a new port open error.
    #[must_use]
    pub fn port_open(port_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortOpen {
            port_name: port_name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new port read error.
    #[must_use]
    pub fn port_read(msg: impl Into<String>) -> Self {
        Self::PortRead(msg.into())
    }

    /// Creates a new port write error.
    #[must_use]
    pub fn port_write(msg: impl Into<String>) -> Self {
        Self::PortWrite(msg.into())
    }

    /// Creates a new listener bind error.
    #[must_use]
    pub fn bind(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Bind {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new client send error.
    #[must_use]
    pub fn client_send(peer: SocketAddr, reason: impl Into<String>) -> Self {
        Self::ClientSend {
            peer,
            reason: reason.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
