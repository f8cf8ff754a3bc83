//! # Serial Bridge
//!
//! Relays a serial device's byte stream to one TCP client at a time and
//! decodes the device's JSON telemetry lines into a bounded history.
//!
//! ## Features
//!
//! - **Raw Relay**: Byte-for-byte passthrough between the device and the
//!   linked TCP client, in both directions.
//! - **Telemetry Decoding**: Lines such as `{"angle":30,"temp":1023,"status":"FIRE"}`
//!   become [`TelemetryRecord`](telemetry::TelemetryRecord)s; noise is skipped.
//! - **Snapshot Reads**: Front ends read owned copies of the status and the
//!   history without blocking the I/O tasks.
//!
//! ## Architecture
//!
//! The project is organized into the following modules:
//!
//! - [`telemetry`]: Line decoding and the record history
//! - [`serial`]: Serial device access, split into a line reader and a writer
//! - [`relay`]: Single-client TCP listener
//! - [`bridge`]: The service running both paths, plus its config and status
//! - [`error`]: Custom error types for the crate

pub mod bridge;
pub mod error;
pub mod relay;
pub mod serial;
pub mod telemetry;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::bridge::{BridgeConfig, BridgeService, ConnectionStatus, ServiceState};
    pub use crate::error::*;
    pub use crate::relay::RelaySettings;
    pub use crate::serial::PortSettings;
    pub use crate::telemetry::{TelemetryRecord, TelemetryStatus};
}
