//! Telemetry line protocol: decoding and the bounded record history.

pub mod decoder;
pub mod history;
pub mod record;

pub use decoder::{DecodeError, decode, decode_at};
pub use history::{DEFAULT_HISTORY_CAPACITY, SharedHistory, TelemetryHistory};
pub use record::{AlertLevel, TelemetryRecord, TelemetryStatus};
