//! # Line Decoder
//!
//! Turns one raw serial line into a [`TelemetryRecord`].
//!
//! The device emits lines such as:
//!
//! ```text
//! {"angle": 30, "temp": 1023, "status": "FIRE"}\r\n
//! {"status": "SAFE", "angle": -90, "temp": 700}\r\n
//! ```
//!
//! Partial reads and line noise are routine on a serial link, so every
//! failure is a plain [`DecodeError`] value for the caller to drop.

use super::record::{TelemetryRecord, TelemetryStatus};
use chrono::{DateTime, Local};
use serde_json::Value;
use std::str::Utf8Error;
use thiserror::Error;

/// Keys a line must carry to become a record.
pub const REQUIRED_KEYS: [&str; 3] = ["angle", "temp", "status"];

/// Reasons a line did not produce a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The line is not valid UTF-8.
    #[error("line is not valid UTF-8: {0}")]
    Encoding(#[from] Utf8Error),

    /// The line is not a JSON object.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The object lacks one or more required keys.
    #[error("missing fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
}

/// Decodes a line, stamping it with the current local time.
///
/// # Examples
///
/// ```
/// use serial_bridge::telemetry::decode;
///
/// let record = decode(b"{\"angle\":30,\"temp\":1023,\"status\":\"FIRE\"}\n").unwrap();
/// assert_eq!(record.angle(), Some(30));
/// assert_eq!(record.status.as_str(), "FIRE");
/// ```
pub fn decode(line: &[u8]) -> Result<TelemetryRecord, DecodeError> {
    decode_at(line, Local::now())
}

/// Decodes a line with an explicit capture time.
///
/// # Arguments
///
/// * `line` - Raw bytes as read from the device, line ending included or not
/// * `captured_at` - Timestamp stored in the record
pub fn decode_at(
    line: &[u8],
    captured_at: DateTime<Local>,
) -> Result<TelemetryRecord, DecodeError> {
    let text = std::str::from_utf8(line)?.trim();

    let mut payload = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(DecodeError::MalformedPayload(format!(
                "expected an object, got {}",
                kind_of(&other)
            )));
        }
        Err(e) => return Err(DecodeError::MalformedPayload(e.to_string())),
    };

    let missing: Vec<&'static str> = REQUIRED_KEYS
        .into_iter()
        .filter(|key| !payload.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(DecodeError::MissingFields(missing));
    }

    let angle = payload.remove("angle").unwrap_or_default();
    let temperature = payload.remove("temp").unwrap_or_default();
    let status = payload
        .get("status")
        .map(TelemetryStatus::from_value)
        .unwrap_or_else(|| TelemetryStatus::Unknown(String::new()));

    Ok(TelemetryRecord {
        angle,
        temperature,
        status,
        captured_at,
        raw_line: text.to_string(),
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
