use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// one decoded sensor sample
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetryRecord {
    /// sensor rotation in degrees, as sent by the device
    pub angle: Value,
    /// raw flame sensor ADC reading (wire key `temp`)
    pub temperature: Value,
    /// classification reported by the device
    pub status: TelemetryStatus,
    /// local time the line was decoded
    pub captured_at: DateTime<Local>,
    /// trimmed source text
    pub raw_line: String,
}

impl TelemetryRecord {
    /// angle as an integer, if the device sent a number
    pub fn angle(&self) -> Option<i64> {
        as_integer(&self.angle)
    }

    /// temperature reading as an integer, if the device sent a number
    pub fn temperature(&self) -> Option<i64> {
        as_integer(&self.temperature)
    }

    /// capture time at second precision, e.g. `14:03:27`
    pub fn captured_time(&self) -> String {
        self.captured_at.format("%H:%M:%S").to_string()
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
}

/// device status field
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelemetryStatus {
    /// flame detected
    Fire,
    /// no flame
    Safe,
    /// anything else the device reported
    Unknown(String),
}

impl TelemetryStatus {
    /// classify a raw `status` value
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::from_text(s),
            other => Self::Unknown(other.to_string()),
        }
    }

    /// classify a status string
    pub fn from_text(text: &str) -> Self {
        match text {
            "FIRE" => Self::Fire,
            "SAFE" => Self::Safe,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// wire spelling of the status
    pub fn as_str(&self) -> &str {
        match self {
            Self::Fire => "FIRE",
            Self::Safe => "SAFE",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// how loudly a front end should present this status
    pub fn alert_level(&self) -> AlertLevel {
        match self {
            Self::Fire => AlertLevel::Critical,
            Self::Safe => AlertLevel::Normal,
            Self::Unknown(_) => AlertLevel::Warning,
        }
    }
}

impl fmt::Display for TelemetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TelemetryStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// alert classification derived from [`TelemetryStatus`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertLevel {
    Critical,
    Normal,
    Warning,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Critical => write!(f, "CRITICAL"),
            AlertLevel::Normal => write!(f, "NORMAL"),
            AlertLevel::Warning => write!(f, "WARNING"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(angle: Value, temp: Value, status: &str) -> TelemetryRecord {
        TelemetryRecord {
            angle,
            temperature: temp,
            status: TelemetryStatus::from_text(status),
            captured_at: Local::now(),
            raw_line: String::new(),
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(TelemetryStatus::from_value(&json!("FIRE")), TelemetryStatus::Fire);
        assert_eq!(TelemetryStatus::from_value(&json!("SAFE")), TelemetryStatus::Safe);
        assert_eq!(
            TelemetryStatus::from_value(&json!("SMOKE")),
            TelemetryStatus::Unknown("SMOKE".to_string())
        );
        assert_eq!(
            TelemetryStatus::from_value(&json!(3)),
            TelemetryStatus::Unknown("3".to_string())
        );
    }

    #[test]
    fn test_alert_level() {
        assert_eq!(TelemetryStatus::Fire.alert_level(), AlertLevel::Critical);
        assert_eq!(TelemetryStatus::Safe.alert_level(), AlertLevel::Normal);
        assert_eq!(
            TelemetryStatus::from_text("fire").alert_level(),
            AlertLevel::Warning
        );
    }

    #[test]
    fn test_numeric_accessors() {
        let r = record(json!(-90), json!(512.6), "SAFE");
        assert_eq!(r.angle(), Some(-90));
        assert_eq!(r.temperature(), Some(513));

        let r = record(json!("left"), json!(null), "SAFE");
        assert_eq!(r.angle(), None);
        assert_eq!(r.temperature(), None);
    }

    #[test]
    fn test_serialize_status_as_string() {
        let r = record(json!(30), json!(1023), "FIRE");
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["status"], json!("FIRE"));
        assert_eq!(value["temperature"], json!(1023));
    }
}
