use crate::error::{BridgeError, Result};
use crate::relay::RelaySettings;
use crate::serial::PortSettings;
use crate::telemetry::DEFAULT_HISTORY_CAPACITY;
use log::warn;
use std::time::Duration;

/// lines that may wait for the client before the serial path holds back;
/// a client that stays this far behind for the send timeout is unlinked
pub const DEFAULT_FORWARD_QUEUE_DEPTH: usize = 256;

/// Everything the bridge needs, fixed at construction.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub serial: PortSettings,
    pub relay: RelaySettings,
    pub history_capacity: usize,
    pub forward_queue_depth: usize,
}

impl BridgeConfig {
    pub fn new(serial: PortSettings, relay: RelaySettings) -> Self {
        BridgeConfig {
            serial,
            relay,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            forward_queue_depth: DEFAULT_FORWARD_QUEUE_DEPTH,
        }
    }

    /// Checks the settings before anything is opened.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidConfig`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.serial.port_name.trim().is_empty() {
            return Err(BridgeError::invalid_config("serial device path is empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(BridgeError::invalid_config("baud rate must be non-zero"));
        }
        if !self.serial.is_common_baud_rate() {
            warn!(
                "Baud rate {} is not a common rate, check it matches the device",
                self.serial.baud_rate
            );
        }
        if self.relay.host.trim().is_empty() {
            return Err(BridgeError::invalid_config("relay host is empty"));
        }
        if self.history_capacity == 0 {
            return Err(BridgeError::invalid_config(
                "history capacity must be at least 1",
            ));
        }
        if self.forward_queue_depth == 0 {
            return Err(BridgeError::invalid_config(
                "forward queue depth must be at least 1",
            ));
        }
        let waits = [
            ("serial poll interval", self.serial.timeout),
            ("serial write timeout", self.serial.write_timeout),
            ("accept timeout", self.relay.accept_timeout),
            ("receive timeout", self.relay.receive_timeout),
            ("send timeout", self.relay.send_timeout),
        ];
        for (name, wait) in waits {
            if wait == Duration::ZERO {
                return Err(BridgeError::invalid_config(format!(
                    "{} must be non-zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig::new(PortSettings::default(), RelaySettings::default())
    }
}
