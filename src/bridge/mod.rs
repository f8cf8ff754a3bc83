//! Orchestration of the serial and relay paths, and the status surface the
//! presentation layer reads.

pub mod config;
pub mod service;
pub mod status;

pub use config::{BridgeConfig, DEFAULT_FORWARD_QUEUE_DEPTH};
pub use service::BridgeService;
pub use status::{ConnectionStatus, LinkResult, ServiceState};
