use clap::Parser;
use log::{error, info, warn};
use serial_bridge::bridge::{BridgeConfig, BridgeService, LinkResult};
use serial_bridge::relay::RelaySettings;
use serial_bridge::serial::PortSettings;
use serial_bridge::telemetry::{AlertLevel, TelemetryRecord};
use chrono::{DateTime, Local};
use std::process::ExitCode;
use std::time::Duration;

/// Serial-to-TCP telemetry bridge
#[derive(Parser, Debug)]
#[command(version, about = "Relay a serial device to a TCP client and track its telemetry", long_about = None)]
struct Args {
    /// Serial device path, e.g. /dev/ttyUSB0 or COM3
    #[arg(default_value_t = PortSettings::default().port_name)]
    device: String,

    /// Baud rate of the device
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// Address the relay listens on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port the relay listens on
    #[arg(short, long, default_value_t = 5000)]
    port: u16,

    /// Number of telemetry records kept
    #[arg(long, default_value_t = 50)]
    history: usize,

    /// Serial line poll interval in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    /// Seconds between telemetry reports
    #[arg(long, default_value_t = 1)]
    report_secs: u64,

    /// Print every new sample as a JSON line on stdout instead of logging
    /// the latest one each report interval
    #[arg(long)]
    json: bool,
}

impl Args {
    fn config(&self) -> BridgeConfig {
        let mut serial = PortSettings::new(self.device.clone(), self.baud);
        serial.timeout = Duration::from_millis(self.poll_ms);
        let mut config = BridgeConfig::new(serial, RelaySettings::new(self.host.clone(), self.port));
        config.history_capacity = self.history;
        config
    }
}

/// records captured after `after`, oldest first
fn captured_after(
    history: Vec<TelemetryRecord>,
    after: Option<DateTime<Local>>,
) -> Vec<TelemetryRecord> {
    history
        .into_iter()
        .filter(|r| after.is_none_or(|at| r.captured_at > at))
        .collect()
}

fn print_json(record: &TelemetryRecord) {
    match serde_json::to_string(record) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Could not serialize record: {}", e),
    }
}

fn log_record(record: &TelemetryRecord) {
    let summary = format!(
        "[{}] angle={}° temp={} status={}",
        record.captured_time(),
        record.angle,
        record.temperature,
        record.status
    );
    match record.status.alert_level() {
        AlertLevel::Critical => error!("FIRE DETECTED {}", summary),
        AlertLevel::Normal => info!("{}", summary),
        AlertLevel::Warning => warn!("{}", summary),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bridge = BridgeService::start(args.config()).await;
    if !bridge.is_running() {
        error!("{}", bridge.status());
        return ExitCode::FAILURE;
    }

    let mut status = bridge.subscribe_status();
    let mut ticker = tokio::time::interval(Duration::from_secs(args.report_secs.max(1)));
    let mut last_reported: Option<DateTime<Local>> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                bridge.stop();
                break;
            }
            _ = bridge.wait_stopped() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let peer = status.borrow_and_update().peer_summary();
                info!("Relay: {}", peer);
            }
            _ = ticker.tick() => {
                let fresh = captured_after(bridge.history_snapshot(), last_reported);
                let Some(newest) = fresh.last() else {
                    continue;
                };
                last_reported = Some(newest.captured_at);
                if args.json {
                    fresh.iter().for_each(print_json);
                } else {
                    log_record(newest);
                }
            }
        }
    }

    bridge.wait_stopped().await;
    let status = bridge.status();
    info!("{}", status);
    match status.serial {
        LinkResult::Failed { .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}
