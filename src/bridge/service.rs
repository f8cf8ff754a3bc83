//! # Bridge Service
//!
//! Runs the two I/O paths of the bridge as tokio tasks:
//!
//! - the **serial path** reads lines from the device, queues each raw line for
//!   the linked client and decodes it into the telemetry history;
//! - the **relay path** accepts one client at a time, forwards queued lines to
//!   it and writes whatever it sends to the device.
//!
//! A client that stops draining its queue for longer than the send timeout
//! is unlinked rather than skipped over, so a linked client never sees a gap
//! in the byte stream.
//!
//! The serial path is the only reader of the device and the only writer of
//! the history. The relay path is the only writer of the device and the only
//! owner of the client socket. A third supervisor task joins both and
//! publishes [`ServiceState::Stopped`] once every resource is released.
//!
//! The device halves come from [`tokio::io::split`], which serialises access
//! to the underlying stream, so no lock is taken around device writes.

use super::config::BridgeConfig;
use super::status::{ConnectionStatus, LinkResult, ServiceState};
use crate::relay::{Received, RelaySettings, RelayState, TcpRelay};
use crate::serial::encoding::printable;
use crate::serial::{SerialChannel, SerialLineReader, SerialWriter};
use crate::telemetry::{self, SharedHistory, TelemetryRecord};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};

/// State shared by the service handle and its tasks.
struct Shared {
    history: SharedHistory,
    status: watch::Sender<ConnectionStatus>,
    state: watch::Sender<ServiceState>,
    stop: watch::Sender<bool>,
    /// client the serial path gave up on
    unlink: watch::Sender<Option<SocketAddr>>,
}

impl Shared {
    fn new(history_capacity: usize) -> Self {
        Shared {
            history: SharedHistory::new(history_capacity),
            status: watch::channel(ConnectionStatus::default()).0,
            state: watch::channel(ServiceState::Starting).0,
            stop: watch::channel(false).0,
            unlink: watch::channel(None).0,
        }
    }

    fn peer(&self) -> Option<SocketAddr> {
        self.status.borrow().peer
    }

    fn set_peer(&self, peer: Option<SocketAddr>) {
        self.status.send_if_modified(|status| {
            let changed = status.peer != peer;
            status.peer = peer;
            changed
        });
    }
}

/// how a path task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathExit {
    Stopped,
    Faulted,
}

/// A running (or failed) serial-to-TCP bridge.
///
/// Created with [`BridgeService::start`] or [`BridgeService::with_transport`]
/// from inside a tokio runtime. Dropping the service requests a stop.
pub struct BridgeService {
    shared: Arc<Shared>,
}

impl BridgeService {
    /// Opens the serial device, binds the relay listener and starts both
    /// paths.
    ///
    /// Never fails outright: if the configuration is invalid or a resource
    /// cannot be acquired, the returned service is already
    /// [`ServiceState::Stopped`] and [`status`](Self::status) says why.
    pub async fn start(config: BridgeConfig) -> Self {
        let shared = Arc::new(Shared::new(config.history_capacity));
        if let Err(e) = config.validate() {
            return Self::halted(shared, |s| s.serial = LinkResult::failed(e.to_string()));
        }

        let serial = match SerialChannel::open(&config.serial) {
            Ok(serial) => serial,
            Err(e) => {
                error!("{}", e);
                return Self::halted(shared, |s| s.serial = LinkResult::failed(e.to_string()));
            }
        };
        let detail = format!(
            "Connected to {} ({})",
            config.serial.port_name,
            config.serial.line_setup()
        );
        shared
            .status
            .send_modify(|s| s.serial = LinkResult::ready(detail));

        Self::bind_and_run(config, shared, serial).await
    }

    /// Like [`start`](Self::start), but over an already open byte stream
    /// instead of a serial port: a pty, a socket, or an in-memory pipe.
    pub async fn with_transport<S>(config: BridgeConfig, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = Arc::new(Shared::new(config.history_capacity));
        if let Err(e) = config.validate() {
            return Self::halted(shared, |s| s.serial = LinkResult::failed(e.to_string()));
        }

        let serial = SerialChannel::from_stream(stream, &config.serial);
        let detail = format!("Connected to {}", serial.port_name());
        shared
            .status
            .send_modify(|s| s.serial = LinkResult::ready(detail));

        Self::bind_and_run(config, shared, serial).await
    }

    async fn bind_and_run<S>(config: BridgeConfig, shared: Arc<Shared>, serial: SerialChannel<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let relay = match TcpRelay::bind(&config.relay).await {
            Ok(relay) => relay,
            Err(e) => {
                error!("{}", e);
                drop(serial);
                return Self::halted(shared, |s| {
                    s.serial.release();
                    s.listener = LinkResult::failed(e.to_string());
                });
            }
        };
        let listen_addr = relay.local_addr();
        shared.status.send_modify(|s| {
            s.listener = LinkResult::ready(format!("Listening on {}", listen_addr));
            s.listen_addr = Some(listen_addr);
        });

        let (reader, writer) = serial.into_split();
        let (forward_tx, forward_rx) = mpsc::channel(config.forward_queue_depth.max(1));

        shared.state.send_replace(ServiceState::Running);
        let serial_task = tokio::spawn(serial_path(
            reader,
            forward_tx,
            config.relay.send_timeout,
            Arc::clone(&shared),
        ));
        let relay_task = tokio::spawn(relay_path(
            relay,
            writer,
            forward_rx,
            config.relay.clone(),
            Arc::clone(&shared),
        ));
        tokio::spawn(supervise(serial_task, relay_task, Arc::clone(&shared)));

        info!("Bridge running: {}", *shared.status.borrow());
        BridgeService { shared }
    }

    fn halted(shared: Arc<Shared>, record: impl FnOnce(&mut ConnectionStatus)) -> Self {
        shared.status.send_modify(record);
        shared.stop.send_replace(true);
        shared.state.send_replace(ServiceState::Stopped);
        warn!("Bridge not started: {}", *shared.status.borrow());
        BridgeService { shared }
    }

    /// copy of the current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    /// receiver that is notified on every status change
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// copy of the telemetry history, oldest first
    pub fn history_snapshot(&self) -> Vec<TelemetryRecord> {
        self.shared.history.snapshot()
    }

    /// most recent telemetry record
    pub fn latest(&self) -> Option<TelemetryRecord> {
        self.shared.history.latest()
    }

    /// handle to the history for readers that outlive a borrow of the service
    pub fn history(&self) -> SharedHistory {
        self.shared.history.clone()
    }

    pub fn state(&self) -> ServiceState {
        *self.shared.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// address the relay listener is bound to
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.shared.status.borrow().listen_addr
    }

    /// Requests a graceful stop. Both paths notice within one poll interval;
    /// use [`wait_stopped`](Self::wait_stopped) to wait for the release of
    /// all resources. Safe to call any number of times, from any thread.
    pub fn stop(&self) {
        let already = self.shared.stop.send_replace(true);
        if !already {
            info!("Bridge stop requested");
        }
    }

    /// Resolves once the service is [`ServiceState::Stopped`].
    pub async fn wait_stopped(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|s| *s == ServiceState::Stopped).await;
    }
}

impl Drop for BridgeService {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serial_path<S>(
    mut reader: SerialLineReader<S>,
    forward: mpsc::Sender<Vec<u8>>,
    forward_wait: Duration,
    shared: Arc<Shared>,
) -> PathExit
where
    S: AsyncRead,
{
    let mut stop = shared.stop.subscribe();
    let exit = loop {
        let stopped = *stop.borrow_and_update();
        if stopped {
            break PathExit::Stopped;
        }
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    break PathExit::Stopped;
                }
            }
            line = reader.read_line() => match line {
                Ok(Some(line)) => handle_line(&line, &forward, forward_wait, &shared).await,
                Ok(None) => {}
                Err(e) => {
                    error!("Serial path stopping: {}", e);
                    shared
                        .status
                        .send_modify(|s| s.serial = LinkResult::failed(e.to_string()));
                    break PathExit::Faulted;
                }
            },
        }
    };
    reader.close();
    exit
}

/// Forwarding and decoding are independent: a line that does not decode is
/// still relayed.
async fn handle_line(
    line: &[u8],
    forward: &mpsc::Sender<Vec<u8>>,
    forward_wait: Duration,
    shared: &Shared,
) {
    if let Some(peer) = shared.peer() {
        forward_line(line, peer, forward, forward_wait, shared).await;
    }

    match telemetry::decode(line) {
        Ok(record) => shared.history.append(record),
        Err(e) => debug!("Skipped line `{}`: {}", printable(line), e),
    }
}

/// Queues `line` for `peer`. If the queue stays full for `wait`, the client
/// is unlinked instead: nothing after the lost line is queued for it.
async fn forward_line(
    line: &[u8],
    peer: SocketAddr,
    forward: &mpsc::Sender<Vec<u8>>,
    wait: Duration,
    shared: &Shared,
) {
    let line = match forward.try_send(line.to_vec()) {
        Ok(()) => return,
        Err(TrySendError::Closed(_)) => {
            debug!("Relay path is gone, line not forwarded");
            return;
        }
        Err(TrySendError::Full(line)) => line,
    };

    match timeout(wait, forward.send(line)).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => debug!("Relay path is gone, line not forwarded"),
        Err(_elapsed) => {
            warn!(
                "Client {} stopped draining forwarded lines for {:?}, unlinking it",
                peer, wait
            );
            shared.set_peer(None);
            shared.unlink.send_replace(Some(peer));
        }
    }
}

async fn relay_path<S>(
    mut relay: TcpRelay,
    mut writer: SerialWriter<S>,
    mut forward: mpsc::Receiver<Vec<u8>>,
    settings: RelaySettings,
    shared: Arc<Shared>,
) where
    S: AsyncWrite,
{
    let mut stop = shared.stop.subscribe();
    let mut unlink = shared.unlink.subscribe();
    loop {
        let stopped = *stop.borrow_and_update();
        if stopped {
            break;
        }

        if relay.is_linked() {
            tokio::select! {
                biased;

                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = unlink.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let target = *unlink.borrow_and_update();
                    if let (Some(target), RelayState::Linked(peer)) = (target, relay.state())
                        && target == peer
                    {
                        relay.disconnect();
                        shared.set_peer(None);
                    }
                }
                received = relay.try_receive(settings.receive_timeout) => match received {
                    Received::Data(bytes) => writer.write(&bytes).await,
                    Received::Pending => {}
                    Received::Closed => shared.set_peer(None),
                },
                Some(line) = forward.recv() => {
                    if let Err(e) = relay.send(&line).await {
                        warn!("{}", e);
                        shared.set_peer(None);
                    }
                }
            }
        } else {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = relay.try_accept(settings.accept_timeout) => {
                    if let Some(peer) = accepted {
                        let mut stale = 0usize;
                        while forward.try_recv().is_ok() {
                            stale += 1;
                        }
                        if stale > 0 {
                            debug!("Discarded {} lines queued for the previous client", stale);
                        }
                        unlink.mark_unchanged();
                        shared.set_peer(Some(peer));
                    }
                }
            }
        }
    }

    relay.close();
    writer.close().await;
    shared.set_peer(None);
}

async fn supervise(
    mut serial: JoinHandle<PathExit>,
    mut relay: JoinHandle<()>,
    shared: Arc<Shared>,
) {
    tokio::select! {
        exit = &mut serial => {
            match exit {
                Ok(PathExit::Faulted) => warn!("Serial device failed, stopping bridge"),
                Ok(PathExit::Stopped) => {}
                Err(e) => error!("Serial path ended abnormally: {}", e),
            }
            shared.stop.send_replace(true);
            if let Err(e) = relay.await {
                error!("Relay path ended abnormally: {}", e);
            }
        }
        exit = &mut relay => {
            if let Err(e) = exit {
                error!("Relay path ended abnormally: {}", e);
            }
            shared.stop.send_replace(true);
            if let Err(e) = serial.await {
                error!("Serial path ended abnormally: {}", e);
            }
        }
    }

    shared.status.send_modify(|s| {
        s.serial.release();
        s.listener.release();
        s.peer = None;
    });
    shared.state.send_replace(ServiceState::Stopped);
    info!("Bridge stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelaySettings;
    use crate::serial::PortSettings;

    fn config() -> BridgeConfig {
        let mut serial = PortSettings::new("virtual", 9600);
        serial.timeout = Duration::from_millis(20);
        let mut relay = RelaySettings::new("127.0.0.1", 0);
        relay.accept_timeout = Duration::from_millis(50);
        relay.receive_timeout = Duration::from_millis(20);
        BridgeConfig::new(serial, relay)
    }

    const WAIT: Duration = Duration::from_millis(20);
    const SAFE: &[u8] = b"{\"angle\":1,\"temp\":2,\"status\":\"SAFE\"}\n";

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_handle_line_appends_and_skips() {
        let shared = Shared::new(5);
        let (tx, mut rx) = mpsc::channel(4);

        handle_line(b"{\"angle\":30,\"temp\":1023,\"status\":\"FIRE\"}\r\n", &tx, WAIT, &shared).await;
        handle_line(b"{\"angle\":30,\"temp\":1023}\r\n", &tx, WAIT, &shared).await;
        handle_line(b"{\"angle\":30,\"te", &tx, WAIT, &shared).await;

        assert_eq!(shared.history.len(), 1);
        // nobody linked, nothing queued
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_line_forwards_when_linked() {
        let shared = Shared::new(5);
        shared.set_peer(Some(peer()));
        let (tx, mut rx) = mpsc::channel(4);

        handle_line(b"noise\n", &tx, WAIT, &shared).await;
        handle_line(SAFE, &tx, WAIT, &shared).await;

        assert_eq!(rx.try_recv().unwrap(), b"noise\n");
        assert_eq!(rx.try_recv().unwrap(), SAFE);
        assert_eq!(shared.history.len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_unlinks_client() {
        let shared = Shared::new(5);
        shared.set_peer(Some(peer()));
        let (tx, mut rx) = mpsc::channel(1);

        for _ in 0..3 {
            handle_line(SAFE, &tx, WAIT, &shared).await;
        }

        // every line is still decoded
        assert_eq!(shared.history.len(), 3);
        // the client got a prefix and was then given up on
        assert_eq!(rx.try_recv().unwrap(), SAFE);
        assert!(rx.try_recv().is_err());
        assert!(shared.peer().is_none());
        assert_eq!(*shared.unlink.borrow(), Some(peer()));
    }

    #[tokio::test]
    async fn test_full_queue_waits_for_room() {
        let shared = Shared::new(5);
        shared.set_peer(Some(peer()));
        let (tx, mut rx) = mpsc::channel(1);

        let drain = tokio::spawn(async move {
            let mut lines = 0;
            while rx.recv().await.is_some() {
                lines += 1;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            lines
        });
        for _ in 0..5 {
            handle_line(SAFE, &tx, Duration::from_secs(2), &shared).await;
        }
        drop(tx);

        assert_eq!(drain.await.unwrap(), 5);
        assert_eq!(shared.peer(), Some(peer()));
        assert!(shared.unlink.borrow().is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_never_runs() {
        let mut config = config();
        config.history_capacity = 0;
        let (_device, host) = tokio::io::duplex(64);
        let bridge = BridgeService::with_transport(config, host).await;
        assert_eq!(bridge.state(), ServiceState::Stopped);
        assert!(bridge.status().serial.is_failed());
        assert!(bridge.listen_addr().is_none());
    }

    #[tokio::test]
    async fn test_stop_reaches_stopped() {
        let (_device, host) = tokio::io::duplex(64);
        let bridge = BridgeService::with_transport(config(), host).await;
        assert!(bridge.is_running());
        bridge.stop();
        tokio::time::timeout(Duration::from_secs(2), bridge.wait_stopped())
            .await
            .unwrap();
        assert_eq!(bridge.state(), ServiceState::Stopped);
    }
}
