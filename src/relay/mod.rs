//! # TCP Relay
//!
//! A listener with a single client slot. While a client is linked the
//! listener is not polled, so further connection attempts stay pending in the
//! kernel backlog until the current client goes away.
//!
//! ```text
//!   Idle ──try_accept──▶ Linked(peer)
//!    ▲                      │
//!    └── closed / error ────┘
//! ```

use crate::error::{BridgeError, Result};
use log::{debug, info, warn};
use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream, lookup_host};
use tokio::time::{Duration, sleep, timeout};

/// size of one client read
const RECEIVE_CHUNK: usize = 1024;

/// TCP side configuration
#[derive(Clone, Debug)]
pub struct RelaySettings {
    pub host: String,
    pub port: u16,
    /// how long one accept attempt waits while idle
    pub accept_timeout: Duration,
    /// how long one client read waits while linked
    pub receive_timeout: Duration,
    /// upper bound for one forward to the client
    pub send_timeout: Duration,
}

impl RelaySettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        RelaySettings {
            host: host.into(),
            port,
            accept_timeout: Duration::from_secs(1),
            receive_timeout: Duration::from_millis(100),
            send_timeout: Duration::from_secs(1),
        }
    }

    /// `host:port` as configured
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        RelaySettings::new("127.0.0.1", 5000)
    }
}

/// relay link state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    /// no client
    Idle,
    /// serving one client
    Linked(SocketAddr),
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayState::Idle => write!(f, "Idle"),
            RelayState::Linked(peer) => write!(f, "Linked {}", peer),
        }
    }
}

/// outcome of one [`TcpRelay::try_receive`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Received {
    /// bytes from the client
    Data(Vec<u8>),
    /// nothing yet, link still up
    Pending,
    /// the client is gone and the relay is idle again
    Closed,
}

struct ClientLink {
    stream: TcpStream,
    peer: SocketAddr,
}

/// Single-client TCP listener.
pub struct TcpRelay {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    client: Option<ClientLink>,
    buffer: [u8; RECEIVE_CHUNK],
    send_timeout: Duration,
}

impl TcpRelay {
    /// Binds the listener with `SO_REUSEADDR` and a backlog of one.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Bind`] if the address cannot be resolved or bound.
    pub async fn bind(settings: &RelaySettings) -> Result<Self> {
        let address = settings.address();
        let listener = Self::listen(&settings.host, settings.port)
            .await
            .map_err(|e| BridgeError::bind(&address, e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BridgeError::bind(&address, e.to_string()))?;
        info!("Relay listening on {}", local_addr);

        Ok(TcpRelay {
            listener: Some(listener),
            local_addr,
            client: None,
            buffer: [0; RECEIVE_CHUNK],
            send_timeout: settings.send_timeout,
        })
    }

    async fn listen(host: &str, port: u16) -> std::io::Result<TcpListener> {
        let addr = lookup_host((host, port)).await?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "host did not resolve")
        })?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(1)
    }

    /// address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> RelayState {
        match &self.client {
            Some(link) => RelayState::Linked(link.peer),
            None => RelayState::Idle,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.client.is_some()
    }

    /// Waits up to `wait` for a client. Only does anything while idle.
    pub async fn try_accept(&mut self, wait: Duration) -> Option<SocketAddr> {
        if self.client.is_some() {
            return None;
        }
        let listener = self.listener.as_ref()?;

        match timeout(wait, listener.accept()).await {
            Err(_elapsed) => None,
            Ok(Ok((stream, peer))) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not disable Nagle for {}: {}", peer, e);
                }
                info!("Client linked: {}", peer);
                self.client = Some(ClientLink { stream, peer });
                Some(peer)
            }
            Ok(Err(e)) => {
                warn!("Accept failed: {}", e);
                // keep a persistent accept error from spinning the caller
                sleep(wait).await;
                None
            }
        }
    }

    /// Waits up to `wait` for bytes from the linked client.
    pub async fn try_receive(&mut self, wait: Duration) -> Received {
        let Some(link) = self.client.as_mut() else {
            return Received::Closed;
        };

        match timeout(wait, link.stream.read(&mut self.buffer)).await {
            Err(_elapsed) => Received::Pending,
            Ok(Ok(0)) => {
                self.drop_client("closed by peer");
                Received::Closed
            }
            Ok(Ok(n)) => Received::Data(self.buffer[..n].to_vec()),
            Ok(Err(e)) => {
                self.drop_client(&e.to_string());
                Received::Closed
            }
        }
    }

    /// Forwards `data` to the linked client.
    ///
    /// # Errors
    ///
    /// On failure or timeout the link is dropped, the relay is idle again and
    /// [`BridgeError::ClientSend`] is returned. The write is not retried.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let Some(link) = self.client.as_mut() else {
            return Err(BridgeError::NotLinked);
        };
        let peer = link.peer;

        let reason = match timeout(self.send_timeout, link.stream.write_all(data)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_elapsed) => format!("timed out after {:?}", self.send_timeout),
        };
        self.drop_client(&reason);
        Err(BridgeError::client_send(peer, reason))
    }

    /// Drops the current client, if any. The relay is idle afterwards.
    pub fn disconnect(&mut self) {
        self.drop_client("disconnected");
    }

    fn drop_client(&mut self, reason: &str) {
        if let Some(link) = self.client.take() {
            info!("Client unlinked: {} ({})", link.peer, reason);
        }
    }

    /// Drops the client and the listener. Returns `false` if both were
    /// already released.
    pub fn close(&mut self) -> bool {
        let had_client = self.client.is_some();
        self.drop_client("relay closed");
        match self.listener.take() {
            Some(_) => {
                info!("Relay on {} closed", self.local_addr);
                true
            }
            None => had_client,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_none()
    }
}
