use std::fmt;
use std::net::SocketAddr;

/// outcome of acquiring one bridge resource
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LinkResult {
    /// not attempted yet
    #[default]
    Pending,
    /// acquired
    Ready { detail: String },
    /// could not be acquired, or failed later
    Failed { reason: String },
    /// was acquired and has been given back
    Released,
}

impl LinkResult {
    pub fn ready(detail: impl Into<String>) -> Self {
        LinkResult::Ready {
            detail: detail.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        LinkResult::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LinkResult::Ready { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, LinkResult::Failed { .. })
    }

    /// `Ready` becomes `Released`; a failure or a pending result is kept.
    pub fn release(&mut self) {
        if self.is_ready() {
            *self = LinkResult::Released;
        }
    }
}

/// What the bridge currently holds, as seen by a front end.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub serial: LinkResult,
    pub listener: LinkResult,
    /// address of the linked TCP client
    pub peer: Option<SocketAddr>,
    /// address the listener is bound to
    pub listen_addr: Option<SocketAddr>,
}

impl ConnectionStatus {
    /// one-line serial summary, e.g. `Connected to /dev/ttyUSB0 (9600 8N1)`
    pub fn serial_summary(&self) -> String {
        match &self.serial {
            LinkResult::Pending => "Serial: starting".to_string(),
            LinkResult::Ready { detail } => detail.clone(),
            LinkResult::Failed { reason } => format!("Serial error: {}", reason),
            LinkResult::Released => "Serial released".to_string(),
        }
    }

    /// one-line client summary, e.g. `Linked 127.0.0.1:50412`
    pub fn peer_summary(&self) -> String {
        match (&self.listener, self.peer, self.listen_addr) {
            (LinkResult::Failed { reason }, _, _) => format!("TCP error: {}", reason),
            (LinkResult::Released, _, _) => "Closed".to_string(),
            (_, Some(peer), _) => format!("Linked {}", peer),
            (_, None, Some(addr)) => format!("Idle ({})", addr.port()),
            (_, None, None) => "Idle".to_string(),
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.serial_summary(), self.peer_summary())
    }
}

/// bridge lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Running,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_idle() {
        let status = ConnectionStatus {
            serial: LinkResult::ready("Connected to COM3"),
            listener: LinkResult::ready("Listening on 127.0.0.1:5000"),
            peer: None,
            listen_addr: Some("127.0.0.1:5000".parse().unwrap()),
        };
        assert_eq!(status.to_string(), "Connected to COM3 | Idle (5000)");
    }

    #[test]
    fn test_status_display_linked() {
        let status = ConnectionStatus {
            serial: LinkResult::ready("Connected to COM3"),
            listener: LinkResult::ready("Listening"),
            peer: Some("127.0.0.1:40000".parse().unwrap()),
            listen_addr: None,
        };
        assert_eq!(status.peer_summary(), "Linked 127.0.0.1:40000");
    }

    #[test]
    fn test_status_display_failures() {
        let status = ConnectionStatus {
            serial: LinkResult::failed("No such file or directory"),
            listener: LinkResult::failed("Address already in use"),
            ..Default::default()
        };
        assert_eq!(status.serial_summary(), "Serial error: No such file or directory");
        assert_eq!(status.peer_summary(), "TCP error: Address already in use");
        assert!(status.serial.is_failed());
        assert!(!status.listener.is_ready());
    }

    #[test]
    fn test_release_keeps_failures() {
        let mut status = ConnectionStatus {
            serial: LinkResult::ready("Connected to COM3"),
            listener: LinkResult::failed("Address already in use"),
            ..Default::default()
        };
        status.serial.release();
        status.listener.release();
        assert_eq!(status.serial, LinkResult::Released);
        assert!(status.listener.is_failed());
        assert_eq!(
            status.to_string(),
            "Serial released | TCP error: Address already in use"
        );
    }

    #[test]
    fn test_released_listener_summary() {
        let mut listener = LinkResult::ready("Listening on 127.0.0.1:5000");
        listener.release();
        let status = ConnectionStatus {
            serial: LinkResult::Released,
            listener,
            peer: None,
            listen_addr: Some("127.0.0.1:5000".parse().unwrap()),
        };
        assert_eq!(status.to_string(), "Serial released | Closed");
    }
}
