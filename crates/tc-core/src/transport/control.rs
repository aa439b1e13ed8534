//! Control plane: subscription handshakes over UDP request/reply.
//!
//! ```text
//! request:  "subscribe <symbol>" | "unsubscribe <symbol>"   (UTF-8)
//! reply:    "OK"
//! ```
//!
//! One server socket serves every client; replies go back to the datagram's
//! source address. The server side receives with a bounded timeout so its
//! owning thread can observe cancellation between attempts. The client
//! waits for a reply up to its ack timeout; a reply that arrives after the
//! timeout is discarded before the next request is sent.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    time::Duration,
};

use super::parse_endpoint;
use crate::error::{Result, TickcastError};

/// Acknowledgment sent for every request.
pub const ACK: &[u8] = b"OK";

/// Largest control datagram read by either side.
const MAX_CONTROL_LEN: usize = 512;

// ---------------------------------------------------------------------------
// ControlRequest
// ---------------------------------------------------------------------------

/// A parsed control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Subscribe(String),
    Unsubscribe(String),
}

impl ControlRequest {
    /// Parse a request datagram. Returns `None` for anything that is not
    /// `"<verb> <symbol>"` with a known verb and a non-empty symbol.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?;
        let (verb, symbol) = text.trim().split_once(' ')?;
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return None;
        }
        match verb {
            "subscribe" => Some(Self::Subscribe(symbol.to_string())),
            "unsubscribe" => Some(Self::Unsubscribe(symbol.to_string())),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Subscribe(s) | Self::Unsubscribe(s) => s,
        }
    }
}

impl std::fmt::Display for ControlRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subscribe(s) => write!(f, "subscribe {s}"),
            Self::Unsubscribe(s) => write!(f, "unsubscribe {s}"),
        }
    }
}

// ---------------------------------------------------------------------------
// ControlServer
// ---------------------------------------------------------------------------

/// Engine side of the control plane.
pub struct ControlServer {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl ControlServer {
    /// Bind the control endpoint. `poll_interval` bounds every
    /// [`ControlServer::recv_request`] call.
    pub fn bind(endpoint: &str, poll_interval: Duration) -> Result<Self> {
        let addr = parse_endpoint(endpoint)?;
        let bind_err = |source| TickcastError::Bind { endpoint: endpoint.to_string(), source };

        let socket = UdpSocket::bind(addr).map_err(bind_err)?;
        socket.set_read_timeout(Some(poll_interval.max(Duration::from_millis(1)))).map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;
        Ok(Self { socket, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait up to the poll interval for one request.
    ///
    /// Returns `Ok(None)` on timeout.
    pub fn recv_request(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn reply(&self, peer: SocketAddr, payload: &[u8]) -> io::Result<()> {
        self.socket.send_to(payload, peer).map(|_| ())
    }

    /// Buffer sized for one control datagram.
    pub fn request_buffer() -> [u8; MAX_CONTROL_LEN] {
        [0u8; MAX_CONTROL_LEN]
    }
}

// ---------------------------------------------------------------------------
// ControlClient
// ---------------------------------------------------------------------------

/// Subscriber side of the control plane.
pub struct ControlClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
}

impl ControlClient {
    /// Open a client socket aimed at `endpoint`. `ack_timeout` bounds the
    /// wait for each reply.
    pub fn connect(endpoint: &str, ack_timeout: Duration) -> Result<Self> {
        let server_addr = parse_endpoint(endpoint)?;
        let connect_err = |source| TickcastError::Connect { endpoint: endpoint.to_string(), source };

        let local: SocketAddr = if server_addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).map_err(connect_err)?;
        socket.connect(server_addr).map_err(connect_err)?;
        socket.set_read_timeout(Some(ack_timeout.max(Duration::from_millis(1)))).map_err(connect_err)?;
        Ok(Self { socket, server_addr })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Send one request and wait for its reply.
    pub fn request(&self, request: &ControlRequest) -> io::Result<Vec<u8>> {
        self.discard_stale_replies()?;
        self.socket.send(request.to_string().as_bytes())?;

        let mut buf = [0u8; MAX_CONTROL_LEN];
        match self.socket.recv(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "no reply before ack timeout"))
            }
            Err(e) => Err(e),
        }
    }

    fn discard_stale_replies(&self) -> io::Result<()> {
        self.socket.set_nonblocking(true)?;
        let mut buf = [0u8; MAX_CONTROL_LEN];
        // Errors here (e.g. ICMP port unreachable from an earlier send) only
        // concern replies nobody is waiting for any more.
        while self.socket.recv(&mut buf).is_ok() {}
        self.socket.set_nonblocking(false)
    }
}
