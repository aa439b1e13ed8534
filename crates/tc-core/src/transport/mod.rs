//! Network channels between the engine and its subscribers.
//!
//! Two independent endpoints, each bound once by the engine:
//!
//! ```text
//!                 ┌──────────── broadcast (TCP fan-out) ───────────┐
//! Disseminator ── PubSocket ──► SubSocket ── Subscriber            │
//!              ── ControlServer ◄── request/reply (UDP) ── ControlClient
//! ```
//!
//! - [`publish`] / [`subscribe`]: the data plane: every connected receiver
//!   gets every frame; filtering happens at the receiver.
//! - [`control`]: the control plane: `"subscribe <sym>"` /
//!   `"unsubscribe <sym>"` requests answered with `"OK"`.
//!
//! Endpoints are plain strings, `host:port` with an optional `tcp://` or
//! `udp://` prefix. Port `0` asks the OS for a free port; the bound address
//! can be read back from the socket.

pub mod control;
pub mod publish;
pub mod subscribe;

use std::net::{SocketAddr, ToSocketAddrs};

pub use control::{ACK, ControlClient, ControlRequest, ControlServer};
pub use publish::{PubSocket, SendReport};
pub use subscribe::{SocketCloser, SubSocket};

use crate::error::{Result, TickcastError};

/// Largest frame the transports will carry.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Resolve an endpoint string to the first matching socket address.
pub fn parse_endpoint(endpoint: &str) -> Result<SocketAddr> {
    let trimmed = endpoint.trim();
    let hostport = trimmed
        .strip_prefix("tcp://")
        .or_else(|| trimmed.strip_prefix("udp://"))
        .unwrap_or(trimmed);
    hostport
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| TickcastError::Endpoint(endpoint.to_string()))
}
