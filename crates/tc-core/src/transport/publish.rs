//! Broadcast publisher: one listening TCP socket, every frame to every peer.
//!
//! Frames are carried as `[len: u32 LE][frame bytes]`. The length prefix is
//! transport framing only; the frame itself is the [`crate::wire`] format.
//!
//! `send` never blocks. Every peer socket is non-blocking and keeps at most
//! one partially written frame:
//!
//! - short write: the unwritten tail is kept and flushed first on later
//!   sends; new frames are dropped for that peer until the tail is out;
//! - `WouldBlock`: the frame is dropped for that peer only;
//! - any other error: the peer is disconnected.
//!
//! A slow peer therefore loses frames but stays connected and aligned.
//!
//! New connections are picked up by [`PubSocket::accept_pending`], which the
//! owner calls when it knows a peer is arriving, and at most once per
//! [`ACCEPT_INTERVAL`] from `send`.
//!
//! `send` takes `&mut self`; the engine shares one socket between its drain
//! threads behind a mutex.

use std::{
    io::{self, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use super::{MAX_FRAME_LEN, parse_endpoint};
use crate::error::{Result, TickcastError};

/// Minimum spacing between backlog polls made from `send`.
pub const ACCEPT_INTERVAL: Duration = Duration::from_millis(20);

struct Peer {
    stream: TcpStream,
    addr: SocketAddr,
    /// Unwritten tail of the last partially written frame.
    pending: Vec<u8>,
}

enum Flush {
    Done,
    Blocked,
    Gone(io::Error),
}

impl Peer {
    fn flush(&mut self) -> Flush {
        while !self.pending.is_empty() {
            match self.stream.write(&self.pending) {
                Ok(0) => return Flush::Gone(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.pending.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Flush::Blocked,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Flush::Gone(e),
            }
        }
        Flush::Done
    }
}

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct PubSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
    peers: Vec<Peer>,
    scratch: Vec<u8>,
    last_accept: Option<Instant>,
}

impl PubSocket {
    /// Bind the broadcast endpoint.
    pub fn bind(endpoint: &str) -> Result<Self> {
        let addr = parse_endpoint(endpoint)?;
        let bind_err = |source| TickcastError::Bind { endpoint: endpoint.to_string(), source };

        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!("broadcast channel bound on {local_addr}");
        Ok(Self { listener, local_addr, peers: Vec::new(), scratch: Vec::with_capacity(256), last_accept: None })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Whether any peer still holds part of a frame.
    pub fn has_pending(&self) -> bool {
        self.peers.iter().any(|p| !p.pending.is_empty())
    }

    /// Accept every connection waiting in the backlog.
    pub fn accept_pending(&mut self) {
        self.last_accept = Some(Instant::now());
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true).and_then(|_| stream.set_nodelay(true)) {
                        warn!("broadcast: rejecting peer {addr}: {e}");
                        continue;
                    }
                    info!("broadcast: peer {addr} connected");
                    self.peers.push(Peer { stream, addr, pending: Vec::new() });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("broadcast: accept error: {e}");
                    break;
                }
            }
        }
    }

    fn accept_due(&self) -> bool {
        self.last_accept.is_none_or(|at| at.elapsed() >= ACCEPT_INTERVAL)
    }

    /// Push out pending tails without sending a new frame.
    pub fn flush(&mut self) {
        self.peers.retain_mut(|peer| match peer.flush() {
            Flush::Done | Flush::Blocked => true,
            Flush::Gone(e) => {
                info!("broadcast: peer {} gone ({e})", peer.addr);
                false
            }
        });
    }

    /// Fan `frame` out to every peer. Never blocks and never retries.
    pub fn send(&mut self, frame: &[u8]) -> SendReport {
        if self.accept_due() {
            self.accept_pending();
        }

        let mut report = SendReport::default();
        if frame.len() > MAX_FRAME_LEN {
            warn!("broadcast: frame of {} bytes exceeds limit, dropped", frame.len());
            report.dropped = self.peers.len();
            return report;
        }

        self.scratch.clear();
        self.scratch.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        self.scratch.extend_from_slice(frame);
        let wire = &self.scratch;

        self.peers.retain_mut(|peer| {
            match peer.flush() {
                Flush::Done => {}
                Flush::Blocked => {
                    debug!("broadcast: peer {} still behind, frame dropped", peer.addr);
                    report.dropped += 1;
                    return true;
                }
                Flush::Gone(e) => {
                    info!("broadcast: peer {} gone ({e})", peer.addr);
                    report.dropped += 1;
                    return false;
                }
            }
            match peer.stream.write(wire) {
                Ok(n) if n == wire.len() => {
                    report.delivered += 1;
                    true
                }
                Ok(0) => {
                    info!("broadcast: peer {} stopped accepting bytes", peer.addr);
                    report.dropped += 1;
                    false
                }
                Ok(n) => {
                    debug!("broadcast: short write ({n}/{} bytes) to {}, tail kept", wire.len(), peer.addr);
                    peer.pending.extend_from_slice(&wire[n..]);
                    report.delivered += 1;
                    true
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
                    debug!("broadcast: peer {} is slow, frame dropped", peer.addr);
                    report.dropped += 1;
                    true
                }
                Err(e) => {
                    info!("broadcast: peer {} gone ({e})", peer.addr);
                    report.dropped += 1;
                    false
                }
            }
        });
        report
    }
}
