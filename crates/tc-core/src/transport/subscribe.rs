//! Broadcast receiver side: one TCP connection to the publisher.
//!
//! `recv` blocks with no timeout. Another thread unblocks it by calling
//! [`SocketCloser::close`], which shuts the connection down; the pending
//! `recv` then reports the channel as closed.

use std::{
    io::{self, Read},
    net::{Shutdown, SocketAddr, TcpStream},
};

use super::{MAX_FRAME_LEN, parse_endpoint};
use crate::error::{Result, TickcastError};

pub struct SubSocket {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl SubSocket {
    /// Connect to a broadcast endpoint.
    pub fn connect(endpoint: &str) -> Result<Self> {
        let addr = parse_endpoint(endpoint)?;
        let connect_err = |source| TickcastError::Connect { endpoint: endpoint.to_string(), source };

        let stream = TcpStream::connect(addr).map_err(connect_err)?;
        stream.set_nodelay(true).map_err(connect_err)?;
        Ok(Self { stream, peer_addr: addr })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Handle that can close this socket from another thread.
    pub fn closer(&self) -> io::Result<SocketCloser> {
        Ok(SocketCloser { stream: self.stream.try_clone()? })
    }

    /// Receive one frame into `buf` (replacing its contents).
    ///
    /// Returns `Ok(false)` once the channel is closed, locally or by the
    /// publisher. A length prefix above [`MAX_FRAME_LEN`] means the stream
    /// can no longer be trusted and is reported as `InvalidData`.
    pub fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<bool> {
        let mut len_bytes = [0u8; 4];
        match self.stream.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if is_closed(&e) => return Ok(false),
            Err(e) => return Err(e),
        }

        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, format!("frame length {len} exceeds limit")));
        }

        buf.clear();
        buf.resize(len, 0);
        match self.stream.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if is_closed(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn is_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
    )
}

/// Cross-thread close handle for a [`SubSocket`].
pub struct SocketCloser {
    stream: TcpStream,
}

impl SocketCloser {
    /// Shut the connection down in both directions. Idempotent.
    pub fn close(&self) {
        // NotConnected after the first call (or after the peer left) is fine.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
