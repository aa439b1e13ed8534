//! Binary framing for broadcast messages.
//!
//! A frame is the type tag followed by the raw bytes of the record:
//!
//! ```text
//! ┌────────────┬─────────────────────────────────────────┐
//! │ msg_type   │ record bytes (repr(C), native endian)   │
//! │ u8         │ 40 bytes (Quote) / 32 bytes (Trade)     │
//! └────────────┴─────────────────────────────────────────┘
//! ```
//!
//! There is no length field: the tag determines the record size. Records are
//! copied with `bytemuck`, so the layout is whatever `#[repr(C)]` pins for the
//! target. Producer and consumer must agree on endianness; mixed-architecture
//! deployments are not supported.

use bytemuck::Pod;
use thiserror::Error;

use crate::types::{MarketDataMsg, MessageType, Quote, Trade};

/// A record that can be placed on the wire.
pub trait WireRecord: Pod {
    const MESSAGE_TYPE: MessageType;

    /// Exact encoded size: tag byte + record bytes.
    const FRAME_LEN: usize = 1 + std::mem::size_of::<Self>();
}

impl WireRecord for Quote {
    const MESSAGE_TYPE: MessageType = MessageType::Quote;
}

impl WireRecord for Trade {
    const MESSAGE_TYPE: MessageType = MessageType::Trade;
}

/// Reasons a received frame is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("empty frame")]
    Empty,

    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("truncated {kind} frame: {len} bytes, need {need}")]
    Truncated { kind: MessageType, len: usize, need: usize },
}

/// Encode `record` into `out`, replacing its previous contents.
#[inline]
pub fn encode<R: WireRecord>(record: &R, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(R::FRAME_LEN);
    out.push(R::MESSAGE_TYPE as u8);
    out.extend_from_slice(bytemuck::bytes_of(record));
}

/// Encode `record` into a freshly allocated frame.
pub fn encode_to_vec<R: WireRecord>(record: &R) -> Vec<u8> {
    let mut out = Vec::with_capacity(R::FRAME_LEN);
    encode(record, &mut out);
    out
}

/// Decode one frame.
///
/// Frames longer than required are accepted and the excess is ignored.
pub fn decode(frame: &[u8]) -> Result<MarketDataMsg, WireError> {
    let (&tag, payload) = frame.split_first().ok_or(WireError::Empty)?;
    match MessageType::try_from(tag).map_err(WireError::UnknownType)? {
        MessageType::Quote => read_record::<Quote>(payload, frame.len()).map(MarketDataMsg::Quote),
        MessageType::Trade => read_record::<Trade>(payload, frame.len()).map(MarketDataMsg::Trade),
    }
}

#[inline]
fn read_record<R: WireRecord>(payload: &[u8], frame_len: usize) -> Result<R, WireError> {
    let size = std::mem::size_of::<R>();
    if payload.len() < size {
        return Err(WireError::Truncated { kind: R::MESSAGE_TYPE, len: frame_len, need: R::FRAME_LEN });
    }
    // The payload starts at offset 1, so it is never aligned for R.
    Ok(bytemuck::pod_read_unaligned(&payload[..size]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_frame_layout() {
        let quote = Quote::new("AAPL", 150.0, 150.5, 100, 100, 1);
        let frame = encode_to_vec(&quote);

        assert_eq!(frame.len(), Quote::FRAME_LEN);
        assert_eq!(frame.len(), 41);
        assert_eq!(frame[0], 0);
        assert_eq!(&frame[1..9], b"AAPL\0\0\0\0");
        assert_eq!(&frame[1..], bytemuck::bytes_of(&quote));

        assert_eq!(decode(&frame), Ok(MarketDataMsg::Quote(quote)));
    }

    #[test]
    fn trade_frame_layout() {
        let trade = Trade::new("MSFT", 2, 75, 300.25);
        let frame = encode_to_vec(&trade);

        assert_eq!(frame.len(), 33);
        assert_eq!(frame[0], 1);
        match decode(&frame) {
            Ok(MarketDataMsg::Trade(decoded)) => {
                assert_eq!(bytemuck::bytes_of(&decoded), bytemuck::bytes_of(&trade));
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn encode_reuses_buffer() {
        let mut buf = Vec::new();
        encode(&Quote::new("AAPL", 1.0, 2.0, 1, 1, 1), &mut buf);
        encode(&Trade::new("AAPL", 1, 1, 1.0), &mut buf);
        assert_eq!(buf.len(), Trade::FRAME_LEN);
        assert_eq!(buf[0], MessageType::Trade as u8);
    }

    #[test]
    fn rejects_short_frames() {
        assert_eq!(decode(&[]), Err(WireError::Empty));
        assert_eq!(decode(&[0]), Err(WireError::Truncated { kind: MessageType::Quote, len: 1, need: 41 }));

        let frame = encode_to_vec(&Quote::new("AAPL", 1.0, 2.0, 1, 1, 1));
        assert!(matches!(decode(&frame[..40]), Err(WireError::Truncated { .. })));

        // A full trade frame is still too short once re-tagged as a quote.
        let mut frame = encode_to_vec(&Trade::new("AAPL", 1, 1, 1.0));
        frame[0] = MessageType::Quote as u8;
        assert!(matches!(decode(&frame), Err(WireError::Truncated { kind: MessageType::Quote, .. })));
    }

    #[test]
    fn rejects_unknown_type() {
        let mut frame = encode_to_vec(&Trade::new("AAPL", 1, 1, 1.0));
        frame[0] = 7;
        assert_eq!(decode(&frame), Err(WireError::UnknownType(7)));
    }

    #[test]
    fn accepts_trailing_bytes() {
        let trade = Trade::new("AAPL", 1, 1, 1.0);
        let mut frame = encode_to_vec(&trade);
        frame.extend_from_slice(&[0xAA; 4]);
        assert_eq!(decode(&frame), Ok(MarketDataMsg::Trade(trade)));
    }
}
