//! Market data records: the two payloads that flow from the generator,
//! through the queues and onto the wire.
//!
//! Both structs are `#[repr(C)]` and `bytemuck::Pod`: no heap resources, no
//! implicit padding, trivially byte-copyable. Field order and widths are part
//! of the wire format (see [`crate::wire`]), so the sizes are pinned with
//! compile-time assertions.
//!
//! # Timestamp convention
//!
//! Timestamps are **nanoseconds since Unix epoch**.

use bytemuck::{Pod, Zeroable};

use super::symbol::{SYMBOL_LEN, symbol_from_bytes, symbol_to_bytes};

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// Top-of-book quote.
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Quote {
    pub symbol: [u8; SYMBOL_LEN],
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_size: u32,
    pub ask_size: u32,
    pub timestamp_ns: u64,
}

impl Quote {
    pub fn new(symbol: &str, bid_price: f64, ask_price: f64, bid_size: u32, ask_size: u32, timestamp_ns: u64) -> Self {
        Self { symbol: symbol_to_bytes(symbol), bid_price, ask_price, bid_size, ask_size, timestamp_ns }
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        symbol_from_bytes(&self.symbol)
    }
}

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

/// A single trade print.
///
/// `_reserved` fills the 4 bytes between `volume` and `price` that the
/// compiler would otherwise pad implicitly. It is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Trade {
    pub symbol: [u8; SYMBOL_LEN],
    pub timestamp_ns: u64,
    pub volume: u32,
    pub _reserved: [u8; 4],
    pub price: f64,
}

impl Trade {
    pub fn new(symbol: &str, timestamp_ns: u64, volume: u32, price: f64) -> Self {
        Self { symbol: symbol_to_bytes(symbol), timestamp_ns, volume, _reserved: [0; 4], price }
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        symbol_from_bytes(&self.symbol)
    }
}

const _: () = assert!(std::mem::size_of::<Quote>() == 40);
const _: () = assert!(std::mem::size_of::<Trade>() == 32);

// ---------------------------------------------------------------------------
// MarketDataMsg: tagged union for hand-off after decoding
// ---------------------------------------------------------------------------

/// Either record kind, as produced by [`crate::wire::decode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarketDataMsg {
    Quote(Quote),
    Trade(Trade),
}

impl MarketDataMsg {
    pub fn symbol(&self) -> &[u8; SYMBOL_LEN] {
        match self {
            Self::Quote(q) => &q.symbol,
            Self::Trade(t) => &t.symbol,
        }
    }
}

// ---------------------------------------------------------------------------
// Display impls
// ---------------------------------------------------------------------------

impl std::fmt::Display for Quote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Quote({} bid={:.4}x{} ask={:.4}x{} ts={})",
            self.symbol(),
            self.bid_price,
            self.bid_size,
            self.ask_price,
            self.ask_size,
            self.timestamp_ns
        )
    }
}

impl std::fmt::Display for Trade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Trade({} {:.4}x{} ts={})", self.symbol(), self.price, self.volume, self.timestamp_ns)
    }
}
