//! Queues between the producer and the dissemination threads.
//!
//! - [`ring`]: lock-free bounded SPSC ring buffer
//! - [`waitable`]: the ring plus a cancellable wait gate

pub mod ring;
pub mod waitable;

pub use ring::SpscRing;
pub use waitable::{DEFAULT_QUEUE_CAPACITY, WaitGate, WaitableQueue};

use crate::types::{Quote, Trade};

pub type QuoteQueue = WaitableQueue<Quote>;
pub type TradeQueue = WaitableQueue<Trade>;
