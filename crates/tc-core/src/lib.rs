//! # tc-core
//!
//! Core crate for the tickcast market data fan-out, providing:
//!
//! - **Types** (`types`) — quote/trade records, message tags, symbol utils
//! - **Wire** (`wire`) — tag byte + raw record frame codec
//! - **Queues** (`queue`) — lock-free SPSC ring with a cancellable wait gate
//! - **Cancellation** (`cancel`) — shared stop token with wake-up callbacks
//! - **Transports** (`transport`) — TCP broadcast channel, UDP control channel
//! - **Configuration** (`config`) — JSON config deserialization
//! - **Error types** (`error`) — domain-specific `TickcastError` via thiserror
//! - **Service** (`service`) — start/stop lifecycle shared by the runners
//! - **CPU affinity** (`cpu_affinity`) — thread-to-core pinning for hot loops
//! - **Time utilities** (`time_util`) — high-precision timestamps
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod cancel;
pub mod config;
pub mod cpu_affinity;
pub mod error;
pub mod logging;
pub mod queue;
pub mod service;
pub mod time_util;
pub mod transport;
pub mod types;
pub mod wire;

// Re-export types at crate root for convenience.
pub use types::*;
