//! # tc-engine
//!
//! Publisher side of tickcast.
//!
//! ## Architecture
//!
//! ```text
//! Generator ──► QuoteQueue ──► quote drain ──┐
//!           ──► TradeQueue ──► trade drain ──┴─► Mutex<PubSocket> ──► subscribers
//!                                 control thread ◄──► ControlServer ◄── handshakes
//! ```
//!
//! The queues are owned by the caller and shared through `Arc`; the engine
//! only consumes them.
//!
//! - [`disseminator`]: drain threads, shared broadcast channel, control plane
//! - [`generator`]: synthetic random-walk producer for the two queues

pub mod disseminator;
pub mod generator;

pub use disseminator::{Disseminator, EngineStatsSnapshot};
pub use generator::{Generator, GeneratorStatsSnapshot, PriceModel, load_symbols};
