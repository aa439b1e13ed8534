//! Record types, the frame discriminant and symbol helpers.
//!
//! All records are `#[repr(C)]` with a fixed `[u8; 8]` symbol so they can be
//! copied through the queues and onto the wire without serialization.

pub mod enums;
pub mod market_data;
pub mod symbol;

pub use enums::*;
pub use market_data::*;
pub use symbol::*;
