//! # tc-subscriber
//!
//! Receiver side of tickcast: connects to an engine's broadcast and control
//! endpoints, keeps a local interest set and hands matching records to
//! caller-supplied callbacks.
//!
//! All filtering is local. The engine broadcasts every record to every
//! connected receiver; the control handshake is informational.

pub mod callbacks;
pub mod subscriber;

pub use callbacks::SubscriberCallbacks;
pub use subscriber::{Subscriber, SubscriberStatsSnapshot};
