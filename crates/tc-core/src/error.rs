//! Typed error definitions for tickcast.
//!
//! [`TickcastError`] covers everything that can fail synchronously at setup
//! time (bad endpoints, bind/connect failures, thread spawn) plus lifecycle
//! misuse. Steady-state failures (dropped sends, malformed frames) are handled
//! locally and never surface here. All variants convert into `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TickcastError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// An endpoint string that does not resolve to a socket address.
    #[error("invalid endpoint '{0}'")]
    Endpoint(String),

    /// Binding a listening socket failed.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Connecting to a remote endpoint failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Spawning a worker thread failed.
    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The component was stopped and its channels closed.
    #[error("{0} is closed")]
    Closed(&'static str),
}

pub type Result<T, E = TickcastError> = std::result::Result<T, E>;
