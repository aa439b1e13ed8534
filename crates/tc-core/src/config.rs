//! Configuration parsing for tickcast.
//!
//! Every service reads its settings from a single JSON config file. Sections
//! are optional so one file can drive a publisher-only, subscriber-only or
//! combined process; a missing section means that role is not configured.
//!
//! # Example config
//!
//! ```json
//! {
//!   "module": { "module_name": "tickcast", "log_path": "/tmp/log" },
//!   "disseminator": {
//!     "broadcast_endpoint": "tcp://0.0.0.0:5555",
//!     "control_endpoint": "udp://0.0.0.0:5556",
//!     "queue_capacity": 10000,
//!     "cpu_affinity_quote": 2,
//!     "cpu_affinity_trade": 3
//!   },
//!   "generator": { "symbols_file": "data/tickers.txt", "messages_per_sec": 1000 },
//!   "subscriber": {
//!     "broadcast_endpoint": "tcp://127.0.0.1:5555",
//!     "control_endpoint": "udp://127.0.0.1:5556",
//!     "symbols": ["AAPL", "MSFT"]
//!   }
//! }
//! ```

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{error::TickcastError, queue::DEFAULT_QUEUE_CAPACITY};

const DEFAULT_CONTROL_POLL_MS: u64 = 100;
const DEFAULT_ACK_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_MESSAGES_PER_SEC: u32 = 1_000;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    pub module: Option<ModuleMeta>,

    /// Engine side: where to bind and how big the queues are.
    pub disseminator: Option<DisseminatorConfig>,

    /// Synthetic producer feeding the engine's queues.
    pub generator: Option<GeneratorConfig>,

    /// Receiver side: where to connect and what to subscribe to.
    pub subscriber: Option<SubscriberConfig>,
}

impl AppConfig {
    /// Returns the module name, defaulting to `"tickcast"`.
    pub fn module_name(&self) -> String {
        self.module.as_ref().and_then(|m| m.module_name.clone()).unwrap_or_else(|| "tickcast".to_string())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.module.as_ref().and_then(|m| m.log_path.clone())
    }
}

/// Module metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisseminatorConfig {
    /// Broadcast bind address, e.g. `"tcp://0.0.0.0:5555"`.
    pub broadcast_endpoint: String,

    /// Control bind address, e.g. `"udp://0.0.0.0:5556"`.
    pub control_endpoint: String,

    /// Slots per queue (default: 10_000).
    pub queue_capacity: Option<usize>,

    /// Receive timeout of the control thread in milliseconds (default: 100).
    pub control_poll_ms: Option<u64>,

    /// CPU core for the quote drain thread.
    pub cpu_affinity_quote: Option<i32>,

    /// CPU core for the trade drain thread.
    pub cpu_affinity_trade: Option<i32>,
}

impl DisseminatorConfig {
    /// Config bound to the given endpoints with every optional field unset.
    pub fn new(broadcast_endpoint: impl Into<String>, control_endpoint: impl Into<String>) -> Self {
        Self {
            broadcast_endpoint: broadcast_endpoint.into(),
            control_endpoint: control_endpoint.into(),
            queue_capacity: None,
            control_poll_ms: None,
            cpu_affinity_quote: None,
            cpu_affinity_trade: None,
        }
    }

    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.filter(|&c| c > 0).unwrap_or(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn effective_control_poll(&self) -> Duration {
        Duration::from_millis(self.control_poll_ms.filter(|&ms| ms > 0).unwrap_or(DEFAULT_CONTROL_POLL_MS))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneratorConfig {
    /// Ticker file, one symbol per line.
    pub symbols_file: Option<PathBuf>,

    /// Inline symbol list, used when no file is given.
    pub symbols: Option<Vec<String>>,

    /// Target output rate across both record kinds (default: 1000).
    pub messages_per_sec: Option<u32>,

    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,

    /// CPU core for the generator thread.
    pub cpu_affinity: Option<i32>,
}

impl GeneratorConfig {
    pub fn effective_messages_per_sec(&self) -> u32 {
        self.messages_per_sec.filter(|&r| r > 0).unwrap_or(DEFAULT_MESSAGES_PER_SEC)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberConfig {
    /// Broadcast connect address.
    pub broadcast_endpoint: String,

    /// Control connect address.
    pub control_endpoint: String,

    /// Symbols subscribed right after connecting.
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Wait for each handshake reply in milliseconds (default: 1000).
    pub ack_timeout_ms: Option<u64>,

    /// CPU core for the receive thread.
    pub cpu_affinity: Option<i32>,
}

impl SubscriberConfig {
    /// Config aimed at the given endpoints with no initial symbols.
    pub fn new(broadcast_endpoint: impl Into<String>, control_endpoint: impl Into<String>) -> Self {
        Self {
            broadcast_endpoint: broadcast_endpoint.into(),
            control_endpoint: control_endpoint.into(),
            symbols: Vec::new(),
            ack_timeout_ms: None,
            cpu_affinity: None,
        }
    }

    pub fn effective_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms.filter(|&ms| ms > 0).unwrap_or(DEFAULT_ACK_TIMEOUT_MS))
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig =
        serde_json::from_str(&content).map_err(|e| TickcastError::Config(format!("{}: {e}", path.display())))?;
    Ok(config)
}
