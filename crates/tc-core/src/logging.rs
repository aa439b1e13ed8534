//! Logging initialization using the `tracing` ecosystem.
//!
//! Provides:
//! - Console output (colored, human-readable, or JSON lines)
//! - File output (daily rotation via `tracing-appender`)
//! - Configurable log level via env var `RUST_LOG` or explicit parameter

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber.
///
/// Should be called once at program start. A second call (tests, embedding
/// applications) fails with an error instead of panicking.
///
/// # Parameters
///
/// - `log_level`: default level if `RUST_LOG` env var is not set (e.g. `"info"`)
/// - `log_dir`: optional directory for daily-rotating log files
/// - `module_name`: used as the log file prefix (e.g. `"tickcast"`)
/// - `json`: emit one JSON object per event instead of text
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str, json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = if json {
        fmt::layer().json().with_target(true).with_thread_ids(true).boxed()
    } else {
        fmt::layer().with_target(true).with_thread_ids(true).with_ansi(true).boxed()
    };

    let file_layer = log_dir.map(|dir| {
        let file_appender = tracing_appender::rolling::daily(dir, module_name);
        if json {
            fmt::layer().json().with_writer(file_appender).with_target(true).with_thread_ids(true).boxed()
        } else {
            fmt::layer().with_writer(file_appender).with_ansi(false).with_target(true).with_thread_ids(true).boxed()
        }
    });

    tracing_subscriber::registry().with(env_filter).with(console_layer).with(file_layer).try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let first = init_logging("debug", dir.path().to_str(), "tc_test", false);
        let second = init_logging("info", None, "tc_test", true);
        // Another test in this binary may have won the race for the global
        // subscriber; either way at most one call succeeds.
        assert!(!(first.is_ok() && second.is_ok()));
        assert!(second.is_err());
    }
}
