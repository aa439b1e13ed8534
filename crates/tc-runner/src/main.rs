//! # tc-runner
//!
//! Main entry point for tickcast.
//!
//! Loads a JSON configuration file and, depending on `--mode`, runs the
//! publishing side (engine plus generator), a subscriber, or both in one
//! process. Everything is stopped in reverse start order on Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! tc-runner config.json --mode all --log-level info
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tc_core::{config::AppConfig, queue::WaitableQueue, service::Service};
use tc_engine::{Disseminator, Generator};
use tc_subscriber::{Subscriber, SubscriberCallbacks};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Engine and generator.
    Publish,
    /// Subscriber only.
    Subscribe,
    /// Engine, generator and a subscriber in one process.
    All,
}

impl Mode {
    fn publishes(self) -> bool {
        matches!(self, Mode::Publish | Mode::All)
    }

    fn subscribes(self) -> bool {
        matches!(self, Mode::Subscribe | Mode::All)
    }
}

/// Market data fan-out runner.
#[derive(Parser)]
#[command(name = "tc-runner", about = "Market data fan-out runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Which side of the fan-out to run.
    #[arg(short, long, value_enum, default_value_t = Mode::All)]
    mode: Mode,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output. Overrides `module.log_path`.
    #[arg(long)]
    log_dir: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

/// Build the services `mode` asks for, starting each one as soon as it
/// exists: a subscriber handshakes with the engine while connecting.
fn start_services(mode: Mode, config: &AppConfig, services: &mut Vec<Box<dyn Service>>) -> Result<()> {
    if mode.publishes() {
        let engine_cfg = config.disseminator.as_ref().context("mode needs a 'disseminator' section")?;
        let capacity = engine_cfg.effective_queue_capacity();
        let quotes = Arc::new(WaitableQueue::with_capacity(capacity));
        let trades = Arc::new(WaitableQueue::with_capacity(capacity));

        let disseminator = Disseminator::new(Arc::clone(&quotes), Arc::clone(&trades), engine_cfg)?;
        start(services, Box::new(disseminator))?;

        match &config.generator {
            Some(gen_cfg) => start(services, Box::new(Generator::new(quotes, trades, gen_cfg)?))?,
            None => warn!("no 'generator' section, engine runs without a producer"),
        }
    }

    if mode.subscribes() {
        let sub_cfg = config.subscriber.as_ref().context("mode needs a 'subscriber' section")?;
        let subscriber = Subscriber::connect(sub_cfg, SubscriberCallbacks::logging())?;
        info!("subscriber interested in {:?}", subscriber.subscriptions());
        start(services, Box::new(subscriber))?;
    }
    Ok(())
}

fn start(services: &mut Vec<Box<dyn Service>>, mut service: Box<dyn Service>) -> Result<()> {
    service.start()?;
    info!("service '{}' started", service.name());
    services.push(service);
    Ok(())
}

fn stop_all(services: &mut Vec<Box<dyn Service>>) {
    while let Some(mut service) = services.pop() {
        info!("stopping service '{}'", service.name());
        if let Err(e) = service.stop() {
            error!("error stopping '{}': {e}", service.name());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration (the module name and log path feed logging)
    let config = tc_core::config::load_config(&cli.config)?;

    // 2. Initialize logging
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    tc_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &config.module_name(), cli.json_logs)?;

    info!("tc-runner starting: config={}, mode={:?}, log_level={}", cli.config.display(), cli.mode, cli.log_level);

    // 3. Create and start services
    let mut services: Vec<Box<dyn Service>> = Vec::new();
    if let Err(e) = start_services(cli.mode, &config, &mut services) {
        error!("startup failed: {e:#}");
        stop_all(&mut services);
        return Err(e);
    }

    info!("all {} service(s) started, press Ctrl+C to stop", services.len());

    // 4. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 5. Stop in reverse start order: producer before engine
    stop_all(&mut services);

    info!("all services stopped, goodbye");
    Ok(())
}
