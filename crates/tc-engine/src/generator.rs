//! Synthetic market data producer.
//!
//! One thread walks a price per symbol in integer cents and emits a quote or
//! a trade per tick at a fixed rate. It is the single producer for both
//! queues. A full queue drops the record and counts it; the generator never
//! waits for the drain threads.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tc_core::{
    cancel::CancellationToken,
    config::GeneratorConfig,
    cpu_affinity,
    error::TickcastError,
    queue::{QuoteQueue, TradeQueue},
    service::Service,
    time_util::now_ns,
    types::{MarketDataMsg, Quote, SYMBOL_LEN, Trade},
};
use tracing::{debug, info, warn};

/// Longest sleep between cancellation checks.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(50);

/// If the loop falls this far behind schedule, skip ahead instead of
/// bursting to catch up.
const MAX_LAG: Duration = Duration::from_secs(1);

/// Read a ticker file: one symbol per line, surrounding whitespace trimmed.
/// Empty lines and symbols longer than the record's symbol field are skipped.
pub fn load_symbols(path: &Path) -> Result<Vec<String>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading symbols file {}", path.display()))?;
    Ok(clean_symbols(content.lines()))
}

/// Trim each symbol, dropping empty ones and warning about oversized ones.
fn clean_symbols<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut symbols = Vec::new();
    for symbol in raw.into_iter().map(str::trim) {
        if symbol.is_empty() {
            continue;
        }
        if symbol.len() > SYMBOL_LEN {
            warn!("skipping symbol '{symbol}': longer than {SYMBOL_LEN} bytes");
            continue;
        }
        symbols.push(symbol.to_string());
    }
    symbols
}

// ---------------------------------------------------------------------------
// PriceModel
// ---------------------------------------------------------------------------

/// Random walk over a fixed symbol list.
pub struct PriceModel {
    symbols: Vec<String>,
    /// Mid price per symbol, in cents. Always >= 1.
    mids: Vec<i64>,
    rng: StdRng,
}

impl PriceModel {
    /// Panics if `symbols` is empty.
    pub fn new(symbols: Vec<String>, seed: Option<u64>) -> Self {
        assert!(!symbols.is_empty(), "price model needs at least one symbol");
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        // $10.00 .. $500.00
        let mids = symbols.iter().map(|_| rng.random_range(1_000..=50_000)).collect();
        Self { symbols, mids, rng }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Advance one symbol by up to five cents and emit a record for it.
    pub fn next(&mut self, timestamp_ns: u64) -> MarketDataMsg {
        let idx = self.rng.random_range(0..self.symbols.len());
        let step: i64 = self.rng.random_range(-5..=5);
        let mid = (self.mids[idx] + step).max(1);
        self.mids[idx] = mid;
        let symbol = &self.symbols[idx];

        if self.rng.random_bool(0.5) {
            let half_spread: i64 = self.rng.random_range(1..=5);
            let bid = (mid - half_spread).max(1);
            let ask = mid + half_spread;
            let bid_size = self.rng.random_range(1..=10) * 100;
            let ask_size = self.rng.random_range(1..=10) * 100;
            MarketDataMsg::Quote(Quote::new(symbol, cents(bid), cents(ask), bid_size, ask_size, timestamp_ns))
        } else {
            let volume = self.rng.random_range(1..=1_000);
            MarketDataMsg::Trade(Trade::new(symbol, timestamp_ns, volume, cents(mid)))
        }
    }
}

#[inline]
fn cents(c: i64) -> f64 {
    c as f64 / 100.0
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GeneratorStats {
    quotes_pushed: AtomicU64,
    trades_pushed: AtomicU64,
    quotes_dropped: AtomicU64,
    trades_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneratorStatsSnapshot {
    pub quotes_pushed: u64,
    pub trades_pushed: u64,
    /// Records discarded because their queue was full.
    pub quotes_dropped: u64,
    pub trades_dropped: u64,
}

pub struct Generator {
    quotes: Arc<QuoteQueue>,
    trades: Arc<TradeQueue>,
    model: Option<PriceModel>,
    interval: Duration,
    cpu_core: Option<i32>,
    stats: Arc<GeneratorStats>,
    token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Generator {
    /// Resolve the symbol list (file first, then the inline list) and build
    /// the price model. An empty list is a configuration error.
    pub fn new(quotes: Arc<QuoteQueue>, trades: Arc<TradeQueue>, config: &GeneratorConfig) -> Result<Self> {
        let symbols = match (&config.symbols_file, &config.symbols) {
            (Some(path), _) => load_symbols(path)?,
            (None, Some(list)) => clean_symbols(list.iter().map(String::as_str)),
            (None, None) => Vec::new(),
        };
        if symbols.is_empty() {
            return Err(TickcastError::Config("generator has no symbols".to_string()).into());
        }

        let rate = config.effective_messages_per_sec();
        info!("generator: {} symbols at {rate} msg/s", symbols.len());
        Ok(Self {
            quotes,
            trades,
            model: Some(PriceModel::new(symbols, config.seed)),
            interval: Duration::from_secs(1) / rate,
            cpu_core: config.cpu_affinity,
            stats: Arc::new(GeneratorStats::default()),
            token: CancellationToken::new(),
            worker: None,
        })
    }

    /// Spawn the producer thread. No-op while running; the model moves into
    /// the thread, so a stopped generator cannot start again.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(model) = self.model.take() else {
            return Err(TickcastError::Closed("generator").into());
        };

        let producer = Producer {
            quotes: Arc::clone(&self.quotes),
            trades: Arc::clone(&self.trades),
            interval: self.interval,
            stats: Arc::clone(&self.stats),
            token: self.token.clone(),
        };
        let cpu_core = self.cpu_core;
        let handle = thread::Builder::new()
            .name("tc-generator".to_string())
            .spawn(move || {
                cpu_affinity::pin_current("generator", cpu_core);
                producer.run(model);
            })
            .map_err(|source| TickcastError::Spawn { name: "tc-generator".to_string(), source })?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Cancel and join the producer thread. No-op if it never started.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else { return };
        self.token.cancel();
        if handle.join().is_err() {
            warn!("generator: thread panicked");
        }
        info!("generator: stopped");
    }

    pub fn stats(&self) -> GeneratorStatsSnapshot {
        GeneratorStatsSnapshot {
            quotes_pushed: self.stats.quotes_pushed.load(Ordering::Relaxed),
            trades_pushed: self.stats.trades_pushed.load(Ordering::Relaxed),
            quotes_dropped: self.stats.quotes_dropped.load(Ordering::Relaxed),
            trades_dropped: self.stats.trades_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Service for Generator {
    fn name(&self) -> &str {
        "generator"
    }

    fn start(&mut self) -> Result<()> {
        Generator::start(self)
    }

    fn stop(&mut self) -> Result<()> {
        Generator::stop(self);
        Ok(())
    }
}

struct Producer {
    quotes: Arc<QuoteQueue>,
    trades: Arc<TradeQueue>,
    interval: Duration,
    stats: Arc<GeneratorStats>,
    token: CancellationToken,
}

impl Producer {
    fn run(self, mut model: PriceModel) {
        info!("generator loop started");
        let mut next_tick = Instant::now();

        while !self.token.is_cancelled() {
            match model.next(now_ns()) {
                MarketDataMsg::Quote(q) => {
                    if self.quotes.push(q).is_ok() {
                        self.stats.quotes_pushed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.stats.quotes_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                MarketDataMsg::Trade(t) => {
                    if self.trades.push(t).is_ok() {
                        self.stats.trades_pushed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.stats.trades_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            next_tick += self.interval;
            let now = Instant::now();
            if now > next_tick + MAX_LAG {
                debug!("generator fell behind schedule, skipping ahead");
                next_tick = now;
            }
            self.sleep_until(next_tick);
        }

        info!("generator loop exited");
    }

    /// Sleep in short slices so cancellation is seen within one slice.
    fn sleep_until(&self, deadline: Instant) {
        loop {
            let now = Instant::now();
            if now >= deadline || self.token.is_cancelled() {
                return;
            }
            thread::sleep((deadline - now).min(MAX_SLEEP_SLICE));
        }
    }
}
