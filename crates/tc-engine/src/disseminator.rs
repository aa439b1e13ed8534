//! Dissemination engine: drains the two record queues onto the broadcast
//! channel and answers subscription handshakes.
//!
//! # Threads
//!
//! | thread          | blocks in                     | touches                        |
//! |-----------------|-------------------------------|--------------------------------|
//! | `tc-drain-quote`| `QuoteQueue::wait`            | quote queue, publisher lock    |
//! | `tc-drain-trade`| `TradeQueue::wait`            | trade queue, publisher lock    |
//! | `tc-control`    | `ControlServer::recv_request` | control socket, publisher lock |
//!
//! The publisher lock is held for one send, flush or accept, never across a
//! wait. A drain flushes half-written frames before it goes idle.
//! Frames of one kind leave in queue order; quote and trade frames interleave
//! arbitrarily.
//!
//! # Lifecycle
//!
//! `new` binds both endpoints (failures surface there). `start` spawns the
//! three threads once; a second `start` is a no-op. `stop` cancels, joins and
//! closes both channels; after that the engine cannot be restarted.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use tc_core::{
    cancel::CancellationToken,
    config::DisseminatorConfig,
    cpu_affinity,
    error::{Result, TickcastError},
    queue::{QuoteQueue, TradeQueue, WaitableQueue},
    service::Service,
    transport::{ACK, ControlRequest, ControlServer, PubSocket},
    wire::{self, WireRecord},
};
use tracing::{debug, info, trace, warn};

/// Pause after an unexpected control socket error, so a persistent failure
/// does not spin.
const CONTROL_ERROR_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Default)]
struct EngineStats {
    quotes_sent: AtomicU64,
    trades_sent: AtomicU64,
    frames_dropped: AtomicU64,
    control_requests: AtomicU64,
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    /// Quote frames handed to the broadcast channel.
    pub quotes_sent: u64,
    /// Trade frames handed to the broadcast channel.
    pub trades_sent: u64,
    /// Per-peer drops: slow peers skipped plus peers disconnected mid-send.
    pub frames_dropped: u64,
    /// Control datagrams answered.
    pub control_requests: u64,
}

pub struct Disseminator {
    quotes: Arc<QuoteQueue>,
    trades: Arc<TradeQueue>,
    publisher: Option<Arc<Mutex<PubSocket>>>,
    control: Option<ControlServer>,
    broadcast_addr: SocketAddr,
    control_addr: SocketAddr,
    cpu_affinity_quote: Option<i32>,
    cpu_affinity_trade: Option<i32>,
    stats: Arc<EngineStats>,
    token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Disseminator {
    /// Bind the broadcast and control endpoints.
    pub fn new(quotes: Arc<QuoteQueue>, trades: Arc<TradeQueue>, config: &DisseminatorConfig) -> Result<Self> {
        let publisher = PubSocket::bind(&config.broadcast_endpoint)?;
        let control = ControlServer::bind(&config.control_endpoint, config.effective_control_poll())?;
        let broadcast_addr = publisher.local_addr();
        let control_addr = control.local_addr();
        info!("disseminator: broadcast on {broadcast_addr}, control on {control_addr}");

        Ok(Self {
            quotes,
            trades,
            publisher: Some(Arc::new(Mutex::new(publisher))),
            control: Some(control),
            broadcast_addr,
            control_addr,
            cpu_affinity_quote: config.cpu_affinity_quote,
            cpu_affinity_trade: config.cpu_affinity_trade,
            stats: Arc::new(EngineStats::default()),
            token: CancellationToken::new(),
            workers: Vec::new(),
        })
    }

    pub fn broadcast_addr(&self) -> SocketAddr {
        self.broadcast_addr
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Spawn the two drain threads and the control thread.
    ///
    /// No-op while running. Fails with [`TickcastError::Closed`] once the
    /// engine has been stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!("disseminator: already running");
            return Ok(());
        }
        let (Some(publisher), Some(control)) = (self.publisher.clone(), self.control.take()) else {
            return Err(TickcastError::Closed("disseminator"));
        };

        let spawned = self.spawn_workers(publisher, control);
        if let Err(e) = spawned {
            // Whatever did start must not outlive a failed start.
            self.stop();
            return Err(e);
        }
        info!("disseminator: started {} threads", self.workers.len());
        Ok(())
    }

    fn spawn_workers(&mut self, publisher: Arc<Mutex<PubSocket>>, control: ControlServer) -> Result<()> {
        let quote_drain = Drain {
            label: "quote",
            publisher: Arc::clone(&publisher),
            stats: Arc::clone(&self.stats),
            token: self.token.clone(),
            cpu_core: self.cpu_affinity_quote,
        };
        let quotes = Arc::clone(&self.quotes);
        self.workers.push(spawn("tc-drain-quote", move || quote_drain.run(&quotes, |s| &s.quotes_sent))?);

        let trade_drain = Drain {
            label: "trade",
            publisher: Arc::clone(&publisher),
            stats: Arc::clone(&self.stats),
            token: self.token.clone(),
            cpu_core: self.cpu_affinity_trade,
        };
        let trades = Arc::clone(&self.trades);
        self.workers.push(spawn("tc-drain-trade", move || trade_drain.run(&trades, |s| &s.trades_sent))?);

        let stats = Arc::clone(&self.stats);
        let token = self.token.clone();
        self.workers.push(spawn("tc-control", move || control_loop(control, &publisher, &stats, &token))?);
        Ok(())
    }

    /// Cancel every thread, join them and close both channels.
    ///
    /// Idempotent. Does nothing on an engine that never started.
    pub fn stop(&mut self) {
        if self.workers.is_empty() && self.control.is_some() {
            return;
        }
        self.token.cancel();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("disseminator: worker thread panicked");
            }
        }
        if self.publisher.take().is_some() || self.control.take().is_some() {
            info!("disseminator: stopped, channels closed");
        }
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            quotes_sent: self.stats.quotes_sent.load(Ordering::Relaxed),
            trades_sent: self.stats.trades_sent.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            control_requests: self.stats.control_requests.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Disseminator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Service for Disseminator {
    fn name(&self) -> &str {
        "disseminator"
    }

    fn start(&mut self) -> anyhow::Result<()> {
        Ok(Disseminator::start(self)?)
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        Disseminator::stop(self);
        Ok(())
    }
}

fn spawn<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| TickcastError::Spawn { name: name.to_string(), source })
}

// ---------------------------------------------------------------------------
// Drain threads
// ---------------------------------------------------------------------------

struct Drain {
    label: &'static str,
    publisher: Arc<Mutex<PubSocket>>,
    stats: Arc<EngineStats>,
    token: CancellationToken,
    cpu_core: Option<i32>,
}

impl Drain {
    fn run<R: WireRecord>(self, queue: &WaitableQueue<R>, sent: fn(&EngineStats) -> &AtomicU64) {
        cpu_affinity::pin_current(self.label, self.cpu_core);
        let mut frame = Vec::with_capacity(R::FRAME_LEN);
        info!("[{}] drain loop started", self.label);

        while !self.token.is_cancelled() {
            {
                let mut publisher = self.publisher.lock();
                if publisher.has_pending() {
                    publisher.flush();
                }
            }
            queue.wait(&self.token);
            while !self.token.is_cancelled() {
                let Some(record) = queue.pop() else { break };
                wire::encode(&record, &mut frame);

                let report = self.publisher.lock().send(&frame);
                sent(&self.stats).fetch_add(1, Ordering::Relaxed);
                if report.dropped > 0 {
                    self.stats.frames_dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
                }
                trace!("[{}] frame out to {} peers", self.label, report.delivered);
            }
        }

        info!("[{}] drain loop exited", self.label);
    }
}

// ---------------------------------------------------------------------------
// Control thread
// ---------------------------------------------------------------------------

/// Answer every datagram with [`ACK`]. Requests are parsed for the log only;
/// no server-side routing state exists.
///
/// A subscriber connects its broadcast socket before its first handshake, so
/// the backlog is drained before replying: once a subscriber holds an ACK it
/// receives every later frame.
fn control_loop(server: ControlServer, publisher: &Mutex<PubSocket>, stats: &EngineStats, token: &CancellationToken) {
    let mut buf = ControlServer::request_buffer();
    info!("[control] loop started on {}", server.local_addr());

    while !token.is_cancelled() {
        let (n, peer) = match server.recv_request(&mut buf) {
            Ok(Some(received)) => received,
            Ok(None) => continue,
            Err(e) => {
                warn!("[control] receive error: {e}");
                thread::sleep(CONTROL_ERROR_BACKOFF);
                continue;
            }
        };

        stats.control_requests.fetch_add(1, Ordering::Relaxed);
        publisher.lock().accept_pending();
        match ControlRequest::parse(&buf[..n]) {
            Some(request) => debug!("[control] {request} from {peer}"),
            None => debug!("[control] unrecognised request ({n} bytes) from {peer}"),
        }
        if let Err(e) = server.reply(peer, ACK) {
            warn!("[control] reply to {peer} failed: {e}");
        }
    }

    info!("[control] loop exited");
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tc_core::{
        transport::{ControlClient, SubSocket},
        types::{MarketDataMsg, Quote, Trade},
    };

    use super::*;

    fn engine() -> (Disseminator, Arc<QuoteQueue>, Arc<TradeQueue>) {
        let quotes = Arc::new(WaitableQueue::with_capacity(64));
        let trades = Arc::new(WaitableQueue::with_capacity(64));
        let config = DisseminatorConfig::new("127.0.0.1:0", "127.0.0.1:0");
        let engine = Disseminator::new(Arc::clone(&quotes), Arc::clone(&trades), &config).unwrap();
        (engine, quotes, trades)
    }

    fn recv_frame(sub: &mut SubSocket) -> MarketDataMsg {
        let mut buf = Vec::new();
        assert!(sub.recv(&mut buf).unwrap(), "broadcast channel closed");
        wire::decode(&buf).unwrap()
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn start_is_idempotent() {
        let (mut engine, _, _) = engine();
        engine.start().unwrap();
        assert_eq!(engine.workers.len(), 3);
        engine.start().unwrap();
        assert_eq!(engine.workers.len(), 3);
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let (mut engine, _, _) = engine();
        engine.stop();
        engine.stop();
        // Never started, so the channels are still there.
        engine.start().unwrap();
        engine.stop();
    }

    #[test]
    fn restart_after_stop_is_rejected() {
        let (mut engine, _, _) = engine();
        engine.start().unwrap();
        engine.stop();
        engine.stop();
        assert!(matches!(engine.start(), Err(TickcastError::Closed(_))));
    }

    #[test]
    fn stop_returns_promptly_with_idle_queues() {
        let (mut engine, _, _) = engine();
        engine.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        let began = Instant::now();
        engine.stop();
        assert!(began.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn bind_failure_surfaces_at_construction() {
        let (first, quotes, trades) = engine();
        let taken = DisseminatorConfig::new(first.broadcast_addr().to_string(), "127.0.0.1:0");
        assert!(matches!(Disseminator::new(quotes, trades, &taken), Err(TickcastError::Bind { .. })));
    }

    #[test]
    fn drains_both_queues_onto_the_wire() {
        let (mut engine, quotes, trades) = engine();
        let mut sub = SubSocket::connect(&engine.broadcast_addr().to_string()).unwrap();
        engine.start().unwrap();

        let quote = Quote::new("AAPL", 150.0, 150.5, 100, 100, 1);
        let trade = Trade::new("MSFT", 2, 300, 410.25);
        quotes.push(quote).unwrap();
        trades.push(trade).unwrap();

        let mut got = vec![recv_frame(&mut sub), recv_frame(&mut sub)];
        // No ordering between the two kinds.
        got.sort_by_key(|m| matches!(m, MarketDataMsg::Trade(_)));
        assert_eq!(got, vec![MarketDataMsg::Quote(quote), MarketDataMsg::Trade(trade)]);

        assert!(wait_for(|| {
            let s = engine.stats();
            s.quotes_sent == 1 && s.trades_sent == 1
        }));
        assert!(quotes.is_empty());
        assert!(trades.is_empty());
        engine.stop();
    }

    #[test]
    fn per_kind_order_is_preserved() {
        let (mut engine, quotes, _) = engine();
        let mut sub = SubSocket::connect(&engine.broadcast_addr().to_string()).unwrap();
        engine.start().unwrap();

        for ts in 0..200u64 {
            let q = Quote::new("AAPL", 1.0, 2.0, 1, 1, ts);
            // Capacity 64: wait for the drain to catch up.
            let mut pending = Some(q);
            while let Some(q) = pending.take() {
                if let Err(back) = quotes.push(q) {
                    pending = Some(back);
                    thread::yield_now();
                }
            }
        }
        for ts in 0..200u64 {
            match recv_frame(&mut sub) {
                MarketDataMsg::Quote(q) => assert_eq!(q.timestamp_ns, ts),
                other => panic!("unexpected {other:?}"),
            }
        }
        engine.stop();
    }

    #[test]
    fn frames_without_subscribers_are_still_consumed() {
        let (mut engine, quotes, _) = engine();
        engine.start().unwrap();
        quotes.push(Quote::new("IBM", 1.0, 1.1, 1, 1, 1)).unwrap();
        assert!(wait_for(|| engine.stats().quotes_sent == 1));
        assert_eq!(engine.stats().frames_dropped, 0);
        engine.stop();
    }

    #[test]
    fn control_plane_acknowledges_any_request() {
        let (mut engine, _, _) = engine();
        engine.start().unwrap();

        let client = ControlClient::connect(&engine.control_addr().to_string(), Duration::from_secs(2)).unwrap();
        let reply = client.request(&ControlRequest::Subscribe("AAPL".into())).unwrap();
        assert_eq!(reply, ACK);
        let reply = client.request(&ControlRequest::Unsubscribe("AAPL".into())).unwrap();
        assert_eq!(reply, ACK);

        assert!(wait_for(|| engine.stats().control_requests == 2));
        engine.stop();
    }

    #[test]
    fn acknowledged_subscriber_gets_the_next_frame() {
        let (mut engine, quotes, _) = engine();
        engine.start().unwrap();
        // An earlier send leaves the backlog freshly polled.
        quotes.push(Quote::new("IBM", 1.0, 1.1, 1, 1, 1)).unwrap();
        assert!(wait_for(|| engine.stats().quotes_sent == 1));

        let mut sub = SubSocket::connect(&engine.broadcast_addr().to_string()).unwrap();
        let client = ControlClient::connect(&engine.control_addr().to_string(), Duration::from_secs(2)).unwrap();
        assert_eq!(client.request(&ControlRequest::Subscribe("AAPL".into())).unwrap(), ACK);

        let quote = Quote::new("AAPL", 150.0, 150.5, 100, 100, 2);
        quotes.push(quote).unwrap();
        assert_eq!(recv_frame(&mut sub), MarketDataMsg::Quote(quote));
        engine.stop();
    }

    #[test]
    fn stop_closes_the_broadcast_channel() {
        let (mut engine, _, _) = engine();
        let mut sub = SubSocket::connect(&engine.broadcast_addr().to_string()).unwrap();
        engine.start().unwrap();
        engine.stop();

        // The peer may not have been accepted yet; either way the read ends.
        let mut buf = Vec::new();
        let open = sub.recv(&mut buf).unwrap_or(false);
        assert!(!open);
    }

    #[test]
    fn service_trait_drives_lifecycle() {
        let (engine, _, _) = engine();
        let mut service: Box<dyn Service> = Box::new(engine);
        assert_eq!(service.name(), "disseminator");
        service.start().unwrap();
        service.start().unwrap();
        service.stop().unwrap();
        assert!(service.start().is_err());
    }
}
