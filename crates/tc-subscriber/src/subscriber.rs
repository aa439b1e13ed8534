//! Subscriber receiver: one broadcast connection, one control client, one
//! receive thread.
//!
//! # Interest set
//!
//! Symbols live in an `RwLock<AHashSet<[u8; 8]>>` shared with the receive
//! thread. `subscribe`/`unsubscribe` update the set *before* sending the
//! handshake, so every frame the receive thread decodes after the call has
//! updated the set is filtered against the new contents, whatever happens
//! to the handshake. A frame already past the filter when the call lands is
//! still delivered.
//!
//! # Shutdown
//!
//! The receive thread blocks in `SubSocket::recv` with no timeout. `stop`
//! cancels the token and shuts the socket down, which makes the pending
//! `recv` report a closed channel.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use ahash::AHashSet;
use parking_lot::{Mutex, RwLock};
use tc_core::{
    cancel::CancellationToken,
    config::SubscriberConfig,
    cpu_affinity,
    error::{Result, TickcastError},
    service::Service,
    transport::{ACK, ControlClient, ControlRequest, SocketCloser, SubSocket},
    types::{SYMBOL_LEN, symbol_from_bytes, symbol_to_bytes},
    wire,
};
use tracing::{debug, info, trace, warn};

type InterestSet = RwLock<AHashSet<[u8; SYMBOL_LEN]>>;

#[derive(Default)]
struct SubscriberStats {
    delivered: AtomicU64,
    filtered: AtomicU64,
    malformed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStatsSnapshot {
    /// Records handed to the callbacks.
    pub delivered: u64,
    /// Well-formed records for symbols outside the interest set.
    pub filtered: u64,
    /// Frames discarded by the decoder.
    pub malformed: u64,
}

pub struct Subscriber {
    socket: Option<SubSocket>,
    closer: SocketCloser,
    control: Mutex<Option<ControlClient>>,
    interest: Arc<InterestSet>,
    callbacks: Option<crate::SubscriberCallbacks>,
    cpu_core: Option<i32>,
    stats: Arc<SubscriberStats>,
    token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Subscriber {
    /// Connect both channels and subscribe to `config.symbols`.
    pub fn connect(config: &SubscriberConfig, callbacks: crate::SubscriberCallbacks) -> Result<Self> {
        let socket = SubSocket::connect(&config.broadcast_endpoint)?;
        let control = ControlClient::connect(&config.control_endpoint, config.effective_ack_timeout())?;
        info!("subscriber: connected to {} (control {})", socket.peer_addr(), control.server_addr());

        let mut subscriber = Self::from_parts(socket, control, callbacks)?;
        subscriber.cpu_core = config.cpu_affinity;
        for symbol in &config.symbols {
            subscriber.subscribe(symbol);
        }
        Ok(subscriber)
    }

    /// Build a subscriber over channels that are already connected.
    pub fn from_parts(socket: SubSocket, control: ControlClient, callbacks: crate::SubscriberCallbacks) -> Result<Self> {
        let closer = socket
            .closer()
            .map_err(|source| TickcastError::Connect { endpoint: socket.peer_addr().to_string(), source })?;
        Ok(Self {
            socket: Some(socket),
            closer,
            control: Mutex::new(Some(control)),
            interest: Arc::new(RwLock::new(AHashSet::new())),
            callbacks: Some(callbacks),
            cpu_core: None,
            stats: Arc::new(SubscriberStats::default()),
            token: CancellationToken::new(),
            worker: None,
        })
    }

    /// Add `symbol` to the interest set and send the handshake.
    ///
    /// Handshake failures (send error, no reply within the ack timeout,
    /// unexpected reply) are logged; the set is not rolled back.
    pub fn subscribe(&self, symbol: &str) {
        let Some(key) = interest_key(symbol) else { return };
        self.interest.write().insert(key);
        self.handshake(ControlRequest::Subscribe(symbol_from_bytes(&key).to_string()));
    }

    /// Remove `symbol` from the interest set and send the handshake.
    /// Best-effort, like [`Subscriber::subscribe`].
    pub fn unsubscribe(&self, symbol: &str) {
        let Some(key) = interest_key(symbol) else { return };
        self.interest.write().remove(&key);
        self.handshake(ControlRequest::Unsubscribe(symbol_from_bytes(&key).to_string()));
    }

    fn handshake(&self, request: ControlRequest) {
        let control = self.control.lock();
        let Some(client) = control.as_ref() else {
            warn!("subscriber: control channel closed, '{request}' not sent");
            return;
        };
        match client.request(&request) {
            Ok(reply) if reply == ACK => debug!("subscriber: '{request}' acknowledged"),
            Ok(reply) => warn!("subscriber: '{request}' got unexpected reply {:?}", String::from_utf8_lossy(&reply)),
            Err(e) => warn!("subscriber: '{request}' failed: {e}"),
        }
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        interest_key(symbol).is_some_and(|key| self.interest.read().contains(&key))
    }

    /// Current interest set, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut symbols: Vec<String> =
            self.interest.read().iter().map(|key| symbol_from_bytes(key).to_string()).collect();
        symbols.sort();
        symbols
    }

    /// Spawn the receive thread. No-op while running; fails with
    /// [`TickcastError::Closed`] after `stop`.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (Some(socket), Some(callbacks)) = (self.socket.take(), self.callbacks.take()) else {
            return Err(TickcastError::Closed("subscriber"));
        };

        let receiver = Receiver {
            interest: Arc::clone(&self.interest),
            callbacks,
            stats: Arc::clone(&self.stats),
            token: self.token.clone(),
        };
        let cpu_core = self.cpu_core;
        let handle = thread::Builder::new()
            .name("tc-subscriber".to_string())
            .spawn(move || {
                cpu_affinity::pin_current("subscriber", cpu_core);
                receiver.run(socket);
            })
            .map_err(|source| TickcastError::Spawn { name: "tc-subscriber".to_string(), source })?;
        self.worker = Some(handle);
        info!("subscriber: receive loop started");
        Ok(())
    }

    /// Close both channels and join the receive thread. Idempotent.
    pub fn stop(&mut self) {
        self.token.cancel();
        self.closer.close();
        self.socket = None;
        self.callbacks = None;
        if self.control.lock().take().is_some() {
            info!("subscriber: channels closed");
        }
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            warn!("subscriber: receive thread panicked");
        }
    }

    pub fn stats(&self) -> SubscriberStatsSnapshot {
        SubscriberStatsSnapshot {
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            filtered: self.stats.filtered.load(Ordering::Relaxed),
            malformed: self.stats.malformed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Service for Subscriber {
    fn name(&self) -> &str {
        "subscriber"
    }

    fn start(&mut self) -> anyhow::Result<()> {
        Ok(Subscriber::start(self)?)
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        Subscriber::stop(self);
        Ok(())
    }
}

/// Fixed-width key for `symbol`; `None` (with a warning) for a blank one.
fn interest_key(symbol: &str) -> Option<[u8; SYMBOL_LEN]> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        warn!("subscriber: ignoring empty symbol");
        return None;
    }
    Some(symbol_to_bytes(symbol))
}

// ---------------------------------------------------------------------------
// Receive thread
// ---------------------------------------------------------------------------

struct Receiver {
    interest: Arc<InterestSet>,
    callbacks: crate::SubscriberCallbacks,
    stats: Arc<SubscriberStats>,
    token: CancellationToken,
}

impl Receiver {
    fn run(self, mut socket: SubSocket) {
        let mut buf = Vec::with_capacity(64);

        while !self.token.is_cancelled() {
            match socket.recv(&mut buf) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("subscriber: broadcast channel closed");
                    break;
                }
                Err(e) => {
                    warn!("subscriber: broadcast receive failed: {e}");
                    break;
                }
            }

            let msg = match wire::decode(&buf) {
                Ok(msg) => msg,
                Err(e) => {
                    trace!("subscriber: discarding frame: {e}");
                    self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            if !self.interest.read().contains(msg.symbol()) {
                self.stats.filtered.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            self.callbacks.deliver(msg);
        }

        info!("subscriber: receive loop exited");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        time::{Duration, Instant},
    };

    use crossbeam_channel::{Receiver as Rx, unbounded};
    use tc_core::{
        transport::{ControlServer, PubSocket},
        types::{MarketDataMsg, Quote, Trade},
        wire::encode_to_vec,
    };

    use super::*;
    use crate::SubscriberCallbacks;

    /// Control server that acknowledges everything and reports the request
    /// text on a channel.
    struct MockControl {
        addr: SocketAddr,
        requests: Rx<String>,
        token: CancellationToken,
        handle: Option<JoinHandle<()>>,
    }

    impl MockControl {
        fn start() -> Self {
            let server = ControlServer::bind("127.0.0.1:0", Duration::from_millis(20)).unwrap();
            let addr = server.local_addr();
            let (tx, requests) = unbounded();
            let token = CancellationToken::new();
            let stop = token.clone();
            let handle = thread::spawn(move || {
                let mut buf = ControlServer::request_buffer();
                while !stop.is_cancelled() {
                    if let Some((n, peer)) = server.recv_request(&mut buf).unwrap() {
                        tx.send(String::from_utf8_lossy(&buf[..n]).into_owned()).unwrap();
                        server.reply(peer, ACK).unwrap();
                    }
                }
            });
            Self { addr, requests, token, handle: Some(handle) }
        }
    }

    impl Drop for MockControl {
        fn drop(&mut self) {
            self.token.cancel();
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    struct Fixture {
        publisher: PubSocket,
        control: MockControl,
        subscriber: Subscriber,
        delivered: Rx<MarketDataMsg>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut publisher = PubSocket::bind("127.0.0.1:0").unwrap();
            let control = MockControl::start();
            let socket = SubSocket::connect(&publisher.local_addr().to_string()).unwrap();
            let client = ControlClient::connect(&control.addr.to_string(), Duration::from_secs(2)).unwrap();

            let deadline = Instant::now() + Duration::from_secs(5);
            while publisher.peer_count() == 0 && Instant::now() < deadline {
                publisher.accept_pending();
                thread::sleep(Duration::from_millis(5));
            }
            assert_eq!(publisher.peer_count(), 1);

            let (tx, delivered) = unbounded();
            let subscriber = Subscriber::from_parts(socket, client, SubscriberCallbacks::forward(tx)).unwrap();
            Self { publisher, control, subscriber, delivered }
        }

        fn send_quote(&mut self, symbol: &str, ts: u64) -> Quote {
            let quote = Quote::new(symbol, 100.0, 100.5, 10, 20, ts);
            self.publisher.send(&encode_to_vec(&quote));
            quote
        }

        fn next(&self) -> MarketDataMsg {
            self.delivered.recv_timeout(Duration::from_secs(5)).expect("no record delivered")
        }
    }

    #[test]
    fn subscribe_sends_handshake_and_updates_set() {
        let fx = Fixture::new();
        fx.subscriber.subscribe("AAPL");
        assert_eq!(fx.control.requests.recv_timeout(Duration::from_secs(5)).unwrap(), "subscribe AAPL");
        assert!(fx.subscriber.is_subscribed("AAPL"));
        assert!(!fx.subscriber.is_subscribed("MSFT"));

        fx.subscriber.unsubscribe("AAPL");
        assert_eq!(fx.control.requests.recv_timeout(Duration::from_secs(5)).unwrap(), "unsubscribe AAPL");
        assert!(!fx.subscriber.is_subscribed("AAPL"));
    }

    #[test]
    fn failed_handshake_keeps_local_state() {
        let publisher = PubSocket::bind("127.0.0.1:0").unwrap();
        // Bound but never answering.
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let socket = SubSocket::connect(&publisher.local_addr().to_string()).unwrap();
        let client =
            ControlClient::connect(&silent.local_addr().unwrap().to_string(), Duration::from_millis(50)).unwrap();
        let subscriber = Subscriber::from_parts(socket, client, SubscriberCallbacks::new()).unwrap();

        subscriber.subscribe("IBM");
        subscriber.subscribe("GOOG");
        assert_eq!(subscriber.subscriptions(), vec!["GOOG", "IBM"]);
    }

    #[test]
    fn blank_symbols_are_ignored() {
        let fx = Fixture::new();
        fx.subscriber.subscribe("   ");
        assert!(fx.subscriber.subscriptions().is_empty());
        assert!(fx.control.requests.try_recv().is_err());
    }

    #[test]
    fn long_symbols_use_the_truncated_key() {
        let fx = Fixture::new();
        fx.subscriber.subscribe("SUPERLONGTICKER");
        assert_eq!(fx.control.requests.recv_timeout(Duration::from_secs(5)).unwrap(), "subscribe SUPERLON");
        assert!(fx.subscriber.is_subscribed("SUPERLON"));
    }

    #[test]
    fn delivers_only_subscribed_symbols() {
        let mut fx = Fixture::new();
        fx.subscriber.subscribe("AAPL");
        fx.subscriber.start().unwrap();

        fx.send_quote("MSFT", 1);
        let aapl = fx.send_quote("AAPL", 2);
        let trade = Trade::new("AAPL", 3, 50, 100.25);
        fx.publisher.send(&encode_to_vec(&trade));

        assert_eq!(fx.next(), MarketDataMsg::Quote(aapl));
        assert_eq!(fx.next(), MarketDataMsg::Trade(trade));
        assert!(fx.delivered.recv_timeout(Duration::from_millis(100)).is_err());

        let stats = fx.subscriber.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.filtered, 1);
    }

    #[test]
    fn unsubscribe_takes_effect_for_later_frames() {
        let mut fx = Fixture::new();
        fx.subscriber.subscribe("AAPL");
        fx.subscriber.subscribe("GOOG");
        fx.subscriber.start().unwrap();

        let first = fx.send_quote("AAPL", 1);
        assert_eq!(fx.next(), MarketDataMsg::Quote(first));

        fx.subscriber.unsubscribe("AAPL");
        fx.send_quote("AAPL", 2);
        let sentinel = fx.send_quote("GOOG", 3);
        assert_eq!(fx.next(), MarketDataMsg::Quote(sentinel));
    }

    #[test]
    fn malformed_frames_are_skipped() {
        let mut fx = Fixture::new();
        fx.subscriber.subscribe("AAPL");
        fx.subscriber.start().unwrap();

        fx.publisher.send(&[]);
        fx.publisher.send(&[7, 1, 2, 3]);
        let short = encode_to_vec(&Quote::new("AAPL", 1.0, 2.0, 1, 1, 1));
        fx.publisher.send(&short[..short.len() - 1]);
        let good = fx.send_quote("AAPL", 9);

        assert_eq!(fx.next(), MarketDataMsg::Quote(good));
        assert_eq!(fx.subscriber.stats().malformed, 3);
    }

    #[test]
    fn stop_unblocks_receive_loop_and_is_idempotent() {
        let mut fx = Fixture::new();
        fx.subscriber.start().unwrap();
        fx.subscriber.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        let began = Instant::now();
        fx.subscriber.stop();
        fx.subscriber.stop();
        assert!(began.elapsed() < Duration::from_secs(2));
        assert!(matches!(fx.subscriber.start(), Err(TickcastError::Closed(_))));
    }

    #[test]
    fn subscribe_after_stop_updates_set_without_handshake() {
        let mut fx = Fixture::new();
        fx.subscriber.stop();
        fx.subscriber.subscribe("AAPL");
        assert!(fx.subscriber.is_subscribed("AAPL"));
        assert!(fx.control.requests.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn drop_stops_the_receive_thread() {
        let fx = Fixture::new();
        let Fixture { publisher, control, mut subscriber, delivered } = fx;
        subscriber.start().unwrap();
        drop(subscriber);
        // The forwarding sender lived in the receive thread; once that thread
        // is joined the channel is disconnected.
        assert!(matches!(
            delivered.recv_timeout(Duration::from_secs(5)),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        ));
        drop((publisher, control));
    }

    #[test]
    fn publisher_going_away_ends_the_loop() {
        let fx = Fixture::new();
        let Fixture { publisher, control: _control, mut subscriber, delivered } = fx;
        subscriber.start().unwrap();
        drop(publisher);
        assert!(matches!(
            delivered.recv_timeout(Duration::from_secs(5)),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        ));
        subscriber.stop();
    }
}
