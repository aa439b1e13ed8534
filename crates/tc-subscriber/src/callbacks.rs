//! Delivery sink for records that pass the interest filter.

use crossbeam_channel::{Sender, TrySendError};
use tc_core::types::{MarketDataMsg, Quote, Trade};
use tracing::{info, warn};

/// Callbacks invoked on the receive thread, one per record kind. A missing
/// callback means records of that kind are filtered in but not delivered.
#[derive(Default)]
pub struct SubscriberCallbacks {
    pub on_quote: Option<Box<dyn Fn(Quote) + Send>>,
    pub on_trade: Option<Box<dyn Fn(Trade) + Send>>,
}

impl SubscriberCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quote<F>(mut self, f: F) -> Self
    where
        F: Fn(Quote) + Send + 'static,
    {
        self.on_quote = Some(Box::new(f));
        self
    }

    pub fn with_trade<F>(mut self, f: F) -> Self
    where
        F: Fn(Trade) + Send + 'static,
    {
        self.on_trade = Some(Box::new(f));
        self
    }

    /// Log every delivered record at `info`.
    pub fn logging() -> Self {
        Self::new().with_quote(|q| info!("quote {q}")).with_trade(|t| info!("trade {t}"))
    }

    /// Hand every delivered record to a channel. A full channel drops the
    /// record; a disconnected one is ignored.
    pub fn forward(tx: Sender<MarketDataMsg>) -> Self {
        let trade_tx = tx.clone();
        Self::new()
            .with_quote(move |q| forward_one(&tx, MarketDataMsg::Quote(q)))
            .with_trade(move |t| forward_one(&trade_tx, MarketDataMsg::Trade(t)))
    }

    #[inline]
    pub(crate) fn deliver(&self, msg: MarketDataMsg) {
        match msg {
            MarketDataMsg::Quote(q) => {
                if let Some(cb) = &self.on_quote {
                    cb(q);
                }
            }
            MarketDataMsg::Trade(t) => {
                if let Some(cb) = &self.on_trade {
                    cb(t);
                }
            }
        }
    }
}

fn forward_one(tx: &Sender<MarketDataMsg>, msg: MarketDataMsg) {
    match tx.try_send(msg) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(_)) => warn!("forward channel full, dropping {}", msg_kind(&msg)),
    }
}

fn msg_kind(msg: &MarketDataMsg) -> &'static str {
    match msg {
        MarketDataMsg::Quote(_) => "quote",
        MarketDataMsg::Trade(_) => "trade",
    }
}
