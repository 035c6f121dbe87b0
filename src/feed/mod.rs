//! Feed router: the inbound boundary of the core.
//!
//! Concrete feed adapters (websocket clients, replayers) call `on_tick`,
//! `on_aggregate`, and `on_fmv`. Parsing happens here; invalid records
//! are counted and discarded, and accepted events are offered to the
//! queue without ever blocking the ingestion path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::detectors::{FmvDetector, OhlcvDetector};
use crate::events::{epoch_now, Event, EventPayload, TickData};
use crate::market::StateRegistry;
use crate::queue::EventQueue;

/// One trade print from the tick feed.
#[derive(Debug, Clone)]
pub struct TickPayload {
    pub ticker: String,
    pub price: f64,
    pub volume: f64,
    pub timestamp: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

pub struct FeedRouter {
    queue: Arc<EventQueue>,
    states: Arc<StateRegistry>,
    ohlcv: OhlcvDetector,
    fmv: FmvDetector,
    parse_failures: AtomicU64,
}

impl FeedRouter {
    pub fn new(queue: Arc<EventQueue>, states: Arc<StateRegistry>) -> Self {
        Self {
            queue,
            states,
            ohlcv: OhlcvDetector::default(),
            fmv: FmvDetector,
            parse_failures: AtomicU64::new(0),
        }
    }

    /// Queue one tick at top priority. Detection runs on the worker that
    /// dequeues it, not here.
    pub fn on_tick(&self, tick: TickPayload) -> bool {
        let time = tick.timestamp.unwrap_or_else(epoch_now);
        let event = match Event::new(
            tick.ticker,
            tick.price,
            time,
            EventPayload::Tick(TickData {
                size: tick.volume,
                bid: tick.bid,
                ask: tick.ask,
            }),
        ) {
            Ok(event) => event.with_volume(tick.volume),
            Err(e) => {
                self.record_parse_failure("tick", &e);
                return false;
            }
        };
        self.queue.offer(event)
    }

    /// Parse one per-minute aggregate record and queue the events it
    /// yields (aggregate + any derived surge/trend).
    pub fn on_aggregate(&self, raw: &Value) -> usize {
        match self.ohlcv.process(raw) {
            Ok(events) => events
                .into_iter()
                .filter(|e| self.queue.offer(e.clone()))
                .count(),
            Err(e) => {
                self.record_parse_failure("aggregate", &e);
                0
            }
        }
    }

    /// Parse one FMV record; the latest known print for the symbol
    /// provides the market-price context.
    pub fn on_fmv(&self, raw: &Value) -> bool {
        let market_price = raw
            .get("sym")
            .and_then(Value::as_str)
            .and_then(|sym| self.states.get_snapshot(sym))
            .map(|s| s.current_price)
            .filter(|p| *p > 0.0);
        match self.fmv.process(raw, market_price) {
            Ok(event) => self.queue.offer(event),
            Err(e) => {
                self.record_parse_failure("fmv", &e);
                false
            }
        }
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }

    fn record_parse_failure(&self, feed: &str, error: &crate::events::ValidationError) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
        warn!(feed, error = %error, "discarding invalid feed record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PriorityCache;
    use crate::queue::QueueConfig;
    use serde_json::json;

    fn router() -> (FeedRouter, Arc<EventQueue>) {
        let queue = Arc::new(EventQueue::new(
            QueueConfig::default(),
            Arc::new(PriorityCache::new()),
        ));
        let states = Arc::new(StateRegistry::new(4));
        (FeedRouter::new(queue.clone(), states), queue)
    }

    #[test]
    fn tick_flows_into_queue() {
        let (router, queue) = router();
        assert!(router.on_tick(TickPayload {
            ticker: "AAPL".into(),
            price: 190.0,
            volume: 100.0,
            timestamp: Some(epoch_now()),
            bid: None,
            ask: None,
        }));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn invalid_tick_counts_a_parse_failure() {
        let (router, queue) = router();
        assert!(!router.on_tick(TickPayload {
            ticker: "".into(),
            price: 190.0,
            volume: 100.0,
            timestamp: None,
            bid: None,
            ask: None,
        }));
        assert_eq!(router.parse_failures(), 1);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn aggregate_record_queues_derived_events() {
        let (router, queue) = router();
        let raw = json!({
            "sym": "NVDA",
            "o": 100.0, "h": 103.5, "l": 99.5, "c": 103.0,
            "v": 10_000.0,
            "s": (epoch_now() * 1000.0 - 60_000.0),
            "e": (epoch_now() * 1000.0),
        });
        let queued = router.on_aggregate(&raw);
        assert!(queued >= 2); // aggregate + significant move
        assert_eq!(queue.len(), queued);

        let bad = json!({"sym": "NVDA", "o": 1.0});
        assert_eq!(router.on_aggregate(&bad), 0);
        assert_eq!(router.parse_failures(), 1);
    }

    #[test]
    fn fmv_record_flows_with_market_context() {
        let (router, queue) = router();
        let raw = json!({
            "sym": "TSLA",
            "fmv": 210.0,
            "t": (epoch_now() * 1e9) as i64,
        });
        assert!(router.on_fmv(&raw));
        assert_eq!(queue.len(), 1);
    }
}
