//! Rolling per-ticker state.
//!
//! One `TickerState` per symbol, created on first observation. Workers are
//! the only writers; the registry serializes access per shard so two
//! workers touching the same symbol cannot race.

use std::collections::{HashMap, HashSet, VecDeque};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::events::{epoch_now, EventKind};
use crate::market::session::MarketSession;

const MOMENTUM_WINDOW: usize = 20;

#[derive(Debug, Clone)]
pub struct TickerState {
    pub ticker: String,

    // Price tracking
    pub current_price: f64,
    pub previous_price: f64,
    pub open_price: Option<f64>,

    // High/low tracking
    pub day_high: f64,
    pub day_low: f64,
    pub session_high: f64,
    pub session_low: f64,
    pub day_high_time: f64,
    pub day_low_time: f64,
    pub session_high_time: f64,
    pub session_low_time: f64,

    // VWAP tracking
    pub vwap: f64,
    pub vwap_numerator: f64,
    pub vwap_denominator: f64,

    // Volume tracking
    pub total_volume: f64,
    pub avg_volume: f64,
    pub volume_30s: f64,
    pub volume_window_start: f64,

    // Momentum: ring buffer of recent price deltas
    pub momentum_score: f64,
    price_changes: VecDeque<f64>,

    // Trend tracking: -1 down, 0 none, +1 up
    pub trend_direction: i8,
    pub trend_started: f64,
    pub last_trend_emit: f64,

    // Surge cooldown: no new surge before this time
    pub surge_expires: f64,

    // Event counts
    pub high_count: u32,
    pub low_count: u32,
    pub trend_count: u32,
    pub surge_count: u32,
    pub surge_daily_count: u32,

    // Timing
    pub last_update: f64,
    pub last_event_time: Option<f64>,
    pub session_start: f64,

    pub market_session: MarketSession,
}

impl TickerState {
    pub fn new(ticker: impl Into<String>) -> Self {
        let now = epoch_now();
        Self {
            ticker: ticker.into(),
            current_price: 0.0,
            previous_price: 0.0,
            open_price: None,
            day_high: 0.0,
            day_low: f64::INFINITY,
            session_high: 0.0,
            session_low: f64::INFINITY,
            day_high_time: now,
            day_low_time: now,
            session_high_time: now,
            session_low_time: now,
            vwap: 0.0,
            vwap_numerator: 0.0,
            vwap_denominator: 0.0,
            total_volume: 0.0,
            avg_volume: 0.0,
            volume_30s: 0.0,
            volume_window_start: 0.0,
            momentum_score: 0.0,
            price_changes: VecDeque::with_capacity(MOMENTUM_WINDOW),
            trend_direction: 0,
            trend_started: 0.0,
            last_trend_emit: 0.0,
            surge_expires: 0.0,
            high_count: 0,
            low_count: 0,
            trend_count: 0,
            surge_count: 0,
            surge_daily_count: 0,
            last_update: now,
            last_event_time: None,
            session_start: now,
            market_session: MarketSession::Regular,
        }
    }

    /// Fold one trade print into the rolling state. Extremes are NOT
    /// advanced here; detectors compare against the pre-tick extremes
    /// and advance them when they emit an event.
    pub fn apply_tick(&mut self, price: f64, volume: f64, now: f64) {
        self.previous_price = self.current_price;
        self.current_price = price;
        self.last_update = now;

        if self.open_price.is_none() {
            self.open_price = Some(price);
        }

        if self.previous_price > 0.0 {
            let change = price - self.previous_price;
            if self.price_changes.len() == MOMENTUM_WINDOW {
                self.price_changes.pop_front();
            }
            self.price_changes.push_back(change);
        }

        // 30-second volume window, anchored to event time.
        if self.volume_window_start == 0.0 {
            self.volume_window_start = now;
        }
        if now - self.volume_window_start > 30.0 {
            self.avg_volume = if self.avg_volume > 0.0 {
                0.8 * self.avg_volume + 0.2 * self.volume_30s
            } else {
                self.volume_30s
            };
            self.volume_30s = 0.0;
            self.volume_window_start = now;
        }
        self.volume_30s += volume;
        self.total_volume += volume;

        if volume > 0.0 {
            self.vwap_numerator += price * volume;
            self.vwap_denominator += volume;
            self.vwap = self.vwap_numerator / self.vwap_denominator;
        }

        self.momentum_score = self.momentum();
    }

    /// Sum of recent deltas normalized by price, in percent.
    pub fn momentum(&self) -> f64 {
        if self.price_changes.len() < 2 || self.current_price <= 0.0 {
            return 0.0;
        }
        let sum: f64 = self.price_changes.iter().rev().take(10).sum();
        (sum / self.current_price) * 100.0
    }

    pub fn recent_deltas(&self, n: usize) -> impl Iterator<Item = &f64> {
        self.price_changes.iter().rev().take(n)
    }

    pub fn rel_volume(&self) -> f64 {
        if self.avg_volume > 0.0 {
            self.volume_30s / self.avg_volume
        } else {
            0.0
        }
    }

    pub fn note_event(&mut self, kind: EventKind, is_high: bool, time: f64) {
        match kind {
            EventKind::HighLow => {
                if is_high {
                    self.high_count += 1;
                } else {
                    self.low_count += 1;
                }
            }
            EventKind::Trend => self.trend_count += 1,
            EventKind::Surge => {
                self.surge_count += 1;
                self.surge_daily_count += 1;
            }
            _ => {}
        }
        self.last_event_time = Some(time);
    }

    pub fn reset_session(&mut self, session: MarketSession, now: f64) {
        self.market_session = session;
        self.session_high = self.current_price;
        self.session_low = if self.current_price > 0.0 {
            self.current_price
        } else {
            f64::INFINITY
        };
        self.session_start = now;

        if session == MarketSession::Regular {
            self.day_high = self.current_price;
            self.day_low = self.session_low;
            self.open_price = if self.current_price > 0.0 {
                Some(self.current_price)
            } else {
                None
            };
            self.total_volume = 0.0;
            self.vwap_numerator = 0.0;
            self.vwap_denominator = 0.0;
            self.surge_daily_count = 0;
        }
    }

    pub fn snapshot(&self) -> TickerSnapshot {
        TickerSnapshot {
            ticker: self.ticker.clone(),
            current_price: self.current_price,
            day_high: self.day_high,
            day_low: if self.day_low.is_finite() {
                Some(self.day_low)
            } else {
                None
            },
            session_high: self.session_high,
            session_low: if self.session_low.is_finite() {
                Some(self.session_low)
            } else {
                None
            },
            vwap: self.vwap,
            total_volume: self.total_volume,
            momentum_score: self.momentum_score,
            high_count: self.high_count,
            low_count: self.low_count,
            trend_count: self.trend_count,
            surge_count: self.surge_count,
            market_session: self.market_session,
            last_update: self.last_update,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TickerSnapshot {
    pub ticker: String,
    pub current_price: f64,
    pub day_high: f64,
    pub day_low: Option<f64>,
    pub session_high: f64,
    pub session_low: Option<f64>,
    pub vwap: f64,
    pub total_volume: f64,
    pub momentum_score: f64,
    pub high_count: u32,
    pub low_count: u32,
    pub trend_count: u32,
    pub surge_count: u32,
    pub market_session: MarketSession,
    pub last_update: f64,
}

/// Sharded symbol -> state map. Shard count fixed at startup; writers for
/// the same symbol always land on the same shard lock.
pub struct StateRegistry {
    shards: Vec<RwLock<HashMap<String, TickerState>>>,
    changed: Mutex<HashSet<String>>,
}

impl StateRegistry {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
            changed: Mutex::new(HashSet::new()),
        }
    }

    fn shard_for(&self, ticker: &str) -> &RwLock<HashMap<String, TickerState>> {
        let mut hasher = DefaultHasher::new();
        ticker.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Run `f` against the symbol's state, creating it on first
    /// observation. The shard write lock serializes concurrent writers.
    pub fn with_state<R>(&self, ticker: &str, f: impl FnOnce(&mut TickerState) -> R) -> R {
        let mut shard = self.shard_for(ticker).write();
        let state = shard
            .entry(ticker.to_string())
            .or_insert_with(|| TickerState::new(ticker));
        f(state)
    }

    pub fn get_snapshot(&self, ticker: &str) -> Option<TickerSnapshot> {
        self.shard_for(ticker).read().get(ticker).map(|s| s.snapshot())
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mark_changed(&self, ticker: &str) {
        self.changed.lock().insert(ticker.to_string());
    }

    /// Tickers changed since the last drain; used by snapshot builders.
    pub fn drain_changed(&self) -> Vec<String> {
        self.changed.lock().drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_tick_updates_price_volume_vwap() {
        let mut state = TickerState::new("AAPL");
        state.apply_tick(100.0, 500.0, 1_000.0);
        state.apply_tick(101.0, 300.0, 1_001.0);

        assert_eq!(state.previous_price, 100.0);
        assert_eq!(state.current_price, 101.0);
        assert_eq!(state.total_volume, 800.0);
        let expected_vwap = (100.0 * 500.0 + 101.0 * 300.0) / 800.0;
        assert!((state.vwap - expected_vwap).abs() < 1e-9);
        assert_eq!(state.open_price, Some(100.0));
    }

    #[test]
    fn momentum_reflects_recent_direction() {
        let mut state = TickerState::new("AAPL");
        let mut t = 1_000.0;
        for i in 0..10 {
            state.apply_tick(100.0 + i as f64, 100.0, t);
            t += 1.0;
        }
        assert!(state.momentum() > 0.0);

        for i in 0..10 {
            state.apply_tick(109.0 - i as f64 * 2.0, 100.0, t);
            t += 1.0;
        }
        assert!(state.momentum() < 0.0);
    }

    #[test]
    fn session_reset_clears_daily_accumulators() {
        let mut state = TickerState::new("AAPL");
        state.apply_tick(50.0, 1_000.0, 1_000.0);
        state.note_event(EventKind::Surge, false, 1_000.0);
        assert_eq!(state.surge_daily_count, 1);

        state.reset_session(MarketSession::Regular, 2_000.0);
        assert_eq!(state.total_volume, 0.0);
        assert_eq!(state.surge_daily_count, 0);
        assert_eq!(state.day_high, 50.0);
    }

    #[test]
    fn registry_creates_state_on_first_touch_and_tracks_changes() {
        let registry = StateRegistry::new(4);
        registry.with_state("MSFT", |s| s.apply_tick(410.0, 100.0, 1_000.0));
        registry.mark_changed("MSFT");

        assert_eq!(registry.len(), 1);
        let snap = registry.get_snapshot("MSFT").unwrap();
        assert_eq!(snap.current_price, 410.0);
        assert_eq!(registry.drain_changed(), vec!["MSFT".to_string()]);
        assert!(registry.drain_changed().is_empty());
    }
}
