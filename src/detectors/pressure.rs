//! Windowed buy/sell pressure over a tracked universe subset.
//!
//! Each tick of a tracked symbol classifies as buying or selling by its
//! price move versus the last print, weighted by volume. A 30-second
//! window produces a net pressure score in [-100, 100]; rolling 5- and
//! 15-minute buffers smooth it for display.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PressureConfig {
    pub window_seconds: f64,
    /// 10 windows x 30s = 5 minutes.
    pub five_min_slots: usize,
    /// 30 windows x 30s = 15 minutes.
    pub fifteen_min_slots: usize,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            window_seconds: 30.0,
            five_min_slots: 10,
            fifteen_min_slots: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PressureCalc {
    pub timestamp: f64,
    pub net_score: f64,
    pub buying: f64,
    pub selling: f64,
    pub activity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PressureMetrics {
    pub net_score: f64,
    pub avg_5min: f64,
    pub avg_15min: f64,
    pub session_avg: f64,
    pub calculation_count: u64,
    pub tracked_count: usize,
    pub ticks_received: u64,
    pub ticks_processed: u64,
    pub ticks_filtered: u64,
}

#[derive(Default)]
struct Inner {
    tracked: HashSet<String>,
    last_prices: HashMap<String, f64>,

    buying: f64,
    selling: f64,
    activity: f64,
    window_start: f64,

    latest: Option<PressureCalc>,
    rolling_5min: VecDeque<f64>,
    rolling_15min: VecDeque<f64>,
    session_sum: f64,
    session_count: u64,

    ticks_received: u64,
    ticks_processed: u64,
    ticks_filtered: u64,
}

pub struct PressureTracker {
    config: PressureConfig,
    inner: Mutex<Inner>,
}

impl PressureTracker {
    pub fn new(config: PressureConfig, tracked: HashSet<String>) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                tracked,
                ..Inner::default()
            }),
        }
    }

    /// Returns whether the tick was inside the tracked universe. An empty
    /// universe tracks everything.
    pub fn process_tick(&self, ticker: &str, price: f64, volume: f64, time: f64) -> bool {
        let mut inner = self.inner.lock();
        inner.ticks_received += 1;

        if !inner.tracked.is_empty() && !inner.tracked.contains(ticker) {
            inner.ticks_filtered += 1;
            return false;
        }
        inner.ticks_processed += 1;

        if inner.window_start == 0.0 {
            inner.window_start = time;
        }

        let weight = volume.max(1.0);
        match inner.last_prices.get(ticker).copied() {
            Some(last) if price > last => inner.buying += weight,
            Some(last) if price < last => inner.selling += weight,
            _ => {}
        }
        inner.activity += weight;
        inner.last_prices.insert(ticker.to_string(), price);

        if time - inner.window_start >= self.config.window_seconds {
            self.close_window(&mut inner, time);
        }
        true
    }

    fn close_window(&self, inner: &mut Inner, time: f64) {
        let net_score = if inner.activity > 0.0 {
            ((inner.buying - inner.selling) / inner.activity) * 100.0
        } else {
            0.0
        };
        let calc = PressureCalc {
            timestamp: time,
            net_score,
            buying: inner.buying,
            selling: inner.selling,
            activity: inner.activity,
        };
        debug!(
            net_score = format!("{net_score:.1}"),
            activity = inner.activity,
            "pressure window closed"
        );

        push_capped(&mut inner.rolling_5min, net_score, self.config.five_min_slots);
        push_capped(
            &mut inner.rolling_15min,
            net_score,
            self.config.fifteen_min_slots,
        );
        inner.session_sum += net_score;
        inner.session_count += 1;
        inner.latest = Some(calc);

        inner.buying = 0.0;
        inner.selling = 0.0;
        inner.activity = 0.0;
        inner.window_start = time;
    }

    pub fn update_tracked(&self, symbols: HashSet<String>) {
        let mut inner = self.inner.lock();
        debug!(count = symbols.len(), "pressure tracker universe updated");
        inner.tracked = symbols;
    }

    pub fn metrics(&self) -> PressureMetrics {
        let inner = self.inner.lock();
        PressureMetrics {
            net_score: inner.latest.as_ref().map(|c| c.net_score).unwrap_or(0.0),
            avg_5min: average(&inner.rolling_5min),
            avg_15min: average(&inner.rolling_15min),
            session_avg: if inner.session_count > 0 {
                inner.session_sum / inner.session_count as f64
            } else {
                0.0
            },
            calculation_count: inner.session_count,
            tracked_count: inner.tracked.len(),
            ticks_received: inner.ticks_received,
            ticks_processed: inner.ticks_processed,
            ticks_filtered: inner.ticks_filtered,
        }
    }

    /// Reset window and session accumulators, keeping the universe.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let tracked = std::mem::take(&mut inner.tracked);
        *inner = Inner {
            tracked,
            ..Inner::default()
        };
    }
}

fn push_capped(buffer: &mut VecDeque<f64>, value: f64, cap: usize) {
    if buffer.len() == cap {
        buffer.pop_front();
    }
    buffer.push_back(value);
}

fn average(buffer: &VecDeque<f64>) -> f64 {
    if buffer.is_empty() {
        0.0
    } else {
        buffer.iter().sum::<f64>() / buffer.len() as f64
    }
}
