//! Tick-level detection: new extremes, sustained trends, surges.
//!
//! Runs on the worker thread that owns the symbol, under the state shard
//! lock, so it can read and advance `TickerState` without further
//! synchronization. Emitted events are offered back to the queue.

use tracing::warn;

use crate::events::{
    Direction, Event, EventPayload, HighLowData, HighLowKind, Strength, SurgeData, SurgeTrigger,
    TrendData, VwapPosition,
};
use crate::market::state::TickerState;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Relative 30s volume multiple that counts as a volume surge.
    pub surge_volume_multiplier: f64,
    /// Momentum magnitude (percent) that counts as a price surge.
    pub surge_price_pct: f64,
    /// Cooldown between surges for one ticker, seconds.
    pub surge_cooldown_seconds: f64,
    /// How long an emitted surge stays interesting, seconds.
    pub surge_ttl_seconds: f64,
    /// Consecutive same-direction deltas required for a trend.
    pub trend_min_ticks: usize,
    /// Re-emit interval for a continuing trend, seconds.
    pub trend_reemit_seconds: f64,
    /// Momentum magnitudes separating weak/moderate/strong.
    pub trend_moderate_score: f64,
    pub trend_strong_score: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            surge_volume_multiplier: 3.0,
            surge_price_pct: 2.0,
            surge_cooldown_seconds: 60.0,
            surge_ttl_seconds: 300.0,
            trend_min_ticks: 3,
            trend_reemit_seconds: 30.0,
            trend_moderate_score: 0.5,
            trend_strong_score: 1.5,
        }
    }
}

pub struct TickDetector {
    config: DetectorConfig,
}

impl TickDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Fold one tick into the symbol state and return any events it
    /// produced. The state mutation and the detection are one critical
    /// section; callers hold the shard lock.
    pub fn process_tick(
        &self,
        state: &mut TickerState,
        price: f64,
        volume: f64,
        time: f64,
    ) -> Vec<Event> {
        // Pre-tick extremes are the comparison baseline.
        let prev_day_high = state.day_high;
        let prev_day_low = state.day_low;
        let prev_session_high = state.session_high;
        let prev_session_low = state.session_low;
        let first_observation = prev_day_high <= 0.0;

        state.apply_tick(price, volume, time);

        if first_observation {
            // Seed extremes silently; the first print is not a "new high".
            state.day_high = price;
            state.day_low = price;
            state.session_high = price;
            state.session_low = price;
            state.day_high_time = time;
            state.day_low_time = time;
            state.session_high_time = time;
            state.session_low_time = time;
            return Vec::new();
        }

        let mut events = Vec::new();
        if let Some(event) = self.detect_extreme(
            state,
            price,
            time,
            prev_day_high,
            prev_day_low,
            prev_session_high,
            prev_session_low,
        ) {
            events.push(event);
        }
        if let Some(event) = self.detect_trend(state, price, time) {
            events.push(event);
        }
        if let Some(event) = self.detect_surge(state, price, time) {
            events.push(event);
        }
        events
    }

    #[allow(clippy::too_many_arguments)]
    fn detect_extreme(
        &self,
        state: &mut TickerState,
        price: f64,
        time: f64,
        prev_day_high: f64,
        prev_day_low: f64,
        prev_session_high: f64,
        prev_session_low: f64,
    ) -> Option<Event> {
        // A new day extreme implies the session extreme as well; emit the
        // day event and advance both.
        if price > prev_day_high {
            state.day_high = price;
            state.session_high = state.session_high.max(price);
            let period = time - state.day_high_time;
            state.day_high_time = time;
            state.session_high_time = time;
            return self.extreme_event(
                state,
                price,
                time,
                HighLowKind::DayHigh,
                prev_day_high,
                period,
            );
        }
        if price < prev_day_low {
            state.day_low = price;
            state.session_low = state.session_low.min(price);
            let period = time - state.day_low_time;
            state.day_low_time = time;
            state.session_low_time = time;
            return self.extreme_event(state, price, time, HighLowKind::DayLow, prev_day_low, period);
        }
        if price > prev_session_high {
            state.session_high = price;
            let period = time - state.session_high_time;
            state.session_high_time = time;
            return self.extreme_event(
                state,
                price,
                time,
                HighLowKind::SessionHigh,
                prev_session_high,
                period,
            );
        }
        if price < prev_session_low {
            state.session_low = price;
            let period = time - state.session_low_time;
            state.session_low_time = time;
            return self.extreme_event(
                state,
                price,
                time,
                HighLowKind::SessionLow,
                prev_session_low,
                period,
            );
        }
        None
    }

    fn extreme_event(
        &self,
        state: &TickerState,
        price: f64,
        time: f64,
        kind: HighLowKind,
        previous_extreme: f64,
        period_seconds: f64,
    ) -> Option<Event> {
        let percent_change = if previous_extreme > 0.0 {
            ((price - previous_extreme) / previous_extreme) * 100.0
        } else {
            0.0
        };
        let count = if kind.is_high() {
            state.high_count + 1
        } else {
            state.low_count + 1
        };
        let direction = if kind.is_high() {
            Direction::Up
        } else {
            Direction::Down
        };
        self.build(
            state,
            price,
            time,
            EventPayload::HighLow(HighLowData {
                kind,
                previous_extreme,
                percent_change,
                period_seconds: period_seconds.max(0.0),
                count,
            }),
        )
        .map(|e| e.with_direction(direction).with_percent_change(percent_change))
    }

    fn detect_trend(&self, state: &mut TickerState, price: f64, time: f64) -> Option<Event> {
        let deltas: Vec<f64> = state
            .recent_deltas(self.config.trend_min_ticks)
            .copied()
            .collect();
        if deltas.len() < self.config.trend_min_ticks {
            return None;
        }
        let direction = if deltas.iter().all(|d| *d > 0.0) {
            1
        } else if deltas.iter().all(|d| *d < 0.0) {
            -1
        } else {
            state.trend_direction = 0;
            return None;
        };

        if state.trend_direction != direction {
            state.trend_direction = direction;
            state.trend_started = time;
        } else if time - state.last_trend_emit < self.config.trend_reemit_seconds {
            return None;
        }

        let score = state.momentum().abs();
        let strength = if score >= self.config.trend_strong_score {
            Strength::Strong
        } else if score >= self.config.trend_moderate_score {
            Strength::Moderate
        } else {
            Strength::Weak
        };
        let vwap_position = if state.vwap <= 0.0 || (price - state.vwap).abs() < f64::EPSILON {
            VwapPosition::At
        } else if price > state.vwap {
            VwapPosition::Above
        } else {
            VwapPosition::Below
        };
        let rel_volume = state.rel_volume();

        state.last_trend_emit = time;
        state.trend_count += 1;

        self.build(
            state,
            price,
            time,
            EventPayload::Trend(TrendData {
                strength,
                score,
                vwap_position,
                age_seconds: (time - state.trend_started).max(0.0),
                volume_confirmed: rel_volume > 1.5,
                volume_multiplier: rel_volume,
            }),
        )
        .map(|e| {
            e.with_direction(if direction > 0 {
                Direction::Up
            } else {
                Direction::Down
            })
            .with_rel_volume(rel_volume)
        })
    }

    fn detect_surge(&self, state: &mut TickerState, price: f64, time: f64) -> Option<Event> {
        if time < state.surge_expires {
            return None;
        }
        let rel_volume = state.rel_volume();
        let momentum = state.momentum().abs();

        let volume_surge = rel_volume >= self.config.surge_volume_multiplier;
        let price_surge = momentum >= self.config.surge_price_pct;
        let trigger = match (price_surge, volume_surge) {
            (true, true) => SurgeTrigger::PriceAndVolume,
            (true, false) => SurgeTrigger::Price,
            (false, true) => SurgeTrigger::Volume,
            (false, false) => return None,
        };

        let score = momentum * 10.0 + rel_volume;
        let strength = if price_surge && volume_surge {
            Strength::Strong
        } else if momentum >= 2.0 * self.config.surge_price_pct
            || rel_volume >= 2.0 * self.config.surge_volume_multiplier
        {
            Strength::Strong
        } else if price_surge {
            Strength::Moderate
        } else {
            Strength::Weak
        };

        state.surge_expires = time + self.config.surge_cooldown_seconds;
        state.surge_count += 1;
        state.surge_daily_count += 1;

        let direction = if state.momentum() >= 0.0 {
            Direction::Up
        } else {
            Direction::Down
        };
        self.build(
            state,
            price,
            time,
            EventPayload::Surge(SurgeData {
                magnitude_pct: momentum,
                score,
                strength,
                trigger,
                volume_multiplier: rel_volume,
                expiration_time: time + self.config.surge_ttl_seconds,
                daily_count: state.surge_daily_count,
                age_seconds: 0.0,
            }),
        )
        .map(|e| e.with_direction(direction).with_rel_volume(rel_volume))
    }

    fn build(
        &self,
        state: &TickerState,
        price: f64,
        time: f64,
        payload: EventPayload,
    ) -> Option<Event> {
        match Event::new(state.ticker.clone(), price, time, payload) {
            Ok(event) => Some(
                event
                    .with_volume(state.volume_30s)
                    .with_vwap(if state.vwap > 0.0 { Some(state.vwap) } else { None }),
            ),
            Err(e) => {
                warn!(ticker = %state.ticker, error = %e, "detector produced invalid event");
                None
            }
        }
    }
}
