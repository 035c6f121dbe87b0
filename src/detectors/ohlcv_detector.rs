//! Per-minute aggregate processing: the aggregate event itself plus
//! volume-surge and significant-move detection on top of it.

use serde_json::Value;

use crate::events::{
    AggregateData, Event, EventPayload, Strength, SurgeData, SurgeTrigger, TrendData,
    ValidationError, VwapPosition,
};

/// Minutes in a regular US equity session; baseline for per-minute
/// volume comparisons.
const SESSION_MINUTES: f64 = 390.0;

#[derive(Debug, Clone)]
pub struct OhlcvDetector {
    /// Absolute percent move over the minute that counts as significant.
    pub significant_move_pct: f64,
    /// Multiple of the average per-minute volume that counts as a surge.
    pub volume_surge_multiplier: f64,
    pub surge_ttl_seconds: f64,
}

impl Default for OhlcvDetector {
    fn default() -> Self {
        Self {
            significant_move_pct: 2.0,
            volume_surge_multiplier: 3.0,
            surge_ttl_seconds: 300.0,
        }
    }
}

impl OhlcvDetector {
    /// Parse one raw per-minute record and derive events from it. The
    /// aggregate event always comes first.
    pub fn process(&self, raw: &Value) -> Result<Vec<Event>, ValidationError> {
        let aggregate = AggregateData::from_feed(raw)?;
        let mut events = Vec::with_capacity(3);

        let EventPayload::Aggregate(data) = &aggregate.payload else {
            unreachable!("from_feed returns an aggregate payload");
        };
        let data = data.clone();
        let ticker = aggregate.ticker.clone();
        let direction = aggregate.direction;
        let time = aggregate.time;
        events.push(aggregate);

        if let Some(surge) = self.detect_volume_surge(&ticker, &data, time) {
            events.push(surge);
        }
        if data.price_change_pct.abs() >= self.significant_move_pct {
            let trend = Event::new(
                ticker,
                data.close,
                time,
                EventPayload::Trend(TrendData {
                    strength: if data.price_change_pct.abs() >= 2.0 * self.significant_move_pct {
                        Strength::Strong
                    } else {
                        Strength::Moderate
                    },
                    score: data.price_change_pct.abs(),
                    vwap_position: match data.minute_vwap {
                        Some(vw) if data.close > vw => VwapPosition::Above,
                        Some(vw) if data.close < vw => VwapPosition::Below,
                        _ => VwapPosition::At,
                    },
                    age_seconds: (data.end - data.start).max(0.0),
                    volume_confirmed: false,
                    volume_multiplier: 1.0,
                }),
            )?
            .with_direction(direction)
            .with_percent_change(data.price_change_pct)
            .with_volume(data.minute_volume)
            .with_vwap(data.minute_vwap);
            events.push(trend);
        }

        Ok(events)
    }

    fn detect_volume_surge(&self, ticker: &str, data: &AggregateData, time: f64) -> Option<Event> {
        let accumulated = data.accumulated_volume?;
        if accumulated <= 0.0 {
            return None;
        }
        let avg_minute = accumulated / SESSION_MINUTES;
        let multiplier = data.minute_volume / avg_minute;
        if multiplier < self.volume_surge_multiplier {
            return None;
        }

        Event::new(
            ticker,
            data.close,
            time,
            EventPayload::Surge(SurgeData {
                magnitude_pct: data.price_change_pct.abs(),
                score: multiplier * 10.0,
                strength: if multiplier >= 2.0 * self.volume_surge_multiplier {
                    Strength::Strong
                } else {
                    Strength::Moderate
                },
                trigger: SurgeTrigger::Volume,
                volume_multiplier: multiplier,
                expiration_time: time + self.surge_ttl_seconds,
                daily_count: 0,
                age_seconds: 0.0,
            }),
        )
        .ok()
        .map(|e| {
            e.with_direction(if data.price_change >= 0.0 {
                crate::events::Direction::Up
            } else {
                crate::events::Direction::Down
            })
            .with_volume(data.minute_volume)
            .with_vwap(data.minute_vwap)
            .with_rel_volume(multiplier)
        })
    }
}
