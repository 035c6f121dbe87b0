//! Filter predicates over typed events.
//!
//! Two consumption models share the predicates: `accepts` filters the
//! live event stream per subscriber, and `apply` filters a pre-aggregated
//! bundle for periodic user snapshots. Both are pure functions of
//! (config, input) and idempotent.

use serde::Serialize;

use crate::events::{Direction, Event, EventPayload, SurgeData, SurgeTrigger, TrendData};

use super::{FilterConfig, TriggerFilter, VolumeConfirmation, VwapFilter};

const TREND_FRESH_SECONDS: f64 = 120.0;
const TREND_RECENT_SECONDS: f64 = 300.0;
const SURGE_FRESH_SECONDS: f64 = 30.0;
const SURGE_RECENT_SECONDS: f64 = 120.0;

/// Stream-model entry point: does this subscriber's config admit the
/// event? Non-display kinds always pass.
pub fn accepts(config: &FilterConfig, event: &Event) -> bool {
    match &event.payload {
        EventPayload::HighLow(_) => accepts_highlow(config, event),
        EventPayload::Trend(data) => accepts_trend(config, event, data),
        EventPayload::Surge(data) => accepts_surge(config, event, data),
        _ => true,
    }
}

pub fn accepts_highlow(config: &FilterConfig, event: &Event) -> bool {
    let filter = &config.highlow;
    if filter.min_count > 0 {
        let count = match &event.payload {
            EventPayload::HighLow(data) => data.count,
            _ => 0,
        };
        if count < filter.min_count {
            return false;
        }
    }
    if filter.min_volume > 0 && event.volume.unwrap_or(0.0) < filter.min_volume as f64 {
        return false;
    }
    true
}

pub fn accepts_trend(config: &FilterConfig, event: &Event, data: &TrendData) -> bool {
    let filter = &config.trends;
    if data.strength < filter.strength {
        return false;
    }
    let vwap_ok = match filter.vwap_position {
        VwapFilter::AnyVwapPosition => true,
        VwapFilter::UptrendAboveVwap => {
            event.direction == Direction::Up
                && data.vwap_position == crate::events::VwapPosition::Above
        }
        VwapFilter::DowntrendBelowVwap => {
            event.direction == Direction::Down
                && data.vwap_position == crate::events::VwapPosition::Below
        }
    };
    if !vwap_ok {
        return false;
    }
    if data.age_seconds > filter.time_window.max_age_seconds() {
        return false;
    }
    if !filter
        .trend_age
        .admits(data.age_seconds, TREND_FRESH_SECONDS, TREND_RECENT_SECONDS)
    {
        return false;
    }
    match filter.volume_confirmation {
        VolumeConfirmation::AllTrends => true,
        VolumeConfirmation::VolumeConfirmed => {
            data.volume_confirmed || data.volume_multiplier > 1.5 || event.rel_volume > 1.5
        }
    }
}

pub fn accepts_surge(config: &FilterConfig, event: &Event, data: &SurgeData) -> bool {
    let filter = &config.surge;
    if data.strength < filter.magnitude {
        return false;
    }
    let trigger_ok = match filter.trigger_type {
        TriggerFilter::PriceAndVolume => true,
        TriggerFilter::Price => matches!(
            data.trigger,
            SurgeTrigger::Price | SurgeTrigger::PriceAndVolume
        ),
        TriggerFilter::Volume => matches!(
            data.trigger,
            SurgeTrigger::Volume | SurgeTrigger::PriceAndVolume
        ),
    };
    if !trigger_ok {
        return false;
    }
    if !filter
        .surge_age
        .admits(data.age_seconds, SURGE_FRESH_SECONDS, SURGE_RECENT_SECONDS)
    {
        return false;
    }
    if filter.price_range.is_empty() {
        return true;
    }
    filter.price_range.iter().any(|r| r.contains(event.price))
}

#[derive(Debug, Clone, Default)]
pub struct DirectionalBuckets {
    pub up: Vec<Event>,
    pub down: Vec<Event>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BundleCounts {
    pub highs: usize,
    pub lows: usize,
    pub trending_up: usize,
    pub trending_down: usize,
    pub surging_up: usize,
    pub surging_down: usize,
}

/// Pre-aggregated display lists for one snapshot cycle.
#[derive(Debug, Clone, Default)]
pub struct EventBundle {
    pub highs: Vec<Event>,
    pub lows: Vec<Event>,
    pub trending: DirectionalBuckets,
    pub surging: DirectionalBuckets,
    pub counts: BundleCounts,
}

impl EventBundle {
    pub fn recount(&mut self) {
        self.counts = BundleCounts {
            highs: self.highs.len(),
            lows: self.lows.len(),
            trending_up: self.trending.up.len(),
            trending_down: self.trending.down.len(),
            surging_up: self.surging.up.len(),
            surging_down: self.surging.down.len(),
        };
    }
}

/// Bundle-model entry point. Counts are re-derived after filtering.
pub fn apply(config: &FilterConfig, bundle: EventBundle) -> EventBundle {
    let mut out = EventBundle {
        highs: retain(config, bundle.highs),
        lows: retain(config, bundle.lows),
        trending: DirectionalBuckets {
            up: retain(config, bundle.trending.up),
            down: retain(config, bundle.trending.down),
        },
        surging: DirectionalBuckets {
            up: retain(config, bundle.surging.up),
            down: retain(config, bundle.surging.down),
        },
        counts: BundleCounts::default(),
    };
    out.recount();
    out
}

fn retain(config: &FilterConfig, events: Vec<Event>) -> Vec<Event> {
    events
        .into_iter()
        .filter(|e| accepts(config, e))
        .collect()
}
