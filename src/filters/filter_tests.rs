use serde_json::json;

use crate::events::{
    Direction, Event, EventPayload, HighLowData, HighLowKind, Strength, SurgeData, SurgeTrigger,
    TrendData, VwapPosition,
};

use super::apply::{accepts, apply, EventBundle};
use super::*;

fn trend(ticker: &str, strength: Strength, age: f64) -> Event {
    Event::new(
        ticker,
        50.0,
        1_000.0,
        EventPayload::Trend(TrendData {
            strength,
            score: 1.0,
            vwap_position: VwapPosition::Above,
            age_seconds: age,
            volume_confirmed: false,
            volume_multiplier: 1.0,
        }),
    )
    .unwrap()
    .with_direction(Direction::Up)
}

fn surge(price: f64, strength: Strength, trigger: SurgeTrigger, age: f64) -> Event {
    Event::new(
        "SURG",
        price,
        1_000.0,
        EventPayload::Surge(SurgeData {
            magnitude_pct: 3.0,
            score: 30.0,
            strength,
            trigger,
            volume_multiplier: 2.0,
            expiration_time: 1_300.0,
            daily_count: 1,
            age_seconds: age,
        }),
    )
    .unwrap()
    .with_direction(Direction::Up)
}

fn high(count: u32, volume: f64) -> Event {
    Event::new(
        "HI",
        10.0,
        1_000.0,
        EventPayload::HighLow(HighLowData {
            kind: HighLowKind::DayHigh,
            previous_extreme: 9.9,
            percent_change: 1.0,
            period_seconds: 60.0,
            count,
        }),
    )
    .unwrap()
    .with_direction(Direction::Up)
    .with_volume(volume)
}

#[test]
fn config_parses_full_document() {
    let doc = json!({
        "filters": {
            "highlow": {"min_count": 2, "min_volume": 1000},
            "trends": {
                "strength": "strong",
                "vwap_position": "uptrend_above_vwap",
                "time_window": "short",
                "trend_age": "fresh",
                "volume_confirmation": "volume_confirmed"
            },
            "surge": {
                "magnitude": "weak",
                "trigger_type": "volume",
                "surge_age": "recent",
                "price_range": ["penny", "low"]
            }
        }
    });
    let config = FilterConfig::from_value(&doc).unwrap();
    assert_eq!(config.highlow.min_count, 2);
    assert_eq!(config.trends.strength, Strength::Strong);
    assert_eq!(config.surge.price_range, vec![PriceRange::Penny, PriceRange::Low]);
}

#[test]
fn config_rejects_unknown_values_and_fields() {
    let bad_strength = json!({"trends": {
        "strength": "extreme",
        "vwap_position": "any_vwap_position",
        "time_window": "medium",
        "trend_age": "all",
        "volume_confirmation": "all_trends"
    }});
    assert!(FilterConfig::from_value(&bad_strength).is_err());

    let unknown_field = json!({"highlow": {"min_count": 0, "min_volume": 0, "bogus": 1}});
    assert!(FilterConfig::from_value(&unknown_field).is_err());

    let bad_range = json!({"surge": {
        "magnitude": "weak",
        "trigger_type": "price",
        "surge_age": "all",
        "price_range": ["negative"]
    }});
    assert!(FilterConfig::from_value(&bad_range).is_err());
}

#[test]
fn strength_filter_is_ordinal_with_equality_passing() {
    let mut config = FilterConfig::default();
    config.trends.strength = Strength::Moderate;

    assert!(!accepts(&config, &trend("A", Strength::Weak, 10.0)));
    // Equality boundary passes.
    assert!(accepts(&config, &trend("B", Strength::Moderate, 10.0)));
    assert!(accepts(&config, &trend("C", Strength::Strong, 10.0)));
}

// Scenario: a weak and a strong trend, filter at moderate, keeps only
// the strong one and recounts.
#[test]
fn bundle_apply_filters_and_recounts() {
    let mut config = FilterConfig::default();
    config.trends.strength = Strength::Moderate;

    let mut bundle = EventBundle::default();
    bundle.trending.up = vec![
        trend("WEAK", Strength::Weak, 10.0),
        trend("STRONG", Strength::Strong, 10.0),
    ];
    bundle.recount();
    assert_eq!(bundle.counts.trending_up, 2);

    let filtered = apply(&config, bundle);
    assert_eq!(filtered.trending.up.len(), 1);
    assert_eq!(filtered.trending.up[0].ticker, "STRONG");
    assert_eq!(filtered.counts.trending_up, 1);
}

#[test]
fn apply_is_idempotent() {
    let mut config = FilterConfig::default();
    config.trends.strength = Strength::Moderate;
    config.surge.price_range = vec![PriceRange::Mid];

    let mut bundle = EventBundle::default();
    bundle.highs = vec![high(1, 500.0), high(5, 50_000.0)];
    bundle.trending.up = vec![
        trend("A", Strength::Weak, 10.0),
        trend("B", Strength::Strong, 10.0),
    ];
    bundle.surging.up = vec![
        surge(50.0, Strength::Strong, SurgeTrigger::Price, 5.0),
        surge(0.5, Strength::Strong, SurgeTrigger::Price, 5.0),
    ];
    bundle.recount();

    let once = apply(&config, bundle);
    let twice = apply(&config, once.clone());

    assert_eq!(once.counts, twice.counts);
    assert_eq!(once.highs.len(), twice.highs.len());
    assert_eq!(once.trending.up.len(), twice.trending.up.len());
    assert_eq!(once.surging.up.len(), twice.surging.up.len());
}

#[test]
fn highlow_thresholds() {
    let mut config = FilterConfig::default();
    config.highlow.min_count = 3;
    config.highlow.min_volume = 1_000;

    assert!(!accepts(&config, &high(2, 5_000.0)));
    assert!(!accepts(&config, &high(5, 500.0)));
    assert!(accepts(&config, &high(3, 1_000.0)));
}

#[test]
fn vwap_position_filter_requires_matching_direction() {
    let mut config = FilterConfig::default();
    config.trends.strength = Strength::Weak;
    config.trends.vwap_position = VwapFilter::UptrendAboveVwap;

    // Uptrend above VWAP passes.
    assert!(accepts(&config, &trend("UP", Strength::Moderate, 10.0)));

    // Downtrend below VWAP fails the uptrend filter.
    let down = Event::new(
        "DOWN",
        50.0,
        1_000.0,
        EventPayload::Trend(TrendData {
            strength: Strength::Moderate,
            score: 1.0,
            vwap_position: VwapPosition::Below,
            age_seconds: 10.0,
            volume_confirmed: false,
            volume_multiplier: 1.0,
        }),
    )
    .unwrap()
    .with_direction(Direction::Down);
    assert!(!accepts(&config, &down));

    config.trends.vwap_position = VwapFilter::DowntrendBelowVwap;
    assert!(accepts(&config, &down));
    assert!(!accepts(&config, &trend("UP2", Strength::Moderate, 10.0)));
}

#[test]
fn time_window_and_age_filters() {
    let mut config = FilterConfig::default();
    config.trends.strength = Strength::Weak;
    config.trends.time_window = TimeWindow::Short;

    assert!(accepts(&config, &trend("A", Strength::Weak, 179.0)));
    assert!(!accepts(&config, &trend("B", Strength::Weak, 181.0)));

    config.trends.time_window = TimeWindow::Long;
    config.trends.trend_age = AgeWindow::Fresh;
    assert!(accepts(&config, &trend("C", Strength::Weak, 119.0)));
    assert!(!accepts(&config, &trend("D", Strength::Weak, 121.0)));

    config.trends.trend_age = AgeWindow::Recent;
    assert!(accepts(&config, &trend("E", Strength::Weak, 299.0)));
    assert!(!accepts(&config, &trend("F", Strength::Weak, 301.0)));
}

#[test]
fn surge_age_uses_tighter_limits() {
    let mut config = FilterConfig::default();
    config.surge.magnitude = Strength::Weak;
    config.surge.surge_age = AgeWindow::Fresh;

    assert!(accepts(&config, &surge(50.0, Strength::Weak, SurgeTrigger::Price, 29.0)));
    assert!(!accepts(&config, &surge(50.0, Strength::Weak, SurgeTrigger::Price, 31.0)));

    config.surge.surge_age = AgeWindow::Recent;
    assert!(accepts(&config, &surge(50.0, Strength::Weak, SurgeTrigger::Price, 119.0)));
    assert!(!accepts(&config, &surge(50.0, Strength::Weak, SurgeTrigger::Price, 121.0)));
}

#[test]
fn volume_confirmation_has_three_sufficient_signals() {
    let mut config = FilterConfig::default();
    config.trends.strength = Strength::Weak;
    config.trends.volume_confirmation = VolumeConfirmation::VolumeConfirmed;

    // Unconfirmed, low multiplier, low rel_volume: rejected.
    assert!(!accepts(&config, &trend("A", Strength::Weak, 10.0)));

    let confirmed = |flag: bool, multiplier: f64, rel: f64| {
        Event::new(
            "V",
            50.0,
            1_000.0,
            EventPayload::Trend(TrendData {
                strength: Strength::Weak,
                score: 1.0,
                vwap_position: VwapPosition::Above,
                age_seconds: 10.0,
                volume_confirmed: flag,
                volume_multiplier: multiplier,
            }),
        )
        .unwrap()
        .with_direction(Direction::Up)
        .with_rel_volume(rel)
    };
    assert!(accepts(&config, &confirmed(true, 1.0, 1.0)));
    assert!(accepts(&config, &confirmed(false, 1.6, 1.0)));
    assert!(accepts(&config, &confirmed(false, 1.0, 1.6)));
}

#[test]
fn trigger_type_filter_is_permissive_for_combined() {
    let mut config = FilterConfig::default();
    config.surge.magnitude = Strength::Weak;

    config.surge.trigger_type = TriggerFilter::Price;
    assert!(accepts(&config, &surge(50.0, Strength::Weak, SurgeTrigger::Price, 5.0)));
    assert!(accepts(&config, &surge(50.0, Strength::Weak, SurgeTrigger::PriceAndVolume, 5.0)));
    assert!(!accepts(&config, &surge(50.0, Strength::Weak, SurgeTrigger::Volume, 5.0)));

    config.surge.trigger_type = TriggerFilter::Volume;
    assert!(accepts(&config, &surge(50.0, Strength::Weak, SurgeTrigger::Volume, 5.0)));
    assert!(!accepts(&config, &surge(50.0, Strength::Weak, SurgeTrigger::Price, 5.0)));

    config.surge.trigger_type = TriggerFilter::PriceAndVolume;
    assert!(accepts(&config, &surge(50.0, Strength::Weak, SurgeTrigger::Price, 5.0)));
    assert!(accepts(&config, &surge(50.0, Strength::Weak, SurgeTrigger::Volume, 5.0)));
}

#[test]
fn price_range_bins_have_half_open_boundaries() {
    assert!(PriceRange::Penny.contains(0.99));
    assert!(!PriceRange::Penny.contains(1.0));
    assert!(PriceRange::Low.contains(1.0));
    assert!(!PriceRange::Low.contains(25.0));
    assert!(PriceRange::Mid.contains(25.0));
    assert!(!PriceRange::Mid.contains(100.0));
    assert!(PriceRange::High.contains(100.0));

    let mut config = FilterConfig::default();
    config.surge.magnitude = Strength::Weak;
    config.surge.price_range = vec![PriceRange::Low];
    assert!(accepts(&config, &surge(1.0, Strength::Weak, SurgeTrigger::Price, 5.0)));
    assert!(!accepts(&config, &surge(0.99, Strength::Weak, SurgeTrigger::Price, 5.0)));
    assert!(!accepts(&config, &surge(25.0, Strength::Weak, SurgeTrigger::Price, 5.0)));
}
