use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{PriorityCache, PriorityClass};
use crate::events::{
    epoch_now, ControlCommand, Event, EventKind, EventPayload, Strength, SurgeData, SurgeTrigger,
    TrendData, VwapPosition,
};

use super::event_queue::{base_priority, throttle_level};
use super::{DropReason, EventQueue, QueueConfig};

fn small_config(capacity: usize) -> QueueConfig {
    QueueConfig {
        max_queue_size: capacity,
        ..QueueConfig::default()
    }
}

fn queue_with_cache(capacity: usize, cache: Arc<PriorityCache>) -> EventQueue {
    EventQueue::new(small_config(capacity), cache)
}

fn plain_queue(capacity: usize) -> EventQueue {
    queue_with_cache(capacity, Arc::new(PriorityCache::new()))
}

fn trend_event(ticker: &str, time: f64) -> Event {
    Event::new(
        ticker,
        50.0,
        time,
        EventPayload::Trend(TrendData {
            strength: Strength::Moderate,
            score: 2.0,
            vwap_position: VwapPosition::Above,
            age_seconds: 5.0,
            volume_confirmed: false,
            volume_multiplier: 1.0,
        }),
    )
    .unwrap()
}

fn surge_event(ticker: &str, time: f64) -> Event {
    Event::new(
        ticker,
        50.0,
        time,
        EventPayload::Surge(SurgeData {
            magnitude_pct: 3.0,
            score: 40.0,
            strength: Strength::Moderate,
            trigger: SurgeTrigger::Price,
            volume_multiplier: 2.0,
            expiration_time: time + 300.0,
            daily_count: 1,
            age_seconds: 0.0,
        }),
    )
    .unwrap()
}

#[test]
fn base_priorities_follow_kind_tiers() {
    assert_eq!(base_priority(EventKind::Control), 1);
    assert_eq!(base_priority(EventKind::Tick), 1);
    assert_eq!(base_priority(EventKind::HighLow), 2);
    assert_eq!(base_priority(EventKind::Trend), 3);
    assert_eq!(base_priority(EventKind::Surge), 3);
}

#[test]
fn throttle_levels_from_utilization() {
    assert_eq!(throttle_level(0.5), 0);
    assert_eq!(throttle_level(0.905), 1);
    assert_eq!(throttle_level(0.96), 2);
    assert_eq!(throttle_level(0.99), 3);
}

// Scenario: a cache-promoted ticker overtakes an earlier plain offer.
#[test]
fn priority_cache_promotion_reorders_poll() {
    let cache = Arc::new(PriorityCache::new());
    let mut classes = HashMap::new();
    classes.insert("AAPL".to_string(), PriorityClass::Top);
    cache.replace(classes);
    let queue = queue_with_cache(1000, cache);

    let now = epoch_now();
    // ZZZZ first in insertion order; AAPL's cache promotion must win.
    assert!(queue.offer(trend_event("ZZZZ", now)));
    assert!(queue.offer(trend_event("AAPL", now)));

    let first = queue.poll(Duration::from_millis(100)).unwrap();
    let second = queue.poll(Duration::from_millis(100)).unwrap();
    assert_eq!(first.ticker, "AAPL");
    assert_eq!(second.ticker, "ZZZZ");
}

#[test]
fn same_priority_polls_in_offer_order() {
    let queue = plain_queue(1000);
    let now = epoch_now();
    for ticker in ["T1", "T2", "T3"] {
        assert!(queue.offer(trend_event(ticker, now)));
    }
    let order: Vec<String> = (0..3)
        .map(|_| queue.poll(Duration::from_millis(100)).unwrap().ticker)
        .collect();
    assert_eq!(order, vec!["T1", "T2", "T3"]);
}

// Scenario: events older than max_event_age_ms are rejected on arrival.
#[test]
fn aged_event_rejected_at_offer() {
    let config = QueueConfig {
        max_queue_size: 100,
        max_event_age_ms: 1000,
        ..QueueConfig::default()
    };
    let queue = EventQueue::new(config, Arc::new(PriorityCache::new()));

    let stale = trend_event("X", epoch_now() - 2.0);
    assert!(!queue.offer(stale));
    assert_eq!(queue.len(), 0);
    assert_eq!(queue.drop_count(DropReason::AgeExpired), 1);

    // An event right at the age boundary is still accepted.
    let config = QueueConfig {
        max_queue_size: 100,
        max_event_age_ms: 120_000,
        ..QueueConfig::default()
    };
    let queue = EventQueue::new(config, Arc::new(PriorityCache::new()));
    assert!(queue.offer(trend_event("X", epoch_now() - 119.0)));
}

// Scenario: overflow shedding spares control and surge events.
#[test]
fn overflow_drop_policy_exempts_control_and_surge() {
    let queue = plain_queue(100);
    let now = epoch_now();

    for i in 0..98 {
        assert!(queue.offer(trend_event(&format!("T{i}"), now)), "fill {i}");
    }
    assert_eq!(queue.len(), 98);

    // Next trend pushes utilization past the 0.98 threshold.
    assert!(!queue.offer(trend_event("Y", now)));
    assert_eq!(queue.drop_count(DropReason::LowPriorityOverflow), 1);

    // Surge and control are exempt from capacity-based shedding.
    assert!(queue.offer(surge_event("Z", now)));
    assert!(queue.offer(Event::control(ControlCommand::Shutdown)));
}

#[test]
fn full_queue_rejects_non_exempt_but_accepts_surge() {
    let queue = plain_queue(10);
    let now = epoch_now();
    // Surges bypass every capacity gate, so they can fill past threshold.
    for i in 0..10 {
        assert!(queue.offer(surge_event(&format!("S{i}"), now)));
    }
    assert_eq!(queue.len(), 10);

    assert!(!queue.offer(trend_event("T", now)));
    assert_eq!(queue.drop_count(DropReason::QueueFull), 1);

    // A surge may transiently exceed capacity.
    assert!(queue.offer(surge_event("EXTRA", now)));
    assert_eq!(queue.len(), 11);
    let polled = queue.poll(Duration::from_millis(100));
    assert!(polled.is_some());
    assert!(queue.len() <= 10);
}

#[test]
fn throttling_gates_non_priority_tickers_under_pressure() {
    let cache = Arc::new(PriorityCache::new());
    let mut classes = HashMap::new();
    classes.insert("AAPL".to_string(), PriorityClass::Top);
    cache.replace(classes);
    let queue = queue_with_cache(100, cache);
    let now = epoch_now();

    for i in 0..91 {
        // Priority ticker keeps flowing while we build pressure.
        assert!(queue.offer(trend_event("AAPL", now)), "fill {i}");
    }
    // 92/100 utilization: throttle level 1. AAPL passes, and the level-1
    // split either admits or rejects a plain ticker deterministically.
    assert!(queue.offer(trend_event("AAPL", now)));
    let before = queue.drop_count(DropReason::Throttled);
    let accepted = queue.offer(trend_event("ZZZZ", now));
    let after = queue.drop_count(DropReason::Throttled);
    assert_eq!(after - before, u64::from(!accepted));
}

#[test]
fn poll_expires_events_that_aged_in_queue() {
    let config = QueueConfig {
        max_queue_size: 100,
        max_event_age_ms: 50,
        ..QueueConfig::default()
    };
    let queue = EventQueue::new(config, Arc::new(PriorityCache::new()));
    assert!(queue.offer(trend_event("X", epoch_now())));

    std::thread::sleep(Duration::from_millis(80));
    assert!(queue.poll(Duration::from_millis(20)).is_none());
    assert_eq!(queue.drop_count(DropReason::AgeExpiredOnPoll), 1);
    assert_eq!(queue.len(), 0);
}

#[test]
fn poll_batch_respects_max_and_kind_filter() {
    let queue = plain_queue(1000);
    let now = epoch_now();
    for i in 0..5 {
        assert!(queue.offer(trend_event(&format!("T{i}"), now)));
    }
    assert!(queue.offer(surge_event("S", now)));

    let surges = queue.poll_batch(10, Duration::from_millis(100), Some(&[EventKind::Surge]));
    assert_eq!(surges.len(), 1);
    assert_eq!(surges[0].ticker, "S");
    // Trends were left behind in order.
    let trends = queue.poll_batch(3, Duration::from_millis(100), None);
    assert_eq!(trends.len(), 3);
    assert_eq!(trends[0].ticker, "T0");
    assert_eq!(queue.len(), 2);
}

#[test]
fn poll_batch_times_out_empty() {
    let queue = plain_queue(10);
    let start = std::time::Instant::now();
    let out = queue.poll_batch(10, Duration::from_millis(50), None);
    assert!(out.is_empty());
    assert!(start.elapsed() >= Duration::from_millis(45));
}

#[test]
fn shutdown_enqueues_tokens_and_refuses_offers() {
    let queue = plain_queue(100);
    assert!(queue.offer(trend_event("X", epoch_now())));

    queue.shutdown(2);
    assert!(queue.is_shut_down());
    assert!(!queue.offer(trend_event("Y", epoch_now())));

    // Shutdown tokens are priority 1 and overtake the queued trend.
    let first = queue.poll(Duration::from_millis(100)).unwrap();
    let second = queue.poll(Duration::from_millis(100)).unwrap();
    assert!(first.is_control());
    assert!(second.is_control());
    let third = queue.poll(Duration::from_millis(100)).unwrap();
    assert_eq!(third.ticker, "X");
}

#[test]
fn open_breaker_fails_offers_fast() {
    let queue = plain_queue(100);
    queue.trip_breaker(5);
    assert!(!queue.offer(trend_event("X", epoch_now())));
    assert_eq!(queue.drop_count(DropReason::CircuitBreaker), 1);
    let stats = queue.stats();
    assert_eq!(stats.circuit_breaker_state, "open");
    assert!(!stats.is_healthy);
}

#[test]
fn market_open_promotion_applies_to_configured_etfs_only() {
    let queue = plain_queue(100);
    assert_eq!(queue.determine_priority("SPY", EventKind::Trend, true), 1);
    assert_eq!(queue.determine_priority("SPY", EventKind::Trend, false), 3);
    assert_eq!(queue.determine_priority("AAPL", EventKind::Trend, true), 3);
}

#[test]
fn stats_and_drop_analysis_reflect_activity() {
    let queue = plain_queue(100);
    let now = epoch_now();
    for i in 0..10 {
        assert!(queue.offer(trend_event(&format!("T{i}"), now)));
    }
    let polled = queue.poll_batch(4, Duration::from_millis(100), None);
    assert_eq!(polled.len(), 4);

    let stats = queue.stats();
    assert_eq!(stats.current_size, 6);
    assert_eq!(stats.events_added, 10);
    assert_eq!(stats.events_collected, 4);
    assert_eq!(stats.high_water_mark, 9);
    assert!(stats.is_healthy);

    // Force a queue_full drop and check the recommendation surfaces.
    let tiny = plain_queue(1);
    assert!(tiny.offer(trend_event("A", now)));
    assert!(!tiny.offer(trend_event("B", now)));
    let analysis = tiny.drop_analysis();
    assert_eq!(analysis.total_drops, 1);
    assert!(analysis
        .recommendations
        .iter()
        .any(|r| r.contains("max_queue_size")));
    assert!(analysis.breakdown.contains_key("queue_full"));
}
