use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver};

use crate::cache::PriorityCache;
use crate::detectors::{DetectorConfig, PressureConfig, PressureTracker, TickDetector};
use crate::events::{
    epoch_now, Direction, Event, EventKind, EventPayload, HighLowData, HighLowKind, Strength,
    TickData, TrendData, VwapPosition,
};
use crate::market::StateRegistry;
use crate::queue::{EventQueue, QueueConfig};

use super::{DisplayRecord, WorkerPool, WorkerPoolConfig};

fn test_pool(
    workers: usize,
    display_capacity: usize,
) -> (Arc<EventQueue>, Arc<WorkerPool>, Receiver<DisplayRecord>) {
    let queue = Arc::new(EventQueue::new(
        QueueConfig::default(),
        Arc::new(PriorityCache::new()),
    ));
    let (tx, rx) = bounded(display_capacity);
    let pool = Arc::new(WorkerPool::new(
        WorkerPoolConfig {
            initial_size: workers,
            min_size: 1,
            max_size: 8,
            batch_size: 100,
            collection_timeout: Duration::from_millis(50),
        },
        queue.clone(),
        Arc::new(StateRegistry::new(4)),
        TickDetector::new(DetectorConfig::default()),
        Arc::new(PressureTracker::new(
            PressureConfig::default(),
            HashSet::new(),
        )),
        tx,
    ));
    (queue, pool, rx)
}

fn highlow_event(ticker: &str, price: f64) -> Event {
    Event::new(
        ticker,
        price,
        epoch_now(),
        EventPayload::HighLow(HighLowData {
            kind: HighLowKind::DayHigh,
            previous_extreme: price - 1.0,
            percent_change: 1.0,
            period_seconds: 60.0,
            count: 1,
        }),
    )
    .unwrap()
    .with_direction(Direction::Up)
}

fn trend_event(ticker: &str) -> Event {
    Event::new(
        ticker,
        50.0,
        epoch_now(),
        EventPayload::Trend(TrendData {
            strength: Strength::Strong,
            score: 2.0,
            vwap_position: VwapPosition::Above,
            age_seconds: 5.0,
            volume_confirmed: true,
            volume_multiplier: 2.0,
        }),
    )
    .unwrap()
}

fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn start_bounds_pool_size() {
    let (_queue, pool, _rx) = test_pool(2, 16);
    let result = pool.start(Some(100));
    assert!(result.success);
    assert_eq!(result.current_pool_size, 8); // clamped to max_size
    pool.stop();
}

#[test]
fn highlow_dispatch_updates_state_and_display_channel() {
    let (queue, pool, rx) = test_pool(2, 16);
    pool.start(None);

    assert!(queue.offer(highlow_event("AAPL", 101.0)));

    let record = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(record.event.ticker, "AAPL");
    assert_eq!(record.transport["kind"], "day_high");

    let health = pool.health();
    assert!(wait_for(
        || pool.health().events_processed >= 1,
        Duration::from_secs(2)
    ));
    assert_eq!(health.workers_alive, 2);
    pool.stop();
}

#[test]
fn trend_and_surge_pass_through_to_display() {
    let (queue, pool, rx) = test_pool(1, 16);
    pool.start(Some(1));

    assert!(queue.offer(trend_event("NVDA")));
    let record = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(record.transport["kind"], "trend");
    assert_eq!(record.transport["strength"], "strong");
    pool.stop();
}

#[test]
fn tick_dispatch_runs_detectors_and_requeues_synthesized_events() {
    let (queue, pool, rx) = test_pool(1, 64);
    pool.start(Some(1));

    let base = epoch_now();
    for i in 0..5 {
        let event = Event::new(
            "TSLA",
            100.0 + i as f64,
            base,
            EventPayload::Tick(TickData {
                size: 500.0,
                bid: None,
                ask: None,
            }),
        )
        .unwrap();
        assert!(queue.offer(event));
    }

    // Rising prints must synthesize at least a new-high display event.
    let record = rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(record.event.ticker, "TSLA");
    assert!(matches!(
        record.event.kind(),
        EventKind::HighLow | EventKind::Trend | EventKind::Surge
    ));
    pool.stop();
}

#[test]
fn stop_halts_dispatch() {
    let (queue, pool, _rx) = test_pool(2, 16);
    pool.start(None);
    assert!(queue.offer(trend_event("A")));
    assert!(wait_for(
        || pool.health().events_processed >= 1,
        Duration::from_secs(2)
    ));

    let result = pool.stop();
    assert!(result.success);
    assert_eq!(pool.health().workers_alive, 0);

    // The queue refuses new offers once shut down; nothing further is
    // dispatched.
    let received_before = pool.health().events_received;
    assert!(!queue.offer(trend_event("B")));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(pool.health().events_received, received_before);
}

#[test]
fn resize_scales_up_and_down_within_bounds() {
    let (_queue, pool, _rx) = test_pool(2, 16);
    pool.start(Some(2));
    assert_eq!(pool.size(), 2);

    let result = pool.resize(4);
    assert!(result.success);
    assert_eq!(pool.size(), 4);

    let result = pool.resize(2);
    assert!(result.success);
    assert!(wait_for(|| pool.size() == 2, Duration::from_secs(3)));

    // Below min clamps.
    let result = pool.resize(0);
    assert_eq!(result.current_pool_size, 1);
    pool.stop();
}

#[test]
fn full_display_channel_drops_with_counter() {
    let (queue, pool, rx) = test_pool(1, 1);
    pool.start(Some(1));

    for i in 0..10 {
        assert!(queue.offer(trend_event(&format!("T{i}"))));
    }
    assert!(wait_for(
        || pool.health().events_processed >= 10,
        Duration::from_secs(3)
    ));

    let health = pool.health();
    assert!(health.display_dropped >= 1, "display channel must shed");
    assert!(health.display_queued >= 1);
    drop(rx);
    pool.stop();
}

#[test]
fn worker_errors_do_not_kill_workers() {
    let (queue, pool, _rx) = test_pool(1, 16);
    pool.start(Some(1));

    // A burst of normal events; none of these can panic the worker even
    // if individual dispatches fail internally.
    for i in 0..20 {
        assert!(queue.offer(highlow_event(&format!("S{i}"), 10.0 + i as f64)));
    }
    assert!(wait_for(
        || pool.health().events_processed >= 20,
        Duration::from_secs(3)
    ));
    assert_eq!(pool.health().workers_alive, 1);
    assert_eq!(pool.health().events_failed, 0);
    pool.stop();
}
