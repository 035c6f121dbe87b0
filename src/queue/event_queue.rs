//! The bounded, priority-ordered event queue shared by detectors and the
//! worker pool.
//!
//! Ordering is strictly `(priority asc, insertion order asc)`. Admission
//! control runs entirely on the producer side so `offer` never blocks the
//! ingestion path; the only lock it takes is the short heap critical
//! section guarded by the circuit breaker.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{PriorityCache, PriorityClass};
use crate::events::{epoch_now, ControlCommand, Event, EventKind};
use crate::market::session::is_market_open_period_now;

use super::breaker::CircuitBreaker;
use super::diagnostics::{DropAnalysis, DiagnosticsSnapshot, DropReason, QueueDiagnostics};

/// How long `offer` will wait for the heap lock before treating the
/// insertion as failed and feeding the circuit breaker.
const INSERT_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_queue_size: usize,
    /// Utilization fraction above which low-priority events are shed.
    pub overflow_drop_threshold: f64,
    pub max_event_age_ms: u64,
    pub event_batch_size: usize,
    pub circuit_breaker_fail_max: u32,
    pub circuit_breaker_timeout: Duration,
    /// ETFs promoted to top priority during the market-open window.
    pub market_open_tickers: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100_000,
            overflow_drop_threshold: 0.98,
            max_event_age_ms: 120_000,
            event_batch_size: 1000,
            circuit_breaker_fail_max: 5,
            circuit_breaker_timeout: Duration::from_secs(30),
            market_open_tickers: ["SPY", "QQQ", "IWM", "DIA"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

struct QueuedEvent {
    event: Event,
    priority: u8,
    seq: u64,
    enqueued_at: Instant,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

pub struct EventQueue {
    config: QueueConfig,
    market_open_tickers: HashSet<String>,
    heap: Mutex<BinaryHeap<Reverse<QueuedEvent>>>,
    not_empty: Condvar,
    depth: AtomicUsize,
    seq: AtomicU64,
    shutdown: AtomicBool,
    breaker: CircuitBreaker,
    diagnostics: QueueDiagnostics,
    high_water: AtomicUsize,
    cache: Arc<PriorityCache>,
}

impl EventQueue {
    pub fn new(config: QueueConfig, cache: Arc<PriorityCache>) -> Self {
        debug!(
            max_size = config.max_queue_size,
            overflow_threshold = config.overflow_drop_threshold,
            max_age_ms = config.max_event_age_ms,
            "event queue initialized"
        );
        let market_open_tickers = config.market_open_tickers.iter().cloned().collect();
        Self {
            market_open_tickers,
            heap: Mutex::new(BinaryHeap::with_capacity(config.max_queue_size / 16)),
            not_empty: Condvar::new(),
            depth: AtomicUsize::new(0),
            seq: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            breaker: CircuitBreaker::new(
                config.circuit_breaker_fail_max,
                config.circuit_breaker_timeout,
            ),
            diagnostics: QueueDiagnostics::new(),
            high_water: AtomicUsize::new(0),
            cache,
            config,
        }
    }

    /// Non-blocking admission. Returns whether the event was accepted;
    /// rejects are accounted by reason and never propagate.
    pub fn offer(&self, event: Event) -> bool {
        let attempt = self.diagnostics.record_attempt();
        let kind = event.kind();

        // Control tokens stay valid after shutdown so workers can hand
        // sibling shutdown tokens back; everything else is refused.
        if self.shutdown.load(Ordering::Acquire) && kind != EventKind::Control {
            self.diagnostics.record_drop(DropReason::InvalidType, kind);
            debug!(ticker = %event.ticker, "queue shut down, rejecting event");
            return false;
        }

        // Age gate first: a stale event is useless no matter the pressure.
        if event.time > 0.0 {
            let age_ms = event.age_seconds(epoch_now()) * 1000.0;
            self.diagnostics.record_event_age(age_ms);
            if age_ms > self.config.max_event_age_ms as f64 {
                warn!(
                    ticker = %event.ticker,
                    kind = kind.as_str(),
                    age_ms = age_ms as u64,
                    "dropping aged event on arrival"
                );
                self.diagnostics.record_drop(DropReason::AgeExpired, kind);
                return false;
            }
        }

        let priority = self.determine_priority(&event.ticker, kind, is_market_open_period_now());
        let size = self.depth.load(Ordering::Relaxed);
        self.diagnostics.record_depth(size, attempt);
        if size > self.high_water.fetch_max(size, Ordering::Relaxed) {
            if size > (self.config.max_queue_size * 4) / 5 {
                warn!(
                    size,
                    capacity = self.config.max_queue_size,
                    "queue approaching capacity"
                );
            }
        }

        // Control and surge events are never shed for capacity.
        let exempt = matches!(kind, EventKind::Control | EventKind::Surge);
        // Utilization counts the incoming event: admitting it is what
        // moves the queue to size + 1.
        let utilization = (size + 1) as f64 / self.config.max_queue_size as f64;

        if !exempt {
            if size >= self.config.max_queue_size {
                self.diagnostics.record_drop(DropReason::QueueFull, kind);
                return false;
            }

            let throttle_level = throttle_level(utilization);
            if throttle_level > 0 && !self.cache.should_process(&event.ticker, throttle_level) {
                self.diagnostics.record_drop(DropReason::Throttled, kind);
                return false;
            }

            if utilization > self.config.overflow_drop_threshold && priority > 2 {
                self.diagnostics
                    .record_drop(DropReason::LowPriorityOverflow, kind);
                return false;
            }
            if utilization > 0.98 && priority > 1 {
                self.diagnostics
                    .record_drop(DropReason::ExtremeOverflow, kind);
                return false;
            }
        }

        if !self.breaker.allow() {
            self.diagnostics
                .record_drop(DropReason::CircuitBreaker, kind);
            return false;
        }

        match self.heap.try_lock_for(INSERT_LOCK_TIMEOUT) {
            Some(mut heap) => {
                self.push_locked(&mut heap, event, priority);
                drop(heap);
                self.breaker.record_success();
                self.not_empty.notify_one();
                self.diagnostics.record_added(priority);
                let added = self.diagnostics.events_added();
                if added % 10_000 == 0 {
                    let snapshot = self.diagnostics.snapshot();
                    debug!(
                        added,
                        collected = snapshot.events_collected,
                        dropped = snapshot.total_drops,
                        depth = self.len(),
                        high_priority = snapshot.high_priority_events,
                        "queue flow summary"
                    );
                }
                true
            }
            None => {
                // Insertion path is wedged; count it against the breaker.
                self.breaker.record_failure();
                self.diagnostics
                    .record_drop(DropReason::CircuitBreaker, kind);
                warn!(ticker = %event.ticker, "queue insert lock timeout");
                false
            }
        }
    }

    fn push_locked(
        &self,
        heap: &mut BinaryHeap<Reverse<QueuedEvent>>,
        event: Event,
        priority: u8,
    ) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        heap.push(Reverse(QueuedEvent {
            event,
            priority,
            seq,
            enqueued_at: Instant::now(),
        }));
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Blocking dequeue; `None` on timeout. Envelopes that aged past the
    /// limit while queued are discarded and polling continues.
    pub fn poll(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        let mut heap = self.heap.lock();
        loop {
            while let Some(Reverse(queued)) = heap.pop() {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                if self.expired_in_queue(&queued) {
                    continue;
                }
                self.diagnostics.record_collected(1);
                return Some(queued.event);
            }
            if Instant::now() >= deadline {
                return None;
            }
            self.not_empty.wait_until(&mut heap, deadline);
            if heap.is_empty() && Instant::now() >= deadline {
                return None;
            }
        }
    }

    /// Collect up to `max` events, waiting at most `timeout` for the
    /// first one. With a kind filter, non-matching envelopes are left in
    /// the queue in their original order.
    pub fn poll_batch(
        &self,
        max: usize,
        timeout: Duration,
        kinds: Option<&[EventKind]>,
    ) -> Vec<Event> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        let mut skipped: Vec<QueuedEvent> = Vec::new();
        let mut heap = self.heap.lock();

        loop {
            while out.len() < max {
                let Some(Reverse(queued)) = heap.pop() else {
                    break;
                };
                self.depth.fetch_sub(1, Ordering::Relaxed);
                if self.expired_in_queue(&queued) {
                    continue;
                }
                if let Some(kinds) = kinds {
                    if !kinds.contains(&queued.event.kind()) {
                        skipped.push(queued);
                        continue;
                    }
                }
                out.push(queued.event);
            }
            if !out.is_empty() || Instant::now() >= deadline {
                break;
            }
            self.not_empty.wait_until(&mut heap, deadline);
            if heap.is_empty() && Instant::now() >= deadline {
                break;
            }
        }

        for queued in skipped {
            heap.push(Reverse(queued));
            self.depth.fetch_add(1, Ordering::Relaxed);
        }
        self.diagnostics.record_collected(out.len());
        out
    }

    fn expired_in_queue(&self, queued: &QueuedEvent) -> bool {
        let aged = queued.enqueued_at.elapsed().as_millis() as u64 > self.config.max_event_age_ms;
        if aged {
            debug!(
                ticker = %queued.event.ticker,
                kind = queued.event.kind().as_str(),
                "dropping aged event on poll"
            );
            self.diagnostics
                .record_drop(DropReason::AgeExpiredOnPoll, queued.event.kind());
        }
        aged
    }

    /// Graceful shutdown: one priority-1 shutdown token per worker, then
    /// refuse all further offers.
    pub fn shutdown(&self, workers: usize) {
        {
            let mut heap = self.heap.lock();
            for _ in 0..workers {
                self.push_locked(&mut heap, Event::control(ControlCommand::Shutdown), 1);
            }
        }
        self.shutdown.store(true, Ordering::Release);
        self.not_empty.notify_all();
        debug!(workers, "queue shutdown initiated");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.config.max_queue_size
    }

    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.config.max_queue_size as f64
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    pub fn batch_size(&self) -> usize {
        self.config.event_batch_size
    }

    /// Effective priority at offer time. Promotions only ever raise
    /// priority (numerically lower); the result is the min of base and
    /// every applicable promotion.
    pub fn determine_priority(&self, ticker: &str, kind: EventKind, market_open: bool) -> u8 {
        let base = base_priority(kind);
        if market_open && self.market_open_tickers.contains(ticker) {
            return 1;
        }
        match self.cache.classify(ticker) {
            Some(PriorityClass::Top) => 1,
            Some(PriorityClass::Secondary) => base.min(2),
            None => base,
        }
    }

    pub fn stats(&self) -> QueueStatus {
        let size = self.len();
        let added = self.diagnostics.events_added();
        let collected = self.diagnostics.events_collected();
        QueueStatus {
            current_size: size,
            max_size: self.config.max_queue_size,
            utilization_percent: (size as f64 / self.config.max_queue_size as f64) * 100.0,
            high_water_mark: self.high_water_mark(),
            circuit_breaker_state: self.breaker.state().as_str().to_string(),
            circuit_breaker_trips: self.breaker.trip_count(),
            is_healthy: self.is_healthy(),
            events_added: added,
            events_collected: collected,
            efficiency_percent: if added > 0 {
                (collected as f64 / added as f64) * 100.0
            } else {
                0.0
            },
            diagnostics: self.diagnostics.snapshot(),
        }
    }

    pub fn drop_analysis(&self) -> DropAnalysis {
        self.diagnostics
            .drop_analysis(self.config.max_queue_size, self.config.max_event_age_ms)
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn drop_count(&self, reason: DropReason) -> u64 {
        self.diagnostics.drop_count(reason)
    }

    #[cfg(test)]
    pub(crate) fn trip_breaker(&self, failures: u32) {
        for _ in 0..failures {
            self.breaker.record_failure();
        }
    }

    fn is_healthy(&self) -> bool {
        if self.breaker.state() != super::breaker::BreakerState::Closed {
            return false;
        }
        if self.len() > (self.config.max_queue_size * 9) / 10 {
            return false;
        }
        let added = self.diagnostics.events_added();
        if added > 0 {
            let drop_rate = self.diagnostics.total_drops() as f64
                / (added + self.diagnostics.total_drops()) as f64;
            if drop_rate > 0.1 {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub current_size: usize,
    pub max_size: usize,
    pub utilization_percent: f64,
    pub high_water_mark: usize,
    pub circuit_breaker_state: String,
    pub circuit_breaker_trips: u64,
    pub is_healthy: bool,
    pub events_added: u64,
    pub events_collected: u64,
    pub efficiency_percent: f64,
    pub diagnostics: DiagnosticsSnapshot,
}

/// Base priority by event kind; unknown kinds sit at the bottom tier.
pub fn base_priority(kind: EventKind) -> u8 {
    match kind {
        EventKind::Control | EventKind::Tick => 1,
        EventKind::HighLow => 2,
        EventKind::Trend | EventKind::Surge => 3,
        EventKind::Aggregate | EventKind::Fmv => 4,
    }
}

/// Throttle level from queue utilization: 0 none, 1 mild, 2 moderate,
/// 3 severe.
pub fn throttle_level(utilization: f64) -> u8 {
    if utilization > 0.98 {
        3
    } else if utilization > 0.95 {
        2
    } else if utilization > 0.90 {
        1
    } else {
        0
    }
}
