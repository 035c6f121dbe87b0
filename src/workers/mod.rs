//! Worker pool draining the priority queue.
//!
//! Workers are dedicated OS threads: they block on `poll_batch`, dispatch
//! each event by kind, and re-queue display-bound events onto the bounded
//! display channel. Dispatch failures are counted and never kill a
//! worker; shutdown is driven purely by priority-1 control tokens in the
//! event stream.

pub mod supervisor;

#[cfg(test)]
mod worker_tests;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::detectors::{PressureTracker, TickDetector};
use crate::events::{ControlCommand, Event, EventKind, EventPayload};
use crate::market::StateRegistry;
use crate::queue::EventQueue;

pub use supervisor::{Supervisor, SupervisorConfig};

/// Transport-encoded event headed for frontend fan-out. The typed event
/// rides along so per-subscriber filters can run off the hot path.
#[derive(Debug, Clone)]
pub struct DisplayRecord {
    pub event: Event,
    pub transport: Value,
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub initial_size: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub batch_size: usize,
    pub collection_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 12,
            min_size: 8,
            max_size: 16,
            batch_size: 500,
            collection_timeout: Duration::from_millis(500),
        }
    }
}

const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
pub struct PoolStats {
    pub events_received: AtomicU64,
    pub events_processed: AtomicU64,
    pub events_failed: AtomicU64,
    pub display_queued: AtomicU64,
    pub display_dropped: AtomicU64,
    pub active_workers: AtomicUsize,
}

/// Result of a pool lifecycle operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolOpResult {
    pub success: bool,
    pub workers_affected: usize,
    pub current_pool_size: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub workers_total: usize,
    pub workers_alive: usize,
    pub events_received: u64,
    pub events_processed: u64,
    pub events_failed: u64,
    pub display_queued: u64,
    pub display_dropped: u64,
    pub queue_size: usize,
    pub queue_utilization_percent: f64,
}

struct Shared {
    queue: Arc<EventQueue>,
    states: Arc<StateRegistry>,
    detector: TickDetector,
    pressure: Arc<PressureTracker>,
    display_tx: Sender<DisplayRecord>,
    stats: PoolStats,
    config: WorkerPoolConfig,
}

struct WorkerHandle {
    id: usize,
    handle: JoinHandle<()>,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<WorkerHandle>>,
    next_id: AtomicUsize,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<EventQueue>,
        states: Arc<StateRegistry>,
        detector: TickDetector,
        pressure: Arc<PressureTracker>,
        display_tx: Sender<DisplayRecord>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                states,
                detector,
                pressure,
                display_tx,
                stats: PoolStats::default(),
                config,
            }),
            workers: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Spawn workers, bounded to `[min_size, max_size]`. An existing pool
    /// is stopped first.
    pub fn start(&self, n: Option<usize>) -> PoolOpResult {
        let mut result = PoolOpResult::default();
        let n = n.unwrap_or(self.shared.config.initial_size);
        let n = n.clamp(self.shared.config.min_size, self.shared.config.max_size);

        if !self.workers.lock().is_empty() {
            warn!("workers already running, stopping them first");
            result.warnings.push("restarted existing workers".into());
            self.stop();
        }

        let mut workers = self.workers.lock();
        for _ in 0..n {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let shared = self.shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("event-worker-{id}"))
                .spawn(move || run_worker(shared, id))
                .expect("spawn worker thread");
            workers.push(WorkerHandle { id, handle });
        }
        self.shared
            .stats
            .active_workers
            .store(workers.len(), Ordering::Relaxed);

        info!(workers = workers.len(), "worker pool started");
        result.success = true;
        result.workers_affected = n;
        result.current_pool_size = workers.len();
        result
    }

    /// Enqueue one shutdown token per worker and join each with a
    /// 2-second timeout. Workers that fail to stop are logged and
    /// abandoned.
    pub fn stop(&self) -> PoolOpResult {
        let mut result = PoolOpResult::default();
        let mut workers = self.workers.lock();
        let n = workers.len();
        if n == 0 {
            result.success = true;
            return result;
        }

        self.shared.queue.shutdown(n);

        let deadline = Instant::now() + JOIN_TIMEOUT;
        for worker in workers.drain(..) {
            if join_until(&worker.handle, deadline) {
                let _ = worker.handle.join();
                result.workers_affected += 1;
            } else {
                warn!(worker_id = worker.id, "worker failed to stop gracefully");
                result
                    .warnings
                    .push(format!("worker {} failed to stop", worker.id));
            }
        }
        self.shared.stats.active_workers.store(0, Ordering::Relaxed);

        info!(stopped = result.workers_affected, "worker pool stopped");
        result.success = true;
        result.current_pool_size = 0;
        result
    }

    /// Scale to `target`: spawn new workers upward, or enqueue shutdown
    /// tokens and reap terminated workers downward. Bounds are enforced.
    pub fn resize(&self, target: usize) -> PoolOpResult {
        let mut result = PoolOpResult::default();
        let target = target.clamp(self.shared.config.min_size, self.shared.config.max_size);
        let mut workers = self.workers.lock();
        let current = workers.len();

        if target == current {
            result.success = true;
            result.current_pool_size = current;
            result
                .warnings
                .push(format!("worker pool already at target size {target}"));
            return result;
        }

        if target > current {
            info!(current, target, "scaling worker pool up");
            for _ in current..target {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let shared = self.shared.clone();
                let handle = std::thread::Builder::new()
                    .name(format!("event-worker-{id}"))
                    .spawn(move || run_worker(shared, id))
                    .expect("spawn worker thread");
                workers.push(WorkerHandle { id, handle });
                result.workers_affected += 1;
            }
        } else {
            let to_remove = current - target;
            info!(current, target, "scaling worker pool down");
            for _ in 0..to_remove {
                self.shared
                    .queue
                    .offer(Event::control(ControlCommand::Shutdown));
            }
            // Reap whichever workers picked up the tokens.
            let deadline = Instant::now() + JOIN_TIMEOUT;
            let mut reaped = 0;
            while reaped < to_remove && Instant::now() < deadline {
                let mut i = 0;
                while i < workers.len() {
                    if workers[i].handle.is_finished() {
                        let worker = workers.remove(i);
                        let _ = worker.handle.join();
                        reaped += 1;
                    } else {
                        i += 1;
                    }
                }
                if reaped < to_remove {
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
            result.workers_affected = reaped;
            if reaped < to_remove {
                result
                    .warnings
                    .push(format!("only {reaped}/{to_remove} workers stopped in time"));
            }
        }

        self.shared
            .stats
            .active_workers
            .store(workers.len(), Ordering::Relaxed);
        result.success = true;
        result.current_pool_size = workers.len();
        result
    }

    pub fn health(&self) -> PoolHealth {
        let workers = self.workers.lock();
        let alive = workers.iter().filter(|w| !w.handle.is_finished()).count();
        let stats = &self.shared.stats;
        PoolHealth {
            workers_total: workers.len(),
            workers_alive: alive,
            events_received: stats.events_received.load(Ordering::Relaxed),
            events_processed: stats.events_processed.load(Ordering::Relaxed),
            events_failed: stats.events_failed.load(Ordering::Relaxed),
            display_queued: stats.display_queued.load(Ordering::Relaxed),
            display_dropped: stats.display_dropped.load(Ordering::Relaxed),
            queue_size: self.shared.queue.len(),
            queue_utilization_percent: self.shared.queue.utilization() * 100.0,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.shared.config
    }
}

/// `JoinHandle` has no timed join; poll `is_finished` until the deadline.
fn join_until(handle: &JoinHandle<()>, deadline: Instant) -> bool {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    true
}

fn run_worker(shared: Arc<Shared>, worker_id: usize) {
    debug!(worker_id, "worker started");
    let mut consecutive_empty: u32 = 0;

    loop {
        let events = shared.queue.poll_batch(
            shared.config.batch_size,
            shared.config.collection_timeout,
            None,
        );

        if events.is_empty() {
            if shared.queue.is_shut_down() {
                debug!(worker_id, "queue shut down and drained, worker exiting");
                return;
            }
            consecutive_empty += 1;
            std::thread::sleep(backoff(consecutive_empty));
            continue;
        }
        consecutive_empty = 0;

        let mut events = events.into_iter();
        while let Some(event) = events.next() {
            shared.stats.events_received.fetch_add(1, Ordering::Relaxed);
            match dispatch(&shared, worker_id, &event) {
                Ok(Flow::Shutdown) => {
                    debug!(worker_id, "worker received shutdown token");
                    // The rest of the batch (possibly more shutdown
                    // tokens for sibling workers) goes back on the queue.
                    for rest in events {
                        shared.queue.offer(rest);
                    }
                    return;
                }
                Ok(Flow::Continue) => {
                    shared
                        .stats
                        .events_processed
                        .fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    // Dispatch failures must not kill the worker.
                    warn!(worker_id, ticker = %event.ticker, error = %e, "event dispatch failed");
                    shared.stats.events_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Progressive back-off for empty polls.
fn backoff(consecutive_empty: u32) -> Duration {
    match consecutive_empty {
        0..=9 => Duration::from_millis(10),
        10..=49 => Duration::from_millis(50),
        50..=99 => Duration::from_millis(100),
        _ => Duration::from_millis(500),
    }
}

enum Flow {
    Continue,
    Shutdown,
}

fn dispatch(shared: &Shared, worker_id: usize, event: &Event) -> anyhow::Result<Flow> {
    match &event.payload {
        EventPayload::Control(data) => {
            if data.command == ControlCommand::Shutdown {
                return Ok(Flow::Shutdown);
            }
            debug!(worker_id, command = data.command.as_str(), "control event");
        }
        EventPayload::Tick(data) => {
            // Ticks drive the detectors; synthesized events go back
            // through the queue so prioritization applies to them too.
            let synthesized = shared.states.with_state(&event.ticker, |state| {
                shared
                    .detector
                    .process_tick(state, event.price, data.size, event.time)
            });
            shared
                .pressure
                .process_tick(&event.ticker, event.price, data.size, event.time);
            for out in synthesized {
                shared.queue.offer(out);
            }
        }
        EventPayload::HighLow(data) => {
            let is_high = data.kind.is_high();
            shared.states.with_state(&event.ticker, |state| {
                state.note_event(EventKind::HighLow, is_high, event.time);
                // Refresh extremes; max/min keeps this idempotent.
                if is_high {
                    state.day_high = state.day_high.max(event.price);
                    state.session_high = state.session_high.max(event.price);
                } else {
                    state.day_low = state.day_low.min(event.price);
                    state.session_low = state.session_low.min(event.price);
                }
            });
            shared.states.mark_changed(&event.ticker);
        }
        // Trends and surges flow straight to the frontend.
        EventPayload::Trend(_) | EventPayload::Surge(_) => {}
        EventPayload::Aggregate(data) => {
            let minute_volume = data.minute_volume;
            shared.states.with_state(&event.ticker, |state| {
                state.apply_tick(event.price, minute_volume, event.time);
            });
        }
        EventPayload::Fmv(_) => {}
    }

    if event.is_display() {
        requeue_for_display(shared, event);
    }
    Ok(Flow::Continue)
}

fn requeue_for_display(shared: &Shared, event: &Event) {
    let record = DisplayRecord {
        event: event.clone(),
        transport: Value::Object(event.to_transport()),
    };
    match shared.display_tx.try_send(record) {
        Ok(()) => {
            shared.stats.display_queued.fetch_add(1, Ordering::Relaxed);
        }
        Err(TrySendError::Full(_)) => {
            shared.stats.display_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(ticker = %event.ticker, kind = event.kind_label(), "display channel full, dropping");
        }
        Err(TrySendError::Disconnected(_)) => {
            shared.stats.display_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
