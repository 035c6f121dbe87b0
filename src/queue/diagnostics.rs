//! Queue drop accounting and bottleneck analysis.
//!
//! Dropped events never silently disappear in aggregate: every rejection
//! increments an exact per-reason counter, and `drop_analysis` turns the
//! counters into operator-actionable recommendations.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::events::EventKind;

const SAMPLE_WINDOW: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    InvalidType,
    AgeExpired,
    QueueFull,
    Throttled,
    LowPriorityOverflow,
    ExtremeOverflow,
    CircuitBreaker,
    AgeExpiredOnPoll,
}

impl DropReason {
    pub const ALL: [DropReason; 8] = [
        DropReason::InvalidType,
        DropReason::AgeExpired,
        DropReason::QueueFull,
        DropReason::Throttled,
        DropReason::LowPriorityOverflow,
        DropReason::ExtremeOverflow,
        DropReason::CircuitBreaker,
        DropReason::AgeExpiredOnPoll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::InvalidType => "invalid_type",
            DropReason::AgeExpired => "age_expired",
            DropReason::QueueFull => "queue_full",
            DropReason::Throttled => "throttled",
            DropReason::LowPriorityOverflow => "low_priority_overflow",
            DropReason::ExtremeOverflow => "extreme_overflow",
            DropReason::CircuitBreaker => "circuit_breaker",
            DropReason::AgeExpiredOnPoll => "age_expired_on_poll",
        }
    }

    fn index(&self) -> usize {
        Self::ALL.iter().position(|r| r == self).unwrap()
    }
}

#[derive(Default)]
pub struct QueueDiagnostics {
    total_attempts: AtomicU64,
    drops: [AtomicU64; 8],
    drops_by_kind: Mutex<HashMap<&'static str, HashMap<&'static str, u64>>>,
    event_ages_ms: Mutex<VecDeque<f64>>,
    depth_samples: Mutex<VecDeque<usize>>,
    max_depth: AtomicUsize,

    events_added: AtomicU64,
    events_collected: AtomicU64,
    high_priority_events: AtomicU64,
}

impl QueueDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) -> u64 {
        self.total_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_drop(&self, reason: DropReason, kind: EventKind) {
        self.drops[reason.index()].fetch_add(1, Ordering::Relaxed);
        let mut by_kind = self.drops_by_kind.lock();
        *by_kind
            .entry(kind.as_str())
            .or_default()
            .entry(reason.as_str())
            .or_insert(0) += 1;
    }

    pub fn record_event_age(&self, age_ms: f64) {
        let mut ages = self.event_ages_ms.lock();
        if ages.len() == SAMPLE_WINDOW {
            ages.pop_front();
        }
        ages.push_back(age_ms);
    }

    pub fn record_depth(&self, depth: usize, attempt: u64) {
        self.max_depth.fetch_max(depth, Ordering::Relaxed);
        // Sample periodically, not per offer.
        if attempt % 100 == 0 {
            let mut samples = self.depth_samples.lock();
            if samples.len() == SAMPLE_WINDOW {
                samples.pop_front();
            }
            samples.push_back(depth);
        }
    }

    pub fn record_added(&self, priority: u8) {
        self.events_added.fetch_add(1, Ordering::Relaxed);
        if priority == 1 {
            self.high_priority_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_collected(&self, n: usize) {
        self.events_collected.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn drop_count(&self, reason: DropReason) -> u64 {
        self.drops[reason.index()].load(Ordering::Relaxed)
    }

    pub fn total_drops(&self) -> u64 {
        self.drops.iter().map(|d| d.load(Ordering::Relaxed)).sum()
    }

    pub fn events_added(&self) -> u64 {
        self.events_added.load(Ordering::Relaxed)
    }

    pub fn events_collected(&self) -> u64 {
        self.events_collected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let total_attempts = self.total_attempts.load(Ordering::Relaxed);
        let total_drops = self.total_drops();
        let drops = DropReason::ALL
            .iter()
            .map(|r| (r.as_str().to_string(), self.drop_count(*r)))
            .collect();

        let avg_event_age_ms = {
            let ages = self.event_ages_ms.lock();
            if ages.is_empty() {
                0.0
            } else {
                ages.iter().sum::<f64>() / ages.len() as f64
            }
        };
        let avg_queue_depth = {
            let samples = self.depth_samples.lock();
            if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<usize>() as f64 / samples.len() as f64
            }
        };

        DiagnosticsSnapshot {
            total_attempts,
            total_drops,
            drop_rate_percent: percentage(total_drops, total_attempts),
            drops,
            drops_by_kind: self
                .drops_by_kind
                .lock()
                .iter()
                .map(|(k, v)| {
                    (
                        k.to_string(),
                        v.iter().map(|(r, c)| (r.to_string(), *c)).collect(),
                    )
                })
                .collect(),
            avg_event_age_ms,
            avg_queue_depth,
            max_depth_seen: self.max_depth.load(Ordering::Relaxed),
            events_added: self.events_added(),
            events_collected: self.events_collected(),
            high_priority_events: self.high_priority_events.load(Ordering::Relaxed),
        }
    }

    /// Turn the drop counters into operator guidance.
    pub fn drop_analysis(&self, max_queue_size: usize, max_event_age_ms: u64) -> DropAnalysis {
        let snapshot = self.snapshot();
        let mut breakdown = BTreeMap::new();
        for reason in DropReason::ALL {
            let count = self.drop_count(reason);
            if count > 0 {
                breakdown.insert(
                    reason.as_str().to_string(),
                    DropShare {
                        count,
                        percentage: percentage(count, snapshot.total_attempts),
                    },
                );
            }
        }

        let mut recommendations = Vec::new();
        let queue_full = self.drop_count(DropReason::QueueFull);
        if queue_full > 0 {
            recommendations.push(format!(
                "Queue full drops detected ({queue_full}). Consider raising max_queue_size from {max_queue_size}"
            ));
        }
        let aged =
            self.drop_count(DropReason::AgeExpired) + self.drop_count(DropReason::AgeExpiredOnPoll);
        if aged > 0 {
            recommendations.push(format!(
                "Age expired drops detected ({aged}, avg age {:.0}ms). Speed up processing or raise max_event_age_ms from {max_event_age_ms}",
                snapshot.avg_event_age_ms
            ));
        }
        let pressure = self.drop_count(DropReason::LowPriorityOverflow)
            + self.drop_count(DropReason::ExtremeOverflow)
            + self.drop_count(DropReason::Throttled);
        if pressure > 0 {
            recommendations.push(format!(
                "Overflow/throttle drops detected ({pressure}). Queue is under pressure; increase worker count or filter events upstream"
            ));
        }
        let breaker = self.drop_count(DropReason::CircuitBreaker);
        if breaker > 0 {
            recommendations.push(format!(
                "Circuit breaker drops detected ({breaker}). Inspect queue insertion latency and lock contention"
            ));
        }

        DropAnalysis {
            total_attempts: snapshot.total_attempts,
            total_drops: snapshot.total_drops,
            overall_drop_rate_percent: snapshot.drop_rate_percent,
            breakdown,
            drops_by_kind: snapshot.drops_by_kind,
            recommendations,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    pub total_attempts: u64,
    pub total_drops: u64,
    pub drop_rate_percent: f64,
    pub drops: BTreeMap<String, u64>,
    pub drops_by_kind: BTreeMap<String, BTreeMap<String, u64>>,
    pub avg_event_age_ms: f64,
    pub avg_queue_depth: f64,
    pub max_depth_seen: usize,
    pub events_added: u64,
    pub events_collected: u64,
    pub high_priority_events: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DropShare {
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DropAnalysis {
    pub total_attempts: u64,
    pub total_drops: u64,
    pub overall_drop_rate_percent: f64,
    pub breakdown: BTreeMap<String, DropShare>,
    pub drops_by_kind: BTreeMap<String, BTreeMap<String, u64>>,
    pub recommendations: Vec<String>,
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * 100.0
    }
}
