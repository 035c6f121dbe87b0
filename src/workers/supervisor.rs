//! Dynamic worker scaling driven by sustained queue pressure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::queue::EventQueue;

use super::WorkerPool;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub check_interval: Duration,
    pub scale_up_threshold: f64,
    /// Utilization must hold above the threshold this long before
    /// scaling up.
    pub scale_up_after: Duration,
    pub scale_down_threshold: f64,
    pub scale_down_after: Duration,
    pub scale_step: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            scale_up_threshold: 0.9,
            scale_up_after: Duration::from_secs(10),
            scale_down_threshold: 0.3,
            scale_down_after: Duration::from_secs(60),
            scale_step: 0.25,
        }
    }
}

/// Pure scaling decision state, separated from the pool so the heuristic
/// is testable with synthetic readings.
#[derive(Debug, Default)]
pub struct ScalingState {
    above_since: Option<Instant>,
    below_since: Option<Instant>,
}

impl ScalingState {
    /// Feed one utilization reading; returns a new target size when a
    /// sustained condition fires.
    pub fn evaluate(
        &mut self,
        config: &SupervisorConfig,
        utilization: f64,
        current_size: usize,
        now: Instant,
    ) -> Option<usize> {
        if utilization > config.scale_up_threshold {
            self.below_since = None;
            let since = *self.above_since.get_or_insert(now);
            if now.duration_since(since) >= config.scale_up_after {
                self.above_since = None;
                let target = ((current_size as f64) * (1.0 + config.scale_step)).ceil() as usize;
                return Some(target.max(current_size + 1));
            }
        } else if utilization < config.scale_down_threshold {
            self.above_since = None;
            let since = *self.below_since.get_or_insert(now);
            if now.duration_since(since) >= config.scale_down_after {
                self.below_since = None;
                let target = ((current_size as f64) * (1.0 - config.scale_step)).floor() as usize;
                return Some(target.min(current_size.saturating_sub(1)));
            }
        } else {
            self.above_since = None;
            self.below_since = None;
        }
        None
    }
}

pub struct Supervisor {
    pool: Arc<WorkerPool>,
    queue: Arc<EventQueue>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(pool: Arc<WorkerPool>, queue: Arc<EventQueue>, config: SupervisorConfig) -> Self {
        Self {
            pool,
            queue,
            config,
        }
    }

    /// Run until `shutdown` flips. Blocking; callers give it a thread.
    pub fn run(self, shutdown: Arc<AtomicBool>) {
        let mut state = ScalingState::default();
        info!(
            up_threshold = self.config.scale_up_threshold,
            down_threshold = self.config.scale_down_threshold,
            "worker supervisor running"
        );
        while !shutdown.load(Ordering::Acquire) {
            std::thread::sleep(self.config.check_interval);
            let utilization = self.queue.utilization();
            let current = self.pool.size();
            if current == 0 {
                continue;
            }
            if let Some(target) =
                state.evaluate(&self.config, utilization, current, Instant::now())
            {
                info!(
                    utilization = format!("{:.2}", utilization),
                    current, target, "supervisor resizing worker pool"
                );
                let result = self.pool.resize(target);
                debug!(new_size = result.current_pool_size, "resize applied");
            }
        }
        debug!("worker supervisor stopped");
    }

    pub fn spawn(self, shutdown: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("worker-supervisor".into())
            .spawn(move || self.run(shutdown))
            .expect("spawn supervisor thread")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            check_interval: Duration::from_millis(10),
            scale_up_threshold: 0.9,
            scale_up_after: Duration::from_secs(10),
            scale_down_threshold: 0.3,
            scale_down_after: Duration::from_secs(60),
            scale_step: 0.25,
        }
    }

    #[test]
    fn sustained_pressure_scales_up_by_a_quarter() {
        let config = config();
        let mut state = ScalingState::default();
        let t0 = Instant::now();

        assert_eq!(state.evaluate(&config, 0.95, 12, t0), None);
        // Still inside the sustain window.
        assert_eq!(
            state.evaluate(&config, 0.95, 12, t0 + Duration::from_secs(5)),
            None
        );
        assert_eq!(
            state.evaluate(&config, 0.95, 12, t0 + Duration::from_secs(10)),
            Some(15)
        );
    }

    #[test]
    fn sustained_idle_scales_down_by_a_quarter() {
        let config = config();
        let mut state = ScalingState::default();
        let t0 = Instant::now();

        assert_eq!(state.evaluate(&config, 0.1, 16, t0), None);
        assert_eq!(
            state.evaluate(&config, 0.1, 16, t0 + Duration::from_secs(60)),
            Some(12)
        );
    }

    #[test]
    fn recovery_resets_the_sustain_timer() {
        let config = config();
        let mut state = ScalingState::default();
        let t0 = Instant::now();

        assert_eq!(state.evaluate(&config, 0.95, 12, t0), None);
        // Pressure relaxes; timer must restart.
        assert_eq!(
            state.evaluate(&config, 0.5, 12, t0 + Duration::from_secs(5)),
            None
        );
        assert_eq!(
            state.evaluate(&config, 0.95, 12, t0 + Duration::from_secs(12)),
            None
        );
        assert_eq!(
            state.evaluate(&config, 0.95, 12, t0 + Duration::from_secs(22)),
            Some(15)
        );
    }
}
