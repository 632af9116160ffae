//! Auto-scaling evaluation: queue depth per worker gated by host CPU load.
//!
//! Evaluation is a pure function of a [`ScaleSnapshot`] and a caller-supplied
//! `now`, so cooldown behavior is testable without waiting on wall-clock
//! time. One worker is added or removed per qualifying tick; there is no
//! bursty multi-spawn.

use std::time::Instant;

use sysinfo::System;
use tracing::debug;

use crate::config::AutoScaleConfig;

/// Source of the normalized host load (1-minute load average / cpu count).
pub trait LoadSampler: Send {
    fn normalized_load(&mut self) -> f64;
}

/// `sysinfo`-backed sampler for the real host.
#[derive(Debug, Default)]
pub struct HostLoadSampler;

impl LoadSampler for HostLoadSampler {
    fn normalized_load(&mut self) -> f64 {
        let load = System::load_average();
        let cpus = num_cpus::get().max(1) as f64;
        if load.one >= 0.0 {
            load.one / cpus
        } else {
            // Load averages are unavailable on some platforms; report zero
            // so the CPU gate never wedges scale-up there.
            0.0
        }
    }
}

/// Coordinator-derived inputs to one evaluation pass.
#[derive(Debug, Clone, Copy)]
pub struct ScaleSnapshot {
    pub queued_tasks: usize,
    pub worker_count: usize,
    pub idle_workers: usize,
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    None,
    /// Spawn exactly one worker.
    ScaleUp,
    /// Remove exactly one currently idle worker.
    ScaleDown,
}

pub struct AutoScaler {
    config: AutoScaleConfig,
    min_workers: usize,
    max_workers: usize,
    sampler: Box<dyn LoadSampler>,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
}

impl AutoScaler {
    pub fn new(
        config: AutoScaleConfig,
        min_workers: usize,
        max_workers: usize,
        sampler: Box<dyn LoadSampler>,
    ) -> Self {
        Self {
            config,
            min_workers,
            max_workers,
            sampler,
            last_scale_up: None,
            last_scale_down: None,
        }
    }

    fn cooldown_elapsed(last: Option<Instant>, cooldown: std::time::Duration, now: Instant) -> bool {
        match last {
            Some(at) => now.duration_since(at) >= cooldown,
            None => true,
        }
    }

    /// Evaluate one tick. A returned decision also starts its cooldown, so
    /// the caller is expected to apply it.
    pub fn evaluate(&mut self, snapshot: ScaleSnapshot, now: Instant) -> ScalingDecision {
        let queue_per_worker =
            snapshot.queued_tasks as f64 / snapshot.worker_count.max(1) as f64;

        if queue_per_worker > self.config.scale_up_threshold
            && snapshot.worker_count < self.max_workers
            && Self::cooldown_elapsed(self.last_scale_up, self.config.scale_up_cooldown, now)
        {
            let cpu_load = self.sampler.normalized_load();
            if cpu_load < self.config.cpu_threshold {
                debug!(
                    queue_per_worker,
                    cpu_load,
                    worker_count = snapshot.worker_count,
                    "scale-up condition met"
                );
                self.last_scale_up = Some(now);
                return ScalingDecision::ScaleUp;
            }
            debug!(cpu_load, "scale-up suppressed by host CPU pressure");
            return ScalingDecision::None;
        }

        if queue_per_worker < self.config.scale_down_threshold
            && snapshot.worker_count > self.min_workers
            && snapshot.idle_workers > 0
            && Self::cooldown_elapsed(self.last_scale_down, self.config.scale_down_cooldown, now)
        {
            debug!(
                queue_per_worker,
                worker_count = snapshot.worker_count,
                "scale-down condition met"
            );
            self.last_scale_down = Some(now);
            return ScalingDecision::ScaleDown;
        }

        ScalingDecision::None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct FixedLoad(f64);

    impl LoadSampler for FixedLoad {
        fn normalized_load(&mut self) -> f64 {
            self.0
        }
    }

    fn scaler(load: f64) -> AutoScaler {
        AutoScaler::new(
            AutoScaleConfig::default(),
            2,
            8,
            Box::new(FixedLoad(load)),
        )
    }

    #[test]
    fn scales_up_once_per_cooldown() {
        let mut scaler = scaler(0.2);
        let base = Instant::now();
        let snapshot = ScaleSnapshot {
            queued_tasks: 30,
            worker_count: 4,
            idle_workers: 0,
        };

        assert_eq!(scaler.evaluate(snapshot, base), ScalingDecision::ScaleUp);
        // Sustained pressure inside the cooldown window does nothing.
        assert_eq!(
            scaler.evaluate(snapshot, base + Duration::from_secs(2)),
            ScalingDecision::None
        );
        // One more spawn per qualifying tick once the cooldown elapses.
        assert_eq!(
            scaler.evaluate(snapshot, base + Duration::from_secs(5)),
            ScalingDecision::ScaleUp
        );
    }

    #[test]
    fn cpu_pressure_gates_scale_up() {
        let mut scaler = scaler(0.95);
        let snapshot = ScaleSnapshot {
            queued_tasks: 100,
            worker_count: 4,
            idle_workers: 0,
        };
        assert_eq!(
            scaler.evaluate(snapshot, Instant::now()),
            ScalingDecision::None
        );
    }

    #[test]
    fn respects_max_workers() {
        let mut scaler = scaler(0.1);
        let snapshot = ScaleSnapshot {
            queued_tasks: 100,
            worker_count: 8,
            idle_workers: 0,
        };
        assert_eq!(
            scaler.evaluate(snapshot, Instant::now()),
            ScalingDecision::None
        );
    }

    #[test]
    fn scales_down_idle_pool_above_minimum() {
        let mut scaler = scaler(0.1);
        let base = Instant::now();
        let snapshot = ScaleSnapshot {
            queued_tasks: 0,
            worker_count: 4,
            idle_workers: 4,
        };

        assert_eq!(scaler.evaluate(snapshot, base), ScalingDecision::ScaleDown);
        // At most one removal per scale-down cooldown window.
        assert_eq!(
            scaler.evaluate(snapshot, base + Duration::from_secs(10)),
            ScalingDecision::None
        );
        assert_eq!(
            scaler.evaluate(snapshot, base + Duration::from_secs(30)),
            ScalingDecision::ScaleDown
        );
    }

    #[test]
    fn never_scales_below_minimum_or_without_idle_workers() {
        let mut scaler = scaler(0.1);
        let at_minimum = ScaleSnapshot {
            queued_tasks: 0,
            worker_count: 2,
            idle_workers: 2,
        };
        assert_eq!(
            scaler.evaluate(at_minimum, Instant::now()),
            ScalingDecision::None
        );

        let all_busy = ScaleSnapshot {
            queued_tasks: 1,
            worker_count: 4,
            idle_workers: 0,
        };
        assert_eq!(
            scaler.evaluate(all_busy, Instant::now()),
            ScalingDecision::None
        );
    }
}
