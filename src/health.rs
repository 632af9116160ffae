//! Stuck-worker detection.
//!
//! This is a liveness heuristic, not a request/response ping: a worker that
//! has been continuously busy past the threshold without reporting a
//! completion is presumed wedged and replaced. False positives on
//! legitimately slow tasks are accepted in preference to stalling the pool
//! on a hung worker; the threshold is configurable policy.

use std::time::{Duration, Instant};

use crate::config::HealthCheckConfig;

pub struct HealthMonitor {
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(config: HealthCheckConfig) -> Self {
        Self { config }
    }

    /// A busy worker is stuck once its health timestamp is older than twice
    /// the configured timeout. Idle workers are never stuck.
    pub fn stuck_threshold(&self) -> Duration {
        self.config.timeout * 2
    }

    pub fn is_stuck(&self, busy: bool, last_health_check: Instant, now: Instant) -> bool {
        busy && now.duration_since(last_health_check) > self.stuck_threshold()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(timeout: Duration) -> HealthMonitor {
        HealthMonitor::new(HealthCheckConfig {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout,
        })
    }

    #[test]
    fn idle_worker_is_never_stuck() {
        let monitor = monitor(Duration::from_secs(1));
        let long_ago = Instant::now() - Duration::from_secs(3600);
        assert!(!monitor.is_stuck(false, long_ago, Instant::now()));
    }

    #[test]
    fn busy_worker_is_stuck_past_twice_the_timeout() {
        let monitor = monitor(Duration::from_secs(10));
        let now = Instant::now();

        assert!(!monitor.is_stuck(true, now - Duration::from_secs(15), now));
        assert!(!monitor.is_stuck(true, now - Duration::from_secs(20), now));
        assert!(monitor.is_stuck(true, now - Duration::from_secs(21), now));
    }
}
