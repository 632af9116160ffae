//! Pool statistics: cumulative counters plus rolling-window throughput and
//! latency tracking.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::queue::LaneDepths;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const LATENCY_SAMPLES: usize = 1024;

/// Point-in-time statistics snapshot exposed through the pool handle.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub worker_count: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    /// Queue depth per priority lane.
    pub queued: LaneDepths,
    /// Tasks currently bound to a worker (including timed-out tasks whose
    /// worker has not replied yet).
    pub active_tasks: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub timed_out_tasks: u64,
    /// Mean submit-to-completion latency over the recent sample window.
    pub avg_latency_ms: f64,
    /// Completions per minute over the rolling window.
    pub throughput_per_min: f64,
    /// Busy workers as a fraction of all workers.
    pub utilization: f64,
    pub scale_up_events: u64,
    pub scale_down_events: u64,
}

/// Rolling trackers and counters maintained on the coordinator's control
/// path. No locking: only the coordinator touches this.
#[derive(Debug)]
pub struct StatsTracker {
    window: Duration,
    recent_completions: VecDeque<Instant>,
    latency_samples: VecDeque<u64>,
    completed: u64,
    failed: u64,
    timed_out: u64,
    scale_ups: u64,
    scale_downs: u64,
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl StatsTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent_completions: VecDeque::new(),
            latency_samples: VecDeque::new(),
            completed: 0,
            failed: 0,
            timed_out: 0,
            scale_ups: 0,
            scale_downs: 0,
        }
    }

    fn prune(&mut self, now: Instant) {
        let cutoff = now.checked_sub(self.window).unwrap_or(now);
        while self
            .recent_completions
            .front()
            .is_some_and(|instant| *instant < cutoff)
        {
            self.recent_completions.pop_front();
        }
    }

    pub fn record_completion(&mut self, latency: Duration) {
        self.record_completion_at(Instant::now(), latency);
    }

    pub fn record_completion_at(&mut self, when: Instant, latency: Duration) {
        self.completed = self.completed.saturating_add(1);
        self.prune(when);
        self.recent_completions.push_back(when);
        self.latency_samples.push_back(latency.as_millis() as u64);
        while self.latency_samples.len() > LATENCY_SAMPLES {
            self.latency_samples.pop_front();
        }
    }

    pub fn record_failure(&mut self) {
        self.failed = self.failed.saturating_add(1);
    }

    pub fn record_timeout(&mut self) {
        self.timed_out = self.timed_out.saturating_add(1);
    }

    pub fn record_scale_up(&mut self) {
        self.scale_ups = self.scale_ups.saturating_add(1);
    }

    pub fn record_scale_down(&mut self) {
        self.scale_downs = self.scale_downs.saturating_add(1);
    }

    pub fn throughput_per_min(&mut self, now: Instant) -> f64 {
        self.prune(now);
        let window_secs = self.window.as_secs_f64();
        if window_secs <= 0.0 {
            return 0.0;
        }
        (self.recent_completions.len() as f64 / window_secs) * 60.0
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.latency_samples.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.latency_samples.iter().sum();
        sum as f64 / self.latency_samples.len() as f64
    }

    /// Fill in the cumulative and rolling fields of a snapshot; the caller
    /// supplies the registry- and queue-derived fields.
    pub fn populate(&mut self, stats: &mut PoolStats, now: Instant) {
        stats.completed_tasks = self.completed;
        stats.failed_tasks = self.failed;
        stats.timed_out_tasks = self.timed_out;
        stats.scale_up_events = self.scale_ups;
        stats.scale_down_events = self.scale_downs;
        stats.avg_latency_ms = self.avg_latency_ms();
        stats.throughput_per_min = self.throughput_per_min(now);
        stats.utilization = if stats.worker_count > 0 {
            stats.busy_workers as f64 / stats.worker_count as f64
        } else {
            0.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_respects_rolling_window() {
        let mut tracker = StatsTracker::new(Duration::from_secs(60));
        let base = Instant::now();

        tracker.record_completion_at(base, Duration::from_millis(10));
        tracker.record_completion_at(base + Duration::from_secs(10), Duration::from_millis(10));
        tracker.record_completion_at(base + Duration::from_secs(50), Duration::from_millis(10));
        tracker.record_completion_at(base + Duration::from_secs(70), Duration::from_millis(10));

        // At t=70 the sample at t=0 has aged out: 3 in a 60s window.
        let throughput = tracker.throughput_per_min(base + Duration::from_secs(70));
        assert!((throughput - 3.0).abs() < 0.001);
        // The cumulative counter never decreases.
        assert_eq!(tracker.completed, 4);
    }

    #[test]
    fn latency_mean_over_samples() {
        let mut tracker = StatsTracker::default();
        let base = Instant::now();
        tracker.record_completion_at(base, Duration::from_millis(10));
        tracker.record_completion_at(base, Duration::from_millis(30));
        assert!((tracker.avg_latency_ms() - 20.0).abs() < 0.001);
    }

    #[test]
    fn populate_computes_utilization() {
        let mut tracker = StatsTracker::default();
        tracker.record_scale_up();
        tracker.record_failure();

        let mut stats = PoolStats {
            worker_count: 4,
            busy_workers: 3,
            idle_workers: 1,
            ..PoolStats::default()
        };
        tracker.populate(&mut stats, Instant::now());

        assert_eq!(stats.scale_up_events, 1);
        assert_eq!(stats.failed_tasks, 1);
        assert!((stats.utilization - 0.75).abs() < 0.001);
    }

    #[test]
    fn empty_pool_has_zero_utilization() {
        let mut tracker = StatsTracker::default();
        let mut stats = PoolStats::default();
        tracker.populate(&mut stats, Instant::now());
        assert_eq!(stats.utilization, 0.0);
        assert_eq!(stats.avg_latency_ms, 0.0);
    }
}
