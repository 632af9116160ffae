//! Pool configuration with environment-variable loading.
//!
//! Uses the following environment variables (all optional):
//! - `BELAY_MIN_WORKERS`: Minimum worker count (default: max(2, num_cpus / 2))
//! - `BELAY_MAX_WORKERS`: Maximum worker count (default: num_cpus * 2)
//! - `BELAY_MAX_QUEUE_SIZE`: Total queued task limit across lanes (default: 1000)
//! - `BELAY_TASK_TIMEOUT_MS`: Per-task timeout (default: 30000)
//! - `BELAY_AUTOSCALE_ENABLED`: Enable auto-scaling (default: true)
//! - `BELAY_SCALE_UP_THRESHOLD`: Queued tasks per worker to scale up (default: 5.0)
//! - `BELAY_SCALE_DOWN_THRESHOLD`: Queued tasks per worker to scale down (default: 0.5)
//! - `BELAY_SCALE_UP_COOLDOWN_MS`: Minimum gap between scale-ups (default: 5000)
//! - `BELAY_SCALE_DOWN_COOLDOWN_MS`: Minimum gap between scale-downs (default: 30000)
//! - `BELAY_CPU_THRESHOLD`: Normalized load average gate for scale-up (default: 0.8)
//! - `BELAY_AUTOSCALE_INTERVAL_MS`: Auto-scaler tick (default: 1000)
//! - `BELAY_HEALTH_ENABLED`: Enable the health monitor (default: true)
//! - `BELAY_HEALTH_INTERVAL_MS`: Health monitor tick (default: 30000)
//! - `BELAY_HEALTH_TIMEOUT_MS`: Stuck threshold is 2x this value (default: 60000)

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PoolError;

/// Auto-scaler thresholds and cooldowns.
///
/// Cooldowns are asymmetric on purpose: scale up quickly under bursty
/// arrival, scale down slowly to avoid thrashing.
#[derive(Debug, Clone)]
pub struct AutoScaleConfig {
    pub enabled: bool,
    /// Queued tasks per worker above which the pool grows.
    pub scale_up_threshold: f64,
    /// Queued tasks per worker below which the pool shrinks.
    pub scale_down_threshold: f64,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
    /// Normalized 1-minute load average (load / cpus) above which scale-up
    /// is suppressed; growing into host contention does not help throughput.
    pub cpu_threshold: f64,
    /// Evaluation interval.
    pub interval: Duration,
}

impl Default for AutoScaleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scale_up_threshold: 5.0,
            scale_down_threshold: 0.5,
            scale_up_cooldown: Duration::from_secs(5),
            scale_down_cooldown: Duration::from_secs(30),
            cpu_threshold: 0.8,
            interval: Duration::from_secs(1),
        }
    }
}

/// Health monitor interval and stuck threshold.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// A busy worker whose health timestamp is older than `2 * timeout` is
    /// declared stuck and replaced. Policy, not load-bearing correctness.
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Pool configuration, immutable after construction.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Total queued task limit across all three lanes.
    pub max_queue_size: usize,
    pub task_timeout: Duration,
    pub autoscale: AutoScaleConfig,
    pub health: HealthCheckConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            min_workers: (cpus / 2).max(2),
            max_workers: (cpus * 2).max(2),
            max_queue_size: 1000,
            task_timeout: Duration::from_secs(30),
            autoscale: AutoScaleConfig::default(),
            health: HealthCheckConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_ms(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

impl PoolConfig {
    /// Load configuration from environment variables.
    ///
    /// Loads `.env` if present, then applies `BELAY_*` overrides on top of
    /// the defaults.
    pub fn from_env() -> Result<Self, PoolError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Some(min) = env_parse("BELAY_MIN_WORKERS") {
            config.min_workers = min;
        }
        if let Some(max) = env_parse("BELAY_MAX_WORKERS") {
            config.max_workers = max;
        }
        if let Some(size) = env_parse("BELAY_MAX_QUEUE_SIZE") {
            config.max_queue_size = size;
        }
        if let Some(timeout) = env_ms("BELAY_TASK_TIMEOUT_MS") {
            config.task_timeout = timeout;
        }

        if let Some(enabled) = env_parse("BELAY_AUTOSCALE_ENABLED") {
            config.autoscale.enabled = enabled;
        }
        if let Some(threshold) = env_parse("BELAY_SCALE_UP_THRESHOLD") {
            config.autoscale.scale_up_threshold = threshold;
        }
        if let Some(threshold) = env_parse("BELAY_SCALE_DOWN_THRESHOLD") {
            config.autoscale.scale_down_threshold = threshold;
        }
        if let Some(cooldown) = env_ms("BELAY_SCALE_UP_COOLDOWN_MS") {
            config.autoscale.scale_up_cooldown = cooldown;
        }
        if let Some(cooldown) = env_ms("BELAY_SCALE_DOWN_COOLDOWN_MS") {
            config.autoscale.scale_down_cooldown = cooldown;
        }
        if let Some(threshold) = env_parse("BELAY_CPU_THRESHOLD") {
            config.autoscale.cpu_threshold = threshold;
        }
        if let Some(interval) = env_ms("BELAY_AUTOSCALE_INTERVAL_MS") {
            config.autoscale.interval = interval;
        }

        if let Some(enabled) = env_parse("BELAY_HEALTH_ENABLED") {
            config.health.enabled = enabled;
        }
        if let Some(interval) = env_ms("BELAY_HEALTH_INTERVAL_MS") {
            config.health.interval = interval;
        }
        if let Some(timeout) = env_ms("BELAY_HEALTH_TIMEOUT_MS") {
            config.health.timeout = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject misconfiguration at construction time rather than at the first
    /// submission.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_workers == 0 {
            return Err(PoolError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(PoolError::InvalidConfig(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.max_queue_size == 0 {
            return Err(PoolError::InvalidConfig(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.task_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "task_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Clamp a requested worker count into the configured bounds.
    pub fn clamp_workers(&self, target: usize) -> usize {
        target.clamp(self.min_workers.max(1), self.max_workers)
    }
}
