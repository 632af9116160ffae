//! Belay - dynamically-scaling worker pool for CPU-bound task execution.
//!
//! A [`WorkerPool`] distributes opaque, caller-supplied tasks across a
//! bounded set of dedicated worker threads, scaling the set with queue depth
//! and host CPU load, replacing stuck or crashed workers, and enforcing
//! per-task timeouts with strict three-lane priority ordering.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use belay::{PoolConfig, Priority, WorkerPool};
//! use serde_json::{json, Value};
//!
//! let pool = WorkerPool::start(
//!     PoolConfig::default(),
//!     Arc::new(|kind: &str, payload: &Value| {
//!         // CPU-bound work goes here.
//!         Ok(json!({ "kind": kind, "echo": payload }))
//!     }),
//! )?;
//!
//! let result = pool.execute_with_priority("resize", json!({"w": 640}), Priority::High).await?;
//! pool.shutdown().await;
//! ```

pub mod autoscaler;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod observability;
pub mod pool;
pub mod queue;
pub mod stats;
pub mod task;
pub mod worker;

pub use autoscaler::{HostLoadSampler, LoadSampler, ScaleSnapshot, ScalingDecision};
pub use config::{AutoScaleConfig, HealthCheckConfig, PoolConfig};
pub use coordinator::AffinityHint;
pub use error::PoolError;
pub use pool::WorkerPool;
pub use queue::LaneDepths;
pub use stats::PoolStats;
pub use task::{Priority, TaskCompletion, TaskDispatch, TaskExecutor};
