//! Error taxonomy for pool submission and execution.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to callers through the result handle or at construction.
///
/// Admission errors (`QueueFull`, `ShuttingDown`) are delivered as soon as the
/// submission is inspected; nothing is retried by the pool itself.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PoolError {
    /// Total queued tasks already at the configured limit.
    #[error("task queue is full (limit {limit})")]
    QueueFull { limit: usize },

    /// The pool is shutting down; all outstanding work is failed with this.
    #[error("pool is shutting down")]
    ShuttingDown,

    /// No worker reply within the configured task timeout.
    #[error("task timed out after {timeout:?}")]
    TaskTimeout { timeout: Duration },

    /// The worker reported a task-level failure.
    #[error("task failed: {0}")]
    WorkerError(String),

    /// The worker was replaced by the health monitor while this task was
    /// bound to it.
    #[error("worker unresponsive")]
    WorkerUnresponsive,

    /// The worker crashed or its channel closed with this task in flight.
    #[error("worker lost: {0}")]
    WorkerLost(String),

    /// Rejected at construction time.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// Whether this error was produced before the task was ever dispatched.
    pub fn is_admission_error(&self) -> bool {
        matches!(self, PoolError::QueueFull { .. } | PoolError::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_error_classification() {
        assert!(PoolError::QueueFull { limit: 10 }.is_admission_error());
        assert!(PoolError::ShuttingDown.is_admission_error());
        assert!(!PoolError::WorkerUnresponsive.is_admission_error());
        assert!(!PoolError::TaskTimeout {
            timeout: Duration::from_secs(1)
        }
        .is_admission_error());
    }
}
