//! Task types and the pool/worker message contract.
//!
//! The wire contract between the coordinator and a worker is two messages:
//! an outbound [`TaskDispatch`] and an inbound [`TaskCompletion`]. The actual
//! work logic lives behind [`TaskExecutor`], so the embedding system supplies
//! arbitrary task kinds without the pool knowing anything about them.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::PoolError;

/// Priority lane for a submitted task. Immutable after creation.
///
/// Dispatch order is strict: `High` before `Normal` before `Low`, FIFO within
/// a lane. There is no starvation prevention for lower lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Lanes in dispatch order, highest first.
    pub const LANES: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];
}

/// Outbound message: coordinator -> worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDispatch {
    pub task_id: Uuid,
    pub kind: String,
    pub payload: Value,
}

/// Inbound message: worker -> coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub task_id: Uuid,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Caller-supplied execution logic, opaque to the pool.
///
/// Runs on a dedicated worker thread, so blocking and CPU-heavy work are
/// expected. A panic is treated as a worker crash, not a task failure: the
/// worker is removed and replaced, and the bound task fails with a worker
/// error.
pub trait TaskExecutor: Send + Sync + 'static {
    fn execute(&self, kind: &str, payload: &Value) -> Result<Value, String>;
}

impl<F> TaskExecutor for F
where
    F: Fn(&str, &Value) -> Result<Value, String> + Send + Sync + 'static,
{
    fn execute(&self, kind: &str, payload: &Value) -> Result<Value, String> {
        self(kind, payload)
    }
}

/// A task waiting in a priority lane.
///
/// Holds the caller's result sink until the task is dispatched; the sink is
/// resolved exactly once (success, failure, timeout, or shutdown).
#[derive(Debug)]
pub struct QueuedTask {
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub priority: Priority,
    pub created_at: Instant,
    pub result_tx: oneshot::Sender<Result<Value, PoolError>>,
}

impl QueuedTask {
    pub fn new(
        kind: String,
        payload: Value,
        priority: Priority,
        result_tx: oneshot::Sender<Result<Value, PoolError>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            priority,
            created_at: Instant::now(),
            result_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lanes_are_ordered_highest_first() {
        assert_eq!(
            Priority::LANES,
            [Priority::High, Priority::Normal, Priority::Low]
        );
    }

    #[test]
    fn completion_round_trips_through_json() {
        let completion = TaskCompletion {
            task_id: Uuid::new_v4(),
            success: false,
            result: None,
            error: Some("boom".to_string()),
        };
        let encoded = serde_json::to_string(&completion).expect("encode");
        let decoded: TaskCompletion = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded.task_id, completion.task_id);
        assert_eq!(decoded.error.as_deref(), Some("boom"));
    }
}
