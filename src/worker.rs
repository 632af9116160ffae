//! Thread-backed execution workers.
//!
//! Each worker is one dedicated OS thread running caller-supplied executor
//! logic, one task at a time. The only coupling to the coordinator is the
//! message contract: an assignment channel in, an event channel out. The
//! worker owns no pool state; busy flags and counters live in the
//! coordinator's registry.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info};

use crate::task::{TaskCompletion, TaskDispatch, TaskExecutor};

/// Event emitted by a worker thread back to the coordinator.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The worker finished a task (success or task-level failure).
    Completed {
        worker_index: u64,
        completion: TaskCompletion,
    },
    /// The executor panicked. The thread is gone; the coordinator removes
    /// the record, fails any bound task, and replaces the worker if needed.
    Crashed { worker_index: u64, message: String },
}

/// Ownership of one worker's execution context.
///
/// Dropping the handle closes the assignment channel; the thread exits after
/// finishing its current task. Rust offers no way to force-kill a thread, so
/// termination of a busy worker is necessarily cooperative.
#[derive(Debug)]
pub struct WorkerHandle {
    index: u64,
    assignment_tx: mpsc::Sender<TaskDispatch>,
    thread: thread::JoinHandle<()>,
}

impl WorkerHandle {
    /// Send a task to the worker. Fails only if the thread already exited.
    pub fn assign(&self, dispatch: TaskDispatch) -> Result<(), TaskDispatch> {
        self.assignment_tx.send(dispatch).map_err(|err| err.0)
    }

    /// Close the assignment channel and detach the thread.
    ///
    /// An idle worker exits immediately; a busy one exits once its current
    /// task returns. The late completion event is ignored by the coordinator
    /// because the record is already gone.
    pub fn terminate(self) {
        drop(self.assignment_tx);
        drop(self.thread);
        debug!(worker_index = self.index, "worker handle terminated");
    }
}

/// Spawn one worker thread.
///
/// `events` carries completions and crash reports back to the coordinator.
/// Event sends are best-effort: if the coordinator is gone the worker is
/// being torn down anyway.
pub fn spawn_worker(
    index: u64,
    executor: Arc<dyn TaskExecutor>,
    events: tokio::sync::mpsc::UnboundedSender<WorkerEvent>,
) -> WorkerHandle {
    let (assignment_tx, assignment_rx) = mpsc::channel::<TaskDispatch>();

    let thread = thread::Builder::new()
        .name(format!("belay-worker-{index}"))
        .spawn(move || worker_loop(index, assignment_rx, executor, events))
        .expect("failed to spawn worker thread");

    info!(worker_index = index, "spawned worker");

    WorkerHandle {
        index,
        assignment_tx,
        thread,
    }
}

fn worker_loop(
    index: u64,
    assignments: mpsc::Receiver<TaskDispatch>,
    executor: Arc<dyn TaskExecutor>,
    events: tokio::sync::mpsc::UnboundedSender<WorkerEvent>,
) {
    while let Ok(dispatch) = assignments.recv() {
        let task_id = dispatch.task_id;
        debug!(worker_index = index, task_id = %task_id, kind = %dispatch.kind, "executing task");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            executor.execute(&dispatch.kind, &dispatch.payload)
        }));

        match outcome {
            Ok(Ok(result)) => {
                let _ = events.send(WorkerEvent::Completed {
                    worker_index: index,
                    completion: TaskCompletion {
                        task_id,
                        success: true,
                        result: Some(result),
                        error: None,
                    },
                });
            }
            Ok(Err(error)) => {
                let _ = events.send(WorkerEvent::Completed {
                    worker_index: index,
                    completion: TaskCompletion {
                        task_id,
                        success: false,
                        result: None,
                        error: Some(error),
                    },
                });
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let _ = events.send(WorkerEvent::Crashed {
                    worker_index: index,
                    message,
                });
                return;
            }
        }
    }
    debug!(worker_index = index, "worker thread exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
