//! Public pool handle.
//!
//! A [`WorkerPool`] is an explicit instance owned by whatever composes the
//! service: construct it once, pass clones of the handle to callers, and
//! call [`WorkerPool::shutdown`] at process teardown. All methods post
//! commands to the coordinator's control loop; nothing here touches pool
//! state directly.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::autoscaler::{AutoScaler, HostLoadSampler, LoadSampler};
use crate::config::PoolConfig;
use crate::coordinator::{AffinityHint, Command, Coordinator};
use crate::error::PoolError;
use crate::stats::PoolStats;
use crate::task::{Priority, TaskExecutor};

const COMMAND_BUFFER: usize = 256;

/// Handle to a running pool. Cheap to clone; the pool shuts down when
/// [`WorkerPool::shutdown`] is called or every handle is dropped.
#[derive(Clone)]
pub struct WorkerPool {
    command_tx: mpsc::Sender<Command>,
}

impl WorkerPool {
    /// Start a pool with the host load sampler.
    ///
    /// Misconfiguration (for example `max_workers == 0`) is rejected here
    /// rather than discovered at the first submission.
    pub fn start(config: PoolConfig, executor: Arc<dyn TaskExecutor>) -> Result<Self, PoolError> {
        Self::start_with_sampler(config, executor, Box::new(HostLoadSampler))
    }

    /// Start a pool with a custom load source (tests, embedders with their
    /// own host telemetry).
    pub fn start_with_sampler(
        config: PoolConfig,
        executor: Arc<dyn TaskExecutor>,
        sampler: Box<dyn LoadSampler>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();

        let autoscaler = AutoScaler::new(
            config.autoscale.clone(),
            config.min_workers,
            config.max_workers,
            sampler,
        );
        let coordinator = Coordinator::new(config, executor, autoscaler, events_tx, timeout_tx);
        tokio::spawn(coordinator.run(command_rx, events_rx, timeout_rx));

        Ok(Self { command_tx })
    }

    /// Submit a task at normal priority and await its result.
    pub async fn execute(&self, kind: impl Into<String>, payload: Value) -> Result<Value, PoolError> {
        self.execute_with_priority(kind, payload, Priority::Normal)
            .await
    }

    /// Submit a task and await its result.
    ///
    /// Resolves exactly once with the task result, a task failure, a
    /// timeout, or an admission error (queue full, shutting down).
    pub async fn execute_with_priority(
        &self,
        kind: impl Into<String>,
        payload: Value,
        priority: Priority,
    ) -> Result<Value, PoolError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Submit {
                kind: kind.into(),
                payload,
                priority,
                result_tx,
            })
            .await
            .map_err(|_| PoolError::ShuttingDown)?;
        let result = result_rx.await.map_err(|_| PoolError::ShuttingDown)?;
        if let Err(error) = &result {
            if error.is_admission_error() {
                debug!(%error, "submission rejected before dispatch");
            }
        }
        result
    }

    /// Request a worker count; fire-and-forget, clamped to the configured
    /// bounds by the coordinator.
    pub async fn scale(&self, target: usize) {
        let _ = self.command_tx.send(Command::Scale { target }).await;
    }

    /// Point-in-time statistics snapshot.
    pub async fn stats(&self) -> Result<PoolStats, PoolError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Stats { reply })
            .await
            .map_err(|_| PoolError::ShuttingDown)?;
        rx.await.map_err(|_| PoolError::ShuttingDown)
    }

    /// Advisory (worker index, suggested CPU id) pairs.
    pub async fn affinity_hints(&self) -> Result<Vec<AffinityHint>, PoolError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::AffinityHints { reply })
            .await
            .map_err(|_| PoolError::ShuttingDown)?;
        rx.await.map_err(|_| PoolError::ShuttingDown)
    }

    /// Shut the pool down: every queued and active task resolves with a
    /// shutdown error and every worker handle is terminated. Idempotent;
    /// resolves once teardown has run.
    pub async fn shutdown(&self) {
        let (done, done_rx) = oneshot::channel();
        if self
            .command_tx
            .send(Command::Shutdown { done })
            .await
            .is_err()
        {
            // Control loop already gone: shutdown has happened.
            return;
        }
        let _ = done_rx.await;
    }
}
