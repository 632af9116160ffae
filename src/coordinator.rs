//! Single-actor control loop for the pool.
//!
//! The coordinator owns the priority queues and the worker registry
//! exclusively. Every mutation funnels through one `select!` loop: public
//! API commands, worker completion/crash events, timeout firings, and the
//! auto-scale and health ticks. Workers execute truly in parallel on their
//! own threads, but no other task ever touches this state, so none of it
//! needs a lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::autoscaler::{AutoScaler, ScaleSnapshot, ScalingDecision};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::health::HealthMonitor;
use crate::queue::PriorityQueues;
use crate::stats::{PoolStats, StatsTracker};
use crate::task::{Priority, QueuedTask, TaskDispatch, TaskExecutor};
use crate::worker::{spawn_worker, WorkerEvent, WorkerHandle};

/// Command posted to the coordinator by the pool handle.
#[derive(Debug)]
pub enum Command {
    Submit {
        kind: String,
        payload: Value,
        priority: Priority,
        result_tx: oneshot::Sender<Result<Value, PoolError>>,
    },
    Scale {
        target: usize,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    AffinityHints {
        reply: oneshot::Sender<Vec<AffinityHint>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Advisory CPU placement suggestion for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffinityHint {
    pub worker_index: u64,
    pub suggested_cpu_id: usize,
}

/// Registry entry for one live worker. Mutated only on the control path.
struct WorkerRecord {
    handle: WorkerHandle,
    /// Id of the bound task; `None` means idle.
    current_task: Option<Uuid>,
    healthy: bool,
    last_health_check: Instant,
    tasks_processed: u64,
}

impl WorkerRecord {
    fn is_idle(&self) -> bool {
        self.current_task.is_none()
    }
}

/// A dispatched task awaiting its worker reply.
///
/// `result_tx` is taken on first resolution; a timed-out task keeps its
/// entry (with the sink gone) so the late worker reply can be matched and
/// ignored instead of double-resolving.
struct ActiveTask {
    worker_index: u64,
    created_at: Instant,
    timeout: AbortHandle,
    result_tx: Option<oneshot::Sender<Result<Value, PoolError>>>,
}

enum Flow {
    Continue,
    Stop,
}

pub struct Coordinator {
    config: PoolConfig,
    executor: Arc<dyn TaskExecutor>,
    queues: PriorityQueues,
    registry: BTreeMap<u64, WorkerRecord>,
    active: HashMap<Uuid, ActiveTask>,
    stats: StatsTracker,
    autoscaler: AutoScaler,
    health: HealthMonitor,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    timeout_tx: mpsc::UnboundedSender<Uuid>,
    next_worker_index: u64,
    shutting_down: bool,
}

impl Coordinator {
    pub fn new(
        config: PoolConfig,
        executor: Arc<dyn TaskExecutor>,
        autoscaler: AutoScaler,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
        timeout_tx: mpsc::UnboundedSender<Uuid>,
    ) -> Self {
        let queues = PriorityQueues::new(config.max_queue_size);
        let health = HealthMonitor::new(config.health.clone());
        Self {
            config,
            executor,
            queues,
            registry: BTreeMap::new(),
            active: HashMap::new(),
            stats: StatsTracker::default(),
            autoscaler,
            health,
            events_tx,
            timeout_tx,
            next_worker_index: 0,
            shutting_down: false,
        }
    }

    /// Run the control loop until shutdown.
    pub async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<Command>,
        mut worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
        mut timeout_rx: mpsc::UnboundedReceiver<Uuid>,
    ) {
        for _ in 0..self.config.min_workers {
            self.spawn_one();
        }

        info!(
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            max_queue_size = self.config.max_queue_size,
            task_timeout_ms = self.config.task_timeout.as_millis(),
            "coordinator started"
        );

        let mut autoscale_tick = interval(self.config.autoscale.interval);
        autoscale_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut health_tick = interval(self.config.health.interval);
        health_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_cmd = command_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => {
                            if let Flow::Stop = self.handle_command(cmd) {
                                break;
                            }
                        }
                        // Every pool handle dropped: tear down.
                        None => {
                            self.do_shutdown();
                            break;
                        }
                    }
                }
                Some(event) = worker_events.recv() => {
                    self.handle_worker_event(event);
                }
                Some(task_id) = timeout_rx.recv() => {
                    self.handle_timeout(task_id);
                }
                _ = autoscale_tick.tick(), if self.config.autoscale.enabled => {
                    self.autoscale_pass();
                }
                _ = health_tick.tick(), if self.config.health.enabled => {
                    self.health_pass();
                }
            }
        }

        info!("coordinator stopped");
    }

    fn handle_command(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::Submit {
                kind,
                payload,
                priority,
                result_tx,
            } => {
                self.handle_submit(kind, payload, priority, result_tx);
                Flow::Continue
            }
            Command::Scale { target } => {
                self.manual_scale(target);
                Flow::Continue
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.snapshot_stats());
                Flow::Continue
            }
            Command::AffinityHints { reply } => {
                let _ = reply.send(self.affinity_hints());
                Flow::Continue
            }
            Command::Shutdown { done } => {
                self.do_shutdown();
                let _ = done.send(());
                Flow::Stop
            }
        }
    }

    // ─── Submission and dispatch ────────────────────────────────────────

    fn handle_submit(
        &mut self,
        kind: String,
        payload: Value,
        priority: Priority,
        result_tx: oneshot::Sender<Result<Value, PoolError>>,
    ) {
        if self.shutting_down {
            let _ = result_tx.send(Err(PoolError::ShuttingDown));
            return;
        }
        if !self.queues.has_capacity() {
            metrics::counter!("belay_tasks_rejected_total").increment(1);
            let _ = result_tx.send(Err(PoolError::QueueFull {
                limit: self.config.max_queue_size,
            }));
            return;
        }

        let task = QueuedTask::new(kind, payload, priority, result_tx);
        debug!(task_id = %task.id, priority = ?priority, "task queued");
        metrics::counter!("belay_tasks_submitted_total").increment(1);
        self.queues.push(task);
        self.dispatch_pass();
    }

    /// Bind queued tasks to idle workers until one side runs out.
    fn dispatch_pass(&mut self) {
        loop {
            if self.queues.is_empty() {
                break;
            }
            let Some(worker_index) = self.pick_idle_worker() else {
                break;
            };
            let Some(task) = self.queues.pop_highest() else {
                break;
            };
            self.dispatch_to(worker_index, task);
        }
    }

    fn pick_idle_worker(&self) -> Option<u64> {
        self.registry
            .iter()
            .find(|(_, record)| record.is_idle() && record.healthy)
            .map(|(index, _)| *index)
    }

    fn dispatch_to(&mut self, worker_index: u64, task: QueuedTask) {
        let task_id = task.id;
        let dispatch = TaskDispatch {
            task_id,
            kind: task.kind,
            payload: task.payload,
        };

        let record = self
            .registry
            .get_mut(&worker_index)
            .expect("dispatch target exists");

        if let Err(_rejected) = record.handle.assign(dispatch) {
            // The thread died under us; the crash event is in flight. Fail
            // this task now and let the crash handler replace the worker.
            warn!(worker_index, task_id = %task_id, "assignment to dead worker");
            self.stats.record_failure();
            let _ = task
                .result_tx
                .send(Err(PoolError::WorkerLost("worker exited".to_string())));
            return;
        }

        record.current_task = Some(task_id);

        let timeout = self.config.task_timeout;
        let timeout_tx = self.timeout_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timeout_tx.send(task_id);
        });

        self.active.insert(
            task_id,
            ActiveTask {
                worker_index,
                created_at: task.created_at,
                timeout: timer.abort_handle(),
                result_tx: Some(task.result_tx),
            },
        );

        metrics::counter!("belay_tasks_dispatched_total").increment(1);
        debug!(worker_index, task_id = %task_id, "task dispatched");
    }

    // ─── Completion, crash, timeout ─────────────────────────────────────

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Completed {
                worker_index,
                completion,
            } => {
                // The record may already be gone (health replacement or
                // shutdown raced the reply); the task was failed then.
                if let Some(record) = self.registry.get_mut(&worker_index) {
                    record.current_task = None;
                    record.tasks_processed = record.tasks_processed.saturating_add(1);
                    record.last_health_check = Instant::now();
                }

                if let Some(active) = self.active.remove(&completion.task_id) {
                    active.timeout.abort();
                    match active.result_tx {
                        Some(result_tx) => {
                            if completion.success {
                                self.stats
                                    .record_completion(active.created_at.elapsed());
                                metrics::counter!("belay_tasks_completed_total").increment(1);
                                let _ = result_tx
                                    .send(Ok(completion.result.unwrap_or(Value::Null)));
                            } else {
                                self.stats.record_failure();
                                metrics::counter!("belay_tasks_failed_total").increment(1);
                                let error = completion
                                    .error
                                    .unwrap_or_else(|| "unknown worker error".to_string());
                                let _ = result_tx.send(Err(PoolError::WorkerError(error)));
                            }
                        }
                        // Caller already released by the timeout; ignore the
                        // late reply and just free the worker.
                        None => {
                            debug!(task_id = %completion.task_id, "late reply after timeout");
                        }
                    }
                }

                self.dispatch_pass();
            }
            WorkerEvent::Crashed {
                worker_index,
                message,
            } => {
                let Some(record) = self.registry.remove(&worker_index) else {
                    return;
                };
                error!(worker_index, message = %message, "worker crashed");
                metrics::counter!("belay_worker_crashes_total").increment(1);

                if let Some(task_id) = record.current_task {
                    self.fail_active(task_id, PoolError::WorkerLost(message));
                }
                record.handle.terminate();

                if !self.shutting_down && self.registry.len() < self.config.min_workers {
                    self.spawn_one();
                }
                self.dispatch_pass();
            }
        }
    }

    fn handle_timeout(&mut self, task_id: Uuid) {
        // Missing entry means the completion won the race.
        let Some(active) = self.active.get_mut(&task_id) else {
            return;
        };
        let Some(result_tx) = active.result_tx.take() else {
            return;
        };

        warn!(
            task_id = %task_id,
            worker_index = active.worker_index,
            timeout_ms = self.config.task_timeout.as_millis(),
            "task timed out; releasing caller"
        );
        self.stats.record_timeout();
        metrics::counter!("belay_tasks_timed_out_total").increment(1);

        // The worker is not killed: a late reply is harmless, and a worker
        // that never replies is the health monitor's job.
        let _ = result_tx.send(Err(PoolError::TaskTimeout {
            timeout: self.config.task_timeout,
        }));
    }

    /// Resolve an active task with an error and drop its timer.
    fn fail_active(&mut self, task_id: Uuid, error: PoolError) {
        if let Some(active) = self.active.remove(&task_id) {
            active.timeout.abort();
            // A task that already timed out was resolved then; only count
            // the failure when this is the first resolution.
            if let Some(result_tx) = active.result_tx {
                self.stats.record_failure();
                metrics::counter!("belay_tasks_failed_total").increment(1);
                let _ = result_tx.send(Err(error));
            }
        }
    }

    // ─── Worker lifecycle ───────────────────────────────────────────────

    /// Spawn one worker, refusing at the registry cap.
    fn spawn_one(&mut self) -> bool {
        if self.registry.len() >= self.config.max_workers {
            warn!(
                max_workers = self.config.max_workers,
                "refusing to spawn past max_workers"
            );
            return false;
        }

        let index = self.next_worker_index;
        self.next_worker_index += 1;

        let handle = spawn_worker(index, Arc::clone(&self.executor), self.events_tx.clone());
        self.registry.insert(
            index,
            WorkerRecord {
                handle,
                current_task: None,
                healthy: true,
                last_health_check: Instant::now(),
                tasks_processed: 0,
            },
        );
        metrics::counter!("belay_workers_spawned_total").increment(1);
        metrics::gauge!("belay_workers").set(self.registry.len() as f64);
        true
    }

    /// Remove one idle worker, newest first. Returns false when every
    /// worker is busy.
    fn remove_one_idle(&mut self) -> bool {
        let Some(index) = self
            .registry
            .iter()
            .rev()
            .find(|(_, record)| record.is_idle())
            .map(|(index, _)| *index)
        else {
            return false;
        };

        let record = self.registry.remove(&index).expect("idle worker exists");
        record.handle.terminate();
        info!(worker_index = index, "removed idle worker");
        metrics::counter!("belay_workers_removed_total").increment(1);
        metrics::gauge!("belay_workers").set(self.registry.len() as f64);
        true
    }

    // ─── Auto-scaling ───────────────────────────────────────────────────

    fn autoscale_pass(&mut self) {
        if self.shutting_down {
            return;
        }
        let snapshot = ScaleSnapshot {
            queued_tasks: self.queues.total(),
            worker_count: self.registry.len(),
            idle_workers: self.idle_count(),
        };

        match self.autoscaler.evaluate(snapshot, Instant::now()) {
            ScalingDecision::ScaleUp => {
                if self.spawn_one() {
                    self.stats.record_scale_up();
                    info!(
                        worker_count = self.registry.len(),
                        queued = snapshot.queued_tasks,
                        "scaled up"
                    );
                    self.dispatch_pass();
                }
            }
            ScalingDecision::ScaleDown => {
                if self.remove_one_idle() {
                    self.stats.record_scale_down();
                    info!(worker_count = self.registry.len(), "scaled down");
                }
            }
            ScalingDecision::None => {}
        }
    }

    /// Manual scale request: clamp, then spawn or remove the delta. Removal
    /// takes idle workers only and stops early when none remain.
    fn manual_scale(&mut self, target: usize) {
        if self.shutting_down {
            return;
        }
        let target = self.config.clamp_workers(target);
        let current = self.registry.len();

        if target > current {
            for _ in current..target {
                if !self.spawn_one() {
                    break;
                }
                self.stats.record_scale_up();
            }
            self.dispatch_pass();
        } else {
            for _ in target..current {
                if !self.remove_one_idle() {
                    break;
                }
                self.stats.record_scale_down();
            }
        }
        info!(
            requested = target,
            worker_count = self.registry.len(),
            "manual scale applied"
        );
    }

    // ─── Health monitoring ──────────────────────────────────────────────

    fn health_pass(&mut self) {
        if self.shutting_down {
            return;
        }
        let now = Instant::now();

        // Refresh idle workers; a busy worker keeps its timestamp so that
        // continuous busy time accumulates toward the stuck threshold.
        let mut stuck = Vec::new();
        for (index, record) in self.registry.iter_mut() {
            if record.is_idle() {
                record.last_health_check = now;
            } else if self
                .health
                .is_stuck(true, record.last_health_check, now)
            {
                record.healthy = false;
                stuck.push(*index);
            }
        }

        for index in stuck {
            let Some(record) = self.registry.remove(&index) else {
                continue;
            };
            warn!(
                worker_index = index,
                tasks_processed = record.tasks_processed,
                "worker unresponsive; replacing"
            );
            metrics::counter!("belay_workers_replaced_total").increment(1);

            if let Some(task_id) = record.current_task {
                self.fail_active(task_id, PoolError::WorkerUnresponsive);
            }
            record.handle.terminate();
        }

        while self.registry.len() < self.config.min_workers {
            if !self.spawn_one() {
                break;
            }
        }
        self.dispatch_pass();
    }

    // ─── Stats and hints ────────────────────────────────────────────────

    fn idle_count(&self) -> usize {
        self.registry
            .values()
            .filter(|record| record.is_idle())
            .count()
    }

    fn snapshot_stats(&mut self) -> PoolStats {
        let idle = self.idle_count();
        let mut stats = PoolStats {
            worker_count: self.registry.len(),
            idle_workers: idle,
            busy_workers: self.registry.len() - idle,
            queued: self.queues.depths(),
            active_tasks: self.active.len(),
            ..PoolStats::default()
        };
        self.stats.populate(&mut stats, Instant::now());
        stats
    }

    fn affinity_hints(&self) -> Vec<AffinityHint> {
        let cpus = num_cpus::get().max(1);
        self.registry
            .keys()
            .map(|&worker_index| AffinityHint {
                worker_index,
                suggested_cpu_id: worker_index as usize % cpus,
            })
            .collect()
    }

    // ─── Shutdown ───────────────────────────────────────────────────────

    /// Idempotent teardown: fail everything, terminate every handle, clear
    /// all bookkeeping.
    fn do_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;

        let queued = self.queues.drain_all();
        let queued_count = queued.len();
        for task in queued {
            let _ = task.result_tx.send(Err(PoolError::ShuttingDown));
        }

        let active_count = self.active.len();
        for (_, active) in self.active.drain() {
            active.timeout.abort();
            if let Some(result_tx) = active.result_tx {
                let _ = result_tx.send(Err(PoolError::ShuttingDown));
            }
        }

        let worker_count = self.registry.len();
        while let Some((_, record)) = self.registry.pop_first() {
            record.handle.terminate();
        }
        metrics::gauge!("belay_workers").set(0.0);

        info!(
            queued = queued_count,
            active = active_count,
            workers = worker_count,
            "pool shut down"
        );
    }
}
