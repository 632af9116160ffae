//! Three-lane priority queue feeding the dispatcher.
//!
//! Strict priority with FIFO within a lane. The total size across all lanes
//! is bounded; admission is the single backpressure mechanism, so a full
//! queue rejects new work instead of queuing unboundedly.

use std::collections::VecDeque;

use crate::task::{Priority, QueuedTask};

#[derive(Debug)]
pub struct PriorityQueues {
    high: VecDeque<QueuedTask>,
    normal: VecDeque<QueuedTask>,
    low: VecDeque<QueuedTask>,
    limit: usize,
}

/// Queue depth per lane, reported through pool stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneDepths {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl LaneDepths {
    pub fn total(&self) -> usize {
        self.high + self.normal + self.low
    }
}

impl PriorityQueues {
    pub fn new(limit: usize) -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            low: VecDeque::new(),
            limit,
        }
    }

    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<QueuedTask> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Whether another task can be admitted without breaching the limit.
    pub fn has_capacity(&self) -> bool {
        self.total() < self.limit
    }

    /// Append a task to its lane. The caller must have checked capacity;
    /// a full queue is a bug here, not a recoverable condition.
    pub fn push(&mut self, task: QueuedTask) {
        debug_assert!(self.has_capacity(), "push past queue limit");
        self.lane_mut(task.priority).push_back(task);
    }

    /// Pop the front of the highest-priority non-empty lane.
    pub fn pop_highest(&mut self) -> Option<QueuedTask> {
        for priority in Priority::LANES {
            if let Some(task) = self.lane_mut(priority).pop_front() {
                return Some(task);
            }
        }
        None
    }

    /// Drain every lane, highest priority first. Used by shutdown to fail
    /// all pending work.
    pub fn drain_all(&mut self) -> Vec<QueuedTask> {
        let mut drained = Vec::with_capacity(self.total());
        drained.extend(self.high.drain(..));
        drained.extend(self.normal.drain(..));
        drained.extend(self.low.drain(..));
        drained
    }

    pub fn depths(&self) -> LaneDepths {
        LaneDepths {
            high: self.high.len(),
            normal: self.normal.len(),
            low: self.low.len(),
        }
    }
}
