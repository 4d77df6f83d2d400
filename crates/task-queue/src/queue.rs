//! Bounded task queue and its producer handle

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tracing::warn;

use crate::error::QueueError;
use crate::scheduler::Scheduler;
use crate::task::Task;

/// Counters shared between the handle and the scheduler.
#[derive(Debug, Default)]
pub(crate) struct QueueStats {
    pub(crate) running: AtomicUsize,
    pub(crate) executed: AtomicU64,
    pub(crate) aborted: AtomicU64,
    pub(crate) rejected: AtomicU64,
}

/// Point-in-time queue counters for the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub capacity: usize,
    pub workers: usize,
    pub queued: usize,
    pub running: usize,
    pub executed: u64,
    pub aborted: u64,
    pub rejected: u64,
}

pub struct TaskQueue;

impl TaskQueue {
    /// Create a queue holding at most `capacity` pending tasks, executed by
    /// at most `workers` concurrent workers.
    pub fn new(capacity: usize, workers: usize) -> (QueueHandle, Scheduler) {
        let capacity = capacity.max(1);
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(QueueStats::default());
        let handle = QueueHandle {
            tx,
            capacity,
            workers,
            stats: stats.clone(),
        };
        let scheduler = Scheduler::new(rx, Arc::new(Semaphore::new(workers)), stats);
        (handle, scheduler)
    }
}

/// Producer side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<Box<dyn Task>>,
    capacity: usize,
    workers: usize,
    stats: Arc<QueueStats>,
}

impl QueueHandle {
    /// Enqueue without waiting.
    pub fn submit(&self, task: Box<dyn Task>) -> Result<(), QueueError> {
        let id = task.id().to_string();
        match self.tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("gateway_queue_rejections_total").increment(1);
                warn!(task_id = %id, capacity = self.capacity, "task queue full, rejecting task");
                Err(QueueError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            capacity: self.capacity,
            workers: self.workers,
            queued: self.capacity.saturating_sub(self.tx.capacity()),
            running: self.stats.running.load(Ordering::Relaxed),
            executed: self.stats.executed.load(Ordering::Relaxed),
            aborted: self.stats.aborted.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }
}
