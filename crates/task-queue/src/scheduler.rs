//! Worker loop: slot, then task, then spawn

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::ShutdownSignal;
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::queue::QueueStats;
use crate::task::Task;

/// Counts handed back to the supervisor once the scheduler stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerReport {
    pub executed: u64,
    pub aborted: u64,
}

/// Counts one task as running until dropped, unwinding included.
struct RunningGuard {
    stats: Arc<QueueStats>,
}

impl RunningGuard {
    fn enter(stats: Arc<QueueStats>) -> Self {
        stats.running.fetch_add(1, Ordering::Relaxed);
        Self { stats }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.stats.running.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct Scheduler {
    rx: mpsc::Receiver<Box<dyn Task>>,
    slots: Arc<Semaphore>,
    stats: Arc<QueueStats>,
}

impl Scheduler {
    pub(crate) fn new(
        rx: mpsc::Receiver<Box<dyn Task>>,
        slots: Arc<Semaphore>,
        stats: Arc<QueueStats>,
    ) -> Self {
        Self { rx, slots, stats }
    }

    /// Run until shutdown fires or every `QueueHandle` is dropped and the
    /// queue is empty.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> SchedulerReport {
        let mut running = JoinSet::new();
        info!(workers = self.slots.available_permits(), "scheduler started");

        loop {
            let slot = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                slot = Arc::clone(&self.slots).acquire_owned() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
            };
            let task = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                task = self.rx.recv() => match task {
                    Some(task) => task,
                    None => {
                        debug!("all queue handles dropped, scheduler draining");
                        break;
                    }
                },
            };

            let guard = RunningGuard::enter(Arc::clone(&self.stats));
            debug!(task_id = task.id(), "task starting");
            running.spawn(async move {
                task.execute().await;
                guard.stats.executed.fetch_add(1, Ordering::Relaxed);
                drop(guard);
                drop(slot);
            });

            while let Some(joined) = running.try_join_next() {
                if let Err(e) = joined {
                    warn!(error = %e, "task panicked");
                }
            }
        }

        self.rx.close();
        let mut aborted = 0u64;
        while let Ok(task) = self.rx.try_recv() {
            debug!(task_id = task.id(), "aborting queued task");
            task.abort().await;
            aborted += 1;
        }
        self.stats.aborted.fetch_add(aborted, Ordering::Relaxed);

        let in_flight = running.len();
        if in_flight > 0 {
            info!(in_flight, "waiting for running tasks to finish");
        }
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "task panicked");
            }
        }

        let report = SchedulerReport {
            executed: self.stats.executed.load(Ordering::Relaxed),
            aborted,
        };
        info!(
            executed = report.executed,
            aborted = report.aborted,
            "scheduler stopped"
        );
        report
    }
}
