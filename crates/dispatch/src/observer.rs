//! Task lifecycle notifications
//!
//! Outer loops publish lifecycle events to every registered observer. A
//! cancelled task publishes `SystemExit` and nothing else after it.

use std::sync::Arc;

use tracing::info;

use crate::retry::Termination;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// An async job was accepted upstream.
    Submitted {
        task_id: String,
        supplier: String,
        job_id: String,
    },
    /// An attempt produced the requested result.
    Succeeded {
        task_id: String,
        supplier: String,
        descriptor: String,
    },
    /// The loop ended without success (exhausted or rejected).
    Failed {
        task_id: String,
        termination: Termination,
    },
    /// Shutdown fired before the task finished.
    SystemExit { task_id: String },
}

impl LifecycleEvent {
    pub fn task_id(&self) -> &str {
        match self {
            LifecycleEvent::Submitted { task_id, .. }
            | LifecycleEvent::Succeeded { task_id, .. }
            | LifecycleEvent::Failed { task_id, .. }
            | LifecycleEvent::SystemExit { task_id } => task_id,
        }
    }
}

pub trait Observer: Send + Sync {
    fn notify(&self, event: &LifecycleEvent);
}

/// Fan-out list of observers.
#[derive(Clone, Default)]
pub struct Observers {
    observers: Vec<Arc<dyn Observer>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn notify(&self, event: LifecycleEvent) {
        for observer in &self.observers {
            observer.notify(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

/// Logs every lifecycle event.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn notify(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Submitted {
                task_id,
                supplier,
                job_id,
            } => info!(%task_id, %supplier, %job_id, "job submitted"),
            LifecycleEvent::Succeeded {
                task_id,
                supplier,
                descriptor,
            } => info!(%task_id, %supplier, credential = %descriptor, "task succeeded"),
            LifecycleEvent::Failed {
                task_id,
                termination,
            } => info!(%task_id, termination = termination.label(), "task failed"),
            LifecycleEvent::SystemExit { task_id } => {
                info!(%task_id, "task interrupted by shutdown")
            }
        }
    }
}

/// Collects events in memory.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<LifecycleEvent>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Observer for RecordingObserver {
    fn notify(&self, event: &LifecycleEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_reaches_every_observer() {
        let first = Arc::new(RecordingObserver::default());
        let second = Arc::new(RecordingObserver::default());
        let observers = Observers::new()
            .with(first.clone())
            .with(second.clone())
            .with(Arc::new(TracingObserver));
        assert_eq!(observers.len(), 3);

        observers.notify(LifecycleEvent::SystemExit {
            task_id: "t1".into(),
        });

        for recorder in [&first, &second] {
            let events = recorder.events();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].task_id(), "t1");
        }
    }
}
