//! Bounded-concurrency task scheduler
//!
//! Producers push boxed `Task`s into a bounded queue through a cloneable
//! `QueueHandle`; submission never blocks. One `Scheduler` pulls tasks and
//! runs each on its own tokio task while holding a worker slot from a
//! counting semaphore, so at most `workers` tasks execute at once.
//!
//! On shutdown the scheduler closes the queue, aborts every task still
//! waiting in it, waits for running tasks to release their slots and reports
//! the counts to its supervisor.

pub mod error;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use error::QueueError;
pub use queue::{QueueHandle, QueueSnapshot, TaskQueue};
pub use scheduler::{Scheduler, SchedulerReport};
pub use task::{Task, TaskFuture};
