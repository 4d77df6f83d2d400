//! The unit of work the scheduler runs

use std::future::Future;
use std::pin::Pin;

pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A queued unit of work. Exactly one of `execute` or `abort` is called.
pub trait Task: Send + 'static {
    /// Short identifier for logs.
    fn id(&self) -> &str;

    /// Run the task to completion.
    fn execute(self: Box<Self>) -> TaskFuture;

    /// Called instead of `execute` when the scheduler shuts down with the
    /// task still queued.
    fn abort(self: Box<Self>) -> TaskFuture;
}
