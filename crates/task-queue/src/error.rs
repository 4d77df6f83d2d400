//! Queue submission errors

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("task queue is full")]
    Full,

    #[error("task queue is closed")]
    Closed,
}
