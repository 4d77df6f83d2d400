//! Service-specific error types

use task_queue::QueueError;
use thiserror::Error;

/// Reasons a job line from the feed does not become a queued task.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed job line: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] dispatch::DispatchError),

    #[error("job not queued: {0}")]
    Queue(#[from] QueueError),
}

impl Error {
    /// Label for logs and the `gateway_feed_rejections_total` counter.
    pub fn label(&self) -> &'static str {
        match self {
            Error::Malformed(_) => "malformed",
            Error::Invalid(_) => "invalid",
            Error::Queue(QueueError::Full) => "queue_full",
            Error::Queue(QueueError::Closed) => "queue_closed",
        }
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
