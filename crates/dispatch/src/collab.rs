//! Contracts for the persistence and storage collaborators
//!
//! The gateway records every Response and every terminal task state through
//! an `InvocationRecorder`, and publishes decoded base64 artifacts through an
//! `ObjectStore`. Both are object-safe so the composition root can pick the
//! implementation at startup.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use provider::Response;
use serde::Serialize;

use crate::retry::Termination;

/// Boxed future returned by collaborator methods.
pub type CollabFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CollabError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("object not found: {0}")]
    NotFound(String),
}

/// Terminal state of a generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Succeeded,
    Failed,
    Rejected,
    Cancelled,
    /// Dropped from the queue before it ran.
    Aborted,
}

impl TaskState {
    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Rejected => "rejected",
            TaskState::Cancelled => "cancelled",
            TaskState::Aborted => "aborted",
        }
    }
}

impl From<Termination> for TaskState {
    fn from(termination: Termination) -> Self {
        match termination {
            Termination::Succeeded => TaskState::Succeeded,
            Termination::Exhausted => TaskState::Failed,
            Termination::Rejected => TaskState::Rejected,
            Termination::Cancelled => TaskState::Cancelled,
        }
    }
}

/// Invocation history sink.
pub trait InvocationRecorder: Send + Sync {
    fn record<'a>(&'a self, response: &'a Response) -> CollabFuture<'a, ()>;

    fn finish<'a>(&'a self, task_id: &'a str, state: TaskState) -> CollabFuture<'a, ()>;
}

/// Artifact storage with time-limited public URLs.
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` and return the object key.
    fn upload<'a>(&'a self, bytes: Vec<u8>, content_type: &'a str) -> CollabFuture<'a, String>;

    fn signed_url<'a>(&'a self, key: &'a str, ttl: Duration) -> CollabFuture<'a, String>;
}
