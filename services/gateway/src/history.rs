//! Append-only invocation history (JSON lines)
//!
//! One row per upstream `Response` and one row per terminal task state. Rows
//! are written whole under a lock so concurrent tasks never interleave.

use std::path::Path;

use dispatch::{CollabFuture, InvocationRecorder, TaskState};
use provider::{Response, now_millis};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Row<'a> {
    Response {
        recorded_at: u64,
        #[serde(flatten)]
        response: &'a Response,
    },
    Task {
        recorded_at: u64,
        task_id: &'a str,
        state: TaskState,
    },
}

pub struct HistoryLog {
    file: Mutex<File>,
}

impl HistoryLog {
    /// Open `path` for appending, creating it and its parent directory.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    async fn append(&self, row: &Row<'_>) -> Result<(), dispatch::CollabError> {
        let mut line = serde_json::to_vec(row)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

impl InvocationRecorder for HistoryLog {
    fn record<'a>(&'a self, response: &'a Response) -> CollabFuture<'a, ()> {
        Box::pin(async move {
            self.append(&Row::Response {
                recorded_at: now_millis(),
                response,
            })
            .await
        })
    }

    fn finish<'a>(&'a self, task_id: &'a str, state: TaskState) -> CollabFuture<'a, ()> {
        Box::pin(async move {
            self.append(&Row::Task {
                recorded_at: now_millis(),
                task_id,
                state,
            })
            .await
        })
    }
}
