//! Newline-delimited JSON job feed
//!
//! Each non-blank line is one `Job`. A line that does not parse or
//! validate is logged and skipped; the feed keeps reading.

use common::ShutdownSignal;
use dispatch::{Job, TaskState};
use serde::Serialize;
use task_queue::{QueueError, QueueHandle};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::metrics::record_task;
use crate::task::TaskContext;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedReport {
    pub accepted: u64,
    pub rejected: u64,
}

pub fn parse_job(line: &str) -> Result<Job> {
    let job: Job = serde_json::from_str(line)?;
    job.validate()?;
    Ok(job)
}

/// Read jobs from `reader` until EOF, a closed queue, or shutdown.
pub async fn feed_jobs<R>(
    reader: R,
    ctx: TaskContext,
    queue: QueueHandle,
    shutdown: ShutdownSignal,
) -> FeedReport
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut report = FeedReport::default();
    let mut line_no = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.triggered() => break,
            next = lines.next_line() => next,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(
                    accepted = report.accepted,
                    rejected = report.rejected,
                    "job feed closed"
                );
                break;
            }
            Err(e) => {
                warn!(error = %e, "failed to read job feed");
                break;
            }
        };
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match submit(line, &ctx, &queue).await {
            Ok(task_id) => {
                report.accepted += 1;
                debug!(line = line_no, task_id = %task_id, "job queued");
            }
            Err(e) => {
                report.rejected += 1;
                metrics::counter!("gateway_feed_rejections_total", "reason" => e.label())
                    .increment(1);
                warn!(line = line_no, reason = e.label(), error = %e, "job line rejected");
                if matches!(e, Error::Queue(QueueError::Closed)) {
                    break;
                }
            }
        }
    }
    report
}

async fn submit(line: &str, ctx: &TaskContext, queue: &QueueHandle) -> Result<String> {
    let job = parse_job(line)?;
    let task_id = format!("task_{}", uuid::Uuid::new_v4().as_simple());
    match queue.submit(Box::new(ctx.task(task_id.clone(), job))) {
        Ok(()) => Ok(task_id),
        Err(e) => {
            if e == QueueError::Full {
                record_task(TaskState::Aborted);
                if let Err(record) = ctx.history.finish(&task_id, TaskState::Aborted).await {
                    warn!(task_id = %task_id, error = %record, "failed to record task state");
                }
            }
            Err(e.into())
        }
    }
}
