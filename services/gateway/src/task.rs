//! The queued unit of work: one job through its family loop

use std::sync::Arc;
use std::time::Duration;

use dispatch::{
    DispatchError, Gateway, InputImage, InvocationRecorder, Job, ObjectStore, Outcome, TaskState,
};
use task_queue::{Task, TaskFuture};
use tracing::{info, warn};

use crate::metrics::record_task;

/// Collaborators shared by every task. Cheap to clone.
#[derive(Clone)]
pub struct TaskContext {
    pub gateway: Gateway,
    pub history: Arc<dyn InvocationRecorder>,
    pub store: Arc<dyn ObjectStore>,
    pub url_ttl: Duration,
}

impl TaskContext {
    pub fn task(&self, id: String, job: Job) -> GenerationTask {
        GenerationTask {
            id,
            job,
            ctx: self.clone(),
        }
    }
}

pub struct GenerationTask {
    id: String,
    job: Job,
    ctx: TaskContext,
}

impl GenerationTask {
    async fn run(self) {
        let outcome = match self.ctx.gateway.run(&self.job, &self.id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let state = match &e {
                    DispatchError::InvalidJob(_) => TaskState::Rejected,
                    _ => TaskState::Failed,
                };
                warn!(task_id = %self.id, error = %e, "task could not start");
                self.finish(state).await;
                return;
            }
        };

        for response in &outcome.responses {
            if let Err(e) = self.ctx.history.record(response).await {
                warn!(task_id = %self.id, error = %e, "failed to record response");
            }
        }

        let urls = self.publish(&outcome).await;
        let state = TaskState::from(outcome.termination);
        info!(
            task_id = %self.id,
            family = self.job.family.label(),
            state = state.label(),
            attempts = outcome.responses.len(),
            urls = ?urls,
            "task finished"
        );
        self.finish(state).await;
    }

    /// Public URLs of the winning response. Base64 artifacts are stored and
    /// replaced by signed URLs; an artifact that fails to store is dropped.
    async fn publish(&self, outcome: &Outcome) -> Vec<String> {
        let Some(winner) = outcome.winner() else {
            return Vec::new();
        };
        let mut urls = winner.urls.clone();
        for payload in &winner.base64s {
            match self.store_artifact(payload).await {
                Ok(url) => urls.push(url),
                Err(e) => warn!(task_id = %self.id, error = %e, "failed to store artifact"),
            }
        }
        urls
    }

    async fn store_artifact(&self, payload: &str) -> anyhow::Result<String> {
        let image = InputImage::from_data_url(payload)?;
        let key = self
            .ctx
            .store
            .upload(image.data.to_vec(), &image.mime)
            .await?;
        Ok(self.ctx.store.signed_url(&key, self.ctx.url_ttl).await?)
    }

    async fn finish(&self, state: TaskState) {
        record_task(state);
        if let Err(e) = self.ctx.history.finish(&self.id, state).await {
            warn!(task_id = %self.id, error = %e, "failed to record task state");
        }
    }
}

impl Task for GenerationTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn execute(self: Box<Self>) -> TaskFuture {
        Box::pin(self.run())
    }

    fn abort(self: Box<Self>) -> TaskFuture {
        Box::pin(async move {
            info!(task_id = %self.id, "task aborted before running");
            self.finish(TaskState::Aborted).await;
        })
    }
}
