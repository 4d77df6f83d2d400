//! Asynchronous submit/poll orchestration
//!
//! SUBMITTED → POLLED: one dispatch for the submit, and when the provider
//! accepts the job, one dispatch for the fetch after a fixed delay. The job
//! id is passed explicitly into the fetch request. There is no internal
//! re-polling: a job that is not finished by the fetch counts as a failed
//! attempt and the outer loop moves on.

use std::time::Duration;

use provider::{ModelCredential, Parser, Response, SubmitResponse};
use tracing::debug;

use crate::content::{MidjourneyFetch, MidjourneySubmit, RequestContent};
use crate::error::Result;
use crate::observer::{LifecycleEvent, Observers};
use crate::pipeline::Dispatcher;

/// A submit request whose result is served by a separate fetch.
pub trait Pollable: RequestContent {
    type Fetch: RequestContent;

    const SUBMIT_PARSER: Parser;
    const FETCH_PARSER: Parser;

    fn fetch(&self, job_id: &str) -> Self::Fetch;
}

impl Pollable for MidjourneySubmit {
    type Fetch = MidjourneyFetch;

    const SUBMIT_PARSER: Parser = Parser::MidjourneySubmit;
    const FETCH_PARSER: Parser = Parser::MidjourneyFetch;

    fn fetch(&self, job_id: &str) -> MidjourneyFetch {
        MidjourneyFetch {
            job_id: job_id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitPoll {
    dispatcher: Dispatcher,
    poll_delay: Duration,
}

impl SubmitPoll {
    pub fn new(dispatcher: Dispatcher, poll_delay: Duration) -> Self {
        Self {
            dispatcher,
            poll_delay,
        }
    }

    /// Run one submit/poll attempt with `credential`.
    ///
    /// Returns the fetch Response, or the submit Response itself when the
    /// job was not accepted.
    pub async fn run<S: Pollable>(
        &self,
        credential: &ModelCredential,
        submit: &S,
        task_id: &str,
        observers: &Observers,
    ) -> Result<Response> {
        let submitted = self
            .dispatcher
            .dispatch(credential, submit, S::SUBMIT_PARSER, task_id)
            .await?;
        let receipt = match SubmitResponse::accepted(submitted) {
            Ok(receipt) => receipt,
            Err(rejected) => return Ok(rejected),
        };

        observers.notify(LifecycleEvent::Submitted {
            task_id: task_id.to_string(),
            supplier: receipt.response.supplier.clone(),
            job_id: receipt.job_id.clone(),
        });
        debug!(
            task_id,
            job_id = %receipt.job_id,
            delay_ms = self.poll_delay.as_millis() as u64,
            "job accepted, waiting before fetch"
        );

        tokio::time::sleep(self.poll_delay).await;

        let fetch = submit.fetch(&receipt.job_id);
        let mut polled = self
            .dispatcher
            .dispatch(credential, &fetch, S::FETCH_PARSER, task_id)
            .await?;
        polled.job_id = Some(receipt.job_id);
        Ok(polled)
    }
}
