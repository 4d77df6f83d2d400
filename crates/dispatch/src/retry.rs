//! Outer retry loop shared by every endpoint family
//!
//! Pull a credential, run one attempt, append its `Response`, stop on
//! success. What a failed attempt means (stop, ban the supplier, move on) is
//! the family's `FailurePolicy`. Transport errors never produce a Response:
//! they are logged and the loop moves to the next credential.
//!
//! Each attempt runs on its own task, raced against the shutdown signal. When
//! shutdown wins, the attempt is left to finish on its own and its result is
//! discarded.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::ShutdownSignal;
use provider::{ErrorClassification, ModelCredential, Response, UpstreamError};
use rotation::Sequence;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::observer::{LifecycleEvent, Observers};

/// One attempt against one credential.
pub type AttemptFuture = Pin<Box<dyn Future<Output = Result<Response>> + Send + 'static>>;

/// Where an outer loop gets its credentials from.
pub trait CredentialSource: Send {
    fn next_credential(&mut self) -> Option<ModelCredential>;

    /// Suppress the supplier for `duration`. Sources without a blacklist
    /// ignore this.
    fn ban(&mut self, _supplier: &str, _duration: Duration) {}
}

impl CredentialSource for Sequence {
    fn next_credential(&mut self) -> Option<ModelCredential> {
        self.next()
    }

    fn ban(&mut self, supplier: &str, duration: Duration) {
        self.pool().ban_for(supplier, duration);
    }
}

/// Fixed ordered list of credentials; each is tried once.
#[derive(Debug, Default)]
pub struct StaticSource {
    credentials: VecDeque<ModelCredential>,
}

impl StaticSource {
    pub fn new(credentials: Vec<ModelCredential>) -> Self {
        Self {
            credentials: credentials.into(),
        }
    }
}

impl CredentialSource for StaticSource {
    fn next_credential(&mut self) -> Option<ModelCredential> {
        self.credentials.pop_front()
    }
}

/// How a family reacts to a failed attempt. A content rejection always
/// stops the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Ban the supplier after any other failure.
    BanOnAnyFailure { cooldown: Duration },
    /// Ban the supplier only on quota exhaustion or rate limiting.
    BanOnQuota { cooldown: Duration },
    /// Never ban; move to the next credential.
    NoBan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Stop,
    Ban(Duration),
    Next,
}

impl FailurePolicy {
    fn verdict(&self, error: Option<&UpstreamError>) -> Verdict {
        let classification = error
            .map(|e| e.classification)
            .unwrap_or(ErrorClassification::Transient);
        if classification == ErrorClassification::Rejected {
            return Verdict::Stop;
        }
        match *self {
            FailurePolicy::BanOnAnyFailure { cooldown } => Verdict::Ban(cooldown),
            FailurePolicy::BanOnQuota { cooldown }
                if classification == ErrorClassification::QuotaExceeded =>
            {
                Verdict::Ban(cooldown)
            }
            _ => Verdict::Next,
        }
    }
}

/// Why an outer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Succeeded,
    Exhausted,
    Rejected,
    Cancelled,
}

impl Termination {
    pub fn label(&self) -> &'static str {
        match self {
            Termination::Succeeded => "succeeded",
            Termination::Exhausted => "exhausted",
            Termination::Rejected => "rejected",
            Termination::Cancelled => "cancelled",
        }
    }
}

/// Every Response an outer loop produced, in attempt order.
#[derive(Debug)]
pub struct Outcome {
    pub responses: Vec<Response>,
    pub termination: Termination,
}

impl Outcome {
    pub fn succeeded(&self) -> bool {
        self.termination == Termination::Succeeded
    }

    /// The successful Response, which is always the last one.
    pub fn winner(&self) -> Option<&Response> {
        if self.succeeded() {
            self.responses.last()
        } else {
            None
        }
    }
}

/// Run attempts until success, rejection, exhaustion or shutdown.
pub async fn run_attempts<S, F>(
    source: &mut S,
    policy: FailurePolicy,
    task_id: &str,
    shutdown: &ShutdownSignal,
    observers: &Observers,
    mut attempt: F,
) -> Outcome
where
    S: CredentialSource + ?Sized,
    F: FnMut(ModelCredential) -> AttemptFuture,
{
    let mut responses = Vec::new();

    let finish = |responses: Vec<Response>, termination: Termination| {
        match termination {
            Termination::Succeeded => {}
            Termination::Cancelled => observers.notify(LifecycleEvent::SystemExit {
                task_id: task_id.to_string(),
            }),
            Termination::Exhausted | Termination::Rejected => {
                observers.notify(LifecycleEvent::Failed {
                    task_id: task_id.to_string(),
                    termination,
                })
            }
        }
        info!(
            task_id,
            attempts = responses.len(),
            termination = termination.label(),
            "outer loop finished"
        );
        Outcome {
            responses,
            termination,
        }
    };

    loop {
        if shutdown.is_triggered() {
            return finish(responses, Termination::Cancelled);
        }
        let Some(credential) = source.next_credential() else {
            return finish(responses, Termination::Exhausted);
        };
        let supplier = credential.supplier_name().to_string();
        let descriptor = credential.descriptor().to_string();
        debug!(task_id, %supplier, credential = %descriptor, "attempt starting");

        let mut handle = tokio::spawn(attempt(credential));
        let joined = tokio::select! {
            biased;
            _ = shutdown.triggered() => {
                // Dropping the handle detaches the attempt
                drop(handle);
                return finish(responses, Termination::Cancelled);
            }
            joined = &mut handle => joined,
        };

        let response = match joined {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(task_id, %supplier, credential = %descriptor, error = %e, "attempt failed before a response, trying next credential");
                continue;
            }
            Err(e) => {
                warn!(task_id, %supplier, credential = %descriptor, error = %e, "attempt task failed, trying next credential");
                continue;
            }
        };

        if response.succeed() {
            responses.push(response);
            observers.notify(LifecycleEvent::Succeeded {
                task_id: task_id.to_string(),
                supplier,
                descriptor,
            });
            return finish(responses, Termination::Succeeded);
        }

        let verdict = policy.verdict(response.error.as_ref());
        responses.push(response);
        match verdict {
            Verdict::Stop => {
                warn!(task_id, %supplier, "content rejected, stopping retries");
                return finish(responses, Termination::Rejected);
            }
            Verdict::Ban(cooldown) => source.ban(&supplier, cooldown),
            Verdict::Next => {}
        }
    }
}
