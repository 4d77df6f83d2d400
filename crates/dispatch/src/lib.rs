//! Request dispatch, submit/poll orchestration and outer retry loops
//!
//! One upstream call flows through `pipeline::Dispatcher`: the request
//! content builds the body for a credential, the dispatcher sends it, times
//! it and hands the raw body to a `provider::Parser`. `retry::run_attempts`
//! pulls credentials from a `CredentialSource` and keeps calling until an
//! attempt succeeds, the content is rejected, the source runs dry, or the
//! shutdown signal fires. `family::Gateway` wires each endpoint family to its
//! source, request shape, parser and failure policy.

pub mod collab;
pub mod content;
pub mod error;
pub mod family;
pub mod input;
pub mod observer;
pub mod pipeline;
pub mod retry;
pub mod submit_poll;

#[cfg(test)]
mod testutil;

pub use collab::{CollabError, CollabFuture, InvocationRecorder, ObjectStore, TaskState};
pub use content::{RequestBody, RequestContent};
pub use error::{DispatchError, Result};
pub use family::{Family, FallbackLists, Gateway, GatewaySettings, Job};
pub use input::InputImage;
pub use observer::{LifecycleEvent, Observer, Observers, TracingObserver};
pub use pipeline::Dispatcher;
pub use retry::{
    CredentialSource, FailurePolicy, Outcome, StaticSource, Termination, run_attempts,
};
pub use submit_poll::{Pollable, SubmitPoll};
