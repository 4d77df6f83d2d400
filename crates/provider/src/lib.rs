//! Upstream protocol primitives shared by the rotation and dispatch crates
//!
//! - `credential`: suppliers, credentials and the model a credential may call
//! - `classify`: maps upstream failures to the action the retry loop takes
//!   (stop, ban the supplier, or just move on)
//! - `response`: the one per-call record every endpoint family produces
//! - `extract`: pure artifact extraction from raw response bodies
//! - `parser`: per-provider strategy tying extraction to a `Response`

pub mod classify;
pub mod credential;
pub mod error;
pub mod extract;
pub mod parser;
pub mod response;

pub use classify::{
    ErrorClassification, UpstreamError, classify_midjourney_code, classify_reason, classify_status,
};
pub use credential::{Credential, EditBody, ModelCredential, Supplier};
pub use error::ExtractError;
pub use parser::Parser;
pub use response::{Response, ResponseKind, SubmitResponse, now_millis};
