//! Shared building blocks for the generation gateway crates
//!
//! - `Secret` keeps upstream API keys out of logs and Debug output
//! - `Error` covers configuration loading and validation
//! - `Shutdown` / `ShutdownSignal` carry the one cooperative cancellation
//!   signal that flows from the binary into retry loops, sweeps and the
//!   task scheduler

mod error;
mod secret;
pub mod shutdown;

pub use error::{Error, Result};
pub use secret::Secret;
pub use shutdown::{Shutdown, ShutdownSignal};
