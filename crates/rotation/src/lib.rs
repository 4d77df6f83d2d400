//! Tiered credential rotation with supplier blacklisting
//!
//! Each `RotationPool` owns an ordered matrix of credentials (priority tiers,
//! each an ordered list) for one request classification, plus a blacklist of
//! temporarily banned suppliers. A retry chain calls `begin()` to get a
//! `Sequence` and pulls credentials from it; the pool guarantees every
//! credential is handed out at most once per sequence.
//!
//! Credential lifecycle within a sequence:
//! 1. `next` scans tiers top to bottom, cells left to right
//! 2. The first untried cell whose supplier is not banned is marked tried and returned
//! 3. A failed attempt may `ban` the supplier; every sequence skips it until expiry
//! 4. The sweep task purges expired bans on a fixed timer
//! 5. A sequence that would start with nothing triggers the liveness policy

pub mod error;
pub mod pool;
pub mod registry;
pub mod sweep;

pub use error::{Error, Result};
pub use pool::{LivenessPolicy, RotationPool, Sequence, SequenceId};
pub use registry::{PoolKind, PoolSet};
pub use sweep::spawn_sweep_task;
