//! Error types for pool lookups

use crate::registry::PoolKind;

/// Errors from the pool registry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no rotation pool configured for {0}")]
    UnknownPool(PoolKind),

    #[error("unknown pool kind: {0}")]
    InvalidKind(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
