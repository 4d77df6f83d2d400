//! Extraction error types

/// Errors from strict artifact extraction.
///
/// Most extraction strategies return an empty list on a miss; only the
/// base64 marker scan reports a miss as an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("base64 marker not found")]
    MarkerNotFound,
}
