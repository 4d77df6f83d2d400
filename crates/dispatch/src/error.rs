//! Dispatch error types
//!
//! These are failures that never produced an upstream response. An upstream
//! non-2xx is not an error here: it is recorded inside the `Response`.

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("transport error calling {supplier}: {source}")]
    Transport {
        supplier: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build request body: {0}")]
    Body(String),

    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error(transparent)]
    Pool(#[from] rotation::Error),
}

impl DispatchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Transport { source, .. } if source.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
