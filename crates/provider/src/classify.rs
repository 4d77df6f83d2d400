//! Failure classification for upstream responses
//!
//! Distinguishes content-policy rejections (stop the whole retry chain) from
//! quota exhaustion and rate limits (ban the supplier for a cooldown) and
//! from plain transient failures (move on to the next credential).
//!
//! Only status codes, 4xx error bodies and provider failure codes or reasons
//! are inspected. Successful chat text and 5xx bodies are free text and always
//! classify as transient.

use serde::Serialize;

/// What a failed upstream response means for the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    /// Retryable on another credential (timeouts, 5xx, empty results)
    Transient,
    /// Rate limit or quota exhausted, supplier should cool down
    QuotaExceeded,
    /// Credential rejected (401/403)
    Auth,
    /// Prompt or input rejected by content policy; no credential will succeed
    Rejected,
}

impl ErrorClassification {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClassification::Transient => "transient",
            ErrorClassification::QuotaExceeded => "quota_exceeded",
            ErrorClassification::Auth => "auth",
            ErrorClassification::Rejected => "rejected",
        }
    }
}

/// Structured error attached to a failed `Response`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamError {
    pub classification: ErrorClassification,
    /// Provider-specific code when the body carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
}

impl UpstreamError {
    pub fn new(classification: ErrorClassification, message: impl Into<String>) -> Self {
        Self {
            classification,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    /// Builds the error for an HTTP-level failure, keeping a bounded excerpt
    /// of the body as the message.
    pub fn from_status(status: u16, body: &str) -> Self {
        Self::new(classify_status(status, body), excerpt(body))
    }

    pub fn is_rejection(&self) -> bool {
        self.classification == ErrorClassification::Rejected
    }
}

/// Structured content-policy markers. Only matched in 4xx error bodies and
/// provider failure reasons, never in free chat text.
const REJECTION_MARKERS: &[&str] = &[
    "content_policy_violation",
    "content_policy",
    "content policy",
    "safety system",
    "banned prompt",
];

/// Quota and rate-limit markers for 4xx bodies without a 429/402 status.
const QUOTA_MARKERS: &[&str] = &[
    "insufficient_quota",
    "exceeded your current quota",
    "rate limit",
    "rate_limit",
    "too many requests",
    "insufficient balance",
];

/// Classify a structured failure reason: a 4xx error body or a provider's
/// failure description.
pub fn classify_reason(reason: &str) -> ErrorClassification {
    let lower = reason.to_lowercase();
    if REJECTION_MARKERS.iter().any(|m| lower.contains(m)) {
        return ErrorClassification::Rejected;
    }
    if QUOTA_MARKERS.iter().any(|m| lower.contains(m)) {
        return ErrorClassification::QuotaExceeded;
    }
    ErrorClassification::Transient
}

/// Classify an upstream error by HTTP status and response body.
///
/// 429 and 402 are quota; 401/403 are credential failures unless the body
/// carries a content-policy marker; other 4xx bodies are read for markers.
/// 5xx and anything else is transient whatever the body says.
pub fn classify_status(status: u16, body: &str) -> ErrorClassification {
    match status {
        429 | 402 => ErrorClassification::QuotaExceeded,
        401 | 403 => match classify_reason(body) {
            ErrorClassification::Rejected => ErrorClassification::Rejected,
            _ => ErrorClassification::Auth,
        },
        400..=499 => classify_reason(body),
        _ => ErrorClassification::Transient,
    }
}

/// Classify a Midjourney-proxy submit code.
///
/// 1 (submitted) and 22 (queued) are accepted and never reach here; 24 is
/// the banned-prompt code; 23 is a full queue. Other codes fall back to the
/// description.
pub fn classify_midjourney_code(code: i64, description: &str) -> ErrorClassification {
    match code {
        24 => ErrorClassification::Rejected,
        23 => ErrorClassification::QuotaExceeded,
        _ => classify_reason(description),
    }
}

fn excerpt(body: &str) -> String {
    const MAX: usize = 512;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
