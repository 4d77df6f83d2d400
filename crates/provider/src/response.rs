//! The per-call response record
//!
//! Every endpoint family produces the same `Response` shape; the
//! `ResponseKind` tag selects which success predicate applies. A Response is
//! created fresh for one upstream call, filled in by the dispatch pipeline
//! and the chosen parser, then handed to the outer retry loop, which owns it
//! from then on.

use serde::Serialize;

use crate::classify::UpstreamError;

/// Which success predicate a response is judged by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Succeeds when at least one URL or base64 payload was extracted.
    Artifacts,
    /// Succeeds on HTTP 200 alone (plain chat).
    HttpOk,
    /// Succeeds when an async job was accepted and a job id was issued.
    Submitted,
}

/// Result of one upstream call.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub kind: ResponseKind,
    pub supplier: String,
    pub descriptor: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    /// Unix milliseconds just before the request was sent.
    pub started_at: u64,
    /// Unix milliseconds once the body was fully read.
    pub finished_at: u64,
    #[serde(skip)]
    pub body: String,
    pub urls: Vec<String>,
    #[serde(skip)]
    pub base64s: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UpstreamError>,
}

impl Response {
    pub fn new(kind: ResponseKind) -> Self {
        Self {
            kind,
            supplier: String::new(),
            descriptor: String::new(),
            model: String::new(),
            task_id: None,
            method: String::new(),
            path: String::new(),
            status: 0,
            latency_ms: 0,
            started_at: 0,
            finished_at: 0,
            body: String::new(),
            urls: Vec::new(),
            base64s: Vec::new(),
            job_id: None,
            error: None,
        }
    }

    /// Whether this call achieved what its endpoint family asked for.
    pub fn succeed(&self) -> bool {
        match self.kind {
            ResponseKind::Artifacts => self.has_artifacts(),
            ResponseKind::HttpOk => self.status == 200,
            ResponseKind::Submitted => {
                self.status == 200 && self.job_id.as_deref().is_some_and(|id| !id.is_empty())
            }
        }
    }

    pub fn has_artifacts(&self) -> bool {
        !self.urls.is_empty() || !self.base64s.is_empty()
    }

    /// Number of base64 payloads, for logs and history rows that skip the
    /// payloads themselves.
    pub fn base64_count(&self) -> usize {
        self.base64s.len()
    }
}

/// An accepted async job: the provider's id plus the submit call that
/// produced it.
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    pub job_id: String,
    pub submitted_at: u64,
    pub response: Response,
}

impl SubmitResponse {
    /// Accept a submit response, or hand it back when it was not accepted
    /// with a job id.
    pub fn accepted(response: Response) -> Result<Self, Response> {
        if !response.succeed() {
            return Err(response);
        }
        match response.job_id.clone() {
            Some(job_id) => Ok(Self {
                job_id,
                submitted_at: response.finished_at,
                response,
            }),
            None => Err(response),
        }
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifacts_kind_needs_url_or_base64() {
        let mut r = Response::new(ResponseKind::Artifacts);
        r.status = 200;
        assert!(!r.succeed(), "200 alone is not enough for an image call");

        r.urls.push("https://a.test/i.png".into());
        assert!(r.succeed());

        let mut r = Response::new(ResponseKind::Artifacts);
        r.status = 500;
        r.base64s.push("AAAA".into());
        assert!(r.succeed(), "artifacts count even on non-200");
    }

    #[test]
    fn http_ok_kind_ignores_artifacts() {
        let mut r = Response::new(ResponseKind::HttpOk);
        r.status = 200;
        assert!(r.succeed());
        r.status = 201;
        assert!(!r.succeed());
    }

    #[test]
    fn submitted_kind_needs_job_id() {
        let mut r = Response::new(ResponseKind::Submitted);
        r.status = 200;
        assert!(!r.succeed());
        r.job_id = Some(String::new());
        assert!(!r.succeed(), "empty id is not an id");
        r.job_id = Some("42".into());
        assert!(r.succeed());
        r.status = 500;
        assert!(!r.succeed());
    }

    #[test]
    fn submit_response_requires_acceptance() {
        let mut r = Response::new(ResponseKind::Submitted);
        r.status = 200;
        assert!(SubmitResponse::accepted(r.clone()).is_err());

        r.job_id = Some("42".into());
        r.finished_at = 1_700_000_000_000;
        let submit = SubmitResponse::accepted(r).unwrap();
        assert_eq!(submit.job_id, "42");
        assert_eq!(submit.submitted_at, 1_700_000_000_000);
    }

    #[test]
    fn serialized_row_skips_payloads() {
        let mut r = Response::new(ResponseKind::Artifacts);
        r.body = "raw".into();
        r.base64s.push("AAAA".into());
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("body").is_none());
        assert!(json.get("base64s").is_none());
        assert_eq!(json["kind"], "artifacts");
    }
}
