//! Per-provider parsing strategies
//!
//! A `Parser` is chosen per endpoint family. It reads the status and raw body
//! already stamped on a `Response` by the dispatch pipeline, extracts
//! artifacts in that provider's dialect, and attaches a structured
//! `UpstreamError` whenever the response does not satisfy its predicate.

use tracing::debug;

use crate::classify::{ErrorClassification, UpstreamError, classify_midjourney_code, classify_reason};
use crate::extract;
use crate::response::{Response, ResponseKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parser {
    /// Plain chat: nothing to extract, HTTP 200 is success.
    PlainChat,
    /// Image URLs inside chat-completion content.
    ChatContent,
    /// Chat content carrying URLs and/or inline base64 images.
    ChatArtifacts,
    /// OpenAI-style `data[]` with `url` / `b64_json`.
    Structured,
    /// Image edits: `data[]` first, chat-content dialect from relays that
    /// answer edits in chat form.
    ImageEdit,
    /// Midjourney-proxy submit acknowledgement.
    MidjourneySubmit,
    /// Midjourney-proxy job fetch.
    MidjourneyFetch,
}

impl Parser {
    /// The success predicate responses parsed by this strategy use.
    pub fn kind(&self) -> ResponseKind {
        match self {
            Parser::PlainChat => ResponseKind::HttpOk,
            Parser::MidjourneySubmit => ResponseKind::Submitted,
            _ => ResponseKind::Artifacts,
        }
    }

    /// Populate artifacts, job id and error from `response.status` and
    /// `response.body`.
    ///
    /// Non-200 bodies are still scanned, but only with the strict strategies:
    /// the loose URL fallback would pick documentation links out of error
    /// messages.
    pub fn parse(&self, response: &mut Response) {
        let ok = response.status == 200;
        let body = response.body.as_str();

        match self {
            Parser::PlainChat => {}
            Parser::ChatContent => {
                response.urls = content_urls(body, ok);
            }
            Parser::ChatArtifacts => {
                response.urls = content_urls(body, ok);
                response.base64s =
                    extract::base64_payload(&extract::chat_content(body)).unwrap_or_default();
            }
            Parser::Structured => {
                response.urls = extract::structured_urls(body);
                response.base64s = extract::structured_base64(body);
            }
            Parser::ImageEdit => {
                response.urls = extract::structured_urls(body);
                response.base64s = extract::structured_base64(body);
                if !response.has_artifacts() {
                    response.urls = content_urls(body, ok);
                }
            }
            Parser::MidjourneySubmit => {
                if let Some(receipt) = extract::midjourney_submit(body) {
                    if receipt.is_accepted() {
                        response.job_id = receipt.job_id;
                    } else if ok {
                        response.error = Some(
                            UpstreamError::new(
                                classify_midjourney_code(receipt.code, &receipt.description),
                                receipt.description,
                            )
                            .with_code(receipt.code),
                        );
                    }
                }
            }
            Parser::MidjourneyFetch => {
                if let Some(job) = extract::midjourney_job(body) {
                    debug!(status = ?job.status, urls = job.urls.len(), "midjourney job fetched");
                    if job.is_failed() {
                        let reason = job.fail_reason.unwrap_or_else(|| "job failed".into());
                        response.error = Some(UpstreamError::new(classify_reason(&reason), reason));
                    } else if job.urls.is_empty() && ok {
                        let status = job.status.unwrap_or_else(|| "UNKNOWN".into());
                        response.error = Some(UpstreamError::new(
                            ErrorClassification::Transient,
                            format!("job not finished: {status}"),
                        ));
                    }
                    response.urls = job.urls;
                }
            }
        }

        if response.succeed() {
            response.error = None;
        } else if response.error.is_none() {
            response.error = Some(failure_for(response));
        }
    }
}

fn content_urls(body: &str, ok: bool) -> Vec<String> {
    if ok {
        extract::content_urls(body)
    } else {
        extract::strict_content_urls(body)
    }
}

fn failure_for(response: &Response) -> UpstreamError {
    if response.status != 200 {
        return UpstreamError::from_status(response.status, &response.body);
    }
    let content = extract::chat_content(&response.body);
    UpstreamError::new(
        ErrorClassification::Transient,
        format!("no artifacts in response: {}", excerpt(&content)),
    )
}

fn excerpt(text: &str) -> String {
    text.chars().take(200).collect()
}
