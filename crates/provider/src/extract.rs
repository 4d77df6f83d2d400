//! Artifact extraction strategies
//!
//! Pure functions over raw response text. Each provider dialect hides its
//! images somewhere different: markdown links inside a chat completion,
//! fenced JSON blocks with an `image` array, OpenAI-style `data[]` arrays,
//! `base64,` data URLs, or Midjourney-proxy job records. Misses return an
//! empty list; only `base64_payload` reports a miss as an error.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ExtractError;

static MARKDOWN_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[[^\]]*\]\((https?://[^)\s]+)\)").expect("markdown image regex")
});

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fenced block regex")
});

static LOOSE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^)\s"'<>]+"#).expect("loose url regex"));

const BASE64_MARKER: &str = "base64,";

/// Undo the JSON-escaped ampersand some relays leave in URLs.
pub fn normalize_url(url: &str) -> String {
    url.replace("\\u0026", "&")
}

/// Text content of a chat completion, or the raw body when it is not one.
///
/// Joins the content of every choice in order. Array-form content keeps
/// text parts as-is and renders `image_url` parts as markdown images so the
/// markdown strategy picks them up.
pub fn chat_content(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    let Some(choices) = value.get("choices").and_then(Value::as_array) else {
        return body.to_string();
    };

    let mut parts = Vec::new();
    for choice in choices {
        match choice.pointer("/message/content") {
            Some(Value::String(text)) => parts.push(text.clone()),
            Some(Value::Array(items)) => {
                for item in items {
                    if let Some(text) = item.get("text").and_then(Value::as_str) {
                        parts.push(text.to_string());
                    } else if let Some(url) = item.pointer("/image_url/url").and_then(Value::as_str)
                    {
                        parts.push(format!("![image]({url})"));
                    }
                }
            }
            _ => {}
        }
    }

    if parts.is_empty() {
        body.to_string()
    } else {
        parts.join("\n")
    }
}

/// URLs of `![alt](http(s)://...)` images, in document order.
pub fn markdown_image_urls(content: &str) -> Vec<String> {
    MARKDOWN_IMAGE
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| normalize_url(m.as_str()))
        .collect()
}

/// `image` array entries of every fenced block that parses as JSON.
pub fn fenced_json_images(content: &str) -> Vec<String> {
    let mut urls = Vec::new();
    for block in FENCED_BLOCK.captures_iter(content) {
        let Some(inner) = block.get(1) else { continue };
        let Ok(value) = serde_json::from_str::<Value>(inner.as_str().trim()) else {
            continue;
        };
        match value.get("image") {
            Some(Value::Array(items)) => {
                for item in items {
                    if let Some(url) = item.as_str().filter(|u| !u.is_empty()) {
                        urls.push(normalize_url(url));
                    }
                }
            }
            Some(Value::String(url)) if !url.is_empty() => urls.push(normalize_url(url)),
            _ => {}
        }
    }
    urls
}

/// Any `http(s)://` run up to the next `)`, quote or whitespace.
pub fn loose_urls(content: &str) -> Vec<String> {
    LOOSE_URL
        .find_iter(content)
        .map(|m| normalize_url(m.as_str()))
        .collect()
}

/// The chat-content URL strategy: markdown images plus fenced JSON images,
/// falling back to loose URL matching only when both found nothing.
pub fn content_urls(body: &str) -> Vec<String> {
    let urls = strict_content_urls(body);
    if urls.is_empty() {
        return loose_urls(&chat_content(body));
    }
    urls
}

/// Markdown images plus fenced JSON images, without the loose fallback.
pub fn strict_content_urls(body: &str) -> Vec<String> {
    let content = chat_content(body);
    let mut urls = markdown_image_urls(&content);
    urls.extend(fenced_json_images(&content));
    urls
}

#[derive(Debug, Deserialize)]
struct DataEnvelope {
    #[serde(default)]
    data: Option<Vec<DataItem>>,
}

#[derive(Debug, Deserialize)]
struct DataItem {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

fn data_items(body: &str) -> Vec<DataItem> {
    serde_json::from_str::<DataEnvelope>(body)
        .ok()
        .and_then(|env| env.data)
        .unwrap_or_default()
}

/// `data[].url` of an OpenAI-style image response.
pub fn structured_urls(body: &str) -> Vec<String> {
    data_items(body)
        .into_iter()
        .filter_map(|item| item.url)
        .filter(|url| !url.is_empty())
        .map(|url| normalize_url(&url))
        .collect()
}

/// `data[].b64_json` of an OpenAI-style image response.
pub fn structured_base64(body: &str) -> Vec<String> {
    data_items(body)
        .into_iter()
        .filter_map(|item| item.b64_json)
        .filter(|b64| !b64.is_empty())
        .collect()
}

/// Payload after the first `base64,` marker, up to a `)` if one follows.
pub fn base64_payload(content: &str) -> Result<Vec<String>, ExtractError> {
    let start = content
        .find(BASE64_MARKER)
        .ok_or(ExtractError::MarkerNotFound)?
        + BASE64_MARKER.len();
    let rest = &content[start..];
    let payload = match rest.find(')') {
        Some(end) => &rest[..end],
        None => rest,
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![payload.to_string()])
}

/// Midjourney-proxy submit acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Proxy status code; absent codes are read as 1 (submitted).
    pub code: i64,
    pub description: String,
    pub job_id: Option<String>,
}

/// Midjourney submit codes that mean the job was taken.
pub const MIDJOURNEY_ACCEPTED: &[i64] = &[1, 22];

impl SubmitReceipt {
    pub fn is_accepted(&self) -> bool {
        MIDJOURNEY_ACCEPTED.contains(&self.code) && self.job_id.is_some()
    }
}

/// Parse a Midjourney-proxy submit body. The job id may be a string or a
/// number.
pub fn midjourney_submit(body: &str) -> Option<SubmitReceipt> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    let code = value.get("code").and_then(Value::as_i64).unwrap_or(1);
    let description = value
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let job_id = match value.get("result") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };
    Some(SubmitReceipt {
        code,
        description,
        job_id,
    })
}

/// Midjourney-proxy job record returned by the fetch endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub status: Option<String>,
    pub fail_reason: Option<String>,
    pub urls: Vec<String>,
}

impl JobSnapshot {
    pub fn is_failed(&self) -> bool {
        self.status.as_deref() == Some("FAILURE")
    }
}

/// Parse a Midjourney-proxy fetch body: `imageUrls[].url` in order, falling
/// back to the single `imageUrl` field.
pub fn midjourney_job(body: &str) -> Option<JobSnapshot> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut urls = Vec::new();
    if let Some(items) = value.get("imageUrls").and_then(Value::as_array) {
        for item in items {
            let url = item
                .get("url")
                .and_then(Value::as_str)
                .or_else(|| item.as_str());
            if let Some(url) = url.filter(|u| !u.is_empty()) {
                urls.push(normalize_url(url));
            }
        }
    }
    if urls.is_empty()
        && let Some(url) = text("imageUrl")
    {
        urls.push(normalize_url(&url));
    }

    Some(JobSnapshot {
        status: text("status"),
        fail_reason: text("failReason"),
        urls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_body(content: &str) -> String {
        serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    #[test]
    fn markdown_image_in_plain_text() {
        assert_eq!(
            content_urls("![x](https://a.test/i.png)"),
            vec!["https://a.test/i.png"]
        );
    }

    #[test]
    fn markdown_and_fenced_json_accumulate_in_order() {
        let content = "Here you go ![x](https://a.test/i.png)\n```json\n{\"image\":[\"https://b.test/1.png\",\"https://b.test/2.png\"]}\n```";
        assert_eq!(
            content_urls(&chat_body(content)),
            vec![
                "https://a.test/i.png",
                "https://b.test/1.png",
                "https://b.test/2.png"
            ]
        );
    }

    #[test]
    fn envelope_is_unwrapped_before_matching() {
        let body = chat_body("![cat](https://a.test/cat.png)");
        assert_eq!(content_urls(&body), vec!["https://a.test/cat.png"]);
    }

    #[test]
    fn array_content_image_parts_become_markdown() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": [
                {"type": "text", "text": "done"},
                {"type": "image_url", "image_url": {"url": "https://a.test/p.png"}}
            ]}}]
        })
        .to_string();
        assert_eq!(content_urls(&body), vec!["https://a.test/p.png"]);
    }

    #[test]
    fn loose_fallback_only_when_nothing_else_matched() {
        let content = "see (https://c.test/x.png) for the result";
        assert_eq!(content_urls(content), vec!["https://c.test/x.png"]);

        let mixed = "![a](https://a.test/i.png) and https://c.test/ignored.png";
        assert_eq!(content_urls(mixed), vec!["https://a.test/i.png"]);
    }

    #[test]
    fn escaped_ampersands_are_restored() {
        let content = r"![x](https://a.test/i.png?a=1\u0026b=2)";
        assert_eq!(content_urls(content), vec!["https://a.test/i.png?a=1&b=2"]);
    }

    #[test]
    fn fenced_blocks_that_are_not_json_are_skipped() {
        let content = "```\nnot json\n```\n```json\n{\"image\":[\"https://b.test/1.png\", \"\"]}\n```";
        assert_eq!(fenced_json_images(content), vec!["https://b.test/1.png"]);
    }

    #[test]
    fn no_urls_yields_empty_list() {
        assert!(content_urls(&chat_body("I cannot draw that.")).is_empty());
        assert!(content_urls("").is_empty());
    }

    #[test]
    fn base64_up_to_closing_paren() {
        assert_eq!(
            base64_payload("![img](data:image/png;base64,AAAA)").unwrap(),
            vec!["AAAA"]
        );
        assert_eq!(base64_payload("...base64,AAAA)").unwrap(), vec!["AAAA"]);
    }

    #[test]
    fn base64_to_end_without_paren() {
        assert_eq!(
            base64_payload("data:image/png;base64,QUJD").unwrap(),
            vec!["QUJD"]
        );
    }

    #[test]
    fn base64_missing_marker_is_an_error() {
        assert_eq!(
            base64_payload("no payload here"),
            Err(ExtractError::MarkerNotFound)
        );
    }

    #[test]
    fn base64_empty_payload_is_not_an_artifact() {
        assert!(base64_payload("base64,)").unwrap().is_empty());
    }

    #[test]
    fn structured_url_and_base64_are_independent() {
        let body = r#"{"data":[{"url":"https://x"},{"b64_json":"BBBB"}]}"#;
        assert_eq!(structured_urls(body), vec!["https://x"]);
        assert_eq!(structured_base64(body), vec!["BBBB"]);
    }

    #[test]
    fn structured_skips_empty_and_null() {
        let body = r#"{"data":[{"url":""},{"url":null,"b64_json":""}]}"#;
        assert!(structured_urls(body).is_empty());
        assert!(structured_base64(body).is_empty());
        assert!(structured_urls(r#"{"data":null}"#).is_empty());
        assert!(structured_urls("garbage").is_empty());
    }

    #[test]
    fn midjourney_submit_accepts_numeric_id_without_code() {
        let receipt = midjourney_submit(r#"{"result":42}"#).unwrap();
        assert_eq!(receipt.job_id.as_deref(), Some("42"));
        assert!(receipt.is_accepted());
    }

    #[test]
    fn midjourney_submit_rejected_code() {
        let receipt =
            midjourney_submit(r#"{"code":24,"description":"banned prompt","result":null}"#).unwrap();
        assert_eq!(receipt.code, 24);
        assert!(!receipt.is_accepted());
        assert_eq!(receipt.description, "banned prompt");
    }

    #[test]
    fn midjourney_submit_queued_is_accepted() {
        let receipt = midjourney_submit(r#"{"code":22,"result":"1700000000001"}"#).unwrap();
        assert!(receipt.is_accepted());
    }

    #[test]
    fn midjourney_job_urls_in_order() {
        let body = r#"{"status":"SUCCESS","imageUrls":[{"url":"https://m.test/a.png"},{"url":"https://m.test/b.png"}]}"#;
        let job = midjourney_job(body).unwrap();
        assert_eq!(job.urls, vec!["https://m.test/a.png", "https://m.test/b.png"]);
        assert!(!job.is_failed());
    }

    #[test]
    fn midjourney_job_falls_back_to_single_url() {
        let body = r#"{"status":"SUCCESS","imageUrls":[],"imageUrl":"https://m.test/grid.png"}"#;
        assert_eq!(midjourney_job(body).unwrap().urls, vec!["https://m.test/grid.png"]);
    }

    #[test]
    fn midjourney_job_failure() {
        let body = r#"{"status":"FAILURE","failReason":"Banned prompt detected"}"#;
        let job = midjourney_job(body).unwrap();
        assert!(job.is_failed());
        assert_eq!(job.fail_reason.as_deref(), Some("Banned prompt detected"));
        assert!(job.urls.is_empty());
    }
}
