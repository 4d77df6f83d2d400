//! One upstream call: build, send, time, parse, stamp
//!
//! The dispatcher owns no credentials and no retry logic. A transport
//! failure (connect, timeout, body read) comes back as `DispatchError`; any
//! HTTP status, 2xx or not, comes back as a `Response` with the parser's
//! verdict attached.

use std::time::{Duration, Instant};

use provider::{ModelCredential, Parser, Response, now_millis};
use reqwest::header::AUTHORIZATION;
use tracing::{info, warn};

use crate::content::{RequestBody, RequestContent};
use crate::error::{DispatchError, Result};

/// Upper bound on the body excerpt logged for non-200 responses.
const LOG_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `content` with `credential` and parse the reply with `parser`.
    pub async fn dispatch(
        &self,
        credential: &ModelCredential,
        content: &dyn RequestContent,
        parser: Parser,
        task_id: &str,
    ) -> Result<Response> {
        let supplier = credential.supplier_name();
        let path = content.path();
        let method = content.method();
        let url = credential.supplier().url(&path);
        let url = reqwest::Url::parse(&url)
            .map_err(|e| DispatchError::InvalidUrl(format!("{url}: {e}")))?;

        let body = content.body(credential)?;
        let request = self
            .client
            .request(method.clone(), url)
            .header(AUTHORIZATION, credential.credential.secret.bearer())
            .timeout(self.timeout);
        let request = match body {
            RequestBody::Json(value) => request.json(&value),
            RequestBody::Multipart(form) => request.multipart(form),
            RequestBody::Empty => request,
        };

        let started_at = now_millis();
        let start = Instant::now();
        let upstream = match request.send().await {
            Ok(upstream) => upstream,
            Err(e) => return Err(transport_error(supplier, credential, &path, e)),
        };
        let latency = start.elapsed();
        let status = upstream.status().as_u16();
        let body = match upstream.text().await {
            Ok(body) => body,
            Err(e) => return Err(transport_error(supplier, credential, &path, e)),
        };

        let mut response = Response::new(parser.kind());
        response.supplier = supplier.to_string();
        response.descriptor = credential.descriptor().to_string();
        response.model = credential.model.clone();
        response.task_id = Some(task_id.to_string());
        response.method = method.to_string();
        response.path = path;
        response.status = status;
        response.latency_ms = latency.as_millis() as u64;
        response.started_at = started_at;
        response.finished_at = now_millis();
        response.body = body;
        parser.parse(&mut response);

        metrics::counter!(
            "gateway_upstream_requests_total",
            "supplier" => supplier.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        metrics::histogram!(
            "gateway_upstream_latency_seconds",
            "supplier" => supplier.to_string()
        )
        .record(latency.as_secs_f64());

        if status == 200 {
            info!(
                task_id,
                supplier,
                credential = %response.descriptor,
                method = %response.method,
                path = %response.path,
                status,
                latency_ms = response.latency_ms,
                urls = response.urls.len(),
                base64s = response.base64_count(),
                succeeded = response.succeed(),
                "upstream call"
            );
        } else {
            warn!(
                task_id,
                supplier,
                credential = %response.descriptor,
                method = %response.method,
                path = %response.path,
                status,
                latency_ms = response.latency_ms,
                body = truncate(&response.body, LOG_BODY_LIMIT),
                "upstream call returned non-200"
            );
        }

        Ok(response)
    }
}

fn transport_error(
    supplier: &str,
    credential: &ModelCredential,
    path: &str,
    source: reqwest::Error,
) -> DispatchError {
    metrics::counter!(
        "gateway_transport_errors_total",
        "supplier" => supplier.to_string()
    )
    .increment(1);
    warn!(
        supplier,
        credential = credential.descriptor(),
        path,
        timeout = source.is_timeout(),
        error = %source,
        "upstream transport error"
    );
    DispatchError::Transport {
        supplier: supplier.to_string(),
        source,
    }
}

fn truncate(body: &str, limit: usize) -> &str {
    if body.len() <= limit {
        return body;
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
