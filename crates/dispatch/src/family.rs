//! Endpoint families and the gateway that runs them
//!
//! A family fixes four things: where credentials come from (a rotation pool
//! or a static fallback list), the request shape, the parsing strategy and
//! the failure policy. `Gateway::run` validates the job, picks the family's
//! source and drives `run_attempts` with a per-credential attempt closure.

use std::sync::Arc;
use std::time::Duration;

use common::ShutdownSignal;
use provider::{ModelCredential, Parser};
use rotation::{PoolKind, PoolSet};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::content::{
    ChatRequest, ImageEditRequest, ImageGenerationRequest, MidjourneySubmit, RequestContent,
    VolcGenerationRequest,
};
use crate::error::{DispatchError, Result};
use crate::input::InputImage;
use crate::observer::Observers;
use crate::pipeline::Dispatcher;
use crate::retry::{AttemptFuture, CredentialSource, FailurePolicy, Outcome, StaticSource, run_attempts};
use crate::submit_poll::SubmitPoll;

/// Upper bound on images requested per job.
const MAX_IMAGES_PER_JOB: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Chat,
    DeepSearch,
    GptFastEdit,
    GptSlowEdit,
    Gemini,
    GptImage,
    Midjourney,
    Volc,
}

impl Family {
    pub fn label(&self) -> &'static str {
        match self {
            Family::Chat => "chat",
            Family::DeepSearch => "deep_search",
            Family::GptFastEdit => "gpt_fast_edit",
            Family::GptSlowEdit => "gpt_slow_edit",
            Family::Gemini => "gemini",
            Family::GptImage => "gpt_image",
            Family::Midjourney => "midjourney",
            Family::Volc => "volc",
        }
    }

    /// The rotation pool this family draws from; `None` for static lists.
    pub fn pool(&self) -> Option<PoolKind> {
        match self {
            Family::Chat => Some(PoolKind::Chat),
            Family::DeepSearch => Some(PoolKind::DeepSearch),
            Family::GptFastEdit => Some(PoolKind::FastEdit),
            Family::GptSlowEdit => Some(PoolKind::SlowEdit),
            Family::Midjourney => Some(PoolKind::Midjourney),
            Family::Gemini | Family::GptImage | Family::Volc => None,
        }
    }

    pub fn requires_images(&self) -> bool {
        matches!(self, Family::GptFastEdit | Family::GptSlowEdit)
    }

    fn policy(&self, cooldown: Duration) -> FailurePolicy {
        match self {
            Family::Midjourney => FailurePolicy::BanOnAnyFailure { cooldown },
            Family::Chat | Family::DeepSearch | Family::GptFastEdit | Family::GptSlowEdit => {
                FailurePolicy::BanOnQuota { cooldown }
            }
            Family::Gemini | Family::GptImage | Family::Volc => FailurePolicy::NoBan,
        }
    }
}

fn default_n() -> u32 {
    1
}

/// One generation request as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub family: Family,
    pub prompt: String,
    /// Input images as data URLs or bare base64.
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default = "default_n")]
    pub n: u32,
}

impl Job {
    pub fn new(family: Family, prompt: impl Into<String>) -> Self {
        Self {
            family,
            prompt: prompt.into(),
            images: Vec::new(),
            size: None,
            quality: None,
            n: 1,
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    /// Reject malformed jobs and decode their images.
    pub fn validate(&self) -> Result<Vec<InputImage>> {
        if self.prompt.trim().is_empty() {
            return Err(DispatchError::InvalidJob("prompt is empty".into()));
        }
        if self.n == 0 || self.n > MAX_IMAGES_PER_JOB {
            return Err(DispatchError::InvalidJob(format!(
                "n must be between 1 and {MAX_IMAGES_PER_JOB}, got {}",
                self.n
            )));
        }
        if self.family.requires_images() && self.images.is_empty() {
            return Err(DispatchError::InvalidJob(format!(
                "{} requires at least one input image",
                self.family.label()
            )));
        }
        self.images
            .iter()
            .map(|image| InputImage::from_data_url(image))
            .collect()
    }
}

/// Static ordered credential lists for the families without a pool.
#[derive(Debug, Clone, Default)]
pub struct FallbackLists {
    pub gemini: Vec<ModelCredential>,
    pub gpt_image: Vec<ModelCredential>,
    pub volc: Vec<ModelCredential>,
}

#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    /// How long a failing supplier stays banned.
    pub ban_duration: Duration,
    /// Wait between an accepted submit and its fetch.
    pub poll_delay: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            ban_duration: Duration::from_secs(600),
            poll_delay: Duration::from_secs(30),
        }
    }
}

type Attempt = Box<dyn FnMut(ModelCredential) -> AttemptFuture + Send>;

struct Inner {
    dispatcher: Dispatcher,
    submit_poll: SubmitPoll,
    pools: PoolSet,
    fallback: FallbackLists,
    observers: Observers,
    shutdown: ShutdownSignal,
    settings: GatewaySettings,
}

/// Runs jobs for every endpoint family. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    pub fn new(
        dispatcher: Dispatcher,
        pools: PoolSet,
        fallback: FallbackLists,
        observers: Observers,
        shutdown: ShutdownSignal,
        settings: GatewaySettings,
    ) -> Self {
        let submit_poll = SubmitPoll::new(dispatcher.clone(), settings.poll_delay);
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                submit_poll,
                pools,
                fallback,
                observers,
                shutdown,
                settings,
            }),
        }
    }

    pub fn pools(&self) -> &PoolSet {
        &self.inner.pools
    }

    /// Run `job` through its family's outer loop.
    ///
    /// Fails only for malformed jobs and unconfigured pools, both before any
    /// credential is consumed. Upstream failures are in the `Outcome`.
    pub async fn run(&self, job: &Job, task_id: &str) -> Result<Outcome> {
        let images = job.validate()?;
        let mut source = self.source(job.family)?;
        let policy = job.family.policy(self.inner.settings.ban_duration);
        info!(task_id, family = job.family.label(), images = images.len(), "task started");

        let attempt = self.attempt(job, images, task_id);
        Ok(run_attempts(
            source.as_mut(),
            policy,
            task_id,
            &self.inner.shutdown,
            &self.inner.observers,
            attempt,
        )
        .await)
    }

    fn source(&self, family: Family) -> Result<Box<dyn CredentialSource>> {
        if let Some(kind) = family.pool() {
            return Ok(Box::new(self.inner.pools.get(kind)?.begin()));
        }
        let fallback = &self.inner.fallback;
        let list = match family {
            Family::Gemini => &fallback.gemini,
            Family::GptImage => &fallback.gpt_image,
            _ => &fallback.volc,
        };
        Ok(Box::new(StaticSource::new(list.clone())))
    }

    fn attempt(&self, job: &Job, images: Vec<InputImage>, task_id: &str) -> Attempt {
        let prompt = job.prompt.clone();
        match job.family {
            Family::Chat => self.single(
                ChatRequest::new(prompt).with_images(images),
                Parser::PlainChat,
                task_id,
            ),
            Family::DeepSearch => self.single(
                ChatRequest::new(prompt).with_images(images),
                Parser::ChatContent,
                task_id,
            ),
            Family::Gemini => self.single(
                ChatRequest::new(prompt).with_images(images),
                Parser::ChatArtifacts,
                task_id,
            ),
            Family::GptFastEdit | Family::GptSlowEdit => self.single(
                ImageEditRequest {
                    prompt,
                    images,
                    size: job.size.clone(),
                    quality: job.quality.clone(),
                    n: job.n,
                },
                Parser::ImageEdit,
                task_id,
            ),
            Family::GptImage => self.single(
                ImageGenerationRequest {
                    prompt,
                    size: job.size.clone(),
                    quality: job.quality.clone(),
                    n: job.n,
                },
                Parser::Structured,
                task_id,
            ),
            Family::Volc => self.single(
                VolcGenerationRequest {
                    prompt,
                    size: job.size.clone(),
                    images,
                },
                Parser::Structured,
                task_id,
            ),
            Family::Midjourney => {
                let submit = Arc::new(MidjourneySubmit { prompt, images });
                let orchestrator = self.inner.submit_poll.clone();
                let observers = self.inner.observers.clone();
                let task_id: Arc<str> = task_id.into();
                Box::new(move |credential| {
                    let submit = Arc::clone(&submit);
                    let orchestrator = orchestrator.clone();
                    let observers = observers.clone();
                    let task_id = Arc::clone(&task_id);
                    Box::pin(async move {
                        orchestrator
                            .run(&credential, submit.as_ref(), &task_id, &observers)
                            .await
                    })
                })
            }
        }
    }

    fn single<C>(&self, content: C, parser: Parser, task_id: &str) -> Attempt
    where
        C: RequestContent + 'static,
    {
        let content = Arc::new(content);
        let dispatcher = self.inner.dispatcher.clone();
        let task_id: Arc<str> = task_id.into();
        Box::new(move |credential| {
            let content = Arc::clone(&content);
            let dispatcher = dispatcher.clone();
            let task_id = Arc::clone(&task_id);
            Box::pin(async move {
                dispatcher
                    .dispatch(&credential, content.as_ref(), parser, &task_id)
                    .await
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{LifecycleEvent, RecordingObserver};
    use crate::retry::Termination;
    use crate::testutil::spawn_upstream;
    use axum::extract::{Multipart, Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::Json;
    use axum::routing::{get, post};
    use provider::Supplier;
    use rotation::{LivenessPolicy, RotationPool};
    use serde_json::json;
    use std::sync::Mutex;

    /// Which bearer tokens hit the mock upstream, in order.
    #[derive(Clone, Default)]
    struct Hits(Arc<Mutex<Vec<String>>>);

    impl Hits {
        fn push(&self, headers: &HeaderMap) -> String {
            let token = headers["authorization"]
                .to_str()
                .unwrap()
                .trim_start_matches("Bearer sk-")
                .to_string();
            self.0.lock().unwrap().push(token.clone());
            token
        }

        fn tokens(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Credentials `<supplier>-<i>`, one supplier each, in one tier.
    fn tier(base: &str, suppliers: &[&str]) -> Vec<ModelCredential> {
        suppliers
            .iter()
            .map(|name| {
                let supplier = Arc::new(Supplier::new(*name, base));
                ModelCredential::new(supplier, *name, format!("sk-{name}"), "model-x")
            })
            .collect()
    }

    fn gateway(pools: PoolSet, fallback: FallbackLists, observers: Observers) -> Gateway {
        Gateway::new(
            Dispatcher::new(reqwest::Client::new(), Duration::from_secs(5)),
            pools,
            fallback,
            observers,
            ShutdownSignal::never(),
            GatewaySettings {
                ban_duration: Duration::from_secs(600),
                poll_delay: Duration::from_millis(10),
            },
        )
    }

    fn pools_with(kind: PoolKind, credentials: Vec<ModelCredential>) -> (PoolSet, Arc<RotationPool>) {
        let pool = Arc::new(RotationPool::new(
            kind.label(),
            vec![credentials],
            LivenessPolicy::Disabled,
        ));
        let mut set = PoolSet::new();
        set.insert(kind, pool.clone());
        (set, pool)
    }

    #[tokio::test]
    async fn fails_twice_then_markdown_success_stops_early() {
        let hits = Hits::default();
        let app = axum::Router::new()
            .route(
                "/v1/chat/completions",
                post(|State(hits): State<Hits>, headers: HeaderMap| async move {
                    match hits.push(&headers).as_str() {
                        "a" | "b" => (StatusCode::INTERNAL_SERVER_ERROR, "upstream error").into_response(),
                        _ => Json(json!({
                            "choices": [{ "message": { "content": "![r](https://cdn.test/c.png)" } }]
                        }))
                        .into_response(),
                    }
                }),
            )
            .with_state(hits.clone());
        let base = spawn_upstream(app).await;
        let (pools, pool) = pools_with(PoolKind::DeepSearch, tier(&base, &["a", "b", "c", "d"]));
        let recorder = Arc::new(RecordingObserver::default());
        let gw = gateway(pools, FallbackLists::default(), Observers::new().with(recorder.clone()));

        let outcome = gw
            .run(&Job::new(Family::DeepSearch, "find a cat picture"), "task-1")
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Succeeded);
        let flags: Vec<bool> = outcome.responses.iter().map(|r| r.succeed()).collect();
        assert_eq!(flags, vec![false, false, true]);
        assert_eq!(hits.tokens(), vec!["a", "b", "c"]);
        assert_eq!(outcome.winner().unwrap().urls, vec!["https://cdn.test/c.png"]);
        // 5xx is not a quota failure, nobody gets banned
        assert!(!pool.is_banned("a"));
        assert_eq!(pool.active_sequences(), 0);
        assert!(matches!(
            recorder.events().as_slice(),
            [LifecycleEvent::Succeeded { descriptor, .. }] if descriptor == "c"
        ));
    }

    #[tokio::test]
    async fn free_text_failures_move_on_to_next_credential() {
        let first_replies = [
            (
                StatusCode::OK,
                json!({ "choices": [{ "message": { "content": "Search is case-sensitive; I found no matching picture." } }] }),
            ),
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": { "message": "moderation service temporarily unavailable" } }),
            ),
        ];

        for (status, reply) in first_replies {
            let hits = Hits::default();
            let app = axum::Router::new()
                .route(
                    "/v1/chat/completions",
                    post(move |State(hits): State<Hits>, headers: HeaderMap| {
                        let reply = reply.clone();
                        async move {
                            match hits.push(&headers).as_str() {
                                "a" => (status, Json(reply)).into_response(),
                                _ => Json(json!({
                                    "choices": [{ "message": { "content": "![r](https://cdn.test/b.png)" } }]
                                }))
                                .into_response(),
                            }
                        }
                    }),
                )
                .with_state(hits.clone());
            let base = spawn_upstream(app).await;
            let (pools, pool) = pools_with(PoolKind::DeepSearch, tier(&base, &["a", "b"]));
            let gw = gateway(pools, FallbackLists::default(), Observers::new());

            let outcome = gw
                .run(&Job::new(Family::DeepSearch, "a cat picture"), "t")
                .await
                .unwrap();

            assert_eq!(outcome.termination, Termination::Succeeded, "status {status}");
            assert_eq!(outcome.responses.len(), 2);
            assert_eq!(hits.tokens(), vec!["a", "b"]);
            assert!(!pool.is_banned("a"));
        }
    }

    #[tokio::test]
    async fn invalid_job_consumes_no_credential() {
        let hits = Hits::default();
        let app = axum::Router::new()
            .route(
                "/v1/images/edits",
                post(|State(hits): State<Hits>, headers: HeaderMap| async move {
                    hits.push(&headers);
                    StatusCode::OK
                }),
            )
            .with_state(hits.clone());
        let base = spawn_upstream(app).await;
        let (pools, _pool) = pools_with(PoolKind::FastEdit, tier(&base, &["a"]));
        let gw = gateway(pools, FallbackLists::default(), Observers::new());

        let err = gw
            .run(&Job::new(Family::GptFastEdit, "make it blue"), "t")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidJob(_)));

        let err = gw.run(&Job::new(Family::GptFastEdit, "   "), "t").await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidJob(_)));
        assert!(hits.tokens().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_pool_is_an_error() {
        let gw = gateway(PoolSet::new(), FallbackLists::default(), Observers::new());
        let err = gw.run(&Job::new(Family::Chat, "hi"), "t").await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Pool(rotation::Error::UnknownPool(PoolKind::Chat))
        ));
    }

    #[tokio::test]
    async fn quota_failure_bans_supplier_in_pool() {
        let hits = Hits::default();
        let app = axum::Router::new()
            .route(
                "/v1/chat/completions",
                post(|State(hits): State<Hits>, headers: HeaderMap| async move {
                    match hits.push(&headers).as_str() {
                        "a" => (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response(),
                        _ => Json(json!({ "choices": [{ "message": { "content": "hello" } }] }))
                            .into_response(),
                    }
                }),
            )
            .with_state(hits.clone());
        let base = spawn_upstream(app).await;
        let (pools, pool) = pools_with(PoolKind::Chat, tier(&base, &["a", "b"]));
        let gw = gateway(pools, FallbackLists::default(), Observers::new());

        let outcome = gw.run(&Job::new(Family::Chat, "hi"), "t1").await.unwrap();
        assert!(outcome.succeeded());
        assert!(pool.is_banned("a"));

        let outcome = gw.run(&Job::new(Family::Chat, "hi again"), "t2").await.unwrap();
        assert_eq!(outcome.responses.len(), 1);
        assert_eq!(hits.tokens(), vec!["a", "b", "b"]);
    }

    #[tokio::test]
    async fn midjourney_failure_bans_and_next_supplier_polls() {
        let hits = Hits::default();
        let app = axum::Router::new()
            .route(
                "/mj/submit/imagine",
                post(|State(hits): State<Hits>, headers: HeaderMap| async move {
                    let token = hits.push(&headers);
                    Json(json!({ "code": 1, "result": format!("{token}-job") }))
                }),
            )
            .route(
                "/mj/task/{id}/fetch",
                get(|Path(id): Path<String>| async move {
                    if id.starts_with("a-") {
                        Json(json!({ "status": "FAILURE", "failReason": "upstream timeout" }))
                    } else {
                        Json(json!({ "status": "SUCCESS", "imageUrl": format!("https://mj.test/{id}.png") }))
                    }
                }),
            )
            .with_state(hits.clone());
        let base = spawn_upstream(app).await;
        let (pools, pool) = pools_with(PoolKind::Midjourney, tier(&base, &["a", "b"]));
        let recorder = Arc::new(RecordingObserver::default());
        let gw = gateway(pools, FallbackLists::default(), Observers::new().with(recorder.clone()));

        let outcome = gw.run(&Job::new(Family::Midjourney, "castle"), "mj-task").await.unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.responses.len(), 2);
        assert_eq!(outcome.responses[1].urls, vec!["https://mj.test/b-job.png"]);
        assert!(pool.is_banned("a"));
        let submitted = recorder
            .events()
            .iter()
            .filter(|e| matches!(e, LifecycleEvent::Submitted { .. }))
            .count();
        assert_eq!(submitted, 2);
    }

    #[tokio::test]
    async fn midjourney_banned_prompt_stops_loop() {
        let hits = Hits::default();
        let app = axum::Router::new()
            .route(
                "/mj/submit/imagine",
                post(|State(hits): State<Hits>, headers: HeaderMap| async move {
                    hits.push(&headers);
                    Json(json!({ "code": 24, "description": "Banned prompt detected", "result": null }))
                }),
            )
            .with_state(hits.clone());
        let base = spawn_upstream(app).await;
        let (pools, pool) = pools_with(PoolKind::Midjourney, tier(&base, &["a", "b"]));
        let gw = gateway(pools, FallbackLists::default(), Observers::new());

        let outcome = gw.run(&Job::new(Family::Midjourney, "gore"), "t").await.unwrap();
        assert_eq!(outcome.termination, Termination::Rejected);
        assert_eq!(hits.tokens(), vec!["a"]);
        assert!(!pool.is_banned("a"));
    }

    #[tokio::test]
    async fn static_list_never_bans_and_reads_structured_base64() {
        let hits = Hits::default();
        let app = axum::Router::new()
            .route(
                "/v1/images/generations",
                post(|State(hits): State<Hits>, headers: HeaderMap| async move {
                    match hits.push(&headers).as_str() {
                        "a" => (StatusCode::TOO_MANY_REQUESTS, "quota exceeded").into_response(),
                        _ => Json(json!({ "data": [{ "b64_json": "iVBORw0KGgo=" }] })).into_response(),
                    }
                }),
            )
            .with_state(hits.clone());
        let base = spawn_upstream(app).await;
        let fallback = FallbackLists {
            gpt_image: tier(&base, &["a", "b"]),
            ..FallbackLists::default()
        };
        let gw = gateway(PoolSet::new(), fallback, Observers::new());

        for _ in 0..2 {
            let outcome = gw.run(&Job::new(Family::GptImage, "a lighthouse"), "t").await.unwrap();
            assert!(outcome.succeeded());
            assert_eq!(outcome.winner().unwrap().base64s, vec!["iVBORw0KGgo="]);
        }
        assert_eq!(hits.tokens(), vec!["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn edit_family_sends_multipart_image_array() {
        let app = axum::Router::new().route(
            "/v1/images/edits",
            post(|mut form: Multipart| async move {
                let mut images = 0;
                let mut prompt = String::new();
                while let Some(field) = form.next_field().await.unwrap() {
                    let name = field.name().unwrap_or_default().to_string();
                    match name.as_str() {
                        "image[]" => images += 1,
                        "prompt" => prompt = field.text().await.unwrap(),
                        _ => {}
                    }
                }
                Json(json!({ "data": [{ "url": format!("https://e.test/{images}/{}", prompt.len()) }] }))
            }),
        );
        let base = spawn_upstream(app).await;
        let (pools, _pool) = pools_with(PoolKind::SlowEdit, tier(&base, &["a"]));
        let gw = gateway(pools, FallbackLists::default(), Observers::new());

        let png = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUg==";
        let job = Job::new(Family::GptSlowEdit, "blue").with_images(vec![png.into(), png.into()]);
        let outcome = gw.run(&job, "t").await.unwrap();
        assert_eq!(outcome.winner().unwrap().urls, vec!["https://e.test/2/4"]);
    }

    #[test]
    fn job_deserializes_with_defaults() {
        let job: Job = serde_json::from_str(r#"{"family":"gpt_image","prompt":"x"}"#).unwrap();
        assert_eq!(job.family, Family::GptImage);
        assert_eq!(job.n, 1);
        assert!(job.images.is_empty());
        assert!(job.validate().unwrap().is_empty());

        let mut job = job;
        job.n = 0;
        assert!(job.validate().is_err());
    }

    #[test]
    fn families_map_to_pools_and_policies() {
        let cooldown = Duration::from_secs(600);
        assert_eq!(Family::GptFastEdit.pool(), Some(PoolKind::FastEdit));
        assert_eq!(Family::Volc.pool(), None);
        assert_eq!(
            Family::Midjourney.policy(cooldown),
            FailurePolicy::BanOnAnyFailure { cooldown }
        );
        assert_eq!(Family::Gemini.policy(cooldown), FailurePolicy::NoBan);
        assert_eq!(Family::Chat.policy(cooldown), FailurePolicy::BanOnQuota { cooldown });
    }
}
