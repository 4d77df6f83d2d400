//! Generation Gateway
//!
//! Single-binary Rust service that:
//! 1. Builds the rotation pools and static fallback lists from config
//! 2. Reads newline-delimited JSON jobs from stdin into a bounded task queue
//! 3. Runs each job through its endpoint family's credential retry loop
//! 4. Serves `/health`, `/metrics` and signed artifact URLs

mod config;
mod error;
mod feed;
mod history;
mod metrics;
mod storage;
mod task;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use common::Shutdown;
use dispatch::{CollabError, Dispatcher, Gateway, Observers, TracingObserver};
use metrics_exporter_prometheus::PrometheusHandle;
use rotation::spawn_sweep_task;
use serde::Deserialize;
use task_queue::{QueueHandle, TaskQueue};
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::history::HistoryLog;
use crate::storage::{FsObjectStore, unix_now};
use crate::task::TaskContext;

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    gateway: Gateway,
    queue: QueueHandle,
    store: Arc<FsObjectStore>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the admin router. The concurrency limit bounds in-flight admin and
/// artifact requests; it has no effect on the task queue.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/objects/{key}", get(object_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting generation-gateway");

    // Install before any pool or dispatcher emits
    let prometheus_handle = metrics::install_recorder();

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        suppliers = config.suppliers.len(),
        pools = config.pools.len(),
        workers = config.scheduler.workers,
        queue_capacity = config.scheduler.queue_capacity,
        "configuration loaded"
    );

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let dispatcher = Dispatcher::new(client, config.timeout());
    let pools = config.pool_set().context("failed to build rotation pools")?;
    let fallback = config
        .fallback_lists()
        .context("failed to build fallback lists")?;

    let shutdown = Shutdown::new();
    let sweeps: Vec<_> = pools
        .iter()
        .map(|(_, pool)| {
            spawn_sweep_task(Arc::clone(pool), config.sweep_interval(), shutdown.signal())
        })
        .collect();

    let gateway = Gateway::new(
        dispatcher,
        pools,
        fallback,
        Observers::new().with(Arc::new(TracingObserver)),
        shutdown.signal(),
        config.gateway_settings(),
    );

    let history = HistoryLog::open(&config.history.path)
        .await
        .with_context(|| format!("failed to open history log {}", config.history.path.display()))?;
    let signing_key = config
        .storage
        .signing_key
        .clone()
        .context("storage signing key not resolved")?;
    let store = Arc::new(FsObjectStore::new(
        config.storage.root.clone(),
        config.storage.public_base_url.clone(),
        signing_key,
    ));

    let (queue, scheduler) =
        TaskQueue::new(config.scheduler.queue_capacity, config.scheduler.workers);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.signal()));

    let ctx = TaskContext {
        gateway: gateway.clone(),
        history: Arc::new(history),
        store: store.clone(),
        url_ttl: config.url_ttl(),
    };
    let feeder = tokio::spawn(feed::feed_jobs(
        BufReader::new(tokio::io::stdin()),
        ctx,
        queue.clone(),
        shutdown.signal(),
    ));

    let app_state = AppState {
        gateway,
        queue,
        store,
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting jobs on stdin, admin endpoints up");

    let server_signal = shutdown.signal();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_signal.triggered().await })
            .await
    });

    shutdown_signal().await;
    shutdown.trigger();

    // The drain timer starts at signal receipt. Running tasks observe the
    // shutdown signal and wind down; queued tasks are aborted.
    let drain_timeout = config.drain_timeout();
    let drain = async {
        let report = scheduler_handle.await;
        let server = server_handle.await;
        (report, server)
    };
    match tokio::time::timeout(drain_timeout, drain).await {
        Ok((Ok(report), server)) => {
            info!(
                executed = report.executed,
                aborted = report.aborted,
                "scheduler drained"
            );
            match server {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "server error during shutdown"),
                Err(e) => error!(error = %e, "server task panicked"),
            }
        }
        Ok((Err(e), _)) => error!(error = %e, "scheduler task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = drain_timeout.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    feeder.abort();
    for sweep in sweeps {
        let _ = sweep.await;
    }

    info!("shutdown complete");
    // A read parked on stdin would otherwise hold the runtime open
    std::process::exit(0)
}

/// Pool health plus queue counters. 503 once any configured pool has no
/// reachable credential.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pools = state.gateway.pools().health();
    let unhealthy: Vec<String> = pools
        .as_object()
        .into_iter()
        .flatten()
        .filter(|(_, pool)| pool["status"] == "unhealthy")
        .map(|(kind, _)| kind.clone())
        .collect();

    let (status_code, status) = if unhealthy.is_empty() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    let body = serde_json::json!({
        "status": status,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "unhealthy_pools": unhealthy,
        "pools": pools,
        "scheduler": state.queue.snapshot(),
    });

    (
        status_code,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

#[derive(Debug, Deserialize)]
struct SignedQuery {
    expires: u64,
    signature: String,
}

/// Serve a stored artifact behind its signed URL.
async fn object_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Response {
    if !state
        .store
        .verify(&key, query.expires, &query.signature, unix_now())
    {
        return (StatusCode::FORBIDDEN, "invalid or expired signature").into_response();
    }
    match state.store.read(&key).await {
        Ok(object) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, object.content_type)],
            object.bytes,
        )
            .into_response(),
        Err(CollabError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(key = %key, error = %e, "failed to read object");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
