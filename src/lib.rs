//! qadesk: pending-change approval service for day status and time logs.
//!
//! Users propose changes to a past day; the proposal is staged, an admin
//! reviews it and approves (staged fields are copied onto the live records)
//! or rejects it, and the submitter is notified.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::Instrument;

pub mod api;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod store;
pub mod workflow;

use metrics::WorkflowMetrics;
use notification::webhook::WebhookNotifier;
use store::ChangeStore;
use workflow::Workflow;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub store: Arc<dyn ChangeStore>,
    pub workflow: Workflow,
    pub metrics: WorkflowMetrics,
    pub config: config::Config,
}

impl AppState {
    pub fn new(store: Arc<dyn ChangeStore>, config: config::Config) -> anyhow::Result<Self> {
        let metrics = WorkflowMetrics::new()?;
        let webhooks = if config.webhook_urls.is_empty() {
            None
        } else {
            Some(WebhookNotifier::new(
                config.webhook_urls.clone(),
                config.webhook_secret.clone(),
            )?)
        };
        let workflow = Workflow::new(store.clone(), webhooks, metrics.clone());
        Ok(Self {
            store,
            workflow,
            metrics,
            config,
        })
    }
}

/// The full HTTP surface: probes, metrics and the `/api/v1` workflow API.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with service logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "request",
        request_id = %req_id,
        method = %req.method(),
        uri = %req.uri()
    );
    let mut resp = next.run(req).instrument(span).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}
