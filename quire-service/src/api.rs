//! HTTP API for the Quire service.
//!
//! This module provides the REST API endpoints for:
//! - Health and metrics monitoring
//! - Processing job submission and lifecycle control
//! - Document search and query suggestions

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::QuireService;

pub mod jobs;
pub mod search;
use jobs::{
    cancel_job_handler, enqueue_job_handler, get_job_handler, job_stats_handler, retry_job_handler,
};
use search::{
    hybrid_search_handler, search_handler, semantic_search_handler, suggest_handler,
};

/// Header carrying the tenant for a request
const ORG_HEADER: &str = "x-org-id";
/// Header carrying the acting user, recorded on enqueued jobs
const USER_HEADER: &str = "x-user-id";
/// Tenant assumed when no header is sent
const DEFAULT_ORG: &str = "default";

/// Application state
pub struct AppState {
    pub service: Arc<QuireService>,
    pub start_time: Instant,
    pub metrics: PrometheusHandle,
}

/// Tenant for the request, falling back to the default organization
pub(crate) fn org_id(headers: &HeaderMap) -> String {
    headers
        .get(ORG_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_ORG)
        .to_string()
}

pub(crate) fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Build the API router
pub fn router(service: Arc<QuireService>, metrics: PrometheusHandle) -> Router {
    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
        metrics,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Job endpoints
        .route("/documents/{id}/process", post(enqueue_job_handler))
        .route("/jobs/stats", get(job_stats_handler))
        .route("/jobs/{id}", get(get_job_handler))
        .route("/jobs/{id}/cancel", post(cancel_job_handler))
        .route("/jobs/{id}/retry", post(retry_job_handler))
        // Search endpoints
        .route("/search", post(search_handler))
        .route("/search/semantic", post(semantic_search_handler))
        .route("/search/hybrid", post(hybrid_search_handler))
        .route("/search/suggest", get(suggest_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let inference_available = state.service.inference_available().await;

    // The service keeps working without inference; jobs that need it retry
    let status = if inference_available {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        inference_available,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    inference_available: bool,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
