//! Processing job endpoints.
//!
//! Submission, inspection, cancellation, and retry of document jobs. All
//! handlers scope their lookups to the tenant named by the org header.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{JobPriority, JobStats, JobType, ProcessingJob};
use crate::error::ServiceError;

use super::{AppState, org_id, user_id};

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub job_type: JobType,
    #[serde(default)]
    pub input_params: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: Option<JobPriority>,
}

#[derive(Serialize)]
pub struct EnqueueResponse {
    pub job_id: String,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct RetryRequest {
    pub input_params: Option<serde_json::Value>,
}

/// Submit a processing job for a document
pub async fn enqueue_job_handler(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ServiceError> {
    let job = state.service.dispatcher.enqueue(
        &org_id(&headers),
        &document_id,
        request.job_type,
        request.input_params,
        request.priority,
        user_id(&headers),
    )?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse { job_id: job.id }),
    ))
}

/// Fetch a job's current state
pub async fn get_job_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ProcessingJob>, ServiceError> {
    let job = state.service.dispatcher.status(&org_id(&headers), &job_id)?;
    Ok(Json(job))
}

/// Cancel a job that has not finished yet
pub async fn cancel_job_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<CancelRequest>>,
) -> Result<StatusCode, ServiceError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    state.service.dispatcher.cancel(
        &org_id(&headers),
        &job_id,
        request.reason.as_deref(),
    )?;
    Ok(StatusCode::NO_CONTENT)
}

/// Re-run a finished job as a fresh one
pub async fn retry_job_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<RetryRequest>>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ServiceError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let job = state
        .service
        .dispatcher
        .retry(&org_id(&headers), &job_id, request.input_params)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse { job_id: job.id }),
    ))
}

/// Queue depth counters grouped by status and type
pub async fn job_stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JobStats>, ServiceError> {
    Ok(Json(state.service.dispatcher.stats()?))
}
