use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Folder not found: {folder_id}")]
    FolderNotFound { folder_id: String },

    #[error("An active {job_type} job already exists for document {document_id}")]
    DuplicateActiveJob {
        document_id: String,
        job_type: String,
    },

    #[error("Job {job_id} is already finalized as {status}")]
    JobAlreadyFinalized { job_id: String, status: String },

    #[error("Job {job_id} is still active and cannot be retried")]
    JobStillActive { job_id: String },

    #[error("Concurrent update on document {document_id} exceeded retry budget")]
    ConcurrentUpdate { document_id: String },

    #[error("{0}")]
    Inference(#[from] InferenceError),

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Content store error")]
    Storage(#[from] StorageError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Inference backend errors (embeddings, OCR, classification, reranking)
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Connection failed to inference server at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Inference failed (status {status}): {message}")]
    Inference { status: u16, message: String },

    #[error("Invalid response from inference server")]
    InvalidResponse {
        #[source]
        source: serde_json::Error,
    },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Content store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No stored content for key {key}")]
    NotFound { key: String },

    #[error("IO error")]
    Io(#[source] std::io::Error),
}

/// Handler failure classification, drives the job state machine.
///
/// Retryable errors re-arm the job with backoff until `max_retries` is
/// reached; the other variants finalize immediately.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    Fatal(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Cancelled")]
    Cancelled,
}

impl HandlerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            HandlerError::Retryable(_) => "transient",
            HandlerError::Fatal(_) => "fatal",
            HandlerError::QuotaExceeded(_) => "quota_exceeded",
            HandlerError::Cancelled => "cancelled",
        }
    }
}

impl From<InferenceError> for HandlerError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Connection { .. } => HandlerError::Retryable(err.to_string()),
            InferenceError::ModelNotFound { .. } => HandlerError::Fatal(err.to_string()),
            InferenceError::Inference { status, .. } => match status {
                429 => HandlerError::QuotaExceeded(err.to_string()),
                500..=599 => HandlerError::Retryable(err.to_string()),
                _ => HandlerError::Fatal(err.to_string()),
            },
            InferenceError::InvalidResponse { .. } => HandlerError::Retryable(err.to_string()),
        }
    }
}

impl From<StorageError> for HandlerError {
    fn from(err: StorageError) -> Self {
        match err {
            // Missing content means the document itself is broken, retrying will not help
            StorageError::NotFound { .. } => HandlerError::Fatal(err.to_string()),
            StorageError::Io(_) => HandlerError::Retryable(err.to_string()),
        }
    }
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. }
            | ServiceError::JobNotFound { .. }
            | ServiceError::FolderNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::DuplicateActiveJob { .. }
            | ServiceError::JobAlreadyFinalized { .. }
            | ServiceError::JobStillActive { .. }
            | ServiceError::ConcurrentUpdate { .. } => StatusCode::CONFLICT,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Inference(InferenceError::ModelNotFound { .. }) => StatusCode::NOT_FOUND,
            ServiceError::Inference(_) | ServiceError::Database(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::JobNotFound { .. } => "job_not_found",
            ServiceError::FolderNotFound { .. } => "folder_not_found",
            ServiceError::DuplicateActiveJob { .. } => "duplicate_active_job",
            ServiceError::JobAlreadyFinalized { .. } => "job_already_finalized",
            ServiceError::JobStillActive { .. } => "job_still_active",
            ServiceError::ConcurrentUpdate { .. } => "concurrent_update",
            ServiceError::Inference(InferenceError::Connection { .. }) => "inference_connection",
            ServiceError::Inference(InferenceError::ModelNotFound { .. }) => {
                "inference_model_not_found"
            }
            ServiceError::Inference(InferenceError::Inference { .. }) => "inference_failed",
            ServiceError::Inference(InferenceError::InvalidResponse { .. }) => {
                "inference_invalid_response"
            }
            ServiceError::Database(_) => "database_error",
            ServiceError::Storage(_) => "storage_error",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }

    /// Retry hint for transient failures, surfaced in the response body
    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ServiceError::Inference(_) | ServiceError::Database(_) => Some(5),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();
        let retry_after_secs = self.retry_after_secs();

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
            details: None,
            retry_after_secs,
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
