//! Search API endpoints.
//!
//! One handler per mode plus the type-ahead suggestion endpoint. The body
//! shape is shared; the mode-specific routes override whatever mode the
//! client put in the body.

use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::search::{SearchMode, SearchQuery, SearchResponse};

use super::{AppState, org_id};

#[derive(Deserialize)]
pub struct SuggestParams {
    pub q: String,
    pub limit: Option<usize>,
}

/// Search with the mode from the request body, full-text when unspecified
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(query): Json<SearchQuery>,
) -> Result<Json<SearchResponse>, ServiceError> {
    let response = state
        .service
        .search
        .execute(&org_id(&headers), &query)
        .await?;
    Ok(Json(response))
}

/// Embedding-similarity search
pub async fn semantic_search_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut query): Json<SearchQuery>,
) -> Result<Json<SearchResponse>, ServiceError> {
    query.mode = SearchMode::Semantic;
    let response = state
        .service
        .search
        .execute(&org_id(&headers), &query)
        .await?;
    Ok(Json(response))
}

/// Blended lexical and semantic search
pub async fn hybrid_search_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut query): Json<SearchQuery>,
) -> Result<Json<SearchResponse>, ServiceError> {
    query.mode = SearchMode::Hybrid;
    let response = state
        .service
        .search
        .execute(&org_id(&headers), &query)
        .await?;
    Ok(Json(response))
}

/// Prefix completions for type-ahead
pub async fn suggest_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SuggestParams>,
) -> Result<Json<Vec<String>>, ServiceError> {
    let completions = state.service.search.suggest_completions(
        &org_id(&headers),
        &params.q,
        params.limit.unwrap_or(10),
    )?;
    Ok(Json(completions))
}
