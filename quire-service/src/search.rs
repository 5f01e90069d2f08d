//! Document search over the processing pipeline's output.
//!
//! Three modes share one pipeline: full-text (SQLite FTS5 with bm25),
//! semantic (cosine similarity over stored embeddings), and hybrid (a
//! weighted blend of both). The planner in [`planner`] drives retrieval,
//! scoring, pagination, and the zero-hit suggestion fallback.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::db::{Database, Document, DocumentStatus};
use crate::inference::{Embedder, Reranker};

mod planner;
mod ranking;
mod suggest;

/// How relevance is computed for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Fulltext,
    Semantic,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Fulltext => "fulltext",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

/// Facet constraints applied before any scoring runs
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub folder_id: Option<String>,
    /// Match every folder below `folder_id`, not just direct members
    pub include_subtree: bool,
    pub mime_types: Option<Vec<String>>,
    /// Every listed tag must be present on the document
    pub tags: Vec<String>,
    /// At least one listed tag must be present
    pub tags_any: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub min_size_bytes: Option<i64>,
    pub max_size_bytes: Option<i64>,
    pub status: Option<DocumentStatus>,
    pub category: Option<String>,
    pub include_ids: Option<Vec<String>>,
    pub exclude_ids: Vec<String>,
}

/// One search request, as posted by a client
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub query: String,
    pub mode: SearchMode,
    pub filters: SearchFilters,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Weight on the lexical signal in hybrid mode
    pub text_weight: Option<f64>,
    /// Weight on the semantic signal in hybrid mode
    pub semantic_weight: Option<f64>,
    /// Minimum cosine similarity for a semantic contribution
    pub threshold: Option<f64>,
    /// Rescore the head of the result list with the reranker model
    pub rerank: bool,
}

/// One ranked document in a response
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document: Document,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    /// Matches found before pagination, capped at the configured result cap
    pub total: usize,
    pub took_ms: u64,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

/// Search service blending full-text and embedding relevance
pub struct SearchService {
    db: Arc<Database>,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        config: SearchConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            reranker,
            config,
        }
    }
}
