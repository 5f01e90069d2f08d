//! Capability traits for the inference backend.
//!
//! Handlers and the search pipeline depend on these seams rather than a
//! concrete client, so tests can substitute deterministic stubs and the
//! backend can be swapped without touching job logic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

/// Text extraction result
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: Option<i64>,
}

/// Classification result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Document snippet handed to the reranker
#[derive(Debug, Clone)]
pub struct RerankDocument {
    pub id: String,
    pub text: String,
}

/// Produces dense vectors for text
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, InferenceError>;

    /// Model identifier recorded next to stored vectors
    fn model(&self) -> &str;
}

/// Extracts text from image content via a vision model
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// `language` is a hint such as "eng"; recognizers may ignore it.
    async fn extract_text(
        &self,
        content: &[u8],
        mime_type: &str,
        language: Option<&str>,
    ) -> Result<ExtractedText, InferenceError>;
}

/// Assigns a category and tags to a document
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        name: &str,
        text: &str,
        categories: &[String],
    ) -> Result<Classification, InferenceError>;
}

/// Rescores a candidate slice against a query, one score per document
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rescore(
        &self,
        query: &str,
        documents: &[RerankDocument],
    ) -> Result<Vec<f32>, InferenceError>;
}
