//! Dense-vector embedding of a document's extracted text.

use std::sync::Arc;

use async_trait::async_trait;

use crate::db::JobType;
use crate::error::HandlerError;
use crate::inference::Embedder;

use super::{HandlerContext, JobHandler, JobOutput, JobParams, truncate_chars};

pub struct EmbeddingHandler {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingHandler {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl JobHandler for EmbeddingHandler {
    fn job_type(&self) -> JobType {
        JobType::Embedding
    }

    async fn run(&self, ctx: &HandlerContext) -> Result<JobOutput, HandlerError> {
        let JobParams::Embedding(params) = &ctx.params else {
            return Err(HandlerError::Fatal(
                "embedding handler received mismatched params".to_string(),
            ));
        };

        // Text extraction is a hard prerequisite; retrying cannot fix its absence
        let Some(text) = ctx.document.extracted_text.as_deref() else {
            return Err(HandlerError::Fatal(
                "document has no extracted text to embed".to_string(),
            ));
        };
        let text = truncate_chars(text, params.truncate_chars);
        if text.trim().is_empty() {
            return Err(HandlerError::Fatal(
                "extracted text is empty".to_string(),
            ));
        }

        ctx.check_cancelled()?;
        let vector = self.embedder.embed(text).await?;
        if vector.is_empty() {
            return Err(HandlerError::Retryable(
                "embedding backend returned an empty vector".to_string(),
            ));
        }

        let dimensions = vector.len();
        Ok(JobOutput::Embedding {
            vector,
            model: self.embedder.model().to_string(),
            dimensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::super::EmbeddingParams;
    use super::*;
    use crate::content::ContentStore;
    use crate::db::test_support::sample_document;
    use crate::error::InferenceError;

    struct StubEmbedder {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, InferenceError> {
            Ok(self.vector.clone())
        }

        fn model(&self) -> &str {
            "stub-embed"
        }
    }

    fn ctx(extracted_text: Option<&str>) -> HandlerContext {
        let dir = std::env::temp_dir();
        let mut document = sample_document("doc-1", "org-1");
        document.extracted_text = extracted_text.map(str::to_string);
        HandlerContext {
            document,
            params: JobParams::Embedding(EmbeddingParams {
                truncate_chars: 8_000,
            }),
            content: Arc::new(ContentStore::new(&dir)),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_embeds_extracted_text() {
        let handler = EmbeddingHandler::new(Arc::new(StubEmbedder {
            vector: vec![0.1, 0.2, 0.3],
        }));

        let output = handler.run(&ctx(Some("quarterly report"))).await.unwrap();
        match output {
            JobOutput::Embedding {
                vector,
                model,
                dimensions,
            } => {
                assert_eq!(vector.len(), 3);
                assert_eq!(model, "stub-embed");
                assert_eq!(dimensions, 3);
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_text_is_fatal() {
        let handler = EmbeddingHandler::new(Arc::new(StubEmbedder { vector: vec![0.5] }));

        let err = handler.run(&ctx(None)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Fatal(_)));

        let err = handler.run(&ctx(Some("   "))).await.unwrap_err();
        assert!(matches!(err, HandlerError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_empty_vector_is_retryable() {
        let handler = EmbeddingHandler::new(Arc::new(StubEmbedder { vector: vec![] }));

        let err = handler.run(&ctx(Some("some text"))).await.unwrap_err();
        assert!(matches!(err, HandlerError::Retryable(_)));
    }
}
