//! Model-backed classification into category, confidence, and tags.

use std::sync::Arc;

use async_trait::async_trait;

use crate::db::JobType;
use crate::error::HandlerError;
use crate::inference::Classifier;

use super::{HandlerContext, JobHandler, JobOutput, JobParams, truncate_chars};

/// Longest text prefix handed to the model.
const CLASSIFY_TEXT_LIMIT: usize = 4_000;

pub struct ClassifyHandler {
    classifier: Arc<dyn Classifier>,
}

impl ClassifyHandler {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl JobHandler for ClassifyHandler {
    fn job_type(&self) -> JobType {
        JobType::AiClassify
    }

    async fn run(&self, ctx: &HandlerContext) -> Result<JobOutput, HandlerError> {
        let JobParams::AiClassify(params) = &ctx.params else {
            return Err(HandlerError::Fatal(
                "ai_classify handler received mismatched params".to_string(),
            ));
        };

        // Classification still works from the filename alone when no text
        // extraction ran before this job
        let text = ctx.document.extracted_text.as_deref().unwrap_or("");
        let text = truncate_chars(text, CLASSIFY_TEXT_LIMIT);

        ctx.check_cancelled()?;
        let classification = self
            .classifier
            .classify(&ctx.document.name, text, &params.categories)
            .await?;

        Ok(JobOutput::Classification {
            category: classification.category,
            confidence: classification.confidence.clamp(0.0, 1.0),
            tags: classification.tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::super::ClassifyParams;
    use super::*;
    use crate::content::ContentStore;
    use crate::db::test_support::sample_document;
    use crate::error::InferenceError;
    use crate::inference::Classification;

    struct StubClassifier {
        result: Result<Classification, String>,
    }

    #[async_trait]
    impl Classifier for StubClassifier {
        async fn classify(
            &self,
            _name: &str,
            _text: &str,
            _categories: &[String],
        ) -> Result<Classification, InferenceError> {
            self.result
                .clone()
                .map_err(|model| InferenceError::ModelNotFound { model })
        }
    }

    fn ctx(extracted_text: Option<&str>) -> HandlerContext {
        let dir = std::env::temp_dir();
        let mut document = sample_document("doc-1", "org-1");
        document.extracted_text = extracted_text.map(str::to_string);
        HandlerContext {
            document,
            params: JobParams::AiClassify(ClassifyParams {
                categories: vec!["invoice".to_string(), "contract".to_string()],
            }),
            content: Arc::new(ContentStore::new(&dir)),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_classification_passes_through() {
        let handler = ClassifyHandler::new(Arc::new(StubClassifier {
            result: Ok(Classification {
                category: "invoice".to_string(),
                confidence: 0.92,
                tags: vec!["billing".to_string()],
            }),
        }));

        let output = handler.run(&ctx(Some("invoice text"))).await.unwrap();
        match output {
            JobOutput::Classification {
                category,
                confidence,
                tags,
            } => {
                assert_eq!(category, "invoice");
                assert!((confidence - 0.92).abs() < f64::EPSILON);
                assert_eq!(tags, vec!["billing"]);
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_is_clamped() {
        let handler = ClassifyHandler::new(Arc::new(StubClassifier {
            result: Ok(Classification {
                category: "report".to_string(),
                confidence: 1.7,
                tags: vec![],
            }),
        }));

        let output = handler.run(&ctx(None)).await.unwrap();
        match output {
            JobOutput::Classification { confidence, .. } => assert_eq!(confidence, 1.0),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_model_is_fatal() {
        let handler = ClassifyHandler::new(Arc::new(StubClassifier {
            result: Err("llama3.2".to_string()),
        }));

        let err = handler.run(&ctx(Some("text"))).await.unwrap_err();
        assert!(matches!(err, HandlerError::Fatal(_)));
    }
}
