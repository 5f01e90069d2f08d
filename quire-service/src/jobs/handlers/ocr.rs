//! Text extraction for PDFs, images, and plain-text content.

use std::sync::Arc;

use async_trait::async_trait;

use crate::db::JobType;
use crate::error::HandlerError;
use crate::inference::TextRecognizer;

use super::{HandlerContext, JobHandler, JobOutput, JobParams};

pub struct OcrHandler {
    recognizer: Arc<dyn TextRecognizer>,
}

impl OcrHandler {
    pub fn new(recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self { recognizer }
    }
}

#[async_trait]
impl JobHandler for OcrHandler {
    fn job_type(&self) -> JobType {
        JobType::Ocr
    }

    async fn run(&self, ctx: &HandlerContext) -> Result<JobOutput, HandlerError> {
        let JobParams::Ocr(params) = &ctx.params else {
            return Err(HandlerError::Fatal(
                "ocr handler received mismatched params".to_string(),
            ));
        };

        let bytes = ctx.content_bytes()?;
        let mime = ctx.document.mime_type.clone();

        if mime == "application/pdf" {
            return extract_pdf_text(ctx, &bytes);
        }

        if mime.starts_with("image/") {
            let extracted = self
                .recognizer
                .extract_text(&bytes, &mime, params.language.as_deref())
                .await?;
            return Ok(JobOutput::ExtractedText {
                text: extracted.text,
                page_count: extracted.page_count,
            });
        }

        if mime.starts_with("text/") || mime == "application/json" {
            let text = String::from_utf8(bytes)
                .map_err(|e| HandlerError::Fatal(format!("content is not valid UTF-8: {e}")))?;
            return Ok(JobOutput::ExtractedText {
                text,
                page_count: None,
            });
        }

        Err(HandlerError::Fatal(format!(
            "no text extraction strategy for mime type {mime}"
        )))
    }
}

fn extract_pdf_text(ctx: &HandlerContext, bytes: &[u8]) -> Result<JobOutput, HandlerError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| HandlerError::Fatal(format!("failed to load PDF: {e}")))?;

    let pages = doc.get_pages();
    let page_count = pages.len() as i64;
    let mut text = String::new();
    for (page_num, _) in pages {
        ctx.check_cancelled()?;
        // Pages that fail extraction (damaged streams, exotic fonts) are skipped
        if let Ok(page_text) = doc.extract_text(&[page_num]) {
            text.push_str(&page_text);
            text.push('\n');
        }
    }

    Ok(JobOutput::ExtractedText {
        text,
        page_count: Some(page_count),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::super::pdf::test_support::sample_pdf_bytes;
    use super::super::{HandlerContext, JobParams, OcrParams};
    use super::*;
    use crate::content::ContentStore;
    use crate::db::test_support::sample_document;
    use crate::inference::ExtractedText;

    struct StubRecognizer {
        text: String,
    }

    #[async_trait]
    impl TextRecognizer for StubRecognizer {
        async fn extract_text(
            &self,
            _content: &[u8],
            _mime_type: &str,
            _language: Option<&str>,
        ) -> Result<ExtractedText, crate::error::InferenceError> {
            Ok(ExtractedText {
                text: self.text.clone(),
                page_count: Some(1),
            })
        }
    }

    fn ctx(mime: &str, bytes: &[u8], store_dir: &std::path::Path) -> HandlerContext {
        let content = Arc::new(ContentStore::new(store_dir));
        let mut document = sample_document("doc-1", "org-1");
        document.mime_type = mime.to_string();
        content
            .put(&HandlerContext::original_key(&document.id), bytes)
            .unwrap();
        HandlerContext {
            document,
            params: JobParams::Ocr(OcrParams::default()),
            content,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_extracts_pdf_text_without_inference() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = sample_pdf_bytes(&["Invoice 42 total due"]);
        let ctx = ctx("application/pdf", &pdf, dir.path());

        let handler = OcrHandler::new(Arc::new(StubRecognizer {
            text: "should not be used".to_string(),
        }));
        let output = handler.run(&ctx).await.unwrap();
        match output {
            JobOutput::ExtractedText { text, page_count } => {
                assert!(text.contains("Invoice 42 total due"), "got: {text}");
                assert_eq!(page_count, Some(1));
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_images_go_through_the_recognizer() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx("image/png", b"not really a png", dir.path());

        let handler = OcrHandler::new(Arc::new(StubRecognizer {
            text: "scanned receipt".to_string(),
        }));
        let output = handler.run(&ctx).await.unwrap();
        match output {
            JobOutput::ExtractedText { text, .. } => assert_eq!(text, "scanned receipt"),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plain_text_is_decoded_directly() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx("text/plain", "meeting notes".as_bytes(), dir.path());

        let handler = OcrHandler::new(Arc::new(StubRecognizer {
            text: String::new(),
        }));
        let output = handler.run(&ctx).await.unwrap();
        match output {
            JobOutput::ExtractedText { text, page_count } => {
                assert_eq!(text, "meeting notes");
                assert_eq!(page_count, None);
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsupported_mime_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx("application/zip", b"PK", dir.path());

        let handler = OcrHandler::new(Arc::new(StubRecognizer {
            text: String::new(),
        }));
        let err = handler.run(&ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_corrupt_pdf_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx("application/pdf", b"not a pdf", dir.path());

        let handler = OcrHandler::new(Arc::new(StubRecognizer {
            text: String::new(),
        }));
        let err = handler.run(&ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Fatal(_)));
    }
}
