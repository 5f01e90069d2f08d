//! Raster format conversion between png, jpeg, and webp.

use std::io::Cursor;

use async_trait::async_trait;

use crate::db::JobType;
use crate::error::HandlerError;

use super::{HandlerContext, JobHandler, JobOutput, JobParams};

pub struct ConvertHandler;

#[async_trait]
impl JobHandler for ConvertHandler {
    fn job_type(&self) -> JobType {
        JobType::Convert
    }

    async fn run(&self, ctx: &HandlerContext) -> Result<JobOutput, HandlerError> {
        let JobParams::Convert(params) = &ctx.params else {
            return Err(HandlerError::Fatal(
                "convert handler received mismatched params".to_string(),
            ));
        };

        let bytes = ctx.content_bytes()?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| HandlerError::Fatal(format!("failed to decode image: {e}")))?;

        ctx.check_cancelled()?;

        let mut out = Vec::new();
        match params.target_format.as_str() {
            "png" => img
                .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
                .map_err(|e| HandlerError::Fatal(format!("failed to encode png: {e}")))?,
            // JPEG carries no alpha channel
            "jpeg" => img
                .to_rgb8()
                .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Jpeg)
                .map_err(|e| HandlerError::Fatal(format!("failed to encode jpeg: {e}")))?,
            "webp" => img
                .write_to(&mut Cursor::new(&mut out), image::ImageFormat::WebP)
                .map_err(|e| HandlerError::Fatal(format!("failed to encode webp: {e}")))?,
            other => {
                return Err(HandlerError::Fatal(format!(
                    "unsupported target format: {other}"
                )));
            }
        }

        let key = format!("{}/converted.{}", ctx.document.id, params.target_format);
        let size_bytes = out.len() as u64;
        ctx.content.put(&key, &out)?;

        Ok(JobOutput::ConvertedFile {
            key,
            format: params.target_format.clone(),
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::super::ConvertParams;
    use super::super::thumbnail::test_support::sample_png;
    use super::*;
    use crate::content::ContentStore;
    use crate::db::test_support::sample_document;

    fn ctx(target_format: &str, store: Arc<ContentStore>) -> HandlerContext {
        let mut document = sample_document("doc-1", "org-1");
        document.mime_type = "image/png".to_string();
        HandlerContext {
            document,
            params: JobParams::Convert(ConvertParams {
                target_format: target_format.to_string(),
            }),
            content: store,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_converts_png_to_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ContentStore::new(dir.path()));
        store.put("doc-1/original", &sample_png(10, 10)).unwrap();

        let output = ConvertHandler
            .run(&ctx("jpeg", store.clone()))
            .await
            .unwrap();

        match output {
            JobOutput::ConvertedFile {
                key,
                format,
                size_bytes,
            } => {
                assert_eq!(key, "doc-1/converted.jpeg");
                assert_eq!(format, "jpeg");
                let stored = store.get(&key).unwrap();
                assert_eq!(size_bytes, stored.len() as u64);
                assert_eq!(
                    image::guess_format(&stored).unwrap(),
                    image::ImageFormat::Jpeg
                );
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_converts_to_webp() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ContentStore::new(dir.path()));
        store.put("doc-1/original", &sample_png(8, 8)).unwrap();

        let output = ConvertHandler
            .run(&ctx("webp", store.clone()))
            .await
            .unwrap();

        match output {
            JobOutput::ConvertedFile { key, .. } => {
                let stored = store.get(&key).unwrap();
                assert_eq!(
                    image::guess_format(&stored).unwrap(),
                    image::ImageFormat::WebP
                );
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_content_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ContentStore::new(dir.path()));
        store.put("doc-1/original", b"not an image").unwrap();

        let err = ConvertHandler.run(&ctx("png", store)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Fatal(_)));
    }
}
