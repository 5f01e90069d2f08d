//! Storage-size reduction: stream compression for PDFs, re-encoding for
//! raster images.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;

use crate::db::JobType;
use crate::error::HandlerError;

use super::{HandlerContext, JobHandler, JobOutput, JobParams};

pub struct CompressHandler;

#[async_trait]
impl JobHandler for CompressHandler {
    fn job_type(&self) -> JobType {
        JobType::Compress
    }

    async fn run(&self, ctx: &HandlerContext) -> Result<JobOutput, HandlerError> {
        let JobParams::Compress(params) = &ctx.params else {
            return Err(HandlerError::Fatal(
                "compress handler received mismatched params".to_string(),
            ));
        };

        let bytes = ctx.content_bytes()?;
        let original_bytes = bytes.len() as u64;
        let mime = ctx.document.mime_type.clone();

        let (key, compressed) = if mime == "application/pdf" {
            let mut doc = lopdf::Document::load_mem(&bytes)
                .map_err(|e| HandlerError::Fatal(format!("failed to load PDF: {e}")))?;
            ctx.check_cancelled()?;
            doc.compress();
            let mut out = Vec::new();
            doc.save_to(&mut out)
                .map_err(|e| HandlerError::Fatal(format!("failed to save compressed PDF: {e}")))?;
            (format!("{}/compressed.pdf", ctx.document.id), out)
        } else if mime.starts_with("image/") {
            let img = image::load_from_memory(&bytes)
                .map_err(|e| HandlerError::Fatal(format!("failed to decode image: {e}")))?;
            ctx.check_cancelled()?;
            let mut out = Vec::new();
            let mut encoder = JpegEncoder::new_with_quality(&mut out, params.jpeg_quality);
            encoder
                .encode_image(&img.to_rgb8())
                .map_err(|e| HandlerError::Fatal(format!("failed to re-encode JPEG: {e}")))?;
            (format!("{}/compressed.jpg", ctx.document.id), out)
        } else {
            return Err(HandlerError::Fatal(format!(
                "no compression strategy for mime type {mime}"
            )));
        };

        let compressed_bytes = compressed.len() as u64;
        ctx.content.put(&key, &compressed)?;

        Ok(JobOutput::CompressedFile {
            key,
            original_bytes,
            compressed_bytes,
        })
    }
}
