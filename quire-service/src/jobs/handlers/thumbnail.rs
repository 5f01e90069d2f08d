//! Bounded-box thumbnail rendering for raster documents.

use std::io::Cursor;

use async_trait::async_trait;
use image::GenericImageView;

use crate::db::JobType;
use crate::error::HandlerError;

use super::{HandlerContext, JobHandler, JobOutput, JobParams};

pub struct ThumbnailHandler;

#[async_trait]
impl JobHandler for ThumbnailHandler {
    fn job_type(&self) -> JobType {
        JobType::Thumbnail
    }

    async fn run(&self, ctx: &HandlerContext) -> Result<JobOutput, HandlerError> {
        let JobParams::Thumbnail(params) = &ctx.params else {
            return Err(HandlerError::Fatal(
                "thumbnail handler received mismatched params".to_string(),
            ));
        };

        let bytes = ctx.content_bytes()?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| HandlerError::Fatal(format!("failed to decode image: {e}")))?;

        ctx.check_cancelled()?;

        // thumbnail() keeps the aspect ratio inside the bounding box
        let thumb = img.thumbnail(params.max_width, params.max_height);
        let (width, height) = thumb.dimensions();

        let mut png = Vec::new();
        thumb
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| HandlerError::Fatal(format!("failed to encode thumbnail: {e}")))?;

        let key = format!("{}/thumbnail.png", ctx.document.id);
        ctx.content.put(&key, &png)?;

        Ok(JobOutput::Thumbnail { key, width, height })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;

    /// Encode a solid-color PNG of the given dimensions.
    pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb([120, 80, 40]),
        ));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }
}
