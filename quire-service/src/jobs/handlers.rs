//! Handler seam between the dispatcher and per-type processing code.
//!
//! A handler receives an immutable [`HandlerContext`] and returns a typed
//! [`JobOutput`]. Handlers never touch the database; persisting results and
//! merging them into the search index is the dispatcher's job.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::content::ContentStore;
use crate::db::{Document, JobType};
use crate::error::HandlerError;

mod classify;
mod compress;
mod convert;
mod embedding;
mod ocr;
mod pdf;
mod thumbnail;

pub use classify::ClassifyHandler;
pub use compress::CompressHandler;
pub use convert::ConvertHandler;
pub use embedding::EmbeddingHandler;
pub use ocr::OcrHandler;
pub use pdf::{PdfMergeHandler, PdfSplitHandler};
pub use thumbnail::ThumbnailHandler;

/// One unit of processing work for a single document.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn run(&self, ctx: &HandlerContext) -> Result<JobOutput, HandlerError>;
}

/// Everything a handler may touch while executing.
pub struct HandlerContext {
    pub document: Document,
    pub params: JobParams,
    pub content: Arc<ContentStore>,
    pub cancellation: CancellationToken,
}

impl HandlerContext {
    /// Content key for a document's original bytes.
    pub fn original_key(document_id: &str) -> String {
        format!("{document_id}/original")
    }

    /// Bail out of a handler at a safe point when cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), HandlerError> {
        if self.cancellation.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Load the original bytes of the document under processing.
    pub fn content_bytes(&self) -> Result<Vec<u8>, HandlerError> {
        Ok(self.content.get(&Self::original_key(&self.document.id))?)
    }
}

// ==================== Job Parameters ====================

/// Validated per-type input parameters.
///
/// Raw request JSON is parsed once at enqueue time; workers re-parse from the
/// stored `input_params` column, so a job row always carries enough to re-run.
#[derive(Debug, Clone)]
pub enum JobParams {
    Ocr(OcrParams),
    PdfSplit(PdfSplitParams),
    PdfMerge(PdfMergeParams),
    Thumbnail(ThumbnailParams),
    AiClassify(ClassifyParams),
    Embedding(EmbeddingParams),
    Convert(ConvertParams),
    Compress(CompressParams),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrParams {
    /// Hint for the recognizer, e.g. "eng". Optional.
    #[serde(default)]
    pub language: Option<String>,
}

/// 1-based inclusive page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfSplitParams {
    pub ranges: Vec<PageRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfMergeParams {
    pub source_document_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailParams {
    #[serde(default = "default_thumbnail_edge")]
    pub max_width: u32,
    #[serde(default = "default_thumbnail_edge")]
    pub max_height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifyParams {
    /// Candidate categories offered to the model. Empty means free-form.
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingParams {
    #[serde(default = "default_truncate_chars")]
    pub truncate_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertParams {
    pub target_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressParams {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl JobParams {
    /// Parse and validate raw input parameters for a job type.
    ///
    /// A missing body is treated as `{}` so types whose parameters all have
    /// defaults can be triggered without one.
    pub fn parse(job_type: JobType, input: Option<&serde_json::Value>) -> Result<Self, String> {
        let value = input.cloned().unwrap_or_else(|| serde_json::json!({}));
        match job_type {
            JobType::Ocr => {
                let params: OcrParams = from_value(value)?;
                Ok(Self::Ocr(params))
            }
            JobType::PdfSplit => {
                let params: PdfSplitParams = from_value(value)?;
                if params.ranges.is_empty() {
                    return Err("pdf_split requires at least one page range".to_string());
                }
                for range in &params.ranges {
                    if range.from == 0 || range.to < range.from {
                        return Err(format!(
                            "invalid page range {}..{}; pages are 1-based and from <= to",
                            range.from, range.to
                        ));
                    }
                }
                Ok(Self::PdfSplit(params))
            }
            JobType::PdfMerge => {
                let params: PdfMergeParams = from_value(value)?;
                if params.source_document_ids.is_empty() {
                    return Err("pdf_merge requires at least one source document".to_string());
                }
                Ok(Self::PdfMerge(params))
            }
            JobType::Thumbnail => {
                let params: ThumbnailParams = from_value(value)?;
                if params.max_width == 0 || params.max_height == 0 {
                    return Err("thumbnail dimensions must be positive".to_string());
                }
                Ok(Self::Thumbnail(params))
            }
            JobType::AiClassify => {
                let params: ClassifyParams = from_value(value)?;
                Ok(Self::AiClassify(params))
            }
            JobType::Embedding => {
                let params: EmbeddingParams = from_value(value)?;
                if params.truncate_chars == 0 {
                    return Err("truncate_chars must be positive".to_string());
                }
                Ok(Self::Embedding(params))
            }
            JobType::Convert => {
                let params: ConvertParams = from_value(value)?;
                match params.target_format.as_str() {
                    "png" | "jpeg" | "webp" => Ok(Self::Convert(params)),
                    other => Err(format!("unsupported target format: {other}")),
                }
            }
            JobType::Compress => {
                let params: CompressParams = from_value(value)?;
                if params.jpeg_quality == 0 || params.jpeg_quality > 100 {
                    return Err("jpeg_quality must be within 1..=100".to_string());
                }
                Ok(Self::Compress(params))
            }
        }
    }

    pub fn job_type(&self) -> JobType {
        match self {
            Self::Ocr(_) => JobType::Ocr,
            Self::PdfSplit(_) => JobType::PdfSplit,
            Self::PdfMerge(_) => JobType::PdfMerge,
            Self::Thumbnail(_) => JobType::Thumbnail,
            Self::AiClassify(_) => JobType::AiClassify,
            Self::Embedding(_) => JobType::Embedding,
            Self::Convert(_) => JobType::Convert,
            Self::Compress(_) => JobType::Compress,
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Truncate to at most `max_chars` characters, on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ==================== Job Output ====================

/// Typed handler result, stored as the job's `output_data` JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutput {
    ExtractedText {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page_count: Option<i64>,
    },
    Thumbnail {
        key: String,
        width: u32,
        height: u32,
    },
    Classification {
        category: String,
        confidence: f64,
        tags: Vec<String>,
    },
    Embedding {
        vector: Vec<f32>,
        model: String,
        dimensions: usize,
    },
    SplitPages {
        keys: Vec<String>,
        page_counts: Vec<u32>,
    },
    MergedDocument {
        key: String,
        page_count: u32,
    },
    ConvertedFile {
        key: String,
        format: String,
        size_bytes: u64,
    },
    CompressedFile {
        key: String,
        original_bytes: u64,
        compressed_bytes: u64,
    },
}

impl JobOutput {
    /// The serialized `kind` tag, for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExtractedText { .. } => "extracted_text",
            Self::Thumbnail { .. } => "thumbnail",
            Self::Classification { .. } => "classification",
            Self::Embedding { .. } => "embedding",
            Self::SplitPages { .. } => "split_pages",
            Self::MergedDocument { .. } => "merged_document",
            Self::ConvertedFile { .. } => "converted_file",
            Self::CompressedFile { .. } => "compressed_file",
        }
    }
}

// ==================== Default Value Functions ====================

fn default_thumbnail_edge() -> u32 {
    320
}

fn default_truncate_chars() -> usize {
    8_000
}

fn default_jpeg_quality() -> u8 {
    75
}
