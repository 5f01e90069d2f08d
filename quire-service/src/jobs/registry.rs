//! Enum-keyed handler table.

use std::sync::Arc;

use crate::db::JobType;
use crate::inference::{Classifier, Embedder, TextRecognizer};

use super::handlers::{
    ClassifyHandler, CompressHandler, ConvertHandler, EmbeddingHandler, JobHandler, OcrHandler,
    PdfMergeHandler, PdfSplitHandler, ThumbnailHandler,
};

/// One handler per job type.
///
/// Inference-backed handlers receive their capability at construction; the
/// pure file handlers are unit structs.
pub struct HandlerRegistry {
    ocr: OcrHandler,
    pdf_split: PdfSplitHandler,
    pdf_merge: PdfMergeHandler,
    thumbnail: ThumbnailHandler,
    classify: ClassifyHandler,
    embedding: EmbeddingHandler,
    convert: ConvertHandler,
    compress: CompressHandler,
}

impl HandlerRegistry {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        recognizer: Arc<dyn TextRecognizer>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            ocr: OcrHandler::new(recognizer),
            pdf_split: PdfSplitHandler,
            pdf_merge: PdfMergeHandler,
            thumbnail: ThumbnailHandler,
            classify: ClassifyHandler::new(classifier),
            embedding: EmbeddingHandler::new(embedder),
            convert: ConvertHandler,
            compress: CompressHandler,
        }
    }

    /// Resolve the handler for a job type. Adding a JobType variant without
    /// extending this match is a compile error.
    pub fn handler(&self, job_type: JobType) -> &dyn JobHandler {
        match job_type {
            JobType::Ocr => &self.ocr,
            JobType::PdfSplit => &self.pdf_split,
            JobType::PdfMerge => &self.pdf_merge,
            JobType::Thumbnail => &self.thumbnail,
            JobType::AiClassify => &self.classify,
            JobType::Embedding => &self.embedding,
            JobType::Convert => &self.convert,
            JobType::Compress => &self.compress,
        }
    }
}
