//! Search index coordinator.
//!
//! Job outputs reach the searchable document representation only through
//! [`IndexCoordinator::merge`], which finalizes the producing job and applies
//! the document write in one transaction. Each merge replaces the fields
//! owned by one job type under optimistic versioning; concurrent completions
//! of different types interleave without losing either side's fields.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::db::{CompletionOutcome, Database, IndexChange, JobType, ProcessingJob};
use crate::error::{DatabaseError, ServiceError, ServiceResult};
use crate::jobs::JobOutput;

/// Re-read bound before a merge gives up with `ConcurrentUpdate`.
const MAX_MERGE_ATTEMPTS: u32 = 4;

/// What became of a job's output at merge time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Job row flipped to completed and the document write committed with it
    Completed,
    /// Job was no longer running; nothing was persisted
    Discarded,
}

pub struct IndexCoordinator {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl IndexCoordinator {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Complete a running job and merge its output into the document's
    /// searchable representation.
    ///
    /// Replace-by-field keyed on job type, so re-delivering the same output
    /// is idempotent. The job row and the document write commit together: a
    /// cancel or lease requeue that already moved the job off `running`
    /// leaves both untouched and the outcome is
    /// [`MergeOutcome::Discarded`]. A version conflict re-reads the row and
    /// retries; after [`MAX_MERGE_ATTEMPTS`] conflicts the merge fails with
    /// `ConcurrentUpdate` and the caller decides whether to retry the job.
    pub fn merge(&self, job: &ProcessingJob, output: &JobOutput) -> ServiceResult<MergeOutcome> {
        let output_json = serde_json::to_string(output).map_err(DatabaseError::Serialization)?;

        for attempt in 1..=MAX_MERGE_ATTEMPTS {
            let document = self.db.get_document(&job.document_id)?.ok_or_else(|| {
                ServiceError::DocumentNotFound {
                    document_id: job.document_id.clone(),
                }
            })?;
            let version = document.search_version;
            let change = index_change(job.job_type, output, document.artifacts)?;
            let now = self.clock.now();

            match self.db.complete_job_applying(
                &job.id,
                &output_json,
                &job.document_id,
                version,
                &change,
                now,
            )? {
                CompletionOutcome::Applied => {
                    debug!(
                        document_id = %job.document_id,
                        job_type = job.job_type.as_str(),
                        version = version + 1,
                        "Merged job output into search index"
                    );
                    return Ok(MergeOutcome::Completed);
                }
                CompletionOutcome::JobNotRunning => {
                    debug!(
                        job_id = %job.id,
                        job_type = job.job_type.as_str(),
                        "Job no longer running, output discarded"
                    );
                    return Ok(MergeOutcome::Discarded);
                }
                CompletionOutcome::VersionConflict => {
                    debug!(
                        document_id = %job.document_id,
                        job_type = job.job_type.as_str(),
                        attempt,
                        "Search index version conflict, re-reading"
                    );
                }
            }
        }

        warn!(
            document_id = %job.document_id,
            job_type = job.job_type.as_str(),
            "Search index merge exhausted its retry budget"
        );
        Err(ServiceError::ConcurrentUpdate {
            document_id: job.document_id.clone(),
        })
    }
}

/// The field replacement a job type's output maps onto.
fn index_change(
    job_type: JobType,
    output: &JobOutput,
    artifacts: Option<serde_json::Value>,
) -> ServiceResult<IndexChange> {
    match (job_type, output) {
        (JobType::Ocr, JobOutput::ExtractedText { text, page_count }) => {
            Ok(IndexChange::ExtractedText {
                text: text.clone(),
                page_count: *page_count,
            })
        }
        (JobType::Embedding, JobOutput::Embedding { vector, model, .. }) => {
            Ok(IndexChange::Embedding {
                vector: vector.clone(),
                model: model.clone(),
            })
        }
        (
            JobType::AiClassify,
            JobOutput::Classification {
                category,
                confidence,
                tags,
            },
        ) => Ok(IndexChange::Classification {
            category: category.clone(),
            confidence: *confidence,
            tags: tags.clone(),
        }),
        (JobType::Thumbnail, JobOutput::Thumbnail { key, .. }) => Ok(IndexChange::Thumbnail {
            key: key.clone(),
        }),
        (JobType::PdfSplit, out @ JobOutput::SplitPages { .. })
        | (JobType::PdfMerge, out @ JobOutput::MergedDocument { .. })
        | (JobType::Convert, out @ JobOutput::ConvertedFile { .. })
        | (JobType::Compress, out @ JobOutput::CompressedFile { .. }) => {
            let mut artifacts = artifacts.unwrap_or_else(|| serde_json::json!({}));
            if let Some(map) = artifacts.as_object_mut() {
                let value = serde_json::to_value(out).map_err(DatabaseError::Serialization)?;
                map.insert(job_type.as_str().to_string(), value);
            }
            Ok(IndexChange::Artifacts { artifacts })
        }
        (job_type, output) => Err(ServiceError::Internal {
            message: format!(
                "job type {} cannot merge output kind {}",
                job_type.as_str(),
                output.kind()
            ),
        }),
    }
}
