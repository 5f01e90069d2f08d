//! Dispatcher for the processing pipeline.
//!
//! Owns every job state transition: enqueue with validation and the
//! duplicate-active guard, worker lease and execution, result acknowledgement
//! through the index coordinator, retry scheduling, cancellation, and the
//! background sweeps. Workers call [`Dispatcher::lease`] and
//! [`Dispatcher::execute`]; the HTTP layer calls everything else.

use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, system_clock};
use crate::config::ProcessingConfig;
use crate::content::ContentStore;
use crate::db::{Database, JobPriority, JobStats, JobStatus, JobType, ProcessingJob};
use crate::error::{HandlerError, ServiceError, ServiceResult};
use crate::events::{EventBus, JobEvent, JobEventKind};
use crate::index::{IndexCoordinator, MergeOutcome};

use super::cancellation::CancellationRegistry;
use super::handlers::{HandlerContext, JobOutput, JobParams};
use super::lifecycle::{can_transition, retry_backoff_ms};
use super::registry::HandlerRegistry;

/// Generates job identifiers
pub trait IdGen: Send + Sync {
    fn next_id(&self) -> String;
}

/// UUID v4 identifiers, the production generator
pub struct UuidGen;

impl IdGen for UuidGen {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

pub struct Dispatcher {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGen>,
    index: IndexCoordinator,
    content: Arc<ContentStore>,
    registry: Arc<HandlerRegistry>,
    events: Arc<EventBus>,
    cancellations: CancellationRegistry,
    config: ProcessingConfig,
}

impl Dispatcher {
    pub fn new(
        db: Arc<Database>,
        content: Arc<ContentStore>,
        registry: Arc<HandlerRegistry>,
        events: Arc<EventBus>,
        config: ProcessingConfig,
    ) -> Self {
        Self::with_parts(
            db,
            system_clock(),
            Arc::new(UuidGen),
            content,
            registry,
            events,
            config,
        )
    }

    /// Full-injection constructor; tests substitute the clock and id source.
    pub fn with_parts(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGen>,
        content: Arc<ContentStore>,
        registry: Arc<HandlerRegistry>,
        events: Arc<EventBus>,
        config: ProcessingConfig,
    ) -> Self {
        let index = IndexCoordinator::new(db.clone(), clock.clone());
        Self {
            db,
            clock,
            ids,
            index,
            content,
            registry,
            events,
            cancellations: CancellationRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Validate and persist a new pending job.
    pub fn enqueue(
        &self,
        org_id: &str,
        document_id: &str,
        job_type: JobType,
        input_params: Option<serde_json::Value>,
        priority: Option<JobPriority>,
        created_by: Option<String>,
    ) -> ServiceResult<ProcessingJob> {
        if self
            .db
            .get_document(document_id)?
            .filter(|d| d.org_id == org_id)
            .is_none()
        {
            return Err(ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            });
        }

        // Params are validated before any row exists; invalid requests are
        // never enqueued
        JobParams::parse(job_type, input_params.as_ref())
            .map_err(|message| ServiceError::InvalidRequest { message })?;

        if self.db.get_active_job_id(document_id, job_type)?.is_some() {
            return Err(ServiceError::DuplicateActiveJob {
                document_id: document_id.to_string(),
                job_type: job_type.as_str().to_string(),
            });
        }

        let job = ProcessingJob {
            id: self.ids.next_id(),
            document_id: document_id.to_string(),
            org_id: org_id.to_string(),
            job_type,
            status: JobStatus::Pending,
            priority: priority.unwrap_or(JobPriority::Normal),
            input_params,
            output_data: None,
            error_message: None,
            error_code: None,
            retry_count: 0,
            max_retries: self.config.default_max_retries,
            lease_expires_at: None,
            next_retry_at: None,
            started_at: None,
            completed_at: None,
            created_at: self.clock.now(),
            created_by_id: created_by,
        };
        self.db.insert_job(&job)?;

        counter!("quire_jobs_enqueued_total", "job_type" => job_type.as_str()).increment(1);
        info!(
            job_id = %job.id,
            document_id = %document_id,
            job_type = job_type.as_str(),
            priority = ?job.priority,
            "Job enqueued"
        );
        Ok(job)
    }

    /// Claim the next pending job under a fresh lease.
    pub fn lease(&self) -> ServiceResult<Option<ProcessingJob>> {
        let now = self.clock.now();
        let lease_expires_at = now + Duration::seconds(self.config.lease_secs as i64);
        self.db.lease_next_job(now, lease_expires_at)
    }

    /// Run a leased job to its acknowledgement.
    pub async fn execute(&self, job: ProcessingJob, worker_id: usize) -> ServiceResult<()> {
        debug!(
            worker_id,
            job_id = %job.id,
            job_type = job.job_type.as_str(),
            "Executing job"
        );
        let (attempt, token) = self.cancellations.register(&job.id);
        let started = Instant::now();

        let result = self.run_handler(&job, token).await;

        histogram!("quire_job_duration_seconds", "job_type" => job.job_type.as_str())
            .record(started.elapsed().as_secs_f64());

        let outcome = self.ack(&job, result);
        self.cancellations.unregister(&job.id, attempt);
        outcome
    }

    async fn run_handler(
        &self,
        job: &ProcessingJob,
        token: CancellationToken,
    ) -> Result<JobOutput, HandlerError> {
        let document = match self.db.get_document(&job.document_id) {
            Ok(Some(document)) => document,
            Ok(None) => {
                return Err(HandlerError::Fatal(format!(
                    "document {} no longer exists",
                    job.document_id
                )));
            }
            Err(e) => {
                return Err(HandlerError::Retryable(format!(
                    "failed to load document: {e}"
                )));
            }
        };

        let params =
            JobParams::parse(job.job_type, job.input_params.as_ref()).map_err(HandlerError::Fatal)?;

        let ctx = HandlerContext {
            document,
            params,
            content: self.content.clone(),
            cancellation: token,
        };
        self.registry.handler(job.job_type).run(&ctx).await
    }

    fn ack(&self, job: &ProcessingJob, result: Result<JobOutput, HandlerError>) -> ServiceResult<()> {
        let now = self.clock.now();
        match result {
            Ok(output) => self.ack_success(job, output, now),
            Err(HandlerError::Cancelled) => {
                debug!(job_id = %job.id, "Handler observed cancellation, no output persisted");
                Ok(())
            }
            Err(error) => self.ack_failure(job, &error, now),
        }
    }

    fn ack_success(
        &self,
        job: &ProcessingJob,
        output: JobOutput,
        now: chrono::DateTime<chrono::Utc>,
    ) -> ServiceResult<()> {
        match self.index.merge(job, &output) {
            Ok(MergeOutcome::Completed) => {
                info!(
                    job_id = %job.id,
                    job_type = job.job_type.as_str(),
                    "Job completed"
                );
                counter!("quire_jobs_completed_total", "job_type" => job.job_type.as_str())
                    .increment(1);
                self.events.emit(JobEvent {
                    event: JobEventKind::Completed,
                    job_id: job.id.clone(),
                    document_id: job.document_id.clone(),
                    org_id: job.org_id.clone(),
                    job_type: job.job_type,
                    error: None,
                });
                Ok(())
            }
            // A cancel or lease requeue that landed while the handler ran
            // wins over the produced output
            Ok(MergeOutcome::Discarded) => Ok(()),
            Err(ServiceError::ConcurrentUpdate { .. }) => self.ack_failure(
                job,
                &HandlerError::Retryable("search index merge lost the version race".to_string()),
                now,
            ),
            Err(e) => Err(e),
        }
    }

    fn ack_failure(
        &self,
        job: &ProcessingJob,
        error: &HandlerError,
        now: chrono::DateTime<chrono::Utc>,
    ) -> ServiceResult<()> {
        let code = error.error_code();
        let message = error.to_string();

        if matches!(error, HandlerError::Retryable(_)) && job.retry_count < job.max_retries {
            let backoff_ms = retry_backoff_ms(
                job.retry_count as i64,
                self.config.retry_base_ms as i64,
                self.config.retry_cap_ms as i64,
            );
            let next_retry_at = now + Duration::milliseconds(backoff_ms);
            if self
                .db
                .mark_job_retrying(&job.id, job.retry_count + 1, next_retry_at, &message, code)?
            {
                info!(
                    job_id = %job.id,
                    retry_count = job.retry_count + 1,
                    max_retries = job.max_retries,
                    backoff_ms,
                    "Job scheduled for retry"
                );
                counter!("quire_jobs_retried_total", "job_type" => job.job_type.as_str())
                    .increment(1);
            } else {
                debug!(job_id = %job.id, "Job no longer running, retry not scheduled");
            }
            return Ok(());
        }

        if self.db.fail_job(&job.id, &message, code, now)? {
            warn!(
                job_id = %job.id,
                job_type = job.job_type.as_str(),
                code,
                error = %message,
                "Job failed"
            );
            counter!("quire_jobs_failed_total", "job_type" => job.job_type.as_str()).increment(1);
            self.events.emit(JobEvent {
                event: JobEventKind::Failed,
                job_id: job.id.clone(),
                document_id: job.document_id.clone(),
                org_id: job.org_id.clone(),
                job_type: job.job_type,
                error: Some(message),
            });
        } else {
            debug!(job_id = %job.id, "Job no longer running, failure not recorded");
        }
        Ok(())
    }

    /// Cancel a job that has not finished yet.
    pub fn cancel(&self, org_id: &str, job_id: &str, reason: Option<&str>) -> ServiceResult<()> {
        let job = self.load_job(org_id, job_id)?;
        if !can_transition(job.status, JobStatus::Cancelled) {
            return Err(ServiceError::JobAlreadyFinalized {
                job_id: job_id.to_string(),
                status: job.status.as_str().to_string(),
            });
        }

        let now = self.clock.now();
        if !self.db.cancel_job(job_id, now)? {
            // Finalized between the read above and this update
            let status = self
                .db
                .get_job(job_id)?
                .map(|j| j.status.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(ServiceError::JobAlreadyFinalized {
                job_id: job_id.to_string(),
                status,
            });
        }

        self.cancellations.cancel(job_id);
        counter!("quire_jobs_cancelled_total", "job_type" => job.job_type.as_str()).increment(1);
        info!(job_id = %job_id, reason = reason.unwrap_or("unspecified"), "Job cancelled");
        self.events.emit(JobEvent {
            event: JobEventKind::Cancelled,
            job_id: job.id,
            document_id: job.document_id,
            org_id: job.org_id,
            job_type: job.job_type,
            error: None,
        });
        Ok(())
    }

    /// Re-run a terminal job as a fresh one, optionally with new parameters.
    pub fn retry(
        &self,
        org_id: &str,
        job_id: &str,
        input_params: Option<serde_json::Value>,
    ) -> ServiceResult<ProcessingJob> {
        let prior = self.load_job(org_id, job_id)?;
        if !prior.status.is_terminal() {
            return Err(ServiceError::JobStillActive {
                job_id: job_id.to_string(),
            });
        }

        let params = input_params.or(prior.input_params);
        self.enqueue(
            org_id,
            &prior.document_id,
            prior.job_type,
            params,
            Some(prior.priority),
            prior.created_by_id,
        )
    }

    pub fn status(&self, org_id: &str, job_id: &str) -> ServiceResult<ProcessingJob> {
        self.load_job(org_id, job_id)
    }

    pub fn stats(&self) -> ServiceResult<JobStats> {
        self.db.job_stats()
    }

    /// Requeue running jobs whose lease deadline has passed.
    pub fn requeue_expired(&self) -> ServiceResult<usize> {
        let now = self.clock.now();
        let requeued = self.db.requeue_expired_leases(now)?;
        for job_id in &requeued {
            warn!(job_id = %job_id, "Lease expired, job requeued");
        }
        Ok(requeued.len())
    }

    /// Move retrying jobs whose backoff has elapsed back to pending.
    pub fn promote_retries(&self) -> ServiceResult<usize> {
        let now = self.clock.now();
        self.db.promote_due_retries(now)
    }

    fn load_job(&self, org_id: &str, job_id: &str) -> ServiceResult<ProcessingJob> {
        self.db
            .get_job(job_id)?
            .filter(|j| j.org_id == org_id)
            .ok_or_else(|| ServiceError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::clock::test_support::ManualClock;
    use crate::config::SearchConfig;
    use crate::db::test_support::sample_document;
    use crate::error::InferenceError;
    use crate::inference::{
        Classification, Classifier, Embedder, ExtractedText, RerankDocument, Reranker,
        TextRecognizer,
    };
    use crate::search::{SearchMode, SearchQuery, SearchService};

    struct SeqIds(AtomicU64);

    impl IdGen for SeqIds {
        fn next_id(&self) -> String {
            format!("job-{}", self.0.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    /// Inference stub scripted per test: `Ok` vectors embed, `Err` carries an
    /// HTTP status for the error mapping.
    struct StubInference {
        embed_result: Mutex<Result<Vec<f32>, u16>>,
    }

    impl StubInference {
        fn ok(vector: Vec<f32>) -> Self {
            Self {
                embed_result: Mutex::new(Ok(vector)),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                embed_result: Mutex::new(Err(status)),
            }
        }
    }

    #[async_trait]
    impl Embedder for StubInference {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, InferenceError> {
            match &*self.embed_result.lock().unwrap() {
                Ok(vector) => Ok(vector.clone()),
                Err(status) => Err(InferenceError::Inference {
                    status: *status,
                    message: "backend unavailable".to_string(),
                }),
            }
        }

        fn model(&self) -> &str {
            "stub-embed"
        }
    }

    #[async_trait]
    impl TextRecognizer for StubInference {
        async fn extract_text(
            &self,
            _content: &[u8],
            _mime_type: &str,
            _language: Option<&str>,
        ) -> Result<ExtractedText, InferenceError> {
            Ok(ExtractedText {
                text: "recognized".to_string(),
                page_count: Some(1),
            })
        }
    }

    #[async_trait]
    impl Classifier for StubInference {
        async fn classify(
            &self,
            _name: &str,
            _text: &str,
            _categories: &[String],
        ) -> Result<Classification, InferenceError> {
            Ok(Classification {
                category: "report".to_string(),
                confidence: 0.8,
                tags: vec!["quarterly".to_string()],
            })
        }
    }

    #[async_trait]
    impl Reranker for StubInference {
        async fn rescore(
            &self,
            _query: &str,
            documents: &[RerankDocument],
        ) -> Result<Vec<f32>, InferenceError> {
            Ok(vec![0.5; documents.len()])
        }
    }

    struct Harness {
        db: Arc<Database>,
        clock: Arc<ManualClock>,
        dispatcher: Dispatcher,
        _content_dir: TempDir,
    }

    fn harness(inference: Arc<StubInference>) -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let content_dir = TempDir::new().unwrap();
        let content = Arc::new(ContentStore::new(content_dir.path()));
        let registry = Arc::new(HandlerRegistry::new(
            inference.clone(),
            inference.clone(),
            inference,
        ));
        let config = ProcessingConfig {
            worker_count: 1,
            default_max_retries: 3,
            lease_secs: 300,
            retry_base_ms: 10,
            retry_cap_ms: 1_000,
            lease_sweep_secs: 30,
            retry_sweep_secs: 5,
        };
        let dispatcher = Dispatcher::with_parts(
            db.clone(),
            clock.clone(),
            Arc::new(SeqIds(AtomicU64::new(0))),
            content.clone(),
            registry,
            Arc::new(EventBus::new()),
            config,
        );
        Harness {
            db,
            clock,
            dispatcher,
            _content_dir: content_dir,
        }
    }

    fn insert_text_document(h: &Harness, id: &str, text: &str) {
        let mut document = sample_document(id, "org-1");
        document.mime_type = "text/plain".to_string();
        document.extracted_text = Some(text.to_string());
        h.db.insert_document(&document).unwrap();
    }

    #[tokio::test]
    async fn test_embedding_job_lands_in_search_index() {
        let h = harness(Arc::new(StubInference::ok(vec![1.0, 0.0])));
        insert_text_document(&h, "doc-1", "annual budget overview");
        let mut events = h.dispatcher.events.subscribe();

        let job = h
            .dispatcher
            .enqueue("org-1", "doc-1", JobType::Embedding, None, None, None)
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let leased = h.dispatcher.lease().unwrap().unwrap();
        assert_eq!(leased.id, job.id);
        assert_eq!(leased.status, JobStatus::Running);
        h.dispatcher.execute(leased, 0).await.unwrap();

        let finished = h.db.get_job(&job.id).unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert!(finished.completed_at.is_some());
        let output = finished.output_data.unwrap();
        assert_eq!(output["kind"], json!("embedding"));
        assert_eq!(output["dimensions"], json!(2));

        let candidates = h
            .db
            .fetch_candidates("org-1", &Default::default(), true)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].1.as_deref(), Some(&[1.0, 0.0][..]));

        let event = events.try_recv().unwrap();
        assert_eq!(event.event, JobEventKind::Completed);
        assert_eq!(event.job_id, job.id);
    }

    #[tokio::test]
    async fn test_completed_embedding_serves_semantic_search() {
        let inference = Arc::new(StubInference::ok(vec![1.0, 0.0]));
        let h = harness(inference.clone());
        insert_text_document(&h, "doc-1", "annual budget overview");

        h.dispatcher
            .enqueue("org-1", "doc-1", JobType::Embedding, None, None, None)
            .unwrap();
        let leased = h.dispatcher.lease().unwrap().unwrap();
        h.dispatcher.execute(leased, 0).await.unwrap();

        let search = SearchService::new(
            h.db.clone(),
            inference.clone(),
            inference,
            SearchConfig {
                default_limit: 20,
                max_limit: 100,
                result_cap: 1000,
                default_threshold: 0.3,
                default_text_weight: 0.6,
                default_semantic_weight: 0.4,
                rerank_top_k: 50,
            },
        );
        let query = SearchQuery {
            query: "budget".to_string(),
            mode: SearchMode::Semantic,
            ..Default::default()
        };
        let response = search.execute("org-1", &query).await.unwrap();

        assert_eq!(response.total, 1);
        assert_eq!(response.results[0].document.id, "doc-1");
        assert!(response.results[0].semantic_score.unwrap() > 0.99);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails_the_job() {
        let h = harness(Arc::new(StubInference::failing(503)));
        insert_text_document(&h, "doc-1", "text to embed");

        let job = h
            .dispatcher
            .enqueue("org-1", "doc-1", JobType::Embedding, None, None, None)
            .unwrap();

        // Initial attempt plus three retries
        for attempt in 0..4 {
            h.dispatcher.promote_retries().unwrap();
            let leased = h
                .dispatcher
                .lease()
                .unwrap()
                .unwrap_or_else(|| panic!("no job leasable at attempt {attempt}"));
            h.dispatcher.execute(leased, 0).await.unwrap();
            h.clock.advance(Duration::milliseconds(2_000));
        }

        let finished = h.db.get_job(&job.id).unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.retry_count, 3);
        assert_eq!(finished.error_code.as_deref(), Some("transient"));
        assert!(finished.completed_at.is_some());
        assert!(finished.output_data.is_none());

        // Nothing left to lease
        assert!(h.dispatcher.lease().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_job_leaves_representation_unchanged() {
        let h = harness(Arc::new(StubInference::ok(vec![0.5])));
        insert_text_document(&h, "doc-1", "body");
        h.dispatcher
            .enqueue("org-1", "doc-1", JobType::AiClassify, None, None, None)
            .unwrap();

        // Worker picks the job up, then the cancel arrives mid-flight
        let leased = h.dispatcher.lease().unwrap().unwrap();
        h.dispatcher
            .cancel("org-1", &leased.id, Some("user clicked stop"))
            .unwrap();
        h.dispatcher.execute(leased.clone(), 0).await.unwrap();

        let job = h.db.get_job(&leased.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.completed_at.is_some());
        assert!(job.output_data.is_none());

        let document = h.db.get_document("doc-1").unwrap().unwrap();
        assert_eq!(document.category, None);
        assert_eq!(document.search_version, 0);

        // Cancelling again reports the terminal state
        let err = h.dispatcher.cancel("org-1", &job.id, None).unwrap_err();
        assert!(matches!(err, ServiceError::JobAlreadyFinalized { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_jobs_of_different_types_both_complete() {
        let h = harness(Arc::new(StubInference::ok(vec![0.7, 0.7])));
        insert_text_document(&h, "doc-1", "warehouse inventory list");

        h.dispatcher
            .enqueue("org-1", "doc-1", JobType::Embedding, None, None, None)
            .unwrap();
        h.dispatcher
            .enqueue("org-1", "doc-1", JobType::AiClassify, None, None, None)
            .unwrap();

        let first = h.dispatcher.lease().unwrap().unwrap();
        let second = h.dispatcher.lease().unwrap().unwrap();
        h.dispatcher.execute(first, 0).await.unwrap();
        h.dispatcher.execute(second, 1).await.unwrap();

        let document = h.db.get_document("doc-1").unwrap().unwrap();
        assert_eq!(document.category.as_deref(), Some("report"));
        assert_eq!(document.search_version, 2);
        let candidates = h
            .db
            .fetch_candidates("org-1", &Default::default(), true)
            .unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_active_job_is_rejected() {
        let h = harness(Arc::new(StubInference::ok(vec![0.1])));
        insert_text_document(&h, "doc-1", "text");

        h.dispatcher
            .enqueue("org-1", "doc-1", JobType::Embedding, None, None, None)
            .unwrap();
        let err = h
            .dispatcher
            .enqueue("org-1", "doc-1", JobType::Embedding, None, None, None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateActiveJob { .. }));

        // A different type on the same document is fine
        h.dispatcher
            .enqueue("org-1", "doc-1", JobType::AiClassify, None, None, None)
            .unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_validates_document_and_params() {
        let h = harness(Arc::new(StubInference::ok(vec![0.1])));
        insert_text_document(&h, "doc-1", "text");

        let err = h
            .dispatcher
            .enqueue("org-1", "ghost", JobType::Ocr, None, None, None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::DocumentNotFound { .. }));

        // Wrong organization is indistinguishable from a missing document
        let err = h
            .dispatcher
            .enqueue("org-2", "doc-1", JobType::Ocr, None, None, None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::DocumentNotFound { .. }));

        let err = h
            .dispatcher
            .enqueue(
                "org-1",
                "doc-1",
                JobType::PdfSplit,
                Some(json!({"ranges": []})),
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_retry_requires_a_terminal_job() {
        let h = harness(Arc::new(StubInference::failing(503)));
        insert_text_document(&h, "doc-1", "text");

        let job = h
            .dispatcher
            .enqueue("org-1", "doc-1", JobType::Embedding, None, None, None)
            .unwrap();
        let err = h.dispatcher.retry("org-1", &job.id, None).unwrap_err();
        assert!(matches!(err, ServiceError::JobStillActive { .. }));

        // Drive the job to failure, then retry spawns a fresh pending job
        for _ in 0..4 {
            h.dispatcher.promote_retries().unwrap();
            let leased = h.dispatcher.lease().unwrap().unwrap();
            h.dispatcher.execute(leased, 0).await.unwrap();
            h.clock.advance(Duration::milliseconds(2_000));
        }
        assert_eq!(
            h.db.get_job(&job.id).unwrap().unwrap().status,
            JobStatus::Failed
        );

        let fresh = h.dispatcher.retry("org-1", &job.id, None).unwrap();
        assert_ne!(fresh.id, job.id);
        assert_eq!(fresh.status, JobStatus::Pending);
        assert_eq!(fresh.retry_count, 0);
        assert_eq!(fresh.job_type, JobType::Embedding);
    }

    #[tokio::test]
    async fn test_expired_lease_requeues_for_another_worker() {
        let h = harness(Arc::new(StubInference::ok(vec![0.2])));
        insert_text_document(&h, "doc-1", "text");

        let job = h
            .dispatcher
            .enqueue("org-1", "doc-1", JobType::Embedding, None, None, None)
            .unwrap();
        let leased = h.dispatcher.lease().unwrap().unwrap();
        assert_eq!(leased.id, job.id);

        // Lease still live, sweep is a no-op
        assert_eq!(h.dispatcher.requeue_expired().unwrap(), 0);

        h.clock.advance(Duration::seconds(301));
        assert_eq!(h.dispatcher.requeue_expired().unwrap(), 1);

        let requeued = h.db.get_job(&job.id).unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);

        // The second delivery completes normally
        let leased = h.dispatcher.lease().unwrap().unwrap();
        h.dispatcher.execute(leased, 1).await.unwrap();
        assert_eq!(
            h.db.get_job(&job.id).unwrap().unwrap().status,
            JobStatus::Completed
        );
    }
}
