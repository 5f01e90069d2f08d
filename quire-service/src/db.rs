//! Database module for SQLite operations.
//!
//! This module provides the `Database` struct and all database operations
//! organized into submodules by domain.

mod documents;
mod jobs;
mod migrations;
pub mod models;
mod search_index;

pub use jobs::CompletionOutcome;
pub use models::{
    Document, DocumentStatus, Folder, JobPriority, JobStats, JobStatus, JobType, ProcessingJob,
};
pub use search_index::{DocumentFilters, IndexChange};

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{DatabaseError, ServiceError, ServiceResult};

/// Database manager for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> ServiceResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ServiceError::Database(DatabaseError::Connection(
                    rusqlite::Error::ToSqlConversionFailure(Box::new(e)),
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(DatabaseError::Connection)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;

        // Run all migrations
        migrations::run_migrations(&conn)?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        Ok(db)
    }

    /// Open an in-memory database, used by tests
    #[cfg(test)]
    pub fn open_in_memory() -> ServiceResult<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Connection)?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;

    use super::Database;
    use super::models::{
        Document, DocumentStatus, JobPriority, JobStatus, JobType, ProcessingJob,
    };

    pub(crate) fn sample_job(id: &str, document_id: &str, job_type: JobType) -> ProcessingJob {
        ProcessingJob {
            id: id.to_string(),
            document_id: document_id.to_string(),
            org_id: "org-1".to_string(),
            job_type,
            status: JobStatus::Pending,
            priority: JobPriority::Normal,
            input_params: None,
            output_data: None,
            error_message: None,
            error_code: None,
            retry_count: 0,
            max_retries: 3,
            lease_expires_at: None,
            next_retry_at: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
            created_by_id: None,
        }
    }

    pub(crate) fn sample_document(id: &str, org_id: &str) -> Document {
        Document {
            id: id.to_string(),
            org_id: org_id.to_string(),
            folder_id: None,
            name: format!("{}.pdf", id),
            mime_type: "application/pdf".to_string(),
            size_bytes: 1024,
            status: DocumentStatus::Active,
            extracted_text: None,
            page_count: None,
            category: None,
            category_confidence: None,
            tags: vec![],
            thumbnail_key: None,
            artifacts: None,
            search_version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn sample_text_document(id: &str, org_id: &str, text: &str) -> Document {
        let mut document = sample_document(id, org_id);
        document.extracted_text = Some(text.to_string());
        document
    }

    /// Write an embedding row directly, bypassing the job pipeline
    pub(crate) fn seed_embedding(db: &Database, document_id: &str, vector: &[f32], model: &str) {
        let conn = db.conn.lock().unwrap();
        let bytes: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
        conn.execute(
            "INSERT OR REPLACE INTO document_embeddings (document_id, embedding, model, dimensions) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![document_id, bytes, model, vector.len() as i64],
        )
        .unwrap();
    }
}
