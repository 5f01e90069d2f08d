//! Database model structs.
//!
//! This module contains the data structures for database records.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::EnumIter;

/// Kind of work a processing job performs.
///
/// Adding a new job type requires:
/// 1. Add variant here
/// 2. Add a params variant in jobs::handlers
/// 3. Add handler dispatch in jobs::registry (compile error if missing due to exhaustive match)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Ocr,
    PdfSplit,
    PdfMerge,
    Thumbnail,
    AiClassify,
    Embedding,
    Convert,
    Compress,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Ocr => "ocr",
            JobType::PdfSplit => "pdf_split",
            JobType::PdfMerge => "pdf_merge",
            JobType::Thumbnail => "thumbnail",
            JobType::AiClassify => "ai_classify",
            JobType::Embedding => "embedding",
            JobType::Convert => "convert",
            JobType::Compress => "compress",
        }
    }

    /// Strict parse; unknown strings are rejected so dispatch stays exhaustive
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ocr" => Some(JobType::Ocr),
            "pdf_split" => Some(JobType::PdfSplit),
            "pdf_merge" => Some(JobType::PdfMerge),
            "thumbnail" => Some(JobType::Thumbnail),
            "ai_classify" => Some(JobType::AiClassify),
            "embedding" => Some(JobType::Embedding),
            "convert" => Some(JobType::Convert),
            "compress" => Some(JobType::Compress),
            _ => None,
        }
    }
}

/// Lifecycle state of a processing job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Retrying => "retrying",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            "retrying" => Some(JobStatus::Retrying),
            _ => None,
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Active states count against the one-live-job-per-pair constraint
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Running | JobStatus::Retrying
        )
    }
}

/// Queue ordering hint, stored as an integer so SQL can sort on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl JobPriority {
    pub fn as_i64(&self) -> i64 {
        match self {
            JobPriority::Low => 0,
            JobPriority::Normal => 1,
            JobPriority::High => 2,
            JobPriority::Urgent => 3,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            0 => JobPriority::Low,
            2 => JobPriority::High,
            3 => JobPriority::Urgent,
            _ => JobPriority::Normal,
        }
    }
}

/// Document lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Active,
    Archived,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Active => "active",
            DocumentStatus::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "archived" => DocumentStatus::Archived,
            _ => DocumentStatus::Active,
        }
    }
}

/// Processing job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub document_id: String,
    pub org_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: JobPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_params: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Worker lease deadline; a running job past this point is presumed lost
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by_id: Option<String>,
}

impl ProcessingJob {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let job_type_str: String = row.get(3)?;
        let status_str: String = row.get(4)?;
        let priority: i64 = row.get(5)?;
        let input_params_str: Option<String> = row.get(6)?;
        let output_data_str: Option<String> = row.get(7)?;
        let retry_count: i64 = row.get(10)?;
        let max_retries: i64 = row.get(11)?;
        let lease_expires_at_str: Option<String> = row.get(12)?;
        let next_retry_at_str: Option<String> = row.get(13)?;
        let started_at_str: Option<String> = row.get(14)?;
        let completed_at_str: Option<String> = row.get(15)?;
        let created_at_str: String = row.get(16)?;

        let job_type = JobType::from_str(&job_type_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                format!("unknown job type: {}", job_type_str).into(),
            )
        })?;
        let status = JobStatus::from_str(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown job status: {}", status_str).into(),
            )
        })?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            org_id: row.get(2)?,
            job_type,
            status,
            priority: JobPriority::from_i64(priority),
            input_params: input_params_str.and_then(|s| serde_json::from_str(&s).ok()),
            output_data: output_data_str.and_then(|s| serde_json::from_str(&s).ok()),
            error_message: row.get(8)?,
            error_code: row.get(9)?,
            retry_count: retry_count as u32,
            max_retries: max_retries as u32,
            lease_expires_at: parse_opt_timestamp(lease_expires_at_str),
            next_retry_at: parse_opt_timestamp(next_retry_at_str),
            started_at: parse_opt_timestamp(started_at_str),
            completed_at: parse_opt_timestamp(completed_at_str),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            created_by_id: row.get(17)?,
        })
    }
}

/// Document record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub org_id: String,
    pub folder_id: Option<String>,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_confidence: Option<f64>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_key: Option<String>,
    /// Per-job-type output artifacts (split page keys, converted files, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<serde_json::Value>,
    /// Monotonic counter bumped on every indexed-field write; completion
    /// merges compare-and-swap against it
    pub search_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub(crate) fn from_row(row: &Row<'_>, tags: Vec<String>) -> Result<Self, rusqlite::Error> {
        let status_str: String = row.get(6)?;
        let artifacts_str: Option<String> = row.get(12)?;
        let created_at_str: String = row.get(14)?;
        let updated_at_str: String = row.get(15)?;

        Ok(Self {
            id: row.get(0)?,
            org_id: row.get(1)?,
            folder_id: row.get(2)?,
            name: row.get(3)?,
            mime_type: row.get(4)?,
            size_bytes: row.get(5)?,
            status: DocumentStatus::from_str(&status_str),
            extracted_text: row.get(7)?,
            page_count: row.get(8)?,
            category: row.get(9)?,
            category_confidence: row.get(10)?,
            tags,
            thumbnail_key: row.get(11)?,
            artifacts: artifacts_str.and_then(|s| serde_json::from_str(&s).ok()),
            search_version: row.get(13)?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Folder record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub org_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Folder {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let created_at_str: String = row.get(4)?;

        Ok(Self {
            id: row.get(0)?,
            org_id: row.get(1)?,
            parent_id: row.get(2)?,
            name: row.get(3)?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Queue depth snapshot surfaced by the stats endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: i64,
    pub running: i64,
    pub retrying: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub by_type: BTreeMap<String, i64>,
}

fn parse_opt_timestamp(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
