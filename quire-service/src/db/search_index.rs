//! Search index writes and reads.
//!
//! Writes to indexed document fields happen only through [`apply_change`],
//! inside the transaction that finalizes the producing job. Every write is
//! a compare-and-swap against `search_version`, so concurrent job
//! completions merging different fields can never clobber each other; a
//! false return means the caller saw a stale version and must re-read.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use super::Database;
use super::documents::load_tags;
use super::models::{Document, DocumentStatus};
use crate::error::{DatabaseError, ServiceResult};

const DOCUMENT_COLUMNS: &str = "d.id, d.org_id, d.folder_id, d.name, d.mime_type, d.size_bytes, \
     d.status, d.extracted_text, d.page_count, d.category, d.category_confidence, \
     d.thumbnail_key, d.artifacts, d.search_version, d.created_at, d.updated_at";

/// Facet filters applied to document queries.
///
/// Folder scoping is already resolved to the full subtree ID list by the
/// time a filter reaches this layer.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilters {
    pub folder_ids: Option<Vec<String>>,
    pub mime_types: Option<Vec<String>>,
    /// Every listed tag must be present
    pub tags: Vec<String>,
    /// At least one listed tag must be present
    pub tags_any: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub min_size_bytes: Option<i64>,
    pub max_size_bytes: Option<i64>,
    pub status: Option<DocumentStatus>,
    pub category: Option<String>,
    pub include_ids: Option<Vec<String>>,
    pub exclude_ids: Vec<String>,
}

/// Append filter predicates to a query that already has a WHERE clause,
/// using numbered placeholders starting at `param_idx`
fn push_filters(
    sql: &mut String,
    params_vec: &mut Vec<Box<dyn rusqlite::ToSql>>,
    param_idx: &mut usize,
    filters: &DocumentFilters,
) {
    let mut next = |params_vec: &mut Vec<Box<dyn rusqlite::ToSql>>,
                    value: Box<dyn rusqlite::ToSql>|
     -> usize {
        let idx = *param_idx;
        params_vec.push(value);
        *param_idx += 1;
        idx
    };

    if let Some(folder_ids) = &filters.folder_ids {
        let placeholders: Vec<String> = folder_ids
            .iter()
            .map(|id| format!("?{}", next(params_vec, Box::new(id.clone()))))
            .collect();
        sql.push_str(&format!(
            " AND d.folder_id IN ({})",
            placeholders.join(", ")
        ));
    }

    if let Some(mime_types) = &filters.mime_types {
        let placeholders: Vec<String> = mime_types
            .iter()
            .map(|m| format!("?{}", next(params_vec, Box::new(m.clone()))))
            .collect();
        sql.push_str(&format!(
            " AND d.mime_type IN ({})",
            placeholders.join(", ")
        ));
    }

    // All tags must match
    for tag in &filters.tags {
        let idx = next(params_vec, Box::new(tag.clone()));
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM document_tags dt WHERE dt.document_id = d.id AND dt.tag = ?{})",
            idx
        ));
    }

    // Any tag matches
    if !filters.tags_any.is_empty() {
        let placeholders: Vec<String> = filters
            .tags_any
            .iter()
            .map(|tag| format!("?{}", next(params_vec, Box::new(tag.clone()))))
            .collect();
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM document_tags dt WHERE dt.document_id = d.id AND dt.tag IN ({}))",
            placeholders.join(", ")
        ));
    }

    if let Some(after) = filters.created_after {
        let idx = next(params_vec, Box::new(after.to_rfc3339()));
        sql.push_str(&format!(" AND d.created_at >= ?{}", idx));
    }
    if let Some(before) = filters.created_before {
        let idx = next(params_vec, Box::new(before.to_rfc3339()));
        sql.push_str(&format!(" AND d.created_at <= ?{}", idx));
    }

    if let Some(min_size) = filters.min_size_bytes {
        let idx = next(params_vec, Box::new(min_size));
        sql.push_str(&format!(" AND d.size_bytes >= ?{}", idx));
    }
    if let Some(max_size) = filters.max_size_bytes {
        let idx = next(params_vec, Box::new(max_size));
        sql.push_str(&format!(" AND d.size_bytes <= ?{}", idx));
    }

    if let Some(status) = filters.status {
        let idx = next(params_vec, Box::new(status.as_str().to_string()));
        sql.push_str(&format!(" AND d.status = ?{}", idx));
    }

    if let Some(category) = &filters.category {
        let idx = next(params_vec, Box::new(category.clone()));
        sql.push_str(&format!(" AND d.category = ?{}", idx));
    }

    if let Some(include_ids) = &filters.include_ids {
        let placeholders: Vec<String> = include_ids
            .iter()
            .map(|id| format!("?{}", next(params_vec, Box::new(id.clone()))))
            .collect();
        sql.push_str(&format!(" AND d.id IN ({})", placeholders.join(", ")));
    }

    if !filters.exclude_ids.is_empty() {
        let placeholders: Vec<String> = filters
            .exclude_ids
            .iter()
            .map(|id| format!("?{}", next(params_vec, Box::new(id.clone()))))
            .collect();
        sql.push_str(&format!(" AND d.id NOT IN ({})", placeholders.join(", ")));
    }
}

/// Quote each word so FTS5 treats user input as plain terms, not query syntax
pub(crate) fn fts_escape(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// One replace-by-field write against a document's searchable
/// representation, produced from a job output
#[derive(Debug)]
pub enum IndexChange {
    ExtractedText {
        text: String,
        page_count: Option<i64>,
    },
    Embedding {
        vector: Vec<f32>,
        model: String,
    },
    Classification {
        category: String,
        confidence: f64,
        tags: Vec<String>,
    },
    Thumbnail {
        key: String,
    },
    Artifacts {
        artifacts: serde_json::Value,
    },
}

/// Apply a field replacement if the document version still matches.
///
/// Runs on the caller's connection so it can share the transaction that
/// finalizes the producing job. A false return means the version guard
/// missed and nothing was written.
pub(super) fn apply_change(
    conn: &Connection,
    document_id: &str,
    expected_version: i64,
    change: &IndexChange,
    now: DateTime<Utc>,
) -> ServiceResult<bool> {
    let rows = match change {
        IndexChange::ExtractedText { text, page_count } => conn
            .execute(
                "UPDATE documents SET extracted_text = ?1, page_count = ?2, \
                 search_version = search_version + 1, updated_at = ?3 \
                 WHERE id = ?4 AND search_version = ?5",
                params![text, page_count, now.to_rfc3339(), document_id, expected_version],
            )
            .map_err(DatabaseError::Query)?,
        IndexChange::Embedding { vector, model } => {
            let rows = conn
                .execute(
                    "UPDATE documents SET search_version = search_version + 1, updated_at = ?1 \
                     WHERE id = ?2 AND search_version = ?3",
                    params![now.to_rfc3339(), document_id, expected_version],
                )
                .map_err(DatabaseError::Query)?;

            if rows > 0 {
                // Keyed by document ID, so re-running the same job replaces
                // in place
                let embedding_bytes: Vec<u8> =
                    vector.iter().flat_map(|f| f.to_le_bytes()).collect();
                conn.execute(
                    "INSERT OR REPLACE INTO document_embeddings (document_id, embedding, model, dimensions) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![document_id, embedding_bytes, model, vector.len() as i64],
                )
                .map_err(DatabaseError::Query)?;
            }
            rows
        }
        IndexChange::Classification {
            category,
            confidence,
            tags,
        } => {
            let rows = conn
                .execute(
                    "UPDATE documents SET category = ?1, category_confidence = ?2, \
                     search_version = search_version + 1, updated_at = ?3 \
                     WHERE id = ?4 AND search_version = ?5",
                    params![category, confidence, now.to_rfc3339(), document_id, expected_version],
                )
                .map_err(DatabaseError::Query)?;

            if rows > 0 {
                conn.execute(
                    "DELETE FROM document_tags WHERE document_id = ?1",
                    params![document_id],
                )
                .map_err(DatabaseError::Query)?;
                for tag in tags {
                    conn.execute(
                        "INSERT OR IGNORE INTO document_tags (document_id, tag) VALUES (?1, ?2)",
                        params![document_id, tag],
                    )
                    .map_err(DatabaseError::Query)?;
                }
            }
            rows
        }
        IndexChange::Thumbnail { key } => conn
            .execute(
                "UPDATE documents SET thumbnail_key = ?1, search_version = search_version + 1, \
                 updated_at = ?2 WHERE id = ?3 AND search_version = ?4",
                params![key, now.to_rfc3339(), document_id, expected_version],
            )
            .map_err(DatabaseError::Query)?,
        IndexChange::Artifacts { artifacts } => {
            let artifacts_json =
                serde_json::to_string(artifacts).map_err(DatabaseError::Serialization)?;
            conn.execute(
                "UPDATE documents SET artifacts = ?1, search_version = search_version + 1, \
                 updated_at = ?2 WHERE id = ?3 AND search_version = ?4",
                params![artifacts_json, now.to_rfc3339(), document_id, expected_version],
            )
            .map_err(DatabaseError::Query)?
        }
    };

    Ok(rows > 0)
}

impl Database {
    /// Full-text search over name, extracted text and category.
    ///
    /// Returns documents with their raw bm25 rank (smaller is better),
    /// best first.
    pub fn search_fts(
        &self,
        org_id: &str,
        query: &str,
        filters: &DocumentFilters,
        limit: usize,
    ) -> ServiceResult<Vec<(Document, f64)>> {
        let conn = self.conn.lock().unwrap();

        let fts_query = fts_escape(query);
        if fts_query.is_empty() {
            return Ok(vec![]);
        }

        let mut sql = format!(
            "SELECT {}, bm25(documents_fts) FROM documents d \
             JOIN documents_fts fts ON d.id = fts.id \
             WHERE documents_fts MATCH ?1 AND d.org_id = ?2",
            DOCUMENT_COLUMNS
        );

        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(fts_query), Box::new(org_id.to_string())];
        let mut param_idx = 3;
        push_filters(&mut sql, &mut params_vec, &mut param_idx, filters);

        sql.push_str(&format!(
            " ORDER BY bm25(documents_fts) LIMIT ?{}",
            param_idx
        ));
        params_vec.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql).map_err(DatabaseError::Query)?;

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let mut results: Vec<(Document, f64)> = stmt
            .query_map(params_refs.as_slice(), |row| {
                let rank: f64 = row.get(16)?;
                let doc = Document::from_row(row, vec![])?;
                Ok((doc, rank))
            })
            .map_err(DatabaseError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        for (doc, _) in &mut results {
            doc.tags = load_tags(&conn, &doc.id)?;
        }

        Ok(results)
    }

    /// Fetch filter-matching documents with their embeddings for
    /// brute-force similarity scoring. With `require_embedding` set,
    /// documents that have not been embedded yet are skipped.
    pub fn fetch_candidates(
        &self,
        org_id: &str,
        filters: &DocumentFilters,
        require_embedding: bool,
    ) -> ServiceResult<Vec<(Document, Option<Vec<f32>>)>> {
        let conn = self.conn.lock().unwrap();

        let join = if require_embedding {
            "JOIN document_embeddings e ON d.id = e.document_id"
        } else {
            "LEFT JOIN document_embeddings e ON d.id = e.document_id"
        };

        let mut sql = format!(
            "SELECT {}, e.embedding FROM documents d {} WHERE d.org_id = ?1",
            DOCUMENT_COLUMNS, join
        );

        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(org_id.to_string())];
        let mut param_idx = 2;
        push_filters(&mut sql, &mut params_vec, &mut param_idx, filters);

        let mut stmt = conn.prepare(&sql).map_err(DatabaseError::Query)?;

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let mut results: Vec<(Document, Option<Vec<f32>>)> = stmt
            .query_map(params_refs.as_slice(), |row| {
                let embedding_bytes: Option<Vec<u8>> = row.get(16)?;
                let doc = Document::from_row(row, vec![])?;
                Ok((doc, embedding_bytes.map(|b| decode_embedding(&b))))
            })
            .map_err(DatabaseError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        for (doc, _) in &mut results {
            doc.tags = load_tags(&conn, &doc.id)?;
        }

        Ok(results)
    }

    /// Indexed terms for one organization with their document frequencies.
    ///
    /// The instance-level vocabulary rows carry the content rowid, which
    /// joins back to `documents` so terms never leak across organizations.
    pub fn vocab_terms(&self, org_id: &str) -> ServiceResult<Vec<(String, i64)>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT v.term, COUNT(DISTINCT v.doc) AS docs FROM documents_fts_vocab v \
                 JOIN documents d ON d.rowid = v.doc WHERE d.org_id = ?1 \
                 GROUP BY v.term ORDER BY docs DESC",
            )
            .map_err(DatabaseError::Query)?;

        let terms: Vec<(String, i64)> = stmt
            .query_map(params![org_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(DatabaseError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(terms)
    }

    /// Indexed terms for one organization starting with the given prefix,
    /// most frequent first
    pub fn vocab_terms_with_prefix(
        &self,
        org_id: &str,
        prefix: &str,
        limit: usize,
    ) -> ServiceResult<Vec<(String, i64)>> {
        let conn = self.conn.lock().unwrap();

        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");

        let mut stmt = conn
            .prepare(
                "SELECT v.term, COUNT(DISTINCT v.doc) AS docs FROM documents_fts_vocab v \
                 JOIN documents d ON d.rowid = v.doc \
                 WHERE d.org_id = ?1 AND v.term LIKE ?2 ESCAPE '\\' \
                 GROUP BY v.term ORDER BY docs DESC, v.term ASC LIMIT ?3",
            )
            .map_err(DatabaseError::Query)?;

        let terms: Vec<(String, i64)> = stmt
            .query_map(
                params![org_id, format!("{}%", escaped), limit as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(DatabaseError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(terms)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::super::test_support::{sample_document, sample_text_document};
    use super::*;

    #[test]
    fn test_fts_escape_quotes_words() {
        assert_eq!(fts_escape("hello world"), "\"hello\" \"world\"");
        assert_eq!(fts_escape("say \"hi\""), "\"say\" \"\"\"hi\"\"\"");
        assert_eq!(fts_escape("   "), "");
    }

    #[test]
    fn test_version_guard_rejects_stale_writer() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document(&sample_document("doc-1", "org-1")).unwrap();

        let now = Utc::now();
        let change = IndexChange::ExtractedText {
            text: "hello".to_string(),
            page_count: Some(2),
        };
        {
            let conn = db.conn.lock().unwrap();
            assert!(apply_change(&conn, "doc-1", 0, &change, now).unwrap());
        }

        let doc = db.get_document("doc-1").unwrap().unwrap();
        assert_eq!(doc.search_version, 1);
        assert_eq!(doc.extracted_text.as_deref(), Some("hello"));
        assert_eq!(doc.page_count, Some(2));

        // A writer that read version 0 before the first write lost the race
        let stale = IndexChange::ExtractedText {
            text: "stale".to_string(),
            page_count: None,
        };
        {
            let conn = db.conn.lock().unwrap();
            assert!(!apply_change(&conn, "doc-1", 0, &stale, now).unwrap());
        }
        let doc = db.get_document("doc-1").unwrap().unwrap();
        assert_eq!(doc.extracted_text.as_deref(), Some("hello"));
    }

    #[test]
    fn test_changes_to_different_fields_accumulate() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document(&sample_document("doc-1", "org-1")).unwrap();

        let now = Utc::now();
        {
            let conn = db.conn.lock().unwrap();
            let text = IndexChange::ExtractedText {
                text: "quarterly report".to_string(),
                page_count: None,
            };
            assert!(apply_change(&conn, "doc-1", 0, &text, now).unwrap());

            let classification = IndexChange::Classification {
                category: "report".to_string(),
                confidence: 0.92,
                tags: vec!["finance".to_string()],
            };
            assert!(apply_change(&conn, "doc-1", 1, &classification, now).unwrap());
        }

        let doc = db.get_document("doc-1").unwrap().unwrap();
        assert_eq!(doc.extracted_text.as_deref(), Some("quarterly report"));
        assert_eq!(doc.category.as_deref(), Some("report"));
        assert_eq!(doc.tags, vec!["finance".to_string()]);
        assert_eq!(doc.search_version, 2);
    }

    #[test]
    fn test_embedding_replace_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document(&sample_document("doc-1", "org-1")).unwrap();

        let now = Utc::now();
        let vector = vec![0.5_f32, -0.25, 1.0];
        let change = IndexChange::Embedding {
            vector: vector.clone(),
            model: "nomic-embed-text".to_string(),
        };
        {
            let conn = db.conn.lock().unwrap();
            assert!(apply_change(&conn, "doc-1", 0, &change, now).unwrap());
            // Re-run of the same job against the new version replaces in place
            assert!(apply_change(&conn, "doc-1", 1, &change, now).unwrap());
        }

        let filters = DocumentFilters::default();
        let candidates = db.fetch_candidates("org-1", &filters, true).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].1.as_deref(), Some(vector.as_slice()));
    }

    #[test]
    fn test_fts_search_matches_extracted_text() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document(&sample_text_document(
            "doc-1",
            "org-1",
            "invoice for consulting services",
        ))
        .unwrap();
        db.insert_document(&sample_text_document(
            "doc-2",
            "org-1",
            "meeting notes from standup",
        ))
        .unwrap();

        let filters = DocumentFilters::default();
        let hits = db.search_fts("org-1", "invoice", &filters, 100).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "doc-1");

        // Other orgs never see the document
        assert!(db.search_fts("org-2", "invoice", &filters, 100).unwrap().is_empty());
        assert!(db.search_fts("org-1", "nonexistent", &filters, 100).unwrap().is_empty());
    }

    #[test]
    fn test_fts_rank_prefers_heavier_match() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document(&sample_text_document(
            "doc-1",
            "org-1",
            "contract contract contract",
        ))
        .unwrap();
        db.insert_document(&sample_text_document(
            "doc-2",
            "org-1",
            "this long agreement mentions the contract exactly once among many other words",
        ))
        .unwrap();

        let filters = DocumentFilters::default();
        let hits = db.search_fts("org-1", "contract", &filters, 100).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.id, "doc-1");
        // bm25 rank is smaller-is-better
        assert!(hits[0].1 <= hits[1].1);
    }

    #[test]
    fn test_filters_narrow_candidates() {
        let db = Database::open_in_memory().unwrap();

        let mut small = sample_document("doc-small", "org-1");
        small.size_bytes = 100;
        small.tags = vec!["alpha".to_string(), "beta".to_string()];
        db.insert_document(&small).unwrap();

        let mut large = sample_document("doc-large", "org-1");
        large.size_bytes = 10_000;
        large.tags = vec!["alpha".to_string()];
        db.insert_document(&large).unwrap();

        // tags AND: both tags required
        let filters = DocumentFilters {
            tags: vec!["alpha".to_string(), "beta".to_string()],
            ..Default::default()
        };
        let hits = db.fetch_candidates("org-1", &filters, false).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "doc-small");

        // tags_any: either tag is enough
        let filters = DocumentFilters {
            tags_any: vec!["beta".to_string(), "gamma".to_string()],
            ..Default::default()
        };
        let hits = db.fetch_candidates("org-1", &filters, false).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "doc-small");

        // Size range
        let filters = DocumentFilters {
            min_size_bytes: Some(1000),
            ..Default::default()
        };
        let hits = db.fetch_candidates("org-1", &filters, false).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "doc-large");

        // Exclusions
        let filters = DocumentFilters {
            exclude_ids: vec!["doc-small".to_string()],
            ..Default::default()
        };
        let hits = db.fetch_candidates("org-1", &filters, false).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "doc-large");
    }

    #[test]
    fn test_vocab_reflects_indexed_terms() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document(&sample_text_document(
            "doc-1",
            "org-1",
            "invoice payment schedule",
        ))
        .unwrap();

        let terms = db.vocab_terms("org-1").unwrap();
        assert!(terms.iter().any(|(t, _)| t == "invoice"));
        assert!(terms.iter().any(|(t, _)| t == "payment"));

        let prefixed = db.vocab_terms_with_prefix("org-1", "pay", 10).unwrap();
        assert_eq!(prefixed.len(), 1);
        assert_eq!(prefixed[0].0, "payment");
    }

    #[test]
    fn test_vocab_stays_within_the_organization() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document(&sample_text_document("doc-1", "org-1", "ledger alpha"))
            .unwrap();
        db.insert_document(&sample_text_document("doc-2", "org-1", "ledger beta"))
            .unwrap();
        db.insert_document(&sample_text_document(
            "doc-3",
            "org-2",
            "ledger gamma shipment",
        ))
        .unwrap();

        // Frequencies count only the requesting org's documents
        let terms = db.vocab_terms("org-1").unwrap();
        let ledger = terms.iter().find(|(t, _)| t == "ledger").unwrap();
        assert_eq!(ledger.1, 2);
        assert!(!terms.iter().any(|(t, _)| t == "shipment"));
        assert!(!terms.iter().any(|(t, _)| t == "gamma"));

        let terms = db.vocab_terms("org-2").unwrap();
        let ledger = terms.iter().find(|(t, _)| t == "ledger").unwrap();
        assert_eq!(ledger.1, 1);

        // Prefix completion honors the same boundary
        assert!(db.vocab_terms_with_prefix("org-1", "ship", 10).unwrap().is_empty());
        let prefixed = db.vocab_terms_with_prefix("org-2", "ship", 10).unwrap();
        assert_eq!(prefixed.len(), 1);
        assert_eq!(prefixed[0].0, "shipment");
    }
}
