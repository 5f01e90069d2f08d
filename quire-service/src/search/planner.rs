//! Query planning and execution.
//!
//! Turns a [`SearchQuery`] into SQL-level retrieval, blends lexical and
//! semantic scores, applies the deterministic sort and pagination, and falls
//! back to term suggestions when nothing matched.

use std::collections::HashMap;
use std::time::Instant;

use metrics::histogram;
use tracing::{debug, warn};

use crate::db::DocumentFilters;
use crate::error::{ServiceError, ServiceResult};
use crate::inference::RerankDocument;
use crate::jobs::truncate_chars;

use super::ranking::{self, ScoredDocument};
use super::{SearchFilters, SearchHit, SearchMode, SearchQuery, SearchResponse, SearchService};

/// Characters of document text handed to the reranker per candidate
const RERANK_TEXT_LIMIT: usize = 1_000;

/// Limits and weights after defaults have been applied
struct ResolvedParams {
    limit: usize,
    threshold: f64,
    text_weight: f64,
    semantic_weight: f64,
}

impl SearchService {
    /// Run one search request end to end.
    pub async fn execute(
        &self,
        org_id: &str,
        query: &SearchQuery,
    ) -> ServiceResult<SearchResponse> {
        let started = Instant::now();
        debug!(
            org_id = %org_id,
            mode = query.mode.as_str(),
            query = %query.query,
            "Executing search"
        );

        let params = self.resolve_params(query)?;
        let filters = self.resolve_filters(org_id, &query.filters)?;

        let mut warning = None;
        let mut scored = match query.mode {
            SearchMode::Fulltext => self.lexical_candidates(org_id, &query.query, &filters, 1.0)?,
            SearchMode::Semantic => {
                self.semantic_candidates(org_id, &query.query, &filters, params.threshold)
                    .await?
            }
            SearchMode::Hybrid => {
                self.hybrid_candidates(org_id, query, &filters, &params, &mut warning)
                    .await?
            }
        };
        ranking::sort_scored(&mut scored);

        if query.rerank && !scored.is_empty() {
            scored = self.rerank(&query.query, scored, &mut warning).await;
        }

        let truncated = scored.len() > self.config.result_cap;
        scored.truncate(self.config.result_cap);
        let total = scored.len();

        let results: Vec<SearchHit> = scored
            .into_iter()
            .skip(query.offset)
            .take(params.limit)
            .map(|entry| SearchHit {
                document: entry.document,
                score: entry.combined,
                lexical_score: entry.lexical,
                semantic_score: entry.semantic,
            })
            .collect();

        let suggestions = if total == 0 {
            let near_misses = self.term_suggestions(org_id, &query.query)?;
            (!near_misses.is_empty()).then_some(near_misses)
        } else {
            None
        };

        histogram!("quire_search_duration_seconds", "mode" => query.mode.as_str())
            .record(started.elapsed().as_secs_f64());
        let took_ms = started.elapsed().as_millis() as u64;
        debug!(total, took_ms, truncated, "Search completed");

        Ok(SearchResponse {
            results,
            total,
            took_ms,
            truncated,
            warning,
            suggestions,
        })
    }

    fn resolve_params(&self, query: &SearchQuery) -> ServiceResult<ResolvedParams> {
        if query.query.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "query must not be empty".to_string(),
            });
        }

        let limit = query.limit.unwrap_or(self.config.default_limit);
        if limit == 0 || limit > self.config.max_limit {
            return Err(ServiceError::InvalidRequest {
                message: format!("limit must be between 1 and {}", self.config.max_limit),
            });
        }

        let threshold = query.threshold.unwrap_or(self.config.default_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ServiceError::InvalidRequest {
                message: "threshold must be within [0, 1]".to_string(),
            });
        }

        let text_weight = query.text_weight.unwrap_or(self.config.default_text_weight);
        let semantic_weight = query
            .semantic_weight
            .unwrap_or(self.config.default_semantic_weight);
        for weight in [text_weight, semantic_weight] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ServiceError::InvalidRequest {
                    message: "weights must be finite and non-negative".to_string(),
                });
            }
        }

        Ok(ResolvedParams {
            limit,
            threshold,
            text_weight,
            semantic_weight,
        })
    }

    /// Map request filters onto SQL-level filters, resolving folder scope.
    fn resolve_filters(
        &self,
        org_id: &str,
        filters: &SearchFilters,
    ) -> ServiceResult<DocumentFilters> {
        let folder_ids = match &filters.folder_id {
            Some(folder_id) if filters.include_subtree => {
                // The subtree query returns nothing for a foreign or unknown root
                let ids = self.db.folder_subtree_ids(org_id, folder_id)?;
                if ids.is_empty() {
                    return Err(ServiceError::FolderNotFound {
                        folder_id: folder_id.clone(),
                    });
                }
                Some(ids)
            }
            Some(folder_id) => {
                let known = self
                    .db
                    .get_folder(folder_id)?
                    .is_some_and(|f| f.org_id == org_id);
                if !known {
                    return Err(ServiceError::FolderNotFound {
                        folder_id: folder_id.clone(),
                    });
                }
                Some(vec![folder_id.clone()])
            }
            None => None,
        };

        Ok(DocumentFilters {
            folder_ids,
            mime_types: filters.mime_types.clone(),
            tags: filters.tags.clone(),
            tags_any: filters.tags_any.clone(),
            created_after: filters.created_after,
            created_before: filters.created_before,
            min_size_bytes: filters.min_size_bytes,
            max_size_bytes: filters.max_size_bytes,
            status: filters.status,
            category: filters.category.clone(),
            include_ids: filters.include_ids.clone(),
            exclude_ids: filters.exclude_ids.clone(),
        })
    }

    fn lexical_candidates(
        &self,
        org_id: &str,
        query_text: &str,
        filters: &DocumentFilters,
        weight: f64,
    ) -> ServiceResult<Vec<ScoredDocument>> {
        // One extra row past the cap distinguishes "exactly cap" from truncation
        let raw = self
            .db
            .search_fts(org_id, query_text, filters, self.config.result_cap + 1)?;
        Ok(ranking::normalize_bm25(raw)
            .into_iter()
            .map(|(document, lexical)| ScoredDocument {
                combined: weight * lexical,
                lexical: Some(lexical),
                semantic: None,
                document,
            })
            .collect())
    }

    async fn semantic_candidates(
        &self,
        org_id: &str,
        query_text: &str,
        filters: &DocumentFilters,
        threshold: f64,
    ) -> ServiceResult<Vec<ScoredDocument>> {
        let query_vector = self.embedder.embed(query_text).await?;
        let candidates = self.db.fetch_candidates(org_id, filters, true)?;

        Ok(candidates
            .into_iter()
            .filter_map(|(document, vector)| {
                let vector = vector?;
                let semantic =
                    (ranking::cosine_similarity(&query_vector, &vector) as f64).clamp(0.0, 1.0);
                (semantic >= threshold).then(|| ScoredDocument {
                    combined: semantic,
                    lexical: None,
                    semantic: Some(semantic),
                    document,
                })
            })
            .collect())
    }

    async fn hybrid_candidates(
        &self,
        org_id: &str,
        query: &SearchQuery,
        filters: &DocumentFilters,
        params: &ResolvedParams,
        warning: &mut Option<String>,
    ) -> ServiceResult<Vec<ScoredDocument>> {
        // With no semantic weight the lexical ordering is the whole answer,
        // so the embedding round-trip is skipped entirely
        if params.semantic_weight == 0.0 {
            return self.lexical_candidates(org_id, &query.query, filters, params.text_weight);
        }

        let query_vector = match self.embedder.embed(&query.query).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "Embedding unavailable, serving lexical results only");
                *warning =
                    Some("semantic scoring unavailable; results are lexical-only".to_string());
                return self.lexical_candidates(org_id, &query.query, filters, 1.0);
            }
        };

        let mut scored =
            self.lexical_candidates(org_id, &query.query, filters, params.text_weight)?;
        let mut index_of: HashMap<String, usize> = scored
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.document.id.clone(), i))
            .collect();

        for (document, vector) in self.db.fetch_candidates(org_id, filters, true)? {
            let Some(vector) = vector else { continue };
            let semantic =
                (ranking::cosine_similarity(&query_vector, &vector) as f64).clamp(0.0, 1.0);
            if semantic < params.threshold {
                continue;
            }
            match index_of.get(&document.id) {
                Some(&i) => {
                    scored[i].semantic = Some(semantic);
                    scored[i].combined += params.semantic_weight * semantic;
                }
                None => {
                    index_of.insert(document.id.clone(), scored.len());
                    scored.push(ScoredDocument {
                        combined: params.semantic_weight * semantic,
                        lexical: None,
                        semantic: Some(semantic),
                        document,
                    });
                }
            }
        }

        Ok(scored)
    }

    /// Rescore the head of the sorted list; failures leave the order as-is.
    async fn rerank(
        &self,
        query_text: &str,
        scored: Vec<ScoredDocument>,
        warning: &mut Option<String>,
    ) -> Vec<ScoredDocument> {
        let head_len = self.config.rerank_top_k.min(scored.len());
        let head: Vec<RerankDocument> = scored[..head_len]
            .iter()
            .map(|entry| {
                let text = entry
                    .document
                    .extracted_text
                    .as_deref()
                    .unwrap_or(&entry.document.name);
                RerankDocument {
                    id: entry.document.id.clone(),
                    text: truncate_chars(text, RERANK_TEXT_LIMIT).to_string(),
                }
            })
            .collect();

        match self.reranker.rescore(query_text, &head).await {
            Ok(scores) => ranking::reorder_head(scored, &scores),
            Err(e) => {
                warn!(error = %e, "Rerank failed, keeping combined-score order");
                *warning = Some("rerank unavailable; order unchanged".to_string());
                scored
            }
        }
    }
}
