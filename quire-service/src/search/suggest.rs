//! Query suggestions drawn from the full-text index vocabulary.
//!
//! Two flavors: prefix completions for type-ahead, and edit-distance
//! corrections offered when a search comes back empty.

use levenshtein_automata::{Distance, LevenshteinAutomatonBuilder};
use tracing::debug;

use crate::error::ServiceResult;

use super::SearchService;

/// Edit distance allowed between a query term and a suggested term
const MAX_EDIT_DISTANCE: u8 = 2;
/// Upper bound on suggestions returned for a zero-hit search
const MAX_SUGGESTIONS: usize = 5;

impl SearchService {
    /// Prefix completions for type-ahead, most frequent terms in the
    /// caller's organization first.
    pub fn suggest_completions(
        &self,
        org_id: &str,
        prefix: &str,
        limit: usize,
    ) -> ServiceResult<Vec<String>> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() {
            return Ok(vec![]);
        }
        let limit = limit.clamp(1, self.config.max_limit);

        let terms = self.db.vocab_terms_with_prefix(org_id, &prefix, limit)?;
        Ok(terms.into_iter().map(|(term, _)| term).collect())
    }

    /// Correction candidates for a query that matched nothing: indexed terms
    /// within a small edit distance of a query term, ranked by distance and
    /// then by document frequency. Query terms already present in the
    /// vocabulary yield no candidates.
    pub(super) fn term_suggestions(
        &self,
        org_id: &str,
        query_text: &str,
    ) -> ServiceResult<Vec<String>> {
        let query_terms: Vec<String> = query_text
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if query_terms.is_empty() {
            return Ok(vec![]);
        }

        let vocab = self.db.vocab_terms(org_id)?;
        let builder = LevenshteinAutomatonBuilder::new(MAX_EDIT_DISTANCE, true);

        let mut candidates: Vec<(u8, i64, String)> = Vec::new();
        for term in &query_terms {
            if vocab.iter().any(|(existing, _)| existing == term) {
                continue;
            }
            let dfa = builder.build_dfa(term);
            for (existing, doc_count) in &vocab {
                if let Distance::Exact(d) = dfa.eval(existing) {
                    candidates.push((d, *doc_count, existing.clone()));
                }
            }
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
        let mut suggestions: Vec<String> = Vec::new();
        for (_, _, term) in candidates {
            if !suggestions.contains(&term) {
                suggestions.push(term);
            }
            if suggestions.len() == MAX_SUGGESTIONS {
                break;
            }
        }

        debug!(
            terms = query_terms.len(),
            suggestions = suggestions.len(),
            "Computed query suggestions"
        );
        Ok(suggestions)
    }
}
