//! Scoring primitives shared by the search planner.

use std::cmp::Ordering;

use crate::db::Document;

/// A candidate document with its per-signal and blended scores
#[derive(Debug)]
pub(super) struct ScoredDocument {
    pub document: Document,
    pub lexical: Option<f64>,
    pub semantic: Option<f64>,
    pub combined: f64,
}

/// Calculate cosine similarity between two vectors
pub(super) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Min-max normalize raw bm25 ranks into [0, 1].
///
/// SQLite's bm25() is smaller-is-better, so the best rank maps to 1.0 and the
/// worst to 0.0. When every rank is identical the whole set maps to 1.0.
pub(super) fn normalize_bm25(hits: Vec<(Document, f64)>) -> Vec<(Document, f64)> {
    let Some(min) = hits.iter().map(|(_, rank)| *rank).reduce(f64::min) else {
        return vec![];
    };
    let max = hits.iter().map(|(_, rank)| *rank).fold(min, f64::max);
    let range = max - min;

    hits.into_iter()
        .map(|(document, rank)| {
            let score = if range == 0.0 {
                1.0
            } else {
                (max - rank) / range
            };
            (document, score)
        })
        .collect()
}

/// Deterministic result order: combined score descending, then newest first,
/// then id ascending.
pub(super) fn sort_scored(scored: &mut [ScoredDocument]) {
    scored.sort_by(|a, b| {
        b.combined
            .partial_cmp(&a.combined)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.document.created_at.cmp(&a.document.created_at))
            .then_with(|| a.document.id.cmp(&b.document.id))
    });
}

/// Reorder the head of the list by reranker scores, best first. Entries past
/// the head keep their positions, and ties within the head keep their
/// pre-rerank relative order.
pub(super) fn reorder_head(scored: Vec<ScoredDocument>, scores: &[f32]) -> Vec<ScoredDocument> {
    let head_len = scores.len().min(scored.len());
    let mut rest = scored.into_iter();
    let mut head: Vec<(ScoredDocument, f32)> = rest
        .by_ref()
        .take(head_len)
        .zip(scores.iter().copied())
        .collect();
    head.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    head.into_iter().map(|(entry, _)| entry).chain(rest).collect()
}
