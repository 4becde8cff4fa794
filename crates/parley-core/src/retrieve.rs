//! Similarity retrieval over a corpus snapshot.
//!
//! Scores every record of a [`CorpusSnapshot`] against a query vector with
//! cosine similarity, keeps records at or above the threshold, ranks them
//! by descending score, and joins their text with newlines.
//!
//! Ties keep snapshot order (the sort is stable). When nothing survives,
//! [`NO_CONTEXT`] is returned so the prompt stays answerable.

use anyhow::Result;

use crate::embedding::{cosine_similarity, embed_query, Embedder};
use crate::models::CorpusSnapshot;

/// Context used when no record passes the threshold.
pub const NO_CONTEXT: &str =
    "We don't have any information for the query except the message history.";

/// Default minimum cosine score.
pub const DEFAULT_THRESHOLD: f32 = 0.30;

/// A record that passed the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredText<'a> {
    pub score: f32,
    pub text: &'a str,
}

/// Score and rank snapshot records against `query_vec`.
pub fn rank<'a>(snapshot: &'a CorpusSnapshot, query_vec: &[f32], threshold: f32) -> Vec<ScoredText<'a>> {
    let mut hits: Vec<ScoredText<'a>> = snapshot
        .records
        .iter()
        .map(|r| ScoredText {
            score: cosine_similarity(query_vec, &r.vector),
            text: r.text.as_str(),
        })
        .filter(|hit| hit.score >= threshold)
        .collect();

    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits
}

/// Build the context string for a precomputed query vector.
pub fn retrieve_with_vector(snapshot: &CorpusSnapshot, query_vec: &[f32], threshold: f32) -> String {
    let hits = rank(snapshot, query_vec, threshold);
    tracing::debug!(
        thread = %snapshot.thread_slug,
        candidates = snapshot.len(),
        matched = hits.len(),
        "retrieval scored"
    );
    if hits.is_empty() {
        return NO_CONTEXT.to_string();
    }
    hits.iter().map(|h| h.text).collect::<Vec<_>>().join("\n")
}

/// Embed `query_text` and build its context string.
///
/// An empty snapshot short-circuits to [`NO_CONTEXT`] without calling the
/// embedding service.
pub async fn retrieve(
    embedder: &dyn Embedder,
    snapshot: &CorpusSnapshot,
    query_text: &str,
    threshold: f32,
) -> Result<String> {
    if snapshot.is_empty() {
        return Ok(NO_CONTEXT.to_string());
    }
    let query_vec = embed_query(embedder, query_text).await?;
    Ok(retrieve_with_vector(snapshot, &query_vec, threshold))
}
