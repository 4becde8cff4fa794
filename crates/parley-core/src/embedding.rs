//! Embedding trait, batch fan-out, and vector utilities.
//!
//! Defines the [`Embedder`] trait that embedding backends implement, the
//! concurrent [`embed_batch`] pipeline used when indexing knowledge, and
//! the [`cosine_similarity`] helper used by retrieval.
//!
//! Concrete backends (OpenAI, Ollama) live in the `parley` app crate.
//!
//! # Batch semantics
//!
//! [`embed_batch`] issues one request per non-blank chunk, keeps at most
//! `max_concurrency` requests in flight, and collects each result into the
//! slot of the chunk that produced it. Requests complete in any order; the
//! pairing of chunk text and vector is fixed by index. A failed request
//! drops only its own chunk.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::models::EmbeddingRecord;

/// Text-embedding service.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a single, already-normalized text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>>;
}

/// Prepare text for the embedding service.
///
/// Replaces control and other non-printable characters with spaces,
/// collapses whitespace runs to a single space, and trims.
pub fn normalize_for_embedding(text: &str) -> String {
    let printable: String = text
        .chars()
        .map(|c| if is_printable(c) { c } else { ' ' })
        .collect();
    printable.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_printable(c: char) -> bool {
    !c.is_control() && !matches!(c, '\u{200B}'..='\u{200F}' | '\u{FEFF}' | '\u{2028}' | '\u{2029}')
}

/// Embed a visitor query.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let normalized = normalize_for_embedding(text);
    if normalized.is_empty() {
        bail!("query is empty after normalization");
    }
    embedder.embed_one(&normalized).await
}

/// Embed every non-blank chunk concurrently.
///
/// Returns one [`EmbeddingRecord`] per successfully embedded chunk, in
/// input order. `record.text` is the chunk exactly as given; only the
/// request payload is normalized. Failed requests and vectors of the wrong
/// dimension are logged and dropped.
pub async fn embed_batch(
    embedder: &dyn Embedder,
    chunks: &[String],
    max_concurrency: usize,
) -> Vec<EmbeddingRecord> {
    let mut slots: Vec<Option<EmbeddingRecord>> = vec![None; chunks.len()];
    let dims = embedder.dims();

    let jobs: Vec<(usize, String)> = chunks
        .iter()
        .enumerate()
        .map(|(index, text)| (index, normalize_for_embedding(text)))
        .filter(|(_, normalized)| !normalized.is_empty())
        .collect();

    let mut in_flight = stream::iter(jobs)
        .map(|(index, normalized)| async move { (index, embedder.embed_one(&normalized).await) })
        .buffer_unordered(max_concurrency.max(1));
    let mut dropped = 0usize;

    while let Some((index, result)) = in_flight.next().await {
        match result {
            Ok(vector) if dims != 0 && vector.len() != dims => {
                dropped += 1;
                tracing::warn!(
                    chunk = index,
                    expected = dims,
                    actual = vector.len(),
                    "embedding has unexpected dimension; chunk dropped"
                );
            }
            Ok(vector) => {
                slots[index] = Some(EmbeddingRecord {
                    text: chunks[index].clone(),
                    vector,
                });
            }
            Err(e) => {
                dropped += 1;
                tracing::warn!(chunk = index, error = %e, "embedding request failed; chunk dropped");
            }
        }
    }

    let records: Vec<EmbeddingRecord> = slots.into_iter().flatten().collect();
    tracing::debug!(
        model = embedder.model_name(),
        chunks = chunks.len(),
        embedded = records.len(),
        dropped,
        "embedding batch complete"
    );
    records
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
