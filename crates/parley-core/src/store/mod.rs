//! Vector-store abstraction.
//!
//! The [`VectorStore`] trait mirrors the small REST surface Parley needs
//! from an external vector database: create a collection, upsert points,
//! scroll one page, and drop a collection. [`KnowledgeCollection`] wraps
//! it for one knowledge item (`dataset-{id}`) and is the only layer the
//! engine talks to.
//!
//! # Failure semantics
//!
//! [`VectorStore`] methods return errors. [`KnowledgeCollection`] logs
//! them and reports failure as `false` / `None`, so callers treat a
//! failed collection as "no knowledge available" rather than aborting.
//!
//! | Method | Success | Tolerated |
//! |--------|---------|-----------|
//! | [`ensure_collection`](KnowledgeCollection::ensure_collection) | created | already exists |
//! | [`upsert`](KnowledgeCollection::upsert) | points written | |
//! | [`scroll_all`](KnowledgeCollection::scroll_all) | every page read | not found (empty) |
//! | [`delete_collection`](KnowledgeCollection::delete_collection) | deleted | not found |

pub mod memory;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{collection_name, EmbeddingRecord};

/// Distance metric of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Cosine,
    Dot,
    Euclid,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
            Distance::Dot => "Dot",
            Distance::Euclid => "Euclid",
        }
    }
}

/// A stored point: sequential id, vector, and its chunk text payload.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: u64,
    pub vector: Vec<f32>,
    pub text: String,
}

/// One page of a scroll.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub points: Vec<VectorPoint>,
    /// Continuation token for the next page; `None` when exhausted.
    pub next_offset: Option<u64>,
}

/// Result of a create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Result of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// External vector database, addressed by collection name.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection of `dims`-dimensional vectors.
    async fn create_collection(
        &self,
        collection: &str,
        dims: usize,
        distance: Distance,
    ) -> Result<CreateOutcome>;

    /// Insert or overwrite points by id.
    async fn upsert_points(&self, collection: &str, points: &[VectorPoint]) -> Result<()>;

    /// Read up to `limit` points starting at `offset`, with vectors and payloads.
    ///
    /// A collection that does not exist reads as one empty page.
    async fn scroll(&self, collection: &str, limit: usize, offset: Option<u64>)
        -> Result<ScrollPage>;

    /// Drop a collection and all of its points.
    async fn delete_collection(&self, collection: &str) -> Result<DeleteOutcome>;
}

/// The vector collection of a single knowledge item.
pub struct KnowledgeCollection<'a> {
    store: &'a dyn VectorStore,
    name: String,
}

impl<'a> KnowledgeCollection<'a> {
    pub fn new(store: &'a dyn VectorStore, knowledge_id: i64) -> Self {
        Self {
            store,
            name: collection_name(knowledge_id),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Idempotent create. "Already exists" counts as success.
    pub async fn ensure_collection(&self, dims: usize, distance: Distance) -> bool {
        match self.store.create_collection(&self.name, dims, distance).await {
            Ok(outcome) => {
                tracing::debug!(collection = %self.name, ?outcome, "collection ensured");
                true
            }
            Err(e) => {
                tracing::warn!(collection = %self.name, error = %e, "failed to create collection");
                false
            }
        }
    }

    /// Write `records` as points `1..=n`, overwriting existing ids.
    pub async fn upsert(&self, records: &[EmbeddingRecord]) -> bool {
        if records.is_empty() {
            return true;
        }
        let points: Vec<VectorPoint> = records
            .iter()
            .enumerate()
            .map(|(i, r)| VectorPoint {
                id: i as u64 + 1,
                vector: r.vector.clone(),
                text: r.text.clone(),
            })
            .collect();

        match self.store.upsert_points(&self.name, &points).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(collection = %self.name, points = points.len(), error = %e, "failed to upsert points");
                false
            }
        }
    }

    /// Read every point, following continuation tokens until exhausted.
    ///
    /// Returns `None` if any page fails. An offset seen before ends the
    /// scroll with what was read so far.
    pub async fn scroll_all(&self, page_size: usize) -> Option<Vec<EmbeddingRecord>> {
        let mut records = Vec::new();
        let mut offset: Option<u64> = None;
        let mut seen: HashSet<u64> = HashSet::new();

        loop {
            let page = match self.store.scroll(&self.name, page_size.max(1), offset).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(collection = %self.name, error = %e, "failed to scroll collection");
                    return None;
                }
            };

            records.extend(page.points.into_iter().map(|p| EmbeddingRecord {
                text: p.text,
                vector: p.vector,
            }));

            match page.next_offset {
                Some(next) if seen.insert(next) => offset = Some(next),
                Some(_) => {
                    tracing::warn!(collection = %self.name, "scroll returned a repeated offset; stopping");
                    break;
                }
                None => break,
            }
        }

        Some(records)
    }

    /// Permanently drop the collection. "Not found" counts as success.
    pub async fn delete_collection(&self) -> bool {
        match self.store.delete_collection(&self.name).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(collection = %self.name, error = %e, "failed to delete collection");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryVectorStore;
    use super::*;

    fn record(text: &str, x: f32) -> EmbeddingRecord {
        EmbeddingRecord {
            text: text.to_string(),
            vector: vec![x, 1.0],
        }
    }

    #[tokio::test]
    async fn test_collection_lifecycle() {
        let store = InMemoryVectorStore::new();
        let collection = KnowledgeCollection::new(&store, 7);
        assert_eq!(collection.name(), "dataset-7");

        assert!(collection.ensure_collection(2, Distance::Cosine).await);
        assert!(collection.ensure_collection(2, Distance::Cosine).await);

        let records: Vec<EmbeddingRecord> =
            (0..5).map(|i| record(&format!("chunk {}", i), i as f32)).collect();
        assert!(collection.upsert(&records).await);

        let all = collection.scroll_all(2).await.unwrap();
        assert_eq!(all, records);

        assert!(collection.delete_collection().await);
        assert!(store.collection_names().is_empty());
        assert!(collection.delete_collection().await);
        assert_eq!(collection.scroll_all(2).await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_sequential_ids() {
        let store = InMemoryVectorStore::new();
        let collection = KnowledgeCollection::new(&store, 1);
        collection.ensure_collection(2, Distance::Cosine).await;

        collection.upsert(&[record("old a", 1.0), record("old b", 2.0)]).await;
        collection.upsert(&[record("new a", 3.0)]).await;

        let texts: Vec<String> = collection
            .scroll_all(10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(texts, vec!["new a", "old b"]);
    }

    #[tokio::test]
    async fn test_missing_collection_fails_softly() {
        let store = InMemoryVectorStore::new();
        let collection = KnowledgeCollection::new(&store, 99);
        assert!(!collection.upsert(&[record("x", 1.0)]).await);
        assert_eq!(collection.scroll_all(10).await, Some(Vec::new()));

        store.mark_unavailable("dataset-99");
        assert!(collection.scroll_all(10).await.is_none());
    }

    /// Serves one point per page and links offsets 2 -> 3 -> 2.
    struct CyclingStore;

    #[async_trait]
    impl VectorStore for CyclingStore {
        async fn create_collection(
            &self,
            _collection: &str,
            _dims: usize,
            _distance: Distance,
        ) -> Result<CreateOutcome> {
            Ok(CreateOutcome::AlreadyExists)
        }

        async fn upsert_points(&self, _collection: &str, _points: &[VectorPoint]) -> Result<()> {
            Ok(())
        }

        async fn scroll(
            &self,
            _collection: &str,
            _limit: usize,
            offset: Option<u64>,
        ) -> Result<ScrollPage> {
            let id = offset.unwrap_or(1);
            Ok(ScrollPage {
                points: vec![VectorPoint {
                    id,
                    vector: vec![id as f32],
                    text: format!("point {}", id),
                }],
                next_offset: Some(if id == 2 { 3 } else { 2 }),
            })
        }

        async fn delete_collection(&self, _collection: &str) -> Result<DeleteOutcome> {
            Ok(DeleteOutcome::NotFound)
        }
    }

    #[tokio::test]
    async fn test_scroll_stops_on_offset_cycle() {
        let store = CyclingStore;
        let texts: Vec<String> = KnowledgeCollection::new(&store, 1)
            .scroll_all(1)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(texts, vec!["point 1", "point 2", "point 3"]);
    }
}
