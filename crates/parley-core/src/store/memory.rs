//! In-memory [`VectorStore`] implementation for tests and embedding.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Scrolling
//! follows the same contract as the REST store: `offset` is the first
//! point id of the page and `next_offset` the first id of the next page.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{CreateOutcome, DeleteOutcome, Distance, ScrollPage, VectorPoint, VectorStore};

struct StoredCollection {
    dims: usize,
    points: BTreeMap<u64, VectorPoint>,
}

/// In-memory vector store.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, StoredCollection>>,
    unavailable: RwLock<HashSet<String>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            unavailable: RwLock::new(HashSet::new()),
        }
    }

    /// Make every request against `collection` fail, as if the service
    /// were unreachable for it.
    pub fn mark_unavailable(&self, collection: &str) {
        self.unavailable
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collection.to_string());
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn check_available(&self, collection: &str) -> Result<()> {
        let unavailable = self.unavailable.read().unwrap_or_else(PoisonError::into_inner);
        if unavailable.contains(collection) {
            bail!("vector store unavailable for collection {}", collection);
        }
        Ok(())
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(
        &self,
        collection: &str,
        dims: usize,
        _distance: Distance,
    ) -> Result<CreateOutcome> {
        self.check_available(collection)?;
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        if collections.contains_key(collection) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        collections.insert(
            collection.to_string(),
            StoredCollection {
                dims,
                points: BTreeMap::new(),
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn upsert_points(&self, collection: &str, points: &[VectorPoint]) -> Result<()> {
        self.check_available(collection)?;
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("collection {} not found", collection))?;
        for point in points {
            if point.vector.len() != stored.dims {
                bail!(
                    "vector dimension {} does not match collection dimension {}",
                    point.vector.len(),
                    stored.dims
                );
            }
            stored.points.insert(point.id, point.clone());
        }
        Ok(())
    }

    async fn scroll(
        &self,
        collection: &str,
        limit: usize,
        offset: Option<u64>,
    ) -> Result<ScrollPage> {
        self.check_available(collection)?;
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = collections.get(collection) else {
            return Ok(ScrollPage::default());
        };

        let mut page = stored.points.range(offset.unwrap_or(0)..);
        let points: Vec<VectorPoint> = page.by_ref().take(limit).map(|(_, p)| p.clone()).collect();
        let next_offset = page.next().map(|(id, _)| *id);

        Ok(ScrollPage {
            points,
            next_offset,
        })
    }

    async fn delete_collection(&self, collection: &str) -> Result<DeleteOutcome> {
        self.check_available(collection)?;
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        Ok(match collections.remove(collection) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }
}
