//! Corpus assembly and the per-thread snapshot cache.
//!
//! [`CorpusAssembler::prepare`] merges the vector collections of every
//! knowledge item visible to a thread into one [`CorpusSnapshot`] and
//! stores it in a [`SnapshotCache`] keyed by thread slug.
//!
//! # Caching
//!
//! - A cache hit short-circuits: no repository or vector-store calls.
//! - A snapshot is cached only when every collection was read in full.
//!   If one collection fails, the partial snapshot is returned but not
//!   cached, so the next call retries.
//! - An empty snapshot is a valid, cacheable result.
//! - Entries are dropped explicitly through
//!   [`SnapshotCache::invalidate`] when knowledge changes.
//!
//! Cache I/O failures are logged and treated as misses.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::CorpusSnapshot;
use crate::repository::Repository;
use crate::store::{KnowledgeCollection, VectorStore};

/// Ephemeral storage for assembled snapshots, keyed by thread slug.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    async fn get(&self, thread_slug: &str) -> Result<Option<CorpusSnapshot>>;

    async fn put(&self, snapshot: &CorpusSnapshot) -> Result<()>;

    /// Drop the entry for a thread. Missing entries are not an error.
    async fn invalidate(&self, thread_slug: &str) -> Result<()>;
}

/// Process-local snapshot cache.
#[derive(Default)]
pub struct MemorySnapshotCache {
    entries: RwLock<HashMap<String, CorpusSnapshot>>,
}

impl MemorySnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, thread_slug: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(thread_slug)
    }
}

#[async_trait]
impl SnapshotCache for MemorySnapshotCache {
    async fn get(&self, thread_slug: &str) -> Result<Option<CorpusSnapshot>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(thread_slug)
            .cloned())
    }

    async fn put(&self, snapshot: &CorpusSnapshot) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.thread_slug.clone(), snapshot.clone());
        Ok(())
    }

    async fn invalidate(&self, thread_slug: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(thread_slug);
        Ok(())
    }
}

/// Builds per-thread corpus snapshots.
pub struct CorpusAssembler<'a> {
    pub repo: &'a dyn Repository,
    pub store: &'a dyn VectorStore,
    pub cache: &'a dyn SnapshotCache,
    /// Points requested per scroll page.
    pub page_size: usize,
}

impl<'a> CorpusAssembler<'a> {
    /// Return the thread's snapshot, assembling and caching it on a miss.
    ///
    /// An unknown thread yields an empty snapshot that is not cached.
    pub async fn prepare(&self, thread_slug: &str) -> Result<CorpusSnapshot> {
        match self.cache.get(thread_slug).await {
            Ok(Some(snapshot)) => {
                tracing::debug!(thread = thread_slug, records = snapshot.len(), "snapshot cache hit");
                return Ok(snapshot);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(thread = thread_slug, error = %e, "snapshot cache read failed");
            }
        }

        let Some(thread) = self.repo.find_thread(thread_slug).await? else {
            tracing::debug!(thread = thread_slug, "thread not found; empty corpus");
            return Ok(CorpusSnapshot::empty(thread_slug));
        };

        let items = self.repo.visible_knowledge(&thread).await?;
        let mut snapshot = CorpusSnapshot::empty(thread_slug);
        let mut complete = true;

        for item in &items {
            let collection = KnowledgeCollection::new(self.store, item.id);
            match collection.scroll_all(self.page_size).await {
                Some(records) => snapshot.records.extend(records),
                None => complete = false,
            }
        }

        tracing::info!(
            thread = thread_slug,
            items = items.len(),
            records = snapshot.len(),
            complete,
            "corpus assembled"
        );

        if complete {
            if let Err(e) = self.cache.put(&snapshot).await {
                tracing::warn!(thread = thread_slug, error = %e, "snapshot cache write failed");
            }
        }

        Ok(snapshot)
    }

    /// Drop cached snapshots for the given threads.
    pub async fn invalidate(&self, thread_slugs: &[String]) {
        for slug in thread_slugs {
            if let Err(e) = self.cache.invalidate(slug).await {
                tracing::warn!(thread = %slug, error = %e, "snapshot cache invalidation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmbeddingRecord, NewKnowledgeItem, NewWorkspace, OwnerScope};
    use crate::repository::memory::InMemoryRepository;
    use crate::store::memory::InMemoryVectorStore;
    use crate::store::Distance;

    async fn seed_item(
        repo: &InMemoryRepository,
        store: &InMemoryVectorStore,
        owner: OwnerScope,
        texts: &[&str],
    ) -> i64 {
        let item = repo
            .insert_knowledge(NewKnowledgeItem {
                owner,
                title: "note".into(),
                raw_text: None,
                file_ref: None,
                shared: false,
            })
            .await
            .unwrap();
        let collection = KnowledgeCollection::new(store, item.id);
        collection.ensure_collection(2, Distance::Cosine).await;
        let records: Vec<EmbeddingRecord> = texts
            .iter()
            .map(|t| EmbeddingRecord {
                text: t.to_string(),
                vector: vec![1.0, 0.0],
            })
            .collect();
        collection.upsert(&records).await;
        item.id
    }

    #[tokio::test]
    async fn test_prepare_merges_and_caches() {
        let repo = InMemoryRepository::new();
        let store = InMemoryVectorStore::new();
        let cache = MemorySnapshotCache::new();
        let ws = repo
            .insert_workspace(NewWorkspace {
                slug: "acme".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let thread = repo.insert_thread(ws.id, "visitor-1", "Chat: Visitor").await.unwrap();
        seed_item(&repo, &store, OwnerScope::Workspace(ws.id), &["global a", "global b"]).await;
        seed_item(&repo, &store, OwnerScope::Thread(thread.id), &["private"]).await;

        let assembler = CorpusAssembler {
            repo: &repo,
            store: &store,
            cache: &cache,
            page_size: 1,
        };
        let snapshot = assembler.prepare("visitor-1").await.unwrap();
        let texts: Vec<&str> = snapshot.records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["global a", "global b", "private"]);
        assert!(cache.contains("visitor-1"));

        // Cached snapshot is served even after new knowledge arrives.
        seed_item(&repo, &store, OwnerScope::Workspace(ws.id), &["late"]).await;
        assert_eq!(assembler.prepare("visitor-1").await.unwrap().len(), 3);

        assembler.invalidate(&["visitor-1".to_string()]).await;
        assert_eq!(assembler.prepare("visitor-1").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_partial_failure_is_not_cached() {
        let repo = InMemoryRepository::new();
        let store = InMemoryVectorStore::new();
        let cache = MemorySnapshotCache::new();
        let ws = repo
            .insert_workspace(NewWorkspace {
                slug: "acme".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        repo.insert_thread(ws.id, "t", "Chat").await.unwrap();
        seed_item(&repo, &store, OwnerScope::Workspace(ws.id), &["ok"]).await;
        let broken = seed_item(&repo, &store, OwnerScope::Workspace(ws.id), &["lost"]).await;
        store.mark_unavailable(&crate::models::collection_name(broken));

        let assembler = CorpusAssembler {
            repo: &repo,
            store: &store,
            cache: &cache,
            page_size: 100,
        };
        let snapshot = assembler.prepare("t").await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(!cache.contains("t"));
    }

    #[tokio::test]
    async fn test_empty_corpus_and_unknown_thread() {
        let repo = InMemoryRepository::new();
        let store = InMemoryVectorStore::new();
        let cache = MemorySnapshotCache::new();
        let ws = repo
            .insert_workspace(NewWorkspace {
                slug: "acme".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        repo.insert_thread(ws.id, "t", "Chat").await.unwrap();

        let assembler = CorpusAssembler {
            repo: &repo,
            store: &store,
            cache: &cache,
            page_size: 100,
        };
        assert!(assembler.prepare("t").await.unwrap().is_empty());
        assert!(cache.contains("t"));

        assert!(assembler.prepare("ghost").await.unwrap().is_empty());
        assert!(!cache.contains("ghost"));
    }

    #[tokio::test]
    async fn test_item_without_collection_is_still_cached() {
        let repo = InMemoryRepository::new();
        let store = InMemoryVectorStore::new();
        let cache = MemorySnapshotCache::new();
        let ws = repo
            .insert_workspace(NewWorkspace {
                slug: "acme".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        repo.insert_thread(ws.id, "t", "Chat").await.unwrap();
        seed_item(&repo, &store, OwnerScope::Workspace(ws.id), &["indexed"]).await;
        // Saved, but embedding never produced a collection.
        repo.insert_knowledge(NewKnowledgeItem {
            owner: OwnerScope::Workspace(ws.id),
            title: "empty note".into(),
            raw_text: None,
            file_ref: None,
            shared: false,
        })
        .await
        .unwrap();
        assert_eq!(store.collection_names().len(), 1);

        let assembler = CorpusAssembler {
            repo: &repo,
            store: &store,
            cache: &cache,
            page_size: 100,
        };
        assert_eq!(assembler.prepare("t").await.unwrap().len(), 1);
        assert!(cache.contains("t"));
    }
}
