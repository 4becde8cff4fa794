//! File-backed [`SnapshotCache`].
//!
//! Each thread's snapshot is one JSON file, `dataset-{thread_slug}.json`
//! (slug escaped by [`FileSnapshotCache::path_for`]),
//! in the configured cache directory. Writes go to a temporary file first
//! and are renamed into place, so a reader never sees a partial file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parley_core::corpus::SnapshotCache;
use parley_core::models::CorpusSnapshot;

pub struct FileSnapshotCache {
    dir: PathBuf,
}

impl FileSnapshotCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a thread's snapshot file.
    ///
    /// Bytes outside `[A-Za-z0-9-]` are written as `_` plus two hex
    /// digits, so distinct slugs never share a file and no slug can escape
    /// the directory. `visitor-1` stays `dataset-visitor-1.json`.
    pub fn path_for(&self, thread_slug: &str) -> PathBuf {
        let mut safe = String::with_capacity(thread_slug.len());
        for byte in thread_slug.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                safe.push(byte as char);
            } else {
                safe.push('_');
                safe.push_str(&hex::encode([byte]));
            }
        }
        self.dir.join(format!("dataset-{}.json", safe))
    }
}

#[async_trait]
impl SnapshotCache for FileSnapshotCache {
    async fn get(&self, thread_slug: &str) -> Result<Option<CorpusSnapshot>> {
        let path = self.path_for(thread_slug);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let snapshot: CorpusSnapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt snapshot file {}", path.display()))?;
        if snapshot.thread_slug != thread_slug {
            tracing::warn!(
                thread = thread_slug,
                stored = %snapshot.thread_slug,
                "snapshot file belongs to another thread; ignored"
            );
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    async fn put(&self, snapshot: &CorpusSnapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache dir {}", self.dir.display()))?;

        let path = self.path_for(&snapshot.thread_slug);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
        let bytes = serde_json::to_vec(snapshot)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;
        Ok(())
    }

    async fn invalidate(&self, thread_slug: &str) -> Result<()> {
        let path = self.path_for(thread_slug);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::models::EmbeddingRecord;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let tmp = TempDir::new().unwrap();
        let cache = FileSnapshotCache::new(tmp.path().join("cache"));

        assert!(cache.get("visitor-1").await.unwrap().is_none());

        let snapshot = CorpusSnapshot {
            thread_slug: "visitor-1".into(),
            records: vec![EmbeddingRecord {
                text: "Refunds take 30 days.".into(),
                vector: vec![0.25, -1.0],
            }],
        };
        cache.put(&snapshot).await.unwrap();
        assert!(cache.path_for("visitor-1").ends_with("dataset-visitor-1.json"));

        let loaded = cache.get("visitor-1").await.unwrap().unwrap();
        assert_eq!(loaded.records, snapshot.records);

        cache.invalidate("visitor-1").await.unwrap();
        cache.invalidate("visitor-1").await.unwrap();
        assert!(cache.get("visitor-1").await.unwrap().is_none());
    }

    #[test]
    fn test_slug_cannot_escape_directory() {
        let cache = FileSnapshotCache::new("/tmp/parley");
        assert_eq!(
            cache.path_for("../etc/passwd"),
            PathBuf::from("/tmp/parley/dataset-_2e_2e_2fetc_2fpasswd.json")
        );
    }

    #[test]
    fn test_similar_slugs_get_distinct_files() {
        let cache = FileSnapshotCache::new("/tmp/parley");
        let slugs = ["acme.visitor", "acme_visitor", "acme/visitor", "acme-visitor"];
        let paths: std::collections::HashSet<PathBuf> =
            slugs.iter().map(|slug| cache.path_for(slug)).collect();
        assert_eq!(paths.len(), 4);
    }

    #[tokio::test]
    async fn test_snapshot_is_not_served_to_another_thread() {
        let tmp = TempDir::new().unwrap();
        let cache = FileSnapshotCache::new(tmp.path());

        let acme = CorpusSnapshot {
            thread_slug: "acme.visitor".into(),
            records: vec![EmbeddingRecord {
                text: "ACME secret pricing".into(),
                vector: vec![1.0],
            }],
        };
        cache.put(&acme).await.unwrap();
        assert!(cache.get("acme_visitor").await.unwrap().is_none());
        assert!(cache.get("acme/visitor").await.unwrap().is_none());

        // A file whose contents name a different thread is a miss.
        std::fs::copy(cache.path_for("acme.visitor"), cache.path_for("other")).unwrap();
        assert!(cache.get("other").await.unwrap().is_none());
        assert_eq!(
            cache.get("acme.visitor").await.unwrap().unwrap().records,
            acme.records
        );
    }
}
