//! Wiring of the production [`Engine`]: SQLite records, Qdrant vectors,
//! HTTP embedding and completion backends, and file-backed snapshots.

use std::sync::Arc;

use anyhow::Result;
use parley_core::{Collaborators, Engine};

use crate::completion::create_completion;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::extract::DocumentExtractor;
use crate::migrate;
use crate::qdrant::QdrantStore;
use crate::snapshot_cache::FileSnapshotCache;
use crate::sqlite_repository::SqliteRepository;

/// Open the database (applying migrations) and assemble an engine.
pub async fn build_engine(config: &Config) -> Result<Engine> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let parts = Collaborators {
        repo: Arc::new(SqliteRepository::new(pool)),
        embedder: create_embedder(&config.embedding)?,
        store: Arc::new(QdrantStore::new(&config.vector_store)?),
        completion: create_completion(&config.completion)?,
        cache: Arc::new(FileSnapshotCache::new(config.cache.dir.clone())),
        extractor: Arc::new(DocumentExtractor),
    };

    tracing::debug!(
        db = %config.db.path.display(),
        vector_store = %config.vector_store.url,
        embedding = %config.embedding.provider,
        completion = %config.completion.provider,
        "engine ready"
    );
    Ok(Engine::new(parts, config.engine_settings()))
}
