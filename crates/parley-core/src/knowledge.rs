//! Knowledge indexing: note/file → chunks → embeddings → vector collection.
//!
//! Saving a knowledge item composes its indexable text, splits it with the
//! sentence chunker, embeds the chunks concurrently, and writes them into
//! the item's own collection (`dataset-{id}`). Removing an item drops the
//! collection and the persisted record.
//!
//! # Indexed text
//!
//! ```text
//! Note added on 2024-05-01 09:30:00
//! {note}
//! File added on 2024-05-01 09:30:00
//! {extracted file text}
//! ```
//!
//! Either part is omitted when absent. Both timestamps are the item's
//! creation time.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use crate::chunk::{split_text, ChunkingOptions};
use crate::embedding::{embed_batch, Embedder};
use crate::models::{KnowledgeItem, NewKnowledgeItem, OwnerScope};
use crate::repository::Repository;
use crate::store::{Distance, KnowledgeCollection, VectorStore};

/// Characters of the note used as the title when no file is attached.
const NOTE_TITLE_CHARS: usize = 30;

/// Document-to-text collaborator.
pub trait Extractor: Send + Sync {
    /// Extract plain text from an uploaded document.
    fn extract(&self, bytes: &[u8], mime_type: &str, file_name: &str) -> Result<String>;
}

/// An uploaded document.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// A knowledge save request.
#[derive(Debug, Clone)]
pub struct NewKnowledge {
    pub owner: OwnerScope,
    pub note: Option<String>,
    pub file: Option<UploadedFile>,
    pub shared: bool,
}

/// Result of indexing one knowledge item.
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub item: KnowledgeItem,
    pub chunks: usize,
    pub embedded: usize,
    /// False when the collection could not be created or written.
    pub stored: bool,
}

/// Compose the text that gets chunked and embedded.
pub fn compose_index_text(
    note: Option<&str>,
    file_text: Option<&str>,
    created_at: DateTime<Utc>,
) -> String {
    let stamp = created_at.format("%Y-%m-%d %H:%M:%S");
    let mut text = String::new();

    if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
        text.push_str(&format!("Note added on {}\n{}", stamp, note));
    }
    if let Some(file_text) = file_text {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("File added on {}\n{}", stamp, file_text));
    }
    text
}

/// Title of a new item: the file name, else the start of the note.
pub fn knowledge_title(note: Option<&str>, file_name: Option<&str>) -> String {
    match file_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => note
            .unwrap_or_default()
            .trim()
            .chars()
            .take(NOTE_TITLE_CHARS)
            .collect(),
    }
}

/// Writes and removes knowledge items and their collections.
pub struct KnowledgeIndexer<'a> {
    pub repo: &'a dyn Repository,
    pub embedder: &'a dyn Embedder,
    pub store: &'a dyn VectorStore,
    pub extractor: &'a dyn Extractor,
    pub chunking: ChunkingOptions,
    pub max_concurrency: usize,
}

impl<'a> KnowledgeIndexer<'a> {
    /// Persist a knowledge item and index its text.
    ///
    /// Rejects requests with neither a note nor a file, and files whose
    /// text cannot be extracted. Vector-store failures leave the item
    /// saved with `stored == false`.
    pub async fn save(&self, request: NewKnowledge) -> Result<IndexReport> {
        let note = request
            .note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        if note.is_none() && request.file.is_none() {
            bail!("knowledge requires a note or a file");
        }

        let file_text = match &request.file {
            Some(file) => Some(
                self.extractor
                    .extract(&file.bytes, &file.mime_type, &file.name)
                    .with_context(|| format!("failed to extract text from '{}'", file.name))?,
            ),
            None => None,
        };

        let file_name = request.file.as_ref().map(|f| f.name.as_str());
        let item = self
            .repo
            .insert_knowledge(NewKnowledgeItem {
                owner: request.owner,
                title: knowledge_title(note, file_name),
                raw_text: note.map(str::to_string),
                file_ref: file_name.map(str::to_string),
                shared: request.shared,
            })
            .await?;

        let text = compose_index_text(note, file_text.as_deref(), item.created_at);
        let chunks: Vec<String> = split_text(&text, &self.chunking)
            .into_iter()
            .map(|c| c.text)
            .collect();
        let records = embed_batch(self.embedder, &chunks, self.max_concurrency).await;

        let collection = KnowledgeCollection::new(self.store, item.id);
        let stored = collection
            .ensure_collection(self.embedder.dims(), Distance::Cosine)
            .await
            && collection.upsert(&records).await;

        tracing::info!(
            knowledge_id = item.id,
            collection = collection.name(),
            chunks = chunks.len(),
            embedded = records.len(),
            stored,
            "knowledge indexed"
        );

        Ok(IndexReport {
            item,
            chunks: chunks.len(),
            embedded: records.len(),
            stored,
        })
    }

    /// Drop a knowledge item's collection and record.
    ///
    /// Returns the removed item, or `None` if it did not exist.
    pub async fn remove(&self, knowledge_id: i64) -> Result<Option<KnowledgeItem>> {
        let Some(item) = self.repo.get_knowledge(knowledge_id).await? else {
            return Ok(None);
        };

        let collection = KnowledgeCollection::new(self.store, item.id);
        if !collection.delete_collection().await {
            tracing::warn!(knowledge_id, "collection not deleted; removing record anyway");
        }
        self.repo.delete_knowledge(item.id).await?;
        tracing::info!(knowledge_id, "knowledge removed");
        Ok(Some(item))
    }
}
