//! Per-message inference orchestrator.
//!
//! [`Engine`] owns the collaborators and is the entry point for both
//! surfaces of the `parley` app (CLI and HTTP):
//!
//! | Operation | What it does |
//! |-----------|--------------|
//! | [`Engine::generate`] | Memoized response for one message |
//! | [`Engine::prepare`] | Assemble (or reuse) a thread's corpus snapshot |
//! | [`Engine::save_knowledge`] | Index a note/file and invalidate snapshots |
//! | [`Engine::delete_knowledge`] | Drop an item and invalidate snapshots |
//! | [`Engine::upload_visitor_file`] | Visitor file → knowledge message + thread item |
//!
//! # Generate
//!
//! 1. A message that already has a generated response returns it as is.
//! 2. A missing message (or one outside the thread) gets [`FALLBACK_REPLY`],
//!    not persisted.
//! 3. A knowledge upload gets [`ACKNOWLEDGE_UPLOAD`] without any model call.
//! 4. A text message runs the collection step, which either yields a
//!    direct reply or hands over to retrieval + prompt + completion.
//! 5. The result is stored on the message before returning.
//!
//! Retrieval failures degrade to the no-information context. Only a
//! failed final completion or a persistence error returns `Err`.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::chunk::ChunkingOptions;
use crate::collection::{CollectionMachine, CollectionOutcome};
use crate::completion::ChatCompletion;
use crate::corpus::{CorpusAssembler, SnapshotCache};
use crate::embedding::Embedder;
use crate::knowledge::{Extractor, IndexReport, KnowledgeIndexer, NewKnowledge, UploadedFile};
use crate::models::{
    ChatMessage, ConversationHistory, CorpusSnapshot, KnowledgeItem, Message, MessageKind,
    NewMessage, OwnerScope, VISITOR_AUTHOR,
};
use crate::prompt::{build_system_prompt, fill_template};
use crate::repository::Repository;
use crate::retrieve::{self, NO_CONTEXT};
use crate::store::VectorStore;

/// Reply to a knowledge upload.
pub const ACKNOWLEDGE_UPLOAD: &str =
    "Got it! Thanks for uploading your file. Is there anything else you'd like to ask?";

/// Reply when a message cannot be answered at all.
pub const FALLBACK_REPLY: &str =
    "Thank you for your query. Our team will review it and respond shortly.";

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Minimum cosine score for retrieved context.
    pub similarity_threshold: f32,
    pub chunking: ChunkingOptions,
    /// In-flight embedding requests while indexing.
    pub embed_concurrency: usize,
    /// Points per vector-store scroll page.
    pub scroll_page_size: usize,
    /// Visitor text length that enables the one-time thread rename.
    pub title_rename_min_chars: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: retrieve::DEFAULT_THRESHOLD,
            chunking: ChunkingOptions::default(),
            embed_concurrency: 16,
            scroll_page_size: 1000,
            title_rename_min_chars: 200,
        }
    }
}

/// External collaborators of the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub repo: Arc<dyn Repository>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
    pub completion: Arc<dyn ChatCompletion>,
    pub cache: Arc<dyn SnapshotCache>,
    pub extractor: Arc<dyn Extractor>,
}

/// Knowledge retrieval and conversational inference engine.
#[derive(Clone)]
pub struct Engine {
    parts: Collaborators,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(parts: Collaborators, settings: EngineSettings) -> Self {
        Self { parts, settings }
    }

    pub fn repository(&self) -> &dyn Repository {
        self.parts.repo.as_ref()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn assembler(&self) -> CorpusAssembler<'_> {
        CorpusAssembler {
            repo: self.parts.repo.as_ref(),
            store: self.parts.store.as_ref(),
            cache: self.parts.cache.as_ref(),
            page_size: self.settings.scroll_page_size,
        }
    }

    fn indexer(&self) -> KnowledgeIndexer<'_> {
        KnowledgeIndexer {
            repo: self.parts.repo.as_ref(),
            embedder: self.parts.embedder.as_ref(),
            store: self.parts.store.as_ref(),
            extractor: self.parts.extractor.as_ref(),
            chunking: self.settings.chunking,
            max_concurrency: self.settings.embed_concurrency,
        }
    }

    // ============ Corpus ============

    /// Return the thread's corpus snapshot, assembling it on a cache miss.
    pub async fn prepare(&self, thread_slug: &str) -> Result<CorpusSnapshot> {
        self.assembler().prepare(thread_slug).await
    }

    // ============ Knowledge ============

    /// Save and index a knowledge item, then drop the snapshots of every
    /// thread that can see it.
    pub async fn save_knowledge(&self, request: NewKnowledge) -> Result<IndexReport> {
        let report = self.indexer().save(request).await?;
        self.invalidate_for(&report.item).await?;
        Ok(report)
    }

    /// Remove a knowledge item, then drop the affected snapshots.
    pub async fn delete_knowledge(&self, knowledge_id: i64) -> Result<Option<KnowledgeItem>> {
        let removed = self.indexer().remove(knowledge_id).await?;
        if let Some(item) = &removed {
            self.invalidate_for(item).await?;
        }
        Ok(removed)
    }

    /// Record a visitor upload: a `knowledge` message in the thread plus a
    /// thread-owned knowledge item indexed from the file.
    pub async fn upload_visitor_file(
        &self,
        thread_slug: &str,
        file: UploadedFile,
        shared: bool,
    ) -> Result<(Message, IndexReport)> {
        let thread = self
            .parts
            .repo
            .find_thread(thread_slug)
            .await?
            .with_context(|| format!("thread '{}' not found", thread_slug))?;

        let report = self
            .save_knowledge(NewKnowledge {
                owner: OwnerScope::Thread(thread.id),
                note: None,
                file: Some(file),
                shared,
            })
            .await?;

        let message = self
            .parts
            .repo
            .insert_message(NewMessage {
                thread_id: thread.id,
                author: VISITOR_AUTHOR,
                kind: MessageKind::Knowledge,
                title: report.item.title.clone(),
                content: String::new(),
            })
            .await?;

        Ok((message, report))
    }

    async fn invalidate_for(&self, item: &KnowledgeItem) -> Result<()> {
        let repo = self.parts.repo.as_ref();
        let slugs = match item.owner {
            OwnerScope::Workspace(workspace_id) => repo.thread_slugs(workspace_id).await?,
            OwnerScope::Thread(thread_id) => match repo.find_thread_by_id(thread_id).await? {
                Some(thread) if item.shared => repo.thread_slugs(thread.workspace_id).await?,
                Some(thread) => vec![thread.slug],
                None => Vec::new(),
            },
        };
        tracing::debug!(knowledge_id = item.id, threads = slugs.len(), "invalidating snapshots");
        self.assembler().invalidate(&slugs).await;
        Ok(())
    }

    // ============ Inference ============

    /// Generate (or return the memoized) response for a message.
    pub async fn generate(&self, thread_slug: &str, message_id: i64) -> Result<String> {
        let repo = self.parts.repo.as_ref();

        let message = repo.get_message(message_id).await?;
        if let Some(cached) = message
            .as_ref()
            .and_then(|m| m.generated_response.as_deref())
            .filter(|r| !r.is_empty())
        {
            tracing::debug!(message_id, "returning memoized response");
            return Ok(cached.to_string());
        }

        let thread = repo.find_thread(thread_slug).await?;
        let (message, thread) = match (message, thread) {
            (Some(m), Some(t)) if m.thread_id == t.id => (m, t),
            _ => {
                tracing::info!(thread = thread_slug, message_id, "message not found; fallback reply");
                return Ok(FALLBACK_REPLY.to_string());
            }
        };

        let response = match message.kind {
            MessageKind::Knowledge => ACKNOWLEDGE_UPLOAD.to_string(),
            MessageKind::Message if message.content.trim().is_empty() => {
                return Ok(FALLBACK_REPLY.to_string());
            }
            MessageKind::Message => {
                let Some(workspace) = repo.find_workspace(thread.workspace_id).await? else {
                    tracing::warn!(thread = thread_slug, "workspace missing; fallback reply");
                    return Ok(FALLBACK_REPLY.to_string());
                };

                let messages: Vec<Message> = repo
                    .thread_messages(thread.id)
                    .await?
                    .into_iter()
                    .filter(|m| m.id <= message.id)
                    .collect();
                let history = ConversationHistory::from_messages(&messages);

                let machine = CollectionMachine {
                    repo,
                    completion: self.parts.completion.as_ref(),
                    title_rename_min_chars: self.settings.title_rename_min_chars,
                };
                let fields_summary = match machine
                    .evaluate(&workspace, &thread, &history, &message.content)
                    .await?
                {
                    CollectionOutcome::DirectReply(reply) => {
                        return self.persist(message_id, reply).await;
                    }
                    CollectionOutcome::AnswerWithContext { fields_summary } => fields_summary,
                    CollectionOutcome::Disabled => String::new(),
                };

                let context = self.context_for(thread_slug, &message.content).await;
                let template = build_system_prompt(
                    workspace.role.as_deref(),
                    workspace.tone.as_deref(),
                    &fields_summary,
                    workspace.custom_prompt.as_deref(),
                );
                let prompt = fill_template(&template, &context, &message.content);

                let mut transcript = history.turns;
                transcript.push(ChatMessage::user(prompt));
                self.parts
                    .completion
                    .complete(&transcript)
                    .await
                    .with_context(|| format!("completion failed for message {}", message_id))?
            }
        };

        self.persist(message_id, response).await
    }

    /// Retrieved context for a query; any failure degrades to [`NO_CONTEXT`].
    async fn context_for(&self, thread_slug: &str, query: &str) -> String {
        let snapshot = match self.prepare(thread_slug).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(thread = thread_slug, error = %e, "corpus assembly failed");
                return NO_CONTEXT.to_string();
            }
        };
        match retrieve::retrieve(
            self.parts.embedder.as_ref(),
            &snapshot,
            query,
            self.settings.similarity_threshold,
        )
        .await
        {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(thread = thread_slug, error = %e, "query embedding failed");
                NO_CONTEXT.to_string()
            }
        }
    }

    async fn persist(&self, message_id: i64, response: String) -> Result<String> {
        self.parts
            .repo
            .set_generated_response(message_id, &response)
            .await
            .with_context(|| format!("failed to store response for message {}", message_id))?;
        tracing::info!(message_id, chars = response.chars().count(), "response generated");
        Ok(response)
    }
}
