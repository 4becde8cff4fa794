//! # Parley Core
//!
//! Runtime-agnostic logic for Parley's knowledge retrieval and
//! conversational inference engine: data models, sentence chunking,
//! embedding fan-out, vector-store and persistence abstractions, corpus
//! assembly, similarity retrieval, the information-collection state
//! machine, prompt rendering, and the per-message inference orchestrator.
//!
//! This crate contains no tokio, sqlx, HTTP client, or filesystem I/O.
//! Every external service is reached through a trait that the `parley`
//! application crate implements:
//!
//! | Trait | Collaborator |
//! |-------|--------------|
//! | [`embedding::Embedder`] | Text-embedding service |
//! | [`completion::ChatCompletion`] | Chat-completion service |
//! | [`store::VectorStore`] | Vector database (one collection per knowledge item) |
//! | [`repository::Repository`] | Workspace/thread/message/knowledge persistence |
//! | [`corpus::SnapshotCache`] | Ephemeral per-thread corpus cache |
//! | [`knowledge::Extractor`] | Document-to-text extraction |
//!
//! ## Data flow
//!
//! ```text
//! visitor message ──▶ Engine::generate
//!                        │
//!                        ├─▶ collection state machine ──▶ direct reply
//!                        │
//!                        └─▶ corpus assembler ─▶ retriever ─▶ prompt ─▶ completion
//! ```

pub mod chunk;
pub mod collection;
pub mod completion;
pub mod corpus;
pub mod embedding;
pub mod inference;
pub mod knowledge;
pub mod models;
pub mod prompt;
pub mod repository;
pub mod retrieve;
pub mod store;

pub use inference::{Collaborators, Engine, EngineSettings};
