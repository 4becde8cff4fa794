//! # Parley
//!
//! A knowledge-grounded chat assistant for multi-tenant contact and
//! feedback workspaces.
//!
//! The engine itself lives in the `parley-core` crate. This crate provides
//! the concrete collaborators (SQLite, Qdrant, HTTP model clients, document
//! extraction, file-backed snapshots) and the two surfaces: the `parley`
//! CLI and an Axum HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Knowledge  │──▶│ Chunk+Embed  │──▶│  Qdrant  │
//! │ notes/files │   │ (parley-core)│   │ dataset-*│
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │ scroll
//!                   ┌───────────────┐  ┌────▼─────┐
//!    visitor msg ──▶│  Collection + │◀─│ Snapshot │
//!                   │  Retrieval +  │  │  cache   │
//!                   │  Completion   │  └──────────┘
//!                   └──────┬────────┘
//!                    ┌─────┴─────┐
//!                    ▼           ▼
//!               ┌────────┐  ┌────────┐
//!               │  CLI   │  │  HTTP  │
//!               └────────┘  └────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing-subscriber` bootstrap |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_repository`] | SQLite persistence collaborator |
//! | [`qdrant`] | Qdrant REST vector store |
//! | [`embedding`] | OpenAI / Ollama embedding clients |
//! | [`completion`] | OpenAI-compatible chat completion client |
//! | [`extract`] | Document-to-text extraction |
//! | [`snapshot_cache`] | File-backed corpus snapshots |
//! | [`engine`] | Production engine wiring |
//! | [`commands`] | CLI command implementations |
//! | [`server`] | HTTP server |

pub mod commands;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod logging;
pub mod migrate;
pub mod qdrant;
pub mod server;
pub mod snapshot_cache;
pub mod sqlite_repository;
