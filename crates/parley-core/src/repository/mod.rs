//! Persistence collaborator.
//!
//! The engine never owns workspace, thread, message, or knowledge
//! storage. It reads and writes them through [`Repository`], which the
//! application implements (SQLite in the `parley` crate) and tests
//! replace with [`memory::InMemoryRepository`].
//!
//! # Visibility
//!
//! [`Repository::visible_knowledge`] returns, ordered by id, every
//! knowledge item a thread may search:
//!
//! - items owned by the thread's workspace;
//! - items owned by the thread itself, shared or not;
//! - items owned by sibling threads of the same workspace that are
//!   marked `shared`.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    CollectedInformation, KnowledgeItem, Message, NewKnowledgeItem, NewMessage, NewWorkspace,
    Thread, Workspace,
};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn insert_workspace(&self, workspace: NewWorkspace) -> Result<Workspace>;

    async fn find_workspace(&self, id: i64) -> Result<Option<Workspace>>;

    async fn find_workspace_by_slug(&self, slug: &str) -> Result<Option<Workspace>>;

    async fn insert_thread(&self, workspace_id: i64, slug: &str, title: &str) -> Result<Thread>;

    async fn find_thread(&self, slug: &str) -> Result<Option<Thread>>;

    async fn find_thread_by_id(&self, id: i64) -> Result<Option<Thread>>;

    /// Slugs of every thread in a workspace.
    async fn thread_slugs(&self, workspace_id: i64) -> Result<Vec<String>>;

    async fn rename_thread(&self, thread_id: i64, title: &str) -> Result<()>;

    async fn insert_knowledge(&self, item: NewKnowledgeItem) -> Result<KnowledgeItem>;

    async fn get_knowledge(&self, id: i64) -> Result<Option<KnowledgeItem>>;

    async fn delete_knowledge(&self, id: i64) -> Result<()>;

    /// Knowledge items searchable from `thread`, ordered by id.
    async fn visible_knowledge(&self, thread: &Thread) -> Result<Vec<KnowledgeItem>>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message>;

    async fn get_message(&self, id: i64) -> Result<Option<Message>>;

    /// Messages of a thread ordered by id, with their cached responses.
    async fn thread_messages(&self, thread_id: i64) -> Result<Vec<Message>>;

    /// Store the memoized response of a message. Last write wins.
    async fn set_generated_response(&self, message_id: i64, response: &str) -> Result<()>;

    /// Collected answers of a thread; empty when nothing was collected yet.
    async fn collected_information(&self, thread_id: i64) -> Result<CollectedInformation>;

    async fn save_collected_information(&self, info: &CollectedInformation) -> Result<()>;
}
