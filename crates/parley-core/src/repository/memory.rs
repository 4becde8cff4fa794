//! In-memory [`Repository`] for tests and embedding.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::Repository;
use crate::models::{
    CollectedInformation, KnowledgeItem, Message, NewKnowledgeItem, NewMessage, NewWorkspace,
    OwnerScope, Thread, Workspace,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    workspaces: BTreeMap<i64, Workspace>,
    threads: BTreeMap<i64, Thread>,
    knowledge: BTreeMap<i64, KnowledgeItem>,
    messages: BTreeMap<i64, Message>,
    collected: HashMap<i64, CollectedInformation>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Repository backed by ordered maps behind a mutex.
///
/// Ids come from a single counter shared by all tables, starting at 1.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tables)
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert_workspace(&self, workspace: NewWorkspace) -> Result<Workspace> {
        self.with_tables(|t| {
            if t.workspaces.values().any(|w| w.slug == workspace.slug) {
                bail!("workspace '{}' already exists", workspace.slug);
            }
            let id = t.allocate_id();
            let created = Workspace {
                id,
                slug: workspace.slug,
                name: workspace.name,
                role: workspace.role,
                tone: workspace.tone,
                custom_prompt: workspace.custom_prompt,
                collect_information: workspace.collect_information,
                questionnaire: workspace.questionnaire,
            };
            t.workspaces.insert(id, created.clone());
            Ok(created)
        })
    }

    async fn find_workspace(&self, id: i64) -> Result<Option<Workspace>> {
        Ok(self.with_tables(|t| t.workspaces.get(&id).cloned()))
    }

    async fn find_workspace_by_slug(&self, slug: &str) -> Result<Option<Workspace>> {
        Ok(self.with_tables(|t| t.workspaces.values().find(|w| w.slug == slug).cloned()))
    }

    async fn insert_thread(&self, workspace_id: i64, slug: &str, title: &str) -> Result<Thread> {
        self.with_tables(|t| {
            if !t.workspaces.contains_key(&workspace_id) {
                bail!("workspace {} not found", workspace_id);
            }
            if t.threads.values().any(|th| th.slug == slug) {
                bail!("thread '{}' already exists", slug);
            }
            let id = t.allocate_id();
            let thread = Thread {
                id,
                workspace_id,
                slug: slug.to_string(),
                title: title.to_string(),
            };
            t.threads.insert(id, thread.clone());
            Ok(thread)
        })
    }

    async fn find_thread(&self, slug: &str) -> Result<Option<Thread>> {
        Ok(self.with_tables(|t| t.threads.values().find(|th| th.slug == slug).cloned()))
    }

    async fn find_thread_by_id(&self, id: i64) -> Result<Option<Thread>> {
        Ok(self.with_tables(|t| t.threads.get(&id).cloned()))
    }

    async fn thread_slugs(&self, workspace_id: i64) -> Result<Vec<String>> {
        Ok(self.with_tables(|t| {
            t.threads
                .values()
                .filter(|th| th.workspace_id == workspace_id)
                .map(|th| th.slug.clone())
                .collect()
        }))
    }

    async fn rename_thread(&self, thread_id: i64, title: &str) -> Result<()> {
        self.with_tables(|t| match t.threads.get_mut(&thread_id) {
            Some(thread) => {
                thread.title = title.to_string();
                Ok(())
            }
            None => bail!("thread {} not found", thread_id),
        })
    }

    async fn insert_knowledge(&self, item: NewKnowledgeItem) -> Result<KnowledgeItem> {
        Ok(self.with_tables(|t| {
            let id = t.allocate_id();
            let created = KnowledgeItem {
                id,
                owner: item.owner,
                title: item.title,
                raw_text: item.raw_text,
                file_ref: item.file_ref,
                shared: item.shared,
                created_at: Utc::now(),
            };
            t.knowledge.insert(id, created.clone());
            created
        }))
    }

    async fn get_knowledge(&self, id: i64) -> Result<Option<KnowledgeItem>> {
        Ok(self.with_tables(|t| t.knowledge.get(&id).cloned()))
    }

    async fn delete_knowledge(&self, id: i64) -> Result<()> {
        self.with_tables(|t| t.knowledge.remove(&id));
        Ok(())
    }

    async fn visible_knowledge(&self, thread: &Thread) -> Result<Vec<KnowledgeItem>> {
        Ok(self.with_tables(|t| {
            t.knowledge
                .values()
                .filter(|item| match item.owner {
                    OwnerScope::Workspace(id) => id == thread.workspace_id,
                    OwnerScope::Thread(id) if id == thread.id => true,
                    OwnerScope::Thread(id) => {
                        item.shared
                            && t.threads
                                .get(&id)
                                .is_some_and(|owner| owner.workspace_id == thread.workspace_id)
                    }
                })
                .cloned()
                .collect()
        }))
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        self.with_tables(|t| {
            if !t.threads.contains_key(&message.thread_id) {
                bail!("thread {} not found", message.thread_id);
            }
            let id = t.allocate_id();
            let created = Message {
                id,
                thread_id: message.thread_id,
                author: message.author,
                kind: message.kind,
                title: message.title,
                content: message.content,
                generated_response: None,
                created_at: Utc::now(),
            };
            t.messages.insert(id, created.clone());
            Ok(created)
        })
    }

    async fn get_message(&self, id: i64) -> Result<Option<Message>> {
        Ok(self.with_tables(|t| t.messages.get(&id).cloned()))
    }

    async fn thread_messages(&self, thread_id: i64) -> Result<Vec<Message>> {
        Ok(self.with_tables(|t| {
            t.messages
                .values()
                .filter(|m| m.thread_id == thread_id)
                .cloned()
                .collect()
        }))
    }

    async fn set_generated_response(&self, message_id: i64, response: &str) -> Result<()> {
        self.with_tables(|t| match t.messages.get_mut(&message_id) {
            Some(message) => {
                message.generated_response = Some(response.to_string());
                Ok(())
            }
            None => bail!("message {} not found", message_id),
        })
    }

    async fn collected_information(&self, thread_id: i64) -> Result<CollectedInformation> {
        Ok(self.with_tables(|t| {
            t.collected
                .get(&thread_id)
                .cloned()
                .unwrap_or_else(|| CollectedInformation::new(thread_id))
        }))
    }

    async fn save_collected_information(&self, info: &CollectedInformation) -> Result<()> {
        self.with_tables(|t| t.collected.insert(info.thread_id, info.clone()));
        Ok(())
    }
}
