//! SQLite implementation of the persistence collaborator.
//!
//! Tables are created by [`crate::migrate`]. Questionnaires and collected
//! answers are stored as JSON text columns; timestamps as Unix seconds.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use parley_core::models::{
    CollectedInformation, KnowledgeItem, Message, MessageKind, NewKnowledgeItem, NewMessage,
    NewWorkspace, OwnerScope, Question, Thread, Workspace,
};
use parley_core::repository::Repository;

/// [`Repository`] over a SQLite pool.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn workspace_from_row(row: &SqliteRow) -> Result<Workspace> {
    let questionnaire_json: String = row.get("questionnaire_json");
    let questionnaire: Vec<Question> = serde_json::from_str(&questionnaire_json)
        .context("Failed to parse workspace questionnaire")?;
    let collect: i64 = row.get("collect_information");
    Ok(Workspace {
        id: row.get("id"),
        slug: row.get("slug"),
        name: row.get("name"),
        role: row.get("role"),
        tone: row.get("tone"),
        custom_prompt: row.get("custom_prompt"),
        collect_information: collect != 0,
        questionnaire,
    })
}

fn thread_from_row(row: &SqliteRow) -> Thread {
    Thread {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        slug: row.get("slug"),
        title: row.get("title"),
    }
}

fn knowledge_from_row(row: &SqliteRow) -> Result<KnowledgeItem> {
    let scope: String = row.get("owner_scope");
    let owner_id: i64 = row.get("owner_id");
    let owner = match scope.as_str() {
        "workspace" => OwnerScope::Workspace(owner_id),
        "thread" => OwnerScope::Thread(owner_id),
        other => bail!("unknown knowledge owner scope '{}'", other),
    };
    let shared: i64 = row.get("shared");
    Ok(KnowledgeItem {
        id: row.get("id"),
        owner,
        title: row.get("title"),
        raw_text: row.get("raw_text"),
        file_ref: row.get("file_ref"),
        shared: shared != 0,
        created_at: timestamp(row.get("created_at")),
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let kind: String = row.get("kind");
    Ok(Message {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        author: row.get("author"),
        kind: MessageKind::parse(&kind)
            .with_context(|| format!("unknown message kind '{}'", kind))?,
        title: row.get("title"),
        content: row.get("content"),
        generated_response: row.get("generated_response"),
        created_at: timestamp(row.get("created_at")),
    })
}

fn owner_parts(owner: OwnerScope) -> (&'static str, i64) {
    match owner {
        OwnerScope::Workspace(id) => ("workspace", id),
        OwnerScope::Thread(id) => ("thread", id),
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn insert_workspace(&self, workspace: NewWorkspace) -> Result<Workspace> {
        let questionnaire_json = serde_json::to_string(&workspace.questionnaire)?;
        let result = sqlx::query(
            "INSERT INTO workspaces (slug, name, role, tone, custom_prompt, collect_information, questionnaire_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&workspace.slug)
        .bind(&workspace.name)
        .bind(&workspace.role)
        .bind(&workspace.tone)
        .bind(&workspace.custom_prompt)
        .bind(workspace.collect_information as i64)
        .bind(&questionnaire_json)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert workspace '{}'", workspace.slug))?;

        Ok(Workspace {
            id: result.last_insert_rowid(),
            slug: workspace.slug,
            name: workspace.name,
            role: workspace.role,
            tone: workspace.tone,
            custom_prompt: workspace.custom_prompt,
            collect_information: workspace.collect_information,
            questionnaire: workspace.questionnaire,
        })
    }

    async fn find_workspace(&self, id: i64) -> Result<Option<Workspace>> {
        let row = sqlx::query("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(workspace_from_row).transpose()
    }

    async fn find_workspace_by_slug(&self, slug: &str) -> Result<Option<Workspace>> {
        let row = sqlx::query("SELECT * FROM workspaces WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(workspace_from_row).transpose()
    }

    async fn insert_thread(&self, workspace_id: i64, slug: &str, title: &str) -> Result<Thread> {
        let result = sqlx::query(
            "INSERT INTO threads (workspace_id, slug, title, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(workspace_id)
        .bind(slug)
        .bind(title)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert thread '{}'", slug))?;

        Ok(Thread {
            id: result.last_insert_rowid(),
            workspace_id,
            slug: slug.to_string(),
            title: title.to_string(),
        })
    }

    async fn find_thread(&self, slug: &str) -> Result<Option<Thread>> {
        let row = sqlx::query("SELECT id, workspace_id, slug, title FROM threads WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(thread_from_row))
    }

    async fn find_thread_by_id(&self, id: i64) -> Result<Option<Thread>> {
        let row = sqlx::query("SELECT id, workspace_id, slug, title FROM threads WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(thread_from_row))
    }

    async fn thread_slugs(&self, workspace_id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT slug FROM threads WHERE workspace_id = ? ORDER BY id")
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("slug")).collect())
    }

    async fn rename_thread(&self, thread_id: i64, title: &str) -> Result<()> {
        sqlx::query("UPDATE threads SET title = ? WHERE id = ?")
            .bind(title)
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_knowledge(&self, item: NewKnowledgeItem) -> Result<KnowledgeItem> {
        let (scope, owner_id) = owner_parts(item.owner);
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO knowledge_items (owner_scope, owner_id, title, raw_text, file_ref, shared, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(scope)
        .bind(owner_id)
        .bind(&item.title)
        .bind(&item.raw_text)
        .bind(&item.file_ref)
        .bind(item.shared as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert knowledge item")?;

        Ok(KnowledgeItem {
            id: result.last_insert_rowid(),
            owner: item.owner,
            title: item.title,
            raw_text: item.raw_text,
            file_ref: item.file_ref,
            shared: item.shared,
            created_at: timestamp(now),
        })
    }

    async fn get_knowledge(&self, id: i64) -> Result<Option<KnowledgeItem>> {
        let row = sqlx::query("SELECT * FROM knowledge_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(knowledge_from_row).transpose()
    }

    async fn delete_knowledge(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM knowledge_items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn visible_knowledge(&self, thread: &Thread) -> Result<Vec<KnowledgeItem>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM knowledge_items
            WHERE (owner_scope = 'workspace' AND owner_id = ?)
               OR (owner_scope = 'thread' AND owner_id = ?)
               OR (owner_scope = 'thread' AND shared = 1
                   AND owner_id IN (SELECT id FROM threads WHERE workspace_id = ?))
            ORDER BY id
            "#,
        )
        .bind(thread.workspace_id)
        .bind(thread.id)
        .bind(thread.workspace_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(knowledge_from_row).collect()
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO messages (thread_id, author, kind, title, content, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(message.thread_id)
        .bind(message.author)
        .bind(message.kind.as_str())
        .bind(&message.title)
        .bind(&message.content)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert message into thread {}", message.thread_id))?;

        Ok(Message {
            id: result.last_insert_rowid(),
            thread_id: message.thread_id,
            author: message.author,
            kind: message.kind,
            title: message.title,
            content: message.content,
            generated_response: None,
            created_at: timestamp(now),
        })
    }

    async fn get_message(&self, id: i64) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn thread_messages(&self, thread_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query("SELECT * FROM messages WHERE thread_id = ? ORDER BY id")
            .bind(thread_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn set_generated_response(&self, message_id: i64, response: &str) -> Result<()> {
        let result = sqlx::query("UPDATE messages SET generated_response = ? WHERE id = ?")
            .bind(response)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("message {} not found", message_id);
        }
        Ok(())
    }

    async fn collected_information(&self, thread_id: i64) -> Result<CollectedInformation> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT collected_json FROM threads WHERE id = ?")
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await?;
        let fields: BTreeMap<String, String> = match json {
            Some(json) => serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse collected information of thread {}", thread_id))?,
            None => BTreeMap::new(),
        };
        Ok(CollectedInformation { thread_id, fields })
    }

    async fn save_collected_information(&self, info: &CollectedInformation) -> Result<()> {
        let json = serde_json::to_string(&info.fields)?;
        sqlx::query("UPDATE threads SET collected_json = ? WHERE id = ?")
            .bind(json)
            .bind(info.thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
