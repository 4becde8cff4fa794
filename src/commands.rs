//! CLI command implementations.
//!
//! Each `run_*` function opens the engine, performs one operation, and
//! prints a short human-readable result to stdout.

use std::path::Path;

use anyhow::{bail, Context, Result};

use parley_core::knowledge::{NewKnowledge, UploadedFile};
use parley_core::models::{
    MessageKind, NewMessage, NewWorkspace, OwnerScope, Question, Thread, VISITOR_AUTHOR,
};
use parley_core::Engine;

use crate::config::Config;
use crate::engine::build_engine;

/// Options for `parley workspace add`.
pub struct WorkspaceArgs {
    pub slug: String,
    pub name: Option<String>,
    pub role: Option<String>,
    pub tone: Option<String>,
    pub prompt: Option<String>,
    pub collect: bool,
    pub questions: Vec<String>,
}

pub async fn run_workspace_add(config: &Config, args: WorkspaceArgs) -> Result<()> {
    let engine = build_engine(config).await?;
    let questionnaire: Vec<Question> = args
        .questions
        .iter()
        .filter(|q| !q.trim().is_empty())
        .map(|q| Question::new(q.trim()))
        .collect();

    let workspace = engine
        .repository()
        .insert_workspace(NewWorkspace {
            name: args.name.unwrap_or_else(|| args.slug.clone()),
            slug: args.slug,
            role: args.role,
            tone: args.tone,
            custom_prompt: args.prompt,
            collect_information: args.collect,
            questionnaire,
        })
        .await?;

    println!("workspace id: {}", workspace.id);
    println!("slug: {}", workspace.slug);
    println!("questions: {}", workspace.questionnaire.len());
    Ok(())
}

pub async fn run_thread_add(
    config: &Config,
    workspace_slug: &str,
    slug: &str,
    title: Option<String>,
) -> Result<()> {
    let engine = build_engine(config).await?;
    let repo = engine.repository();
    let workspace = repo
        .find_workspace_by_slug(workspace_slug)
        .await?
        .with_context(|| format!("workspace not found: {}", workspace_slug))?;
    let title = title.unwrap_or_else(|| Thread::default_title(slug));
    let thread = repo.insert_thread(workspace.id, slug, &title).await?;

    println!("thread id: {}", thread.id);
    println!("slug: {}", thread.slug);
    Ok(())
}

/// Options for `parley message add`.
pub struct MessageArgs {
    pub thread: String,
    pub text: Option<String>,
    pub file: Option<std::path::PathBuf>,
    pub mime_type: Option<String>,
    pub operator: Option<i64>,
    pub shared: bool,
}

pub async fn run_message_add(config: &Config, args: MessageArgs) -> Result<()> {
    let engine = build_engine(config).await?;

    let message = match (args.text, args.file) {
        (Some(text), None) => {
            let repo = engine.repository();
            let thread = repo
                .find_thread(&args.thread)
                .await?
                .with_context(|| format!("thread not found: {}", args.thread))?;
            let author = match args.operator {
                Some(id) if id > 0 => id,
                Some(id) => bail!("operator id must be > 0, got {}", id),
                None => VISITOR_AUTHOR,
            };
            repo.insert_message(NewMessage {
                thread_id: thread.id,
                author,
                kind: MessageKind::Message,
                title: text.chars().take(30).collect(),
                content: text,
            })
            .await?
        }
        (None, Some(path)) => {
            let file = read_upload(&path, args.mime_type)?;
            let (message, report) = engine
                .upload_visitor_file(&args.thread, file, args.shared)
                .await?;
            println!("knowledge id: {}", report.item.id);
            message
        }
        _ => bail!("exactly one of --text or --file is required"),
    };

    println!("message id: {}", message.id);
    println!("kind: {}", message.kind.as_str());
    Ok(())
}

/// Options for `parley knowledge add`.
pub struct KnowledgeArgs {
    pub workspace: Option<String>,
    pub thread: Option<String>,
    pub note: Option<String>,
    pub file: Option<std::path::PathBuf>,
    pub mime_type: Option<String>,
    pub shared: bool,
}

pub async fn run_knowledge_add(config: &Config, args: KnowledgeArgs) -> Result<()> {
    let engine = build_engine(config).await?;
    let owner = resolve_owner(&engine, args.workspace.as_deref(), args.thread.as_deref()).await?;
    let file = match &args.file {
        Some(path) => Some(read_upload(path, args.mime_type)?),
        None => None,
    };

    let report = engine
        .save_knowledge(NewKnowledge {
            owner,
            note: args.note,
            file,
            shared: args.shared,
        })
        .await?;

    println!("knowledge id: {}", report.item.id);
    println!("title: {}", report.item.title);
    println!("chunks: {}", report.chunks);
    println!("embedded: {}", report.embedded);
    println!("stored: {}", report.stored);
    Ok(())
}

pub async fn run_knowledge_remove(config: &Config, id: i64) -> Result<()> {
    let engine = build_engine(config).await?;
    match engine.delete_knowledge(id).await? {
        Some(item) => println!("removed knowledge {} ({})", item.id, item.title),
        None => bail!("knowledge item not found: {}", id),
    }
    Ok(())
}

pub async fn run_prepare(config: &Config, thread: &str) -> Result<()> {
    let engine = build_engine(config).await?;
    let snapshot = engine.prepare(thread).await?;
    println!("status: success");
    println!("records: {}", snapshot.len());
    Ok(())
}

/// Generate a reply. A failed generation prints the fallback apology
/// with `status: fail`, mirroring the HTTP endpoint.
pub async fn run_generate(config: &Config, thread: &str, message_id: i64) -> Result<()> {
    let engine = build_engine(config).await?;
    match engine.generate(thread, message_id).await {
        Ok(response) => {
            println!("status: success");
            println!("{}", response);
        }
        Err(e) => {
            tracing::warn!(thread, message_id, error = %format!("{:#}", e), "generation failed");
            println!("status: fail");
            println!("{}", parley_core::inference::FALLBACK_REPLY);
        }
    }
    Ok(())
}

async fn resolve_owner(
    engine: &Engine,
    workspace: Option<&str>,
    thread: Option<&str>,
) -> Result<OwnerScope> {
    let repo = engine.repository();
    match (workspace, thread) {
        (Some(slug), None) => {
            let workspace = repo
                .find_workspace_by_slug(slug)
                .await?
                .with_context(|| format!("workspace not found: {}", slug))?;
            Ok(OwnerScope::Workspace(workspace.id))
        }
        (None, Some(slug)) => {
            let thread = repo
                .find_thread(slug)
                .await?
                .with_context(|| format!("thread not found: {}", slug))?;
            Ok(OwnerScope::Thread(thread.id))
        }
        _ => bail!("exactly one of --workspace or --thread is required"),
    }
}

fn read_upload(path: &Path, mime_type: Option<String>) -> Result<UploadedFile> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("not a file path: {}", path.display()))?;
    Ok(UploadedFile {
        name,
        mime_type: mime_type.unwrap_or_default(),
        bytes,
    })
}
