//! # Parley CLI (`parley`)
//!
//! Seeds tenants and conversations, indexes knowledge, and runs the
//! inference engine from the command line or as an HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! parley --config ./config/parley.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `parley init` | Create the SQLite database and run schema migrations |
//! | `parley workspace add <slug>` | Create a workspace (persona, tone, questionnaire) |
//! | `parley thread add <workspace> <slug>` | Open a visitor thread |
//! | `parley message add <thread>` | Append a text message or a file upload |
//! | `parley knowledge add` | Save and index a note and/or document |
//! | `parley knowledge remove <id>` | Delete a knowledge item and its vectors |
//! | `parley prepare <thread>` | Assemble the thread's corpus snapshot |
//! | `parley generate <thread> <message-id>` | Produce (or replay) a reply |
//! | `parley serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! parley init
//! parley workspace add acme --role support --collect --question "Name" --question "Email"
//! parley thread add acme visitor-1
//! parley knowledge add --workspace acme --note "Refunds are processed within 30 days."
//! parley message add visitor-1 --text "How long do refunds take?"
//! parley generate visitor-1 4
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use parley::commands::{self, KnowledgeArgs, MessageArgs, WorkspaceArgs};
use parley::{config, logging, migrate, server};

/// Parley: knowledge-grounded chat assistant for contact and feedback
/// workspaces.
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/parley.toml")]
    config: PathBuf,

    /// Log pipeline milestones at `info` (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Manage workspaces.
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },

    /// Manage visitor threads.
    Thread {
        #[command(subcommand)]
        action: ThreadAction,
    },

    /// Append entries to a thread.
    Message {
        #[command(subcommand)]
        action: MessageAction,
    },

    /// Manage the knowledge corpus.
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },

    /// Assemble (or reuse) a thread's corpus snapshot.
    Prepare {
        /// Thread slug.
        thread: String,
    },

    /// Generate the reply to a message. Replays the stored reply if one exists.
    Generate {
        /// Thread slug.
        thread: String,
        /// Message id.
        message_id: i64,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum WorkspaceAction {
    /// Create a workspace.
    Add {
        /// Unique workspace slug.
        slug: String,
        /// Display name (defaults to the slug).
        #[arg(long)]
        name: Option<String>,
        /// Persona: executive, recruiter, support, legal, sales, technical, marketing.
        #[arg(long)]
        role: Option<String>,
        /// Conversation tone (defaults to "polite").
        #[arg(long)]
        tone: Option<String>,
        /// Extra instruction appended to every prompt.
        #[arg(long)]
        prompt: Option<String>,
        /// Collect questionnaire answers during conversations.
        #[arg(long)]
        collect: bool,
        /// Questionnaire entry; repeat for several.
        #[arg(long = "question")]
        questions: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ThreadAction {
    /// Open a thread in a workspace.
    Add {
        /// Workspace slug.
        workspace: String,
        /// Unique thread slug.
        slug: String,
        /// Thread title (defaults to "Chat: {slug}", hyphens as spaces).
        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Subcommand)]
enum MessageAction {
    /// Append a text message or a file upload.
    Add {
        /// Thread slug.
        thread: String,
        /// Message text.
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,
        /// File to upload into the conversation.
        #[arg(long)]
        file: Option<PathBuf>,
        /// MIME type of the file (inferred from the extension when omitted).
        #[arg(long)]
        mime_type: Option<String>,
        /// Post as this operator id instead of the visitor.
        #[arg(long)]
        operator: Option<i64>,
        /// Make an uploaded file visible to the workspace's other threads.
        #[arg(long)]
        shared: bool,
    },
}

#[derive(Subcommand)]
enum KnowledgeAction {
    /// Save and index a note and/or a document.
    Add {
        /// Attach to every thread of this workspace.
        #[arg(long, conflicts_with = "thread")]
        workspace: Option<String>,
        /// Attach to this thread only.
        #[arg(long)]
        thread: Option<String>,
        /// Free-text note.
        #[arg(long)]
        note: Option<String>,
        /// Document to extract and index.
        #[arg(long)]
        file: Option<PathBuf>,
        /// MIME type of the file (inferred from the extension when omitted).
        #[arg(long)]
        mime_type: Option<String>,
        /// Share a thread item with sibling threads.
        #[arg(long)]
        shared: bool,
    },
    /// Delete a knowledge item and its vector collection.
    Remove {
        /// Knowledge item id.
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Workspace {
            action:
                WorkspaceAction::Add {
                    slug,
                    name,
                    role,
                    tone,
                    prompt,
                    collect,
                    questions,
                },
        } => {
            commands::run_workspace_add(
                &cfg,
                WorkspaceArgs {
                    slug,
                    name,
                    role,
                    tone,
                    prompt,
                    collect,
                    questions,
                },
            )
            .await?;
        }
        Commands::Thread {
            action:
                ThreadAction::Add {
                    workspace,
                    slug,
                    title,
                },
        } => {
            commands::run_thread_add(&cfg, &workspace, &slug, title).await?;
        }
        Commands::Message {
            action:
                MessageAction::Add {
                    thread,
                    text,
                    file,
                    mime_type,
                    operator,
                    shared,
                },
        } => {
            commands::run_message_add(
                &cfg,
                MessageArgs {
                    thread,
                    text,
                    file,
                    mime_type,
                    operator,
                    shared,
                },
            )
            .await?;
        }
        Commands::Knowledge { action } => match action {
            KnowledgeAction::Add {
                workspace,
                thread,
                note,
                file,
                mime_type,
                shared,
            } => {
                commands::run_knowledge_add(
                    &cfg,
                    KnowledgeArgs {
                        workspace,
                        thread,
                        note,
                        file,
                        mime_type,
                        shared,
                    },
                )
                .await?;
            }
            KnowledgeAction::Remove { id } => {
                commands::run_knowledge_remove(&cfg, id).await?;
            }
        },
        Commands::Prepare { thread } => {
            commands::run_prepare(&cfg, &thread).await?;
        }
        Commands::Generate { thread, message_id } => {
            commands::run_generate(&cfg, &thread, message_id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
