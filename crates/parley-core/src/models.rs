//! Core data models used throughout Parley.
//!
//! These types describe tenants (workspaces), visitor conversations
//! (threads), the knowledge corpus, and the role-tagged turns sent to the
//! chat-completion service.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who owns a [`KnowledgeItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum OwnerScope {
    /// Workspace-global knowledge, visible to every thread of the workspace.
    Workspace(i64),
    /// Thread-private knowledge (visible to siblings only when `shared`).
    Thread(i64),
}

/// A note or uploaded document contributing to the searchable corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: i64,
    pub owner: OwnerScope,
    pub title: String,
    /// Free-text note, if one was saved with the item.
    pub raw_text: Option<String>,
    /// Opaque reference to the stored upload (file name).
    pub file_ref: Option<String>,
    pub shared: bool,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeItem {
    /// Name of the vector collection holding this item's embeddings.
    pub fn collection_name(&self) -> String {
        collection_name(self.id)
    }
}

/// Vector collection name for a knowledge item id: `dataset-{id}`.
pub fn collection_name(knowledge_id: i64) -> String {
    format!("dataset-{}", knowledge_id)
}

/// Fields needed to create a [`KnowledgeItem`].
#[derive(Debug, Clone)]
pub struct NewKnowledgeItem {
    pub owner: OwnerScope,
    pub title: String,
    pub raw_text: Option<String>,
    pub file_ref: Option<String>,
    pub shared: bool,
}

/// One embedded chunk: the chunk text and its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub text: String,
    pub vector: Vec<f32>,
}

/// Merged view of every [`EmbeddingRecord`] visible to one thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    pub thread_slug: String,
    pub records: Vec<EmbeddingRecord>,
}

impl CorpusSnapshot {
    pub fn empty(thread_slug: &str) -> Self {
        Self {
            thread_slug: thread_slug.to_string(),
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A configured questionnaire entry.
///
/// The `id` is assigned once when the question is created and never
/// changes, so renaming `text` keeps previously collected answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
        }
    }
}

/// A tenant's project and its assistant configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub slug: String,
    pub name: String,
    /// Persona key (`executive`, `recruiter`, `support`, …).
    pub role: Option<String>,
    pub tone: Option<String>,
    /// Operator-supplied instruction appended to every prompt.
    pub custom_prompt: Option<String>,
    pub collect_information: bool,
    pub questionnaire: Vec<Question>,
}

impl Workspace {
    /// Questions with non-blank text, in configured order.
    pub fn active_questions(&self) -> impl Iterator<Item = &Question> {
        self.questionnaire
            .iter()
            .filter(|q| !q.text.trim().is_empty())
    }

    /// Collection runs only when the flag is set and at least one
    /// question is configured.
    pub fn collection_enabled(&self) -> bool {
        self.collect_information && self.active_questions().next().is_some()
    }
}

/// Fields needed to create a [`Workspace`].
#[derive(Debug, Clone, Default)]
pub struct NewWorkspace {
    pub slug: String,
    pub name: String,
    pub role: Option<String>,
    pub tone: Option<String>,
    pub custom_prompt: Option<String>,
    pub collect_information: bool,
    pub questionnaire: Vec<Question>,
}

/// One visitor's conversation within a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub workspace_id: i64,
    pub slug: String,
    pub title: String,
}

impl Thread {
    /// Auto-generated title for a new thread, e.g. `visitor-1` becomes
    /// `Chat: visitor 1`.
    ///
    /// Hyphens are dropped because a `-` marks a title as already renamed.
    pub fn default_title(slug: &str) -> String {
        format!("Chat: {}", slug.replace('-', " ").trim())
    }
}

/// Kind of a thread entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Text typed by a participant.
    Message,
    /// A file uploaded into the conversation.
    Knowledge,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Message => "message",
            MessageKind::Knowledge => "knowledge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(MessageKind::Message),
            "knowledge" => Some(MessageKind::Knowledge),
            _ => None,
        }
    }
}

/// Author id of visitor-authored messages.
pub const VISITOR_AUTHOR: i64 = -1;
/// Author id of system messages.
pub const SYSTEM_AUTHOR: i64 = 0;

/// A thread entry.
///
/// `author` > 0 is an operator, < 0 a visitor, 0 the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub thread_id: i64,
    pub author: i64,
    pub kind: MessageKind,
    /// File name for knowledge messages, a short preview for text.
    pub title: String,
    pub content: String,
    /// Memoized inference result. Once set it is never recomputed.
    pub generated_response: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_visitor(&self) -> bool {
        self.author < 0
    }

    fn role(&self) -> Role {
        if self.is_visitor() {
            Role::User
        } else {
            Role::Assistant
        }
    }
}

/// Fields needed to create a [`Message`].
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub thread_id: i64,
    pub author: i64,
    pub kind: MessageKind,
    pub title: String,
    pub content: String,
}

/// Answers extracted from a thread, keyed by [`Question::id`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectedInformation {
    pub thread_id: i64,
    pub fields: BTreeMap<String, String>,
}

impl CollectedInformation {
    pub fn new(thread_id: i64) -> Self {
        Self {
            thread_id,
            fields: BTreeMap::new(),
        }
    }

    /// Collected value for a question, if any.
    pub fn value_for(&self, question: &Question) -> Option<&str> {
        self.fields.get(&question.id).map(String::as_str)
    }
}

/// Role of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A role-tagged turn sent to the chat-completion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered projection of a thread's messages into chat turns.
///
/// Each message contributes one turn (visitor → `user`, anyone else →
/// `assistant`); a knowledge upload is rendered as a sentence naming the
/// file. A cached generated response follows its message as an
/// `assistant` turn.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    pub turns: Vec<ChatMessage>,
    /// Concatenated text of visitor-authored messages.
    pub visitor_text: String,
}

impl ConversationHistory {
    pub fn from_messages(messages: &[Message]) -> Self {
        let mut history = ConversationHistory::default();

        for message in messages {
            let role = message.role();
            match message.kind {
                MessageKind::Message => {
                    history.turns.push(ChatMessage {
                        role,
                        content: message.content.clone(),
                    });
                    if message.is_visitor() {
                        if !history.visitor_text.is_empty() {
                            history.visitor_text.push('\n');
                        }
                        history.visitor_text.push_str(&message.content);
                    }
                }
                MessageKind::Knowledge => {
                    history.turns.push(ChatMessage {
                        role,
                        content: format!(
                            "{} uploaded a file titled \"{}\".",
                            role.as_str(),
                            message.title
                        ),
                    });
                }
            }

            if let Some(generated) = message.generated_response.as_deref() {
                if !generated.is_empty() {
                    history.turns.push(ChatMessage::assistant(generated));
                }
            }
        }

        history
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: i64, author: i64, kind: MessageKind, content: &str) -> Message {
        Message {
            id,
            thread_id: 1,
            author,
            kind,
            title: "brochure.pdf".to_string(),
            content: content.to_string(),
            generated_response: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn history_maps_roles_and_generated_responses() {
        let mut first = message(1, VISITOR_AUTHOR, MessageKind::Message, "Hello");
        first.generated_response = Some("Hi! How can I help?".to_string());
        let second = message(2, 7, MessageKind::Message, "Operator here");

        let history = ConversationHistory::from_messages(&[first, second]);

        assert_eq!(history.turns.len(), 3);
        assert_eq!(history.turns[0], ChatMessage::user("Hello"));
        assert_eq!(history.turns[1], ChatMessage::assistant("Hi! How can I help?"));
        assert_eq!(history.turns[2], ChatMessage::assistant("Operator here"));
        assert_eq!(history.visitor_text, "Hello");
    }

    #[test]
    fn system_messages_speak_as_assistant() {
        let note = message(1, SYSTEM_AUTHOR, MessageKind::Message, "Conversation assigned");
        assert!(!note.is_visitor());

        let history = ConversationHistory::from_messages(&[note]);
        assert_eq!(history.turns, vec![ChatMessage::assistant("Conversation assigned")]);
        assert!(history.visitor_text.is_empty());
    }

    #[test]
    fn default_thread_title_has_no_hyphen() {
        assert_eq!(Thread::default_title("visitor-1"), "Chat: visitor 1");
        assert_eq!(Thread::default_title("alice"), "Chat: alice");
        assert!(!Thread::default_title("a-b-c").contains('-'));
    }

    #[test]
    fn history_describes_uploads() {
        let upload = message(1, VISITOR_AUTHOR, MessageKind::Knowledge, "");
        let history = ConversationHistory::from_messages(&[upload]);
        assert_eq!(
            history.turns[0].content,
            "user uploaded a file titled \"brochure.pdf\"."
        );
        assert!(history.visitor_text.is_empty());
    }

    #[test]
    fn collection_requires_flag_and_questions() {
        let mut ws = Workspace {
            id: 1,
            slug: "acme".to_string(),
            name: "Acme".to_string(),
            role: None,
            tone: None,
            custom_prompt: None,
            collect_information: true,
            questionnaire: vec![Question::new("   ")],
        };
        assert!(!ws.collection_enabled());

        ws.questionnaire.push(Question::new("Name"));
        assert!(ws.collection_enabled());

        ws.collect_information = false;
        assert!(!ws.collection_enabled());
    }

    #[test]
    fn collection_name_uses_dataset_prefix() {
        assert_eq!(collection_name(42), "dataset-42");
    }
}
