//! End-to-end engine scenarios over in-memory collaborators.
//!
//! The embedder maps text to a keyword vector so similarity is
//! predictable; the completion fake answers through a closure and records
//! every transcript it receives.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use parley_core::completion::ChatCompletion;
use parley_core::corpus::MemorySnapshotCache;
use parley_core::embedding::Embedder;
use parley_core::inference::{ACKNOWLEDGE_UPLOAD, FALLBACK_REPLY};
use parley_core::knowledge::{Extractor, NewKnowledge, UploadedFile};
use parley_core::models::{
    ChatMessage, MessageKind, NewMessage, NewWorkspace, OwnerScope, Question, Thread, Workspace,
    VISITOR_AUTHOR,
};
use parley_core::repository::memory::InMemoryRepository;
use parley_core::repository::Repository;
use parley_core::store::memory::InMemoryVectorStore;
use parley_core::{Collaborators, Engine, EngineSettings};

// ============ Fakes ============

struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(vec![
            lower.matches("refund").count() as f32,
            lower.matches("salary").count() as f32,
            0.1,
        ])
    }
}

type Responder = Box<dyn Fn(&[ChatMessage]) -> Result<String> + Send + Sync>;

struct ScriptedCompletion {
    responder: Responder,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompletion {
    fn new(responder: impl Fn(&[ChatMessage]) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn last_prompt(&self) -> String {
        let calls = self.calls.lock().unwrap();
        calls.last().unwrap().last().unwrap().content.clone()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedCompletion {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        (self.responder)(messages)
    }
}

struct Utf8Extractor;

impl Extractor for Utf8Extractor {
    fn extract(&self, bytes: &[u8], _mime_type: &str, _file_name: &str) -> Result<String> {
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

fn is_classification(messages: &[ChatMessage]) -> bool {
    messages
        .last()
        .map(|m| m.content.contains("\"is_query\""))
        .unwrap_or(false)
}

// ============ Harness ============

struct Harness {
    engine: Engine,
    repo: Arc<InMemoryRepository>,
    completion: Arc<ScriptedCompletion>,
    workspace: Workspace,
    thread: Thread,
}

impl Harness {
    async fn new(
        workspace: NewWorkspace,
        responder: impl Fn(&[ChatMessage]) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let completion = Arc::new(ScriptedCompletion::new(responder));
        let engine = Engine::new(
            Collaborators {
                repo: repo.clone(),
                embedder: Arc::new(KeywordEmbedder),
                store: Arc::new(InMemoryVectorStore::new()),
                completion: completion.clone(),
                cache: Arc::new(MemorySnapshotCache::new()),
                extractor: Arc::new(Utf8Extractor),
            },
            EngineSettings::default(),
        );

        let workspace = repo.insert_workspace(workspace).await.unwrap();
        let thread = repo
            .insert_thread(workspace.id, "visitor-1", "Chat: Visitor 1")
            .await
            .unwrap();

        Self {
            engine,
            repo,
            completion,
            workspace,
            thread,
        }
    }

    async fn visitor_says(&self, text: &str) -> i64 {
        self.repo
            .insert_message(NewMessage {
                thread_id: self.thread.id,
                author: VISITOR_AUTHOR,
                kind: MessageKind::Message,
                title: text.chars().take(30).collect(),
                content: text.to_string(),
            })
            .await
            .unwrap()
            .id
    }

    async fn add_note(&self, owner: OwnerScope, note: &str, shared: bool) -> i64 {
        self.engine
            .save_knowledge(NewKnowledge {
                owner,
                note: Some(note.to_string()),
                file: None,
                shared,
            })
            .await
            .unwrap()
            .item
            .id
    }

    async fn stored_response(&self, message_id: i64) -> Option<String> {
        self.repo
            .get_message(message_id)
            .await
            .unwrap()
            .unwrap()
            .generated_response
    }
}

fn plain_workspace() -> NewWorkspace {
    NewWorkspace {
        slug: "acme".into(),
        name: "Acme".into(),
        role: Some("support".into()),
        ..Default::default()
    }
}

fn collecting_workspace(questions: &[&str]) -> NewWorkspace {
    NewWorkspace {
        slug: "hiring".into(),
        name: "Hiring".into(),
        role: Some("recruiter".into()),
        collect_information: true,
        questionnaire: questions.iter().map(|q| Question::new(*q)).collect(),
        ..Default::default()
    }
}

// ============ Scenarios ============

#[tokio::test]
async fn refund_question_is_answered_from_workspace_note() {
    let h = Harness::new(plain_workspace(), |messages| {
        let prompt = &messages.last().unwrap().content;
        if prompt.contains("Our refund window is 30 days.") {
            Ok("You can request a refund within 30 days.".into())
        } else {
            Ok("I don't know.".into())
        }
    })
    .await;

    h.add_note(OwnerScope::Workspace(h.workspace.id), "Our refund window is 30 days.", false)
        .await;
    let id = h.visitor_says("What's your refund policy?").await;

    let response = h.engine.generate("visitor-1", id).await.unwrap();

    assert!(response.contains("30 days"));
    assert_eq!(h.completion.call_count(), 1);
    let prompt = h.completion.last_prompt();
    assert!(prompt.contains("Client Support Agent"));
    assert!(prompt.contains("The user asked: What's your refund policy?"));
    assert_eq!(h.stored_response(id).await.as_deref(), Some(response.as_str()));
}

#[tokio::test]
async fn unrelated_question_gets_no_information_context() {
    let h = Harness::new(plain_workspace(), |_| Ok("Happy to help.".into())).await;
    h.add_note(OwnerScope::Workspace(h.workspace.id), "Our refund window is 30 days.", false)
        .await;
    let id = h.visitor_says("Do you ship to Canada?").await;

    h.engine.generate("visitor-1", id).await.unwrap();

    let prompt = h.completion.last_prompt();
    assert!(prompt.contains(parley_core::retrieve::NO_CONTEXT));
    assert!(!prompt.contains("refund window"));
}

#[tokio::test]
async fn salary_answer_is_collected_and_replied_directly() {
    let h = Harness::new(collecting_workspace(&["Expected salary"]), |messages| {
        assert!(is_classification(messages));
        Ok("```json\n{\"title\": \"Salary expectations\", \"is_query\": \"false\", \
            \"answers\": [{\"Expected salary\": \"$90,000\"}], \
            \"response\": \"Thanks, I've noted $90,000.\"}\n```"
            .into())
    })
    .await;
    let id = h.visitor_says("I'd like $90k").await;

    let response = h.engine.generate("visitor-1", id).await.unwrap();

    assert_eq!(response, "Thanks, I've noted $90,000.");
    assert_eq!(h.completion.call_count(), 1);

    let question = &h.workspace.questionnaire[0];
    let info = h.repo.collected_information(h.thread.id).await.unwrap();
    assert_eq!(info.value_for(question), Some("$90,000"));
}

#[tokio::test]
async fn memoized_response_skips_second_completion() {
    let h = Harness::new(plain_workspace(), |_| Ok("First answer.".into())).await;
    let id = h.visitor_says("Hello there").await;

    let first = h.engine.generate("visitor-1", id).await.unwrap();
    let second = h.engine.generate("visitor-1", id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.completion.call_count(), 1);
}

#[tokio::test]
async fn disabled_collection_never_classifies() {
    let mut workspace = collecting_workspace(&["Name", "Expected salary"]);
    workspace.collect_information = false;
    let h = Harness::new(workspace, |messages| {
        assert!(!is_classification(messages));
        Ok("Plain answer.".into())
    })
    .await;
    let id = h.visitor_says("My name is Alice").await;

    assert_eq!(h.engine.generate("visitor-1", id).await.unwrap(), "Plain answer.");
    assert_eq!(h.completion.call_count(), 1);
    assert!(h
        .repo
        .collected_information(h.thread.id)
        .await
        .unwrap()
        .fields
        .is_empty());
}

#[tokio::test]
async fn placeholder_answer_does_not_erase_collected_value() {
    let h = Harness::new(collecting_workspace(&["Name"]), |messages| {
        if is_classification(messages) {
            Ok(r#"{"title": "", "is_query": "false", "answers": {"Name": "empty"}, "response": "Anything else?"}"#.into())
        } else {
            Ok("unused".into())
        }
    })
    .await;

    let question = h.workspace.questionnaire[0].clone();
    let mut info = h.repo.collected_information(h.thread.id).await.unwrap();
    info.fields.insert(question.id.clone(), "Alice".into());
    h.repo.save_collected_information(&info).await.unwrap();

    let id = h.visitor_says("Thanks").await;
    h.engine.generate("visitor-1", id).await.unwrap();

    let info = h.repo.collected_information(h.thread.id).await.unwrap();
    assert_eq!(info.value_for(&question), Some("Alice"));
}

#[tokio::test]
async fn malformed_classification_falls_back_to_qa() {
    let h = Harness::new(collecting_workspace(&["Name"]), |messages| {
        if is_classification(messages) {
            Ok("Sorry, I can only answer in prose.".into())
        } else {
            Ok("Here is what I know.".into())
        }
    })
    .await;
    let id = h.visitor_says("What do you do?").await;

    let response = h.engine.generate("visitor-1", id).await.unwrap();

    assert_eq!(response, "Here is what I know.");
    assert_eq!(h.completion.call_count(), 2);
    assert!(h.completion.last_prompt().contains("Name: missing"));
}

#[tokio::test]
async fn upload_is_acknowledged_without_model_call() {
    let h = Harness::new(plain_workspace(), |_| bail!("no model calls expected")).await;

    let (message, report) = h
        .engine
        .upload_visitor_file(
            "visitor-1",
            UploadedFile {
                name: "cv.txt".into(),
                mime_type: "text/plain".into(),
                bytes: b"Ten years of salary negotiation experience.".to_vec(),
            },
            false,
        )
        .await
        .unwrap();

    assert_eq!(report.item.title, "cv.txt");
    assert_eq!(report.item.owner, OwnerScope::Thread(h.thread.id));
    assert!(report.stored);

    let response = h.engine.generate("visitor-1", message.id).await.unwrap();
    assert_eq!(response, ACKNOWLEDGE_UPLOAD);
    assert_eq!(h.completion.call_count(), 0);
    assert_eq!(h.stored_response(message.id).await.as_deref(), Some(ACKNOWLEDGE_UPLOAD));
}

#[tokio::test]
async fn unknown_message_gets_fallback() {
    let h = Harness::new(plain_workspace(), |_| Ok("unused".into())).await;
    let id = h.visitor_says("Hello").await;

    assert_eq!(h.engine.generate("visitor-1", 9999).await.unwrap(), FALLBACK_REPLY);
    assert_eq!(h.engine.generate("someone-else", id).await.unwrap(), FALLBACK_REPLY);
    assert_eq!(h.completion.call_count(), 0);
    assert!(h.stored_response(id).await.is_none());
}

#[tokio::test]
async fn failed_completion_is_not_persisted() {
    let h = Harness::new(plain_workspace(), |_| bail!("upstream timeout")).await;
    let id = h.visitor_says("Are you open on Sunday?").await;

    assert!(h.engine.generate("visitor-1", id).await.is_err());
    assert!(h.stored_response(id).await.is_none());
}

#[tokio::test]
async fn knowledge_changes_invalidate_snapshots() {
    let h = Harness::new(plain_workspace(), |_| Ok("ok".into())).await;
    let sibling = h
        .repo
        .insert_thread(h.workspace.id, "visitor-2", "Chat: Visitor 2")
        .await
        .unwrap();

    h.add_note(OwnerScope::Workspace(h.workspace.id), "Refunds take 30 days.", false)
        .await;
    assert_eq!(h.engine.prepare("visitor-1").await.unwrap().len(), 1);
    assert_eq!(h.engine.prepare("visitor-2").await.unwrap().len(), 1);

    // A private note on the sibling only affects the sibling.
    let private = h
        .add_note(OwnerScope::Thread(sibling.id), "Visitor 2 prefers email.", false)
        .await;
    assert_eq!(h.engine.prepare("visitor-1").await.unwrap().len(), 1);
    assert_eq!(h.engine.prepare("visitor-2").await.unwrap().len(), 2);

    // A shared note becomes visible to every thread of the workspace.
    h.add_note(OwnerScope::Thread(sibling.id), "Shared refund exception list.", true)
        .await;
    assert_eq!(h.engine.prepare("visitor-1").await.unwrap().len(), 2);

    h.engine.delete_knowledge(private).await.unwrap();
    assert_eq!(h.engine.prepare("visitor-2").await.unwrap().len(), 2);
}

#[tokio::test]
async fn long_conversation_renames_thread_once() {
    let h = Harness::new(collecting_workspace(&["Name"]), |messages| {
        if is_classification(messages) {
            Ok(r#"{"title": "Job application", "is_query": "false", "answers": {}, "response": "Noted."}"#.into())
        } else {
            Ok("unused".into())
        }
    })
    .await;

    let long = "I have been working as a backend engineer for many years. ".repeat(5);
    let first = h.visitor_says(&long).await;
    h.engine.generate("visitor-1", first).await.unwrap();

    let thread = h.repo.find_thread("visitor-1").await.unwrap().unwrap();
    assert_eq!(thread.title, "Chat: Visitor 1 - Job application");

    let second = h.visitor_says(&long).await;
    h.engine.generate("visitor-1", second).await.unwrap();
    let thread = h.repo.find_thread("visitor-1").await.unwrap().unwrap();
    assert_eq!(thread.title, "Chat: Visitor 1 - Job application");
}

fn assert_send<T: Send>(_: T) {}

#[tokio::test]
async fn engine_futures_can_run_on_a_multithreaded_server() {
    let h = Harness::new(plain_workspace(), |_| Ok("ok".into())).await;

    assert_send(h.engine.save_knowledge(NewKnowledge {
        owner: OwnerScope::Workspace(h.workspace.id),
        note: Some("Opening hours are 9 to 5.".into()),
        file: None,
        shared: false,
    }));
    assert_send(h.engine.upload_visitor_file(
        "visitor-1",
        UploadedFile {
            name: "hours.txt".into(),
            mime_type: "text/plain".into(),
            bytes: b"Opening hours are 9 to 5.".to_vec(),
        },
        false,
    ));
    assert_send(h.engine.generate("visitor-1", 1));
    assert_send(h.engine.prepare("visitor-1"));
    assert_send(h.engine.delete_knowledge(1));
}
