//! Information-collection state machine.
//!
//! A workspace may configure a questionnaire: a list of questions whose
//! answers should be gathered from the conversation. When collection is
//! enabled, every visitor message is first sent to the completion service
//! with a classification prompt that asks the model to:
//!
//! 1. decide whether the latest message is a query needing knowledge;
//! 2. propose values for the configured questions;
//! 3. propose a short conversation title;
//! 4. optionally write a reply when the message is not a query.
//!
//! The raw output is parsed into a [`Classification`]. Malformed output
//! degrades to [`Classification::Query`] with nothing extracted.
//!
//! # Transitions
//!
//! ```text
//!                 collection off ─────────────────────────▶ Disabled (QA)
//! visitor msg ─▶  classify ─▶ merge answers ─▶ rename? ─┬─▶ AnswerWithContext (QA)
//!                                                        └─▶ DirectReply
//! ```
//!
//! Answers are merged into [`CollectedInformation`] keyed by question id.
//! Empty and placeholder values never erase a stored answer. Answers
//! naming a question that is not configured are ignored.

use anyhow::Result;
use serde_json::Value;

use crate::completion::ChatCompletion;
use crate::models::{
    ChatMessage, CollectedInformation, ConversationHistory, Question, Thread, Workspace,
};
use crate::prompt::{custom_suffix, tone_or_default, Persona};
use crate::repository::Repository;

/// Values the model uses to mean "no answer".
const PLACEHOLDER_ANSWERS: &[&str] = &["empty", "finding or empty", "missing", "n/a", "null"];

/// Information the model extracted from the conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    /// Proposed conversation title, if non-empty.
    pub title: Option<String>,
    /// `(question text, value)` pairs as returned by the model.
    pub answers: Vec<(String, String)>,
}

/// Parsed classification of the latest visitor message.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Needs a knowledge-backed answer.
    Query(Extracted),
    /// Not a query; the model supplied a ready reply.
    Statement { extracted: Extracted, reply: String },
}

impl Classification {
    pub fn extracted(&self) -> &Extracted {
        match self {
            Classification::Query(extracted) => extracted,
            Classification::Statement { extracted, .. } => extracted,
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Classification::Query(_))
    }
}

/// What the orchestrator should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOutcome {
    /// Collection is off; go straight to QA.
    Disabled,
    /// Go to QA, steering follow-ups with this field summary.
    AnswerWithContext { fields_summary: String },
    /// Use this text as the response; skip retrieval.
    DirectReply(String),
}

// ============ Parsing ============

/// Remove Markdown code-fence markers (```` ```json ```` and ```` ``` ````).
pub fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Parse the model's classification output.
///
/// Accepted shapes for `answers`:
///
/// - an object `{"question": "value", ...}`;
/// - an array of single-entry objects `[{"question": "value"}, ...]`;
/// - an array of strings, paired positionally with `questions`.
///
/// `is_query` may be a boolean or the strings `"true"`/`"false"`. A
/// missing or unrecognized `is_query` counts as a query. A non-query with
/// an empty `response` is also treated as a query, since there is nothing
/// to reply with.
pub fn parse_classification(raw: &str, questions: &[&Question]) -> Classification {
    let cleaned = strip_code_fences(raw);
    let value = match parse_json_object(&cleaned) {
        Some(value) => value,
        None => {
            tracing::warn!(output_len = raw.len(), "classification output is not a JSON object; treating as query");
            return Classification::Query(Extracted::default());
        }
    };

    let extracted = Extracted {
        title: value
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        answers: parse_answers(value.get("answers"), questions),
    };

    let is_query = match value.get("is_query") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.trim().eq_ignore_ascii_case("false"),
        _ => true,
    };

    let reply = value
        .get("response")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    if is_query || reply.is_empty() {
        Classification::Query(extracted)
    } else {
        Classification::Statement {
            extracted,
            reply: reply.to_string(),
        }
    }
}

/// Parse a JSON object, falling back to the outermost `{...}` span when
/// the model wrapped it in prose.
fn parse_json_object(text: &str) -> Option<Value> {
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn parse_answers(answers: Option<&Value>, questions: &[&Question]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    match answers {
        Some(Value::Object(map)) => {
            for (question, value) in map {
                if let Some(v) = answer_text(value) {
                    pairs.push((question.clone(), v));
                }
            }
        }
        Some(Value::Array(items)) => {
            for (position, item) in items.iter().enumerate() {
                match item {
                    Value::Object(map) => {
                        for (question, value) in map {
                            if let Some(v) = answer_text(value) {
                                pairs.push((question.clone(), v));
                            }
                        }
                    }
                    other => {
                        if let (Some(question), Some(v)) = (questions.get(position), answer_text(other)) {
                            pairs.push((question.text.clone(), v));
                        }
                    }
                }
            }
        }
        _ => {}
    }
    pairs
}

fn answer_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_placeholder(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || PLACEHOLDER_ANSWERS.iter().any(|p| v.eq_ignore_ascii_case(p))
}

// ============ State transitions ============

/// Merge proposed answers into `info`.
///
/// Question text is resolved to the question's id, first exactly and then
/// ignoring case and surrounding whitespace. Returns the number of fields
/// written.
pub fn merge_answers(
    info: &mut CollectedInformation,
    questions: &[&Question],
    answers: &[(String, String)],
) -> usize {
    let mut written = 0;
    for (question_text, value) in answers {
        if is_placeholder(value) {
            continue;
        }
        let Some(question) = resolve_question(questions, question_text) else {
            tracing::debug!(question = %question_text, "answer for unknown question ignored");
            continue;
        };
        info.fields.insert(question.id.clone(), value.trim().to_string());
        written += 1;
    }
    written
}

fn resolve_question<'q>(questions: &[&'q Question], text: &str) -> Option<&'q Question> {
    questions
        .iter()
        .find(|q| q.text == text)
        .or_else(|| {
            let wanted = text.trim();
            questions
                .iter()
                .find(|q| q.text.trim().eq_ignore_ascii_case(wanted))
        })
        .copied()
}

/// One `"{question}: {value|missing}"` line per configured question.
pub fn fields_summary(questions: &[&Question], info: &CollectedInformation) -> String {
    questions
        .iter()
        .map(|q| format!("{}: {}\n", q.text, info.value_for(q).unwrap_or("missing")))
        .collect()
}

/// Title to switch to, if the one-time rename should fire.
///
/// Fires when the visitor has written more than `min_chars` characters,
/// the current title still looks auto-generated (contains `:`), it has
/// not been renamed yet (no `-`), and the model proposed a title.
pub fn renamed_title(
    current: &str,
    visitor_text: &str,
    proposed: Option<&str>,
    min_chars: usize,
) -> Option<String> {
    let proposed = proposed.map(str::trim).filter(|p| !p.is_empty())?;
    if visitor_text.chars().count() > min_chars && current.contains(':') && !current.contains('-') {
        Some(format!("{} - {}", current, proposed))
    } else {
        None
    }
}

/// Render the classification prompt for `latest_message`.
pub fn build_classification_prompt(workspace: &Workspace, latest_message: &str) -> String {
    let questions: Vec<&Question> = workspace.active_questions().collect();

    let mut prompt = format!(
        "Act as an AI assistant on behalf of {}. Find the best matching precise information for the following fields:\n",
        Persona::from_role(workspace.role.as_deref()).label()
    );
    for q in &questions {
        prompt.push_str(&q.text);
        prompt.push('\n');
    }

    let template_answers = questions
        .iter()
        .map(|q| format!("{}: \"finding or empty\"", Value::String(q.text.clone())))
        .collect::<Vec<_>>()
        .join(", ");

    prompt.push_str(&format!(
        "Also check whether the sentence \"{}\" is a question or an answer. Generate only a JSON response. Fill up this JSON:\n",
        latest_message
    ));
    prompt.push_str(&format!(
        "{{\"title\": \"Generate a title of this conversation\", \"is_query\": \"true/false\", \"answers\": {{{}}}, \"response\": \"generated response\"}}\n",
        template_answers
    ));
    prompt.push_str(&format!(
        "Respond with a greeting only once if required. Ask a follow up question if the last message was not a query \
         to find answers for the given fields while some answers are still missing. Ask one question at a time. \
         Do not repeat any question already asked. Do not ask anything outside of the given fields. \
         Confirm the information noted and finish the conversation when all the fields are filled. \
         Also, let the user know they can ask for any information if needed. Use {} professional tone{}\n",
        tone_or_default(workspace.tone.as_deref()),
        custom_suffix(workspace.custom_prompt.as_deref())
    ));
    prompt
}

// ============ Evaluation ============

/// Runs the collection step for one visitor message.
pub struct CollectionMachine<'a> {
    pub repo: &'a dyn Repository,
    pub completion: &'a dyn ChatCompletion,
    pub title_rename_min_chars: usize,
}

impl<'a> CollectionMachine<'a> {
    /// Classify `latest_message`, persist merged answers and any title
    /// change, and decide the next step.
    ///
    /// A failed classification call is logged and treated as a query.
    /// Repository failures propagate.
    pub async fn evaluate(
        &self,
        workspace: &Workspace,
        thread: &Thread,
        history: &ConversationHistory,
        latest_message: &str,
    ) -> Result<CollectionOutcome> {
        if !workspace.collection_enabled() {
            return Ok(CollectionOutcome::Disabled);
        }

        let questions: Vec<&Question> = workspace.active_questions().collect();
        let mut info = self.repo.collected_information(thread.id).await?;

        let prompt = build_classification_prompt(workspace, latest_message);
        let mut transcript = history.turns.clone();
        transcript.push(ChatMessage::user(prompt));

        let classification = match self.completion.complete(&transcript).await {
            Ok(raw) => parse_classification(&raw, &questions),
            Err(e) => {
                tracing::warn!(thread = %thread.slug, error = %e, "classification call failed; treating as query");
                Classification::Query(Extracted::default())
            }
        };

        let extracted = classification.extracted();
        let written = merge_answers(&mut info, &questions, &extracted.answers);
        if written > 0 {
            self.repo.save_collected_information(&info).await?;
        }
        tracing::debug!(
            thread = %thread.slug,
            is_query = classification.is_query(),
            answers = written,
            "message classified"
        );

        if let Some(title) = renamed_title(
            &thread.title,
            &history.visitor_text,
            extracted.title.as_deref(),
            self.title_rename_min_chars,
        ) {
            tracing::info!(thread = %thread.slug, title = %title, "thread renamed");
            self.repo.rename_thread(thread.id, &title).await?;
        }

        Ok(match classification {
            Classification::Statement { reply, .. } => CollectionOutcome::DirectReply(reply),
            Classification::Query(_) => CollectionOutcome::AnswerWithContext {
                fields_summary: fields_summary(&questions, &info),
            },
        })
    }
}
