//! System-prompt rendering.
//!
//! Builds the QA template sent with every knowledge-backed answer. The
//! template carries two placeholders that are filled right before the
//! completion call:
//!
//! | Placeholder | Replaced with |
//! |-------------|---------------|
//! | `[[CONTEXT]]` | retrieved context (or the no-information sentinel) |
//! | `[[QUERY]]` | the visitor's raw message |

/// Placeholder for retrieved context.
pub const CONTEXT_PLACEHOLDER: &str = "[[CONTEXT]]";
/// Placeholder for the visitor's message.
pub const QUERY_PLACEHOLDER: &str = "[[QUERY]]";

const DEFAULT_PERSONA: &str = "a real person";
const DEFAULT_TONE: &str = "polite";

/// Assistant persona, selected by the workspace's role key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persona {
    Executive,
    Recruiter,
    Support,
    Legal,
    Sales,
    Technical,
    Marketing,
    Generic,
}

impl Persona {
    /// Map a role key to a persona. Unknown or empty keys are `Generic`.
    pub fn from_role(role: Option<&str>) -> Self {
        match role.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("executive") => Persona::Executive,
            Some("recruiter") => Persona::Recruiter,
            Some("support") => Persona::Support,
            Some("legal") => Persona::Legal,
            Some("sales") => Persona::Sales,
            Some("technical") => Persona::Technical,
            Some("marketing") => Persona::Marketing,
            _ => Persona::Generic,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Persona::Executive => "Executive",
            Persona::Recruiter => "Recruiter",
            Persona::Support => "Client Support Agent",
            Persona::Legal => "Legal Advisor",
            Persona::Sales => "Sales Representative",
            Persona::Technical => "Technical Support Agent",
            Persona::Marketing => "Marketing Specialist",
            Persona::Generic => DEFAULT_PERSONA,
        }
    }
}

/// Tone to use in prompts; blank falls back to "polite".
pub fn tone_or_default(tone: Option<&str>) -> &str {
    match tone.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => DEFAULT_TONE,
    }
}

/// Operator instruction, rendered on its own line when present.
pub(crate) fn custom_suffix(custom_instruction: Option<&str>) -> String {
    match custom_instruction.map(str::trim) {
        Some(c) if !c.is_empty() => format!("\n{}", c),
        _ => String::new(),
    }
}

/// Render the QA system prompt.
///
/// `missing_fields_summary` is the `"{question}: {value|missing}"` listing
/// produced by the collection state machine, or empty when collection is
/// off. The result contains [`CONTEXT_PLACEHOLDER`] and
/// [`QUERY_PLACEHOLDER`] exactly once each.
pub fn build_system_prompt(
    role: Option<&str>,
    tone: Option<&str>,
    missing_fields_summary: &str,
    custom_instruction: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Act as an AI assistant on behalf of {} that only answers based on the provided context \
         in a {} professional tone. Contexts are from common workspace knowledge and information \
         related to the person asked. Do not use external knowledge or recommend other options to \
         communicate. Describe only useful information, write in brief. Don't mention anything \
         about context or how the response is generated.",
        Persona::from_role(role).label(),
        tone_or_default(tone),
    );

    if !missing_fields_summary.trim().is_empty() {
        prompt.push_str(" Also collecting the following information:\n");
        prompt.push_str(missing_fields_summary.trim_end());
        prompt.push_str("\nAsk for missing information one item at a time.");
    }

    prompt.push_str(&custom_suffix(custom_instruction));
    prompt.push_str(&format!(
        "\nContext:\n{}\nThe user asked: {}\nAnswer is:",
        CONTEXT_PLACEHOLDER, QUERY_PLACEHOLDER
    ));
    prompt
}

/// Substitute context and query into a template.
///
/// The context is inserted first, so a query that happens to contain the
/// context placeholder text is left untouched.
pub fn fill_template(template: &str, context: &str, query: &str) -> String {
    match template.split_once(QUERY_PLACEHOLDER) {
        Some((head, tail)) => format!(
            "{}{}{}",
            head.replace(CONTEXT_PLACEHOLDER, context),
            query,
            tail.replace(CONTEXT_PLACEHOLDER, context)
        ),
        None => template.replace(CONTEXT_PLACEHOLDER, context),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_mapping() {
        assert_eq!(Persona::from_role(Some("support")).label(), "Client Support Agent");
        assert_eq!(Persona::from_role(Some(" Legal ")).label(), "Legal Advisor");
        assert_eq!(Persona::from_role(Some("astronaut")).label(), "a real person");
        assert_eq!(Persona::from_role(None), Persona::Generic);
    }

    #[test]
    fn test_prompt_has_placeholders_once() {
        let prompt = build_system_prompt(Some("sales"), Some("friendly"), "", None);
        assert!(prompt.contains("Sales Representative"));
        assert!(prompt.contains("friendly professional tone"));
        assert_eq!(prompt.matches(CONTEXT_PLACEHOLDER).count(), 1);
        assert_eq!(prompt.matches(QUERY_PLACEHOLDER).count(), 1);
        assert!(prompt.ends_with("Answer is:"));
        assert!(!prompt.contains("collecting"));
    }

    #[test]
    fn test_prompt_includes_fields_and_custom_instruction() {
        let prompt = build_system_prompt(
            None,
            None,
            "Name: Alice\nExpected salary: missing\n",
            Some("Never discuss pricing."),
        );
        assert!(prompt.contains("a real person"));
        assert!(prompt.contains("polite professional tone"));
        assert!(prompt.contains("Expected salary: missing\nAsk for missing information"));
        assert!(prompt.contains("\nNever discuss pricing.\nContext:"));
    }

    #[test]
    fn test_fill_template() {
        let template = build_system_prompt(None, None, "", None);
        let filled = fill_template(&template, "Refunds take 30 days.", "What about [[CONTEXT]]?");
        assert!(filled.contains("Context:\nRefunds take 30 days.\nThe user asked: What about [[CONTEXT]]?"));
    }
}
