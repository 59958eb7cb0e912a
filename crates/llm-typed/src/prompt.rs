//! Prompt assembly.
//!
//! [`assemble`] builds the [`ProviderRequest`] for one attempt from the
//! caller's messages, the compiled schema, and the failures of earlier
//! attempts. It never mutates its inputs: every attempt starts from the
//! same base messages and replays the whole retry history on top.
//!
//! [`PromptTemplate`] renders `{name}` placeholders so a typed call can
//! be declared once and invoked with different arguments.

use std::collections::HashMap;

use crate::call::{OutputMode, RawOutput, RetryContext};
use crate::chat::{ChatMessage, ChatRole, ToolCall};
use crate::error::LlmError;
use crate::provider::{ProviderRequest, ToolChoice};
use crate::schema::SchemaSpec;

// ── PromptTemplate ──────────────────────────────────────────────────

/// A prompt with named `{placeholders}`.
///
/// `{{` and `}}` render as literal braces.
///
/// ```rust
/// use llm_typed::prompt::PromptTemplate;
///
/// let template = PromptTemplate::new("Describe {city} in {{three}} words.");
/// let text = template.render(&[("city", "Lisbon")]).unwrap();
/// assert_eq!(text, "Describe Lisbon in {three} words.");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    /// Wraps a template string.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// The template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Renders the template with `args`.
    ///
    /// # Errors
    ///
    /// [`LlmError::InvalidRequest`] if a placeholder has no argument, or
    /// if a brace is unbalanced.
    pub fn render<K, V>(&self, args: &[(K, V)]) -> Result<String, LlmError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let args: HashMap<&str, &str> = args
            .iter()
            .map(|(k, v)| (k.as_ref(), v.as_ref()))
            .collect();

        let mut out = String::with_capacity(self.source.len());
        let mut chars = self.source.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match c {
                '{' if chars.peek().is_some_and(|&(_, n)| n == '{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek().is_some_and(|&(_, n)| n == '}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let rest = &self.source[i + 1..];
                    let Some(len) = rest.find('}') else {
                        return Err(LlmError::InvalidRequest(format!(
                            "unclosed placeholder at offset {i} in prompt template"
                        )));
                    };
                    let name = rest[..len].trim();
                    let value = args.get(name).ok_or_else(|| {
                        LlmError::InvalidRequest(format!(
                            "prompt template argument `{name}` was not provided"
                        ))
                    })?;
                    out.push_str(value);
                    // Skip the name and the closing brace.
                    for _ in 0..=rest[..len].chars().count() {
                        chars.next();
                    }
                }
                '}' => {
                    return Err(LlmError::InvalidRequest(format!(
                        "unmatched `}}` at offset {i} in prompt template"
                    )));
                }
                _ => out.push(c),
            }
        }
        Ok(out)
    }
}

// ── OutputSpec ──────────────────────────────────────────────────────

/// How the structured value is requested from the model.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    /// The compiled schema.
    pub schema: SchemaSpec,
    /// [`OutputMode::Json`] or [`OutputMode::Tool`]. `Auto` is treated as
    /// `Json`.
    pub mode: OutputMode,
    /// Also describe the schema in the system prompt.
    pub system_prompt_fallback: bool,
}

// ── assemble ────────────────────────────────────────────────────────

/// Builds the request for one attempt.
///
/// - Leading system messages are lifted into
///   [`ProviderRequest::system`].
/// - JSON mode sets a native response format; tool mode exposes the
///   schema as a single tool and forces a call to it.
/// - With `retry`, each earlier failure is appended as the model's
///   output followed by a correction request naming the error.
///
/// The caller's messages are not modified.
pub fn assemble(
    messages: &[ChatMessage],
    output: &OutputSpec,
    retry: Option<&RetryContext>,
) -> ProviderRequest {
    let (mut system, mut conversation) = split_system(messages);
    conversation.reserve(2 * retry.map_or(0, RetryContext::len));

    let mut request = ProviderRequest::default();
    match output.mode {
        OutputMode::Tool => {
            request.tools = Some(vec![output.schema.tool_definition()]);
            request.tool_choice = Some(ToolChoice::Specific(output.schema.name.clone()));
        }
        OutputMode::Json | OutputMode::Auto => {
            request.response_format = Some(output.schema.response_format());
        }
    }
    if output.system_prompt_fallback {
        append_system(&mut system, &schema_instruction(&output.schema));
    }

    if let Some(retry) = retry {
        for failure in retry {
            append_feedback(&mut conversation, output, &failure.output, &failure.error);
        }
    }

    request.system = system;
    request.messages = conversation;
    request
}

/// Moves leading system messages into a separate system prompt.
pub(crate) fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<ChatMessage>) {
    let mut system: Option<String> = None;
    let mut conversation = Vec::with_capacity(messages.len());
    for message in messages {
        match (message.role, message.text()) {
            (ChatRole::System, Some(text)) if conversation.is_empty() => {
                append_system(&mut system, text);
            }
            _ => conversation.push(message.clone()),
        }
    }
    (system, conversation)
}

fn append_system(system: &mut Option<String>, text: &str) {
    match system {
        Some(existing) => {
            existing.push_str("\n\n");
            existing.push_str(text);
        }
        None => *system = Some(text.to_owned()),
    }
}

fn schema_instruction(schema: &SchemaSpec) -> String {
    let schema_json = serde_json::to_string_pretty(schema.schema.as_value())
        .expect("serializing Value to JSON cannot fail");
    format!(
        "You must respond with valid JSON that conforms to this JSON Schema:\n\
         ```json\n{schema_json}\n```\n\
         Respond ONLY with the JSON object. No markdown, no explanation."
    )
}

fn append_feedback(
    conversation: &mut Vec<ChatMessage>,
    spec: &OutputSpec,
    output: &RawOutput,
    error: &str,
) {
    match output {
        RawOutput::Text { text } => {
            let instruction = match spec.mode {
                OutputMode::Tool => format!(
                    "Do not answer in prose. Call `{}` with arguments that conform to its schema.",
                    spec.schema.name
                ),
                OutputMode::Json | OutputMode::Auto => {
                    "Please try again with valid JSON that conforms to the schema.".to_owned()
                }
            };
            conversation.push(ChatMessage::assistant(text.clone()));
            conversation.push(ChatMessage::user(format!(
                "Your response did not pass validation: {error}\n{instruction}"
            )));
        }
        RawOutput::ToolCall {
            id,
            name,
            arguments,
        } => {
            conversation.push(ChatMessage::assistant_tool_calls(
                None,
                vec![ToolCall::from_raw(id.clone(), name.clone(), arguments)],
            ));
            conversation.push(ChatMessage::tool_error(
                id.clone(),
                argument_feedback(name, error),
            ));
        }
    }
}

/// The tool result sent back for a call whose arguments were rejected.
pub(crate) fn argument_feedback(name: &str, error: &str) -> String {
    format!(
        "The arguments did not pass validation: {error}\n\
         Please call `{name}` again with arguments that conform to its schema."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::AttemptFailure;
    use crate::chat::ContentBlock;
    use crate::schema::{CompileOptions, DescriptorRegistry, Record, TypeDescriptor, compile};

    fn spec() -> SchemaSpec {
        let d: TypeDescriptor = Record::new("Person")
            .field("name", TypeDescriptor::string())
            .into();
        compile(&d, &DescriptorRegistry::new(), CompileOptions::default())
            .unwrap()
            .spec()
            .clone()
    }

    fn output(mode: OutputMode, fallback: bool) -> OutputSpec {
        OutputSpec {
            schema: spec(),
            mode,
            system_prompt_fallback: fallback,
        }
    }

    #[test]
    fn test_template_renders_arguments() {
        let t = PromptTemplate::new("Hi {name}, meet {other}!");
        assert_eq!(
            t.render(&[("name", "Ann"), ("other", "Bo")]).unwrap(),
            "Hi Ann, meet Bo!"
        );
    }

    #[test]
    fn test_template_escapes_and_errors() {
        let t = PromptTemplate::new("{{literal}} {x}");
        assert_eq!(t.render(&[("x", "1")]).unwrap(), "{literal} 1");
        let err = PromptTemplate::new("{missing}")
            .render::<&str, &str>(&[])
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(ref m) if m.contains("missing")));
        assert!(PromptTemplate::new("a } b").render::<&str, &str>(&[]).is_err());
        assert!(PromptTemplate::new("a { b").render::<&str, &str>(&[]).is_err());
    }

    #[test]
    fn test_template_handles_multibyte_names() {
        let t = PromptTemplate::new("→ {città} ←");
        assert_eq!(t.render(&[("città", "Roma")]).unwrap(), "→ Roma ←");
    }

    #[test]
    fn test_json_mode_sets_response_format() {
        let messages = vec![ChatMessage::system("Be terse."), ChatMessage::user("Who?")];
        let req = assemble(&messages, &output(OutputMode::Json, false), None);
        assert_eq!(req.system.as_deref(), Some("Be terse."));
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.response_format.unwrap().name, "return_person");
        assert!(req.tools.is_none());
    }

    #[test]
    fn test_tool_mode_forces_single_tool() {
        let messages = vec![ChatMessage::user("Who?")];
        let req = assemble(&messages, &output(OutputMode::Tool, false), None);
        let tools = req.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "return_person");
        assert_eq!(
            req.tool_choice,
            Some(ToolChoice::Specific("return_person".into()))
        );
        assert!(req.response_format.is_none());
    }

    #[test]
    fn test_fallback_appends_schema_instruction() {
        let messages = vec![ChatMessage::system("Be terse."), ChatMessage::user("Who?")];
        let req = assemble(&messages, &output(OutputMode::Json, true), None);
        let system = req.system.unwrap();
        assert!(system.starts_with("Be terse.\n\n"));
        assert!(system.contains("conforms to this JSON Schema"));
        assert!(system.contains("\"name\""));
    }

    #[test]
    fn test_retry_appends_text_feedback_without_mutating_input() {
        let messages = vec![ChatMessage::user("Who?")];
        let before = messages.clone();
        let mut retry = RetryContext::new();
        retry.push(AttemptFailure::text(1, r#"{"name":1}"#, "expected string"));

        let req = assemble(&messages, &output(OutputMode::Json, false), Some(&retry));
        assert_eq!(messages, before);
        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[1].role, ChatRole::Assistant);
        assert_eq!(req.messages[1].text(), Some(r#"{"name":1}"#));
        assert_eq!(req.messages[2].role, ChatRole::User);
        assert!(req.messages[2].text().unwrap().contains("expected string"));
    }

    #[test]
    fn test_retry_appends_tool_feedback() {
        let messages = vec![ChatMessage::user("Who?")];
        let mut retry = RetryContext::new();
        retry.push(AttemptFailure::tool_call(
            1,
            "call_1",
            "return_person",
            r#"{"nam"#,
            "invalid JSON",
        ));
        let req = assemble(&messages, &output(OutputMode::Tool, false), Some(&retry));
        assert_eq!(req.messages.len(), 3);
        let call = req.messages[1].tool_calls().next().unwrap();
        assert_eq!(call.id, "call_1");
        let ContentBlock::ToolResult(result) = &req.messages[2].content[0] else {
            panic!("expected tool result");
        };
        assert!(result.is_error);
        assert!(result.content.contains("invalid JSON"));
    }

    #[test]
    fn test_text_answer_in_tool_mode_asks_for_the_tool() {
        let messages = vec![ChatMessage::user("Who?")];
        let mut retry = RetryContext::new();
        retry.push(AttemptFailure::text(1, "It was Ada.", "expected a call to `return_person`"));

        let req = assemble(&messages, &output(OutputMode::Tool, false), Some(&retry));
        let feedback = req.messages[2].text().unwrap();
        assert!(feedback.contains("Call `return_person`"), "{feedback}");
        assert!(!feedback.contains("valid JSON"));

        let req = assemble(&messages, &output(OutputMode::Json, false), Some(&retry));
        assert!(req.messages[2].text().unwrap().contains("valid JSON"));
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let messages = vec![ChatMessage::user("Who?")];
        let out = output(OutputMode::Json, true);
        assert_eq!(assemble(&messages, &out, None), assemble(&messages, &out, None));
    }
}
