//! Conversation types: messages, content blocks, tool calls and results.
//!
//! A conversation is an ordered list of [`ChatMessage`]s. Each message
//! has a [`ChatRole`] and one or more [`ContentBlock`]s, so a single
//! assistant turn can carry both prose and several tool calls.
//!
//! ```rust
//! use llm_typed::{ChatMessage, chat::ChatRole};
//!
//! let msg = ChatMessage::user("What is the capital of France?");
//! assert_eq!(msg.role, ChatRole::User);
//! assert_eq!(msg.text(), Some("What is the capital of France?"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions that frame the conversation.
    System,
    /// The human (or calling program).
    User,
    /// The model.
    Assistant,
    /// The result of a tool invocation.
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author of the message.
    pub role: ChatRole,
    /// Ordered content parts.
    pub content: Vec<ContentBlock>,
}

/// One part of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ContentBlock {
    /// Plain text.
    Text(String),
    /// A model-issued request to run a tool.
    ToolCall(ToolCall),
    /// The outcome of running a tool.
    ToolResult(ToolResult),
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned identifier, echoed back in the matching
    /// [`ToolResult::tool_call_id`].
    pub id: String,
    /// Name of the tool to run.
    pub name: String,
    /// Arguments exactly as the model produced them. When the raw text
    /// was not valid JSON it is kept as a JSON string so it can be shown
    /// back to the model.
    pub arguments: Value,
}

/// The outcome of a tool invocation, sent back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The [`ToolCall::id`] this result answers.
    pub tool_call_id: String,
    /// Text shown to the model.
    pub content: String,
    /// Whether the invocation failed.
    pub is_error: bool,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum StopReason {
    /// The model finished its answer.
    #[default]
    EndTurn,
    /// The model stopped to let tools run.
    ToolUse,
    /// The token limit was reached.
    MaxTokens,
    /// A configured stop sequence was produced.
    StopSequence,
    /// The provider's content filter cut the answer short.
    ContentFilter,
}

impl ChatMessage {
    /// Creates a message with a single text block.
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text(text.into())],
        }
    }

    /// Creates a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(ChatRole::System, text)
    }

    /// Creates a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ChatRole::User, text)
    }

    /// Creates an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, text)
    }

    /// Creates an assistant message carrying tool calls and, optionally,
    /// the prose that preceded them.
    pub fn assistant_tool_calls(text: Option<String>, calls: Vec<ToolCall>) -> Self {
        let mut content = Vec::with_capacity(calls.len() + 1);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            content.push(ContentBlock::Text(text));
        }
        content.extend(calls.into_iter().map(ContentBlock::ToolCall));
        Self {
            role: ChatRole::Assistant,
            content,
        }
    }

    /// Creates a successful tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::from_result(ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        })
    }

    /// Creates a failed tool result message.
    pub fn tool_error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::from_result(ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
        })
    }

    /// Wraps a [`ToolResult`] in a tool-role message.
    pub fn from_result(result: ToolResult) -> Self {
        Self {
            role: ChatRole::Tool,
            content: vec![ContentBlock::ToolResult(result)],
        }
    }

    /// Returns the first text block, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|b| match b {
            ContentBlock::Text(t) => Some(t.as_str()),
            _ => None,
        })
    }

    /// Iterates over the tool calls in this message.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolCall(call) => Some(call),
            _ => None,
        })
    }
}

impl ToolCall {
    /// Builds a tool call from raw argument text, keeping unparseable
    /// text as a JSON string.
    pub fn from_raw(id: impl Into<String>, name: impl Into<String>, raw: &str) -> Self {
        let arguments = if raw.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}
