//! The record of failed attempts a retry is built from.

use serde::{Deserialize, Serialize};

/// What the model produced on an attempt, verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawOutput {
    /// Text content (JSON mode or the prompt fallback).
    Text {
        /// The accumulated text.
        text: String,
    },
    /// A tool call carrying the value as its arguments.
    ToolCall {
        /// Provider-assigned call id.
        id: String,
        /// The tool that was called.
        name: String,
        /// The raw argument text.
        arguments: String,
    },
}

impl RawOutput {
    /// The raw text, whichever form it arrived in.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text { text } => text,
            Self::ToolCall { arguments, .. } => arguments,
        }
    }
}

/// One attempt that did not produce a valid value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    /// 1-based attempt number.
    pub attempt: u32,
    /// What the model produced.
    pub output: RawOutput,
    /// Why it was rejected.
    pub error: String,
}

impl AttemptFailure {
    /// A failure of a text answer.
    pub fn text(attempt: u32, text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            attempt,
            output: RawOutput::Text { text: text.into() },
            error: error.into(),
        }
    }

    /// A failure of a tool-call answer.
    pub fn tool_call(
        attempt: u32,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            output: RawOutput::ToolCall {
                id: id.into(),
                name: name.into(),
                arguments: arguments.into(),
            },
            error: error.into(),
        }
    }
}

/// Every failed attempt of a call, oldest first.
///
/// The prompt assembler replays these to the model on the next attempt,
/// and [`LlmError::ValidationExhausted`](crate::LlmError::ValidationExhausted)
/// carries the full list once the budget runs out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryContext {
    failures: Vec<AttemptFailure>,
}

impl RetryContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure.
    pub fn push(&mut self, failure: AttemptFailure) {
        self.failures.push(failure);
    }

    /// The most recent failure.
    pub fn last(&self) -> Option<&AttemptFailure> {
        self.failures.last()
    }

    /// Number of failures recorded.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns `true` if no attempt has failed.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures, oldest first.
    pub fn iter(&self) -> std::slice::Iter<'_, AttemptFailure> {
        self.failures.iter()
    }

    /// Failures as a slice.
    pub fn failures(&self) -> &[AttemptFailure] {
        &self.failures
    }
}

impl<'a> IntoIterator for &'a RetryContext {
    type Item = &'a AttemptFailure;
    type IntoIter = std::slice::Iter<'a, AttemptFailure>;

    fn into_iter(self) -> Self::IntoIter {
        self.failures.iter()
    }
}
