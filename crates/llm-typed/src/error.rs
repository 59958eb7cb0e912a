//! Unified error type for typed LLM calls.
//!
//! Every component maps its failures into [`LlmError`], so a caller has
//! a single type to match against whether the failure came from schema
//! compilation, the network, decoding, validation, or tool dispatch.
//!
//! # Two kinds of recovery
//!
//! Errors fall into two recoverable families, each handled by a
//! different layer:
//!
//! - **Transport** failures ([`is_retryable`](LlmError::is_retryable))
//!   are retried invisibly by [`Retrying`](crate::transport::Retrying)
//!   with exponential backoff.
//! - **Output** failures ([`is_correctable`](LlmError::is_correctable))
//!   are retried visibly by the call controller, which shows the model
//!   its previous output and the error and asks for a correction.
//!
//! Everything else surfaces to the caller immediately.
//!
//! ```rust
//! use llm_typed::LlmError;
//!
//! let err = LlmError::MalformedOutput {
//!     message: "expected `,` or `}`".into(),
//!     raw: r#"{"name" "Alice"}"#.into(),
//! };
//! assert!(err.is_correctable());
//! assert!(!err.is_retryable());
//! ```

use serde_json::Value;

use crate::call::RetryContext;

/// The unified error type returned by every fallible operation.
///
/// The enum is `#[non_exhaustive]`; always include a wildcard arm.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LlmError {
    /// A type descriptor cannot be represented as a schema.
    ///
    /// Raised at compile time and never retried: the caller must change
    /// the type.
    #[error("unsupported type: {message}")]
    UnsupportedType {
        /// What made the descriptor unrepresentable.
        message: String,
    },

    /// An HTTP-level failure (transport error, unexpected status code).
    ///
    /// `status` is `None` when the request never received a response
    /// (e.g. DNS failure, connection reset).
    #[error("HTTP error (status={status:?}): {message}")]
    Http {
        /// The HTTP status code, if one was received.
        status: Option<http::StatusCode>,
        /// A human-readable description of the failure.
        message: String,
        /// Whether the transport layer should retry this request.
        retryable: bool,
    },

    /// The API key or token was rejected.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The request was malformed (missing fields, invalid parameters,
    /// unrenderable prompt template).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A provider-specific error that doesn't map to another variant.
    #[error("provider error ({code}): {message}")]
    Provider {
        /// Provider-defined error code (e.g. `"overloaded"`).
        code: String,
        /// Human-readable error description.
        message: String,
        /// Whether the transport layer should retry this request.
        retryable: bool,
    },

    /// The model's output is not valid JSON once the stream finished, or
    /// contains a syntax error that no further input could repair.
    #[error("malformed output: {message}")]
    MalformedOutput {
        /// What went wrong during parsing.
        message: String,
        /// The raw text accumulated for the value.
        raw: String,
    },

    /// The output parsed but does not match the declared type.
    #[error("schema mismatch at {path}: {message}")]
    SchemaMismatch {
        /// Human-readable description of the mismatch.
        message: String,
        /// Location of the offending value, e.g. `$.people[2].age`.
        path: String,
        /// The offending JSON fragment.
        actual: Value,
    },

    /// The model answered in a form the call does not accept (for example
    /// plain text when a tool call was required).
    #[error("output not allowed: expected {expected}, received {received}")]
    OutputNotAllowed {
        /// What the call was waiting for.
        expected: String,
        /// What the model produced instead.
        received: String,
    },

    /// Every attempt of a typed call failed validation.
    #[error("validation exhausted after {attempts} attempts: {}", last_message(.history))]
    ValidationExhausted {
        /// Number of requests that were sent.
        attempts: u32,
        /// Every failed attempt, in order.
        ///
        /// From a typed call this holds `max_retries + 1` entries: the
        /// failure of the first attempt plus one per retry. Each retried
        /// request only ever carries the failures before it, so at most
        /// `max_retries`. From the tool loop it holds one entry per
        /// rejected call, across `max_retries + 1` rejected rounds.
        history: RetryContext,
    },

    /// The model called a tool that is not registered.
    #[error("unknown tool `{name}` (call {call_id})")]
    UnknownTool {
        /// The name the model asked for.
        name: String,
        /// The provider-assigned call id.
        call_id: String,
    },

    /// A tool invocation raised an error.
    #[error("tool execution error ({tool_name}): {source}")]
    ToolExecution {
        /// The name of the tool that failed.
        tool_name: String,
        /// The underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The transport retry budget was exhausted without a successful
    /// stream.
    #[error("retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last_error: Box<LlmError>,
    },

    /// A per-request timeout or the overall call deadline elapsed.
    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout {
        /// Milliseconds elapsed before the timeout fired.
        elapsed_ms: u64,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

fn last_message(history: &RetryContext) -> String {
    history
        .last()
        .map_or_else(|| "no attempts recorded".into(), |f| f.error.clone())
}

impl LlmError {
    /// Returns `true` for transient transport failures that the adapter
    /// layer may retry with backoff.
    ///
    /// ```rust
    /// use llm_typed::LlmError;
    ///
    /// let err = LlmError::Http {
    ///     status: Some(http::StatusCode::TOO_MANY_REQUESTS),
    ///     message: "slow down".into(),
    ///     retryable: true,
    /// };
    /// assert!(err.is_retryable());
    /// assert!(!LlmError::Auth("bad key".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { retryable, .. } | Self::Provider { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns `true` for output failures the model can be asked to fix.
    ///
    /// The call controller retries these with corrective feedback, up to
    /// its configured `max_retries`.
    pub fn is_correctable(&self) -> bool {
        matches!(
            self,
            Self::MalformedOutput { .. }
                | Self::SchemaMismatch { .. }
                | Self::OutputNotAllowed { .. }
                | Self::UnknownTool { .. }
        )
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedType {
            message: message.into(),
        }
    }

    pub(crate) fn mismatch(path: &str, message: impl Into<String>, actual: Value) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
            path: path.to_owned(),
            actual,
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedOutput {
            message: err.to_string(),
            raw: String::new(),
        }
    }
}
