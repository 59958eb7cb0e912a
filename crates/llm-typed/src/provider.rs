//! Provider trait and request types.
//!
//! This module defines the boundary between the typed-call core and the
//! network:
//!
//! - **[`Provider`]**: the trait every backend adapter implements. It
//!   uses native async-fn-in-traits, so implementations are plain
//!   `async fn`s.
//!
//! - **[`DynProvider`]**: an object-safe mirror of `Provider` that uses
//!   boxed futures. A blanket `impl<T: Provider> DynProvider for T`
//!   bridges the two, so any concrete provider can be stored as
//!   `Box<dyn DynProvider>` or `Arc<dyn DynProvider>` with zero
//!   boilerplate.
//!
//! An adapter only translates: a [`ProviderRequest`] goes out in the
//! backend's wire format, and the backend's stream comes back as
//! [`ChunkEvent`](crate::stream::ChunkEvent)s. Schema handling and retry
//! policy never live in an adapter.
//!
//! # Request parameters
//!
//! [`ProviderRequest`] serializes cleanly to JSON (for logging and
//! replay) except for [`timeout`](ProviderRequest::timeout) and
//! [`extra_headers`](ProviderRequest::extra_headers), which are
//! transport concerns and are `#[serde(skip)]`'d.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::ChatMessage;
use crate::error::LlmError;
use crate::stream::ChunkStream;

/// The trait every LLM backend adapter implements.
///
/// # Object safety
///
/// `Provider` is **not** object-safe because AFIT returns `impl Future`.
/// When you need dynamic dispatch, use [`DynProvider`] instead; every
/// `Provider` implements it through a blanket impl.
pub trait Provider: Send + Sync {
    /// Sends a request and returns the normalized chunk stream.
    ///
    /// Errors returned here happen before any chunk is produced
    /// (connection refused, authentication, HTTP status). Errors after
    /// that point arrive as `Err` items inside the stream.
    fn stream(
        &self,
        request: &ProviderRequest,
    ) -> impl Future<Output = Result<ChunkStream, LlmError>> + Send;

    /// Returns static metadata describing this provider instance.
    fn metadata(&self) -> ProviderMetadata;
}

/// Object-safe counterpart of [`Provider`] for dynamic dispatch.
///
/// You rarely implement this directly. Use it to erase the concrete
/// provider type:
///
/// ```rust,no_run
/// use llm_typed::{ChatMessage, DynProvider, ProviderRequest};
///
/// async fn open(provider: &dyn DynProvider) {
///     let request = ProviderRequest {
///         messages: vec![ChatMessage::user("hi")],
///         ..Default::default()
///     };
///     let _stream = provider.stream_boxed(&request).await;
/// }
/// ```
pub trait DynProvider: Send + Sync {
    /// Boxed-future version of [`Provider::stream`].
    fn stream_boxed<'a>(
        &'a self,
        request: &'a ProviderRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChunkStream, LlmError>> + Send + 'a>>;

    /// Returns static metadata describing this provider instance.
    fn metadata(&self) -> ProviderMetadata;
}

impl<T: Provider> DynProvider for T {
    fn stream_boxed<'a>(
        &'a self,
        request: &'a ProviderRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChunkStream, LlmError>> + Send + 'a>> {
        Box::pin(self.stream(request))
    }

    fn metadata(&self) -> ProviderMetadata {
        Provider::metadata(self)
    }
}

/// Describes a provider instance: its name, model, and capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Human-readable provider name (e.g. `"openai"`).
    pub name: Cow<'static, str>,
    /// The model identifier (e.g. `"gpt-4o"`).
    pub model: String,
    /// Feature flags indicating what this provider supports.
    pub capabilities: HashSet<Capability>,
}

/// A feature that a provider may or may not support.
///
/// The call controller inspects these to pick an output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Capability {
    /// Function/tool calling.
    Tools,
    /// JSON Schema constrained output.
    StructuredOutput,
    /// `anyOf` unions inside constrained schemas.
    NativeUnions,
}

/// Everything an adapter needs to issue one request.
///
/// Use struct-update syntax for concise construction:
///
/// ```rust
/// use llm_typed::{ChatMessage, ProviderRequest};
///
/// let request = ProviderRequest {
///     messages: vec![ChatMessage::user("Hello")],
///     max_tokens: Some(256),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The conversation, in order.
    pub messages: Vec<ChatMessage>,
    /// System prompt, for providers that accept it separately.
    pub system: Option<String>,
    /// Tool definitions the model may invoke.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Controls whether and how the model uses tools.
    pub tool_choice: Option<ToolChoice>,
    /// Native output constraint, when the provider supports one.
    pub response_format: Option<ResponseFormat>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
    /// Sequences that end generation when produced.
    pub stop: Option<Vec<String>>,
    /// Per-request timeout. Skipped during serialization.
    #[serde(skip)]
    pub timeout: Option<Duration>,
    /// Extra HTTP headers to send. Skipped during serialization.
    #[serde(skip)]
    pub extra_headers: Option<http::HeaderMap>,
    /// Arbitrary key-value pairs forwarded to the provider.
    pub metadata: HashMap<String, Value>,
}

/// Controls whether the model should use tools and, if so, which ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    Auto,
    /// The model must not call any tools.
    None,
    /// The model must call at least one tool.
    Required,
    /// The model must call this specific tool.
    Specific(String),
}

impl ToolChoice {
    /// Picks a choice for the named set of tools.
    ///
    /// When text is an acceptable answer the model decides. Otherwise a
    /// single tool is forced by name and several tools are required as a
    /// group.
    pub fn for_tools(names: &[&str], allow_text: bool) -> Option<Self> {
        match (names, allow_text) {
            ([], _) => None,
            (_, true) => Some(Self::Auto),
            ([only], false) => Some(Self::Specific((*only).to_owned())),
            (_, false) => Some(Self::Required),
        }
    }
}

/// A tool the model can invoke during generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool's name, matched against [`ToolCall::name`](crate::ToolCall::name).
    pub name: String,
    /// Shown to the model so it knows when to use this tool.
    pub description: String,
    /// JSON Schema describing the tool's arguments.
    pub parameters: JsonSchema,
    /// Whether the schema can be enforced strictly by the provider.
    pub strict: bool,
}

/// A native output constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFormat {
    /// Schema name (`^[a-zA-Z0-9_-]+$`).
    pub name: String,
    /// The schema the output must satisfy.
    pub schema: JsonSchema,
    /// Whether the schema can be enforced strictly by the provider.
    pub strict: bool,
}

/// A JSON Schema document used for output constraints or tool parameters.
///
/// Wraps a [`serde_json::Value`] and provides validation via the
/// [`jsonschema`] crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema(Value);

impl JsonSchema {
    /// Creates a schema from a raw JSON value.
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    /// Returns a reference to the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Derives a JSON Schema from a Rust type that implements
    /// [`schemars::JsonSchema`].
    ///
    /// Requires the `schema` feature (enabled by default).
    #[cfg(feature = "schema")]
    pub fn from_type<T: schemars::JsonSchema>() -> Result<Self, serde_json::Error> {
        let schema = schemars::schema_for!(T);
        let value = serde_json::to_value(schema)?;
        Ok(Self(value))
    }

    /// Validates `value` against this schema.
    ///
    /// Returns [`LlmError::SchemaMismatch`] listing every violation, or
    /// [`LlmError::InvalidRequest`] if the schema itself is malformed.
    pub fn validate(&self, value: &Value) -> Result<(), LlmError> {
        let validator = jsonschema::validator_for(&self.0)
            .map_err(|e| LlmError::InvalidRequest(format!("invalid JSON schema: {e}")))?;
        check(&validator, value)
    }
}

/// Runs a compiled validator, folding every violation into one error.
pub(crate) fn check(validator: &jsonschema::Validator, value: &Value) -> Result<(), LlmError> {
    let mut errors = validator.iter_errors(value).peekable();
    let Some(first) = errors.peek() else {
        return Ok(());
    };
    let path = format!("${}", first.instance_path);
    let message = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
    Err(LlmError::SchemaMismatch {
        message,
        path,
        actual: value.clone(),
    })
}
