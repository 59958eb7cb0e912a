//! # llm-typed
//!
//! Typed prompt functions for large language models.
//!
//! A typed call declares a return type as a [`TypeDescriptor`]. The crate
//! compiles it into a JSON Schema the provider can enforce, assembles the
//! request, decodes the streamed answer into progressively more complete
//! partial values, validates the final value, and re-asks the model with
//! corrective feedback when it does not conform. Tool calls get the same
//! treatment: their arguments are decoded and validated per call before
//! the registered handler runs.
//!
//! Concrete providers live in sibling crates and implement [`Provider`]
//! (or its object-safe counterpart [`DynProvider`]).
//!
//! # Architecture
//!
//! ```text
//!  TypeDescriptor ──► schema ──► prompt ──► Provider ──► decode ──► call
//!                     (compile)  (assemble)  (stream)   (partial)  (validate, retry)
//!                                                           │
//!                                                           └──► tool (dispatch, loop)
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use llm_typed::call::TypedCall;
//! use llm_typed::schema::{Record, TypeDescriptor};
//! use llm_typed::DynProvider;
//!
//! # async fn example(provider: &dyn DynProvider) -> Result<(), llm_typed::LlmError> {
//! let person = Record::new("Person")
//!     .field("name", TypeDescriptor::string())
//!     .field("age", TypeDescriptor::integer());
//!
//! let outcome = TypedCall::new(person)
//!     .user("Invent a person.")
//!     .run(provider)
//!     .await?;
//! assert!(outcome.value.as_value()["name"].is_string());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`schema`] | Type descriptors, the schema compiler, and its cache |
//! | [`prompt`] | Templates and per-attempt request assembly |
//! | [`provider`] | The [`Provider`] trait, request, and capabilities |
//! | [`stream`] | Normalized [`ChunkEvent`]s and the [`ChunkStream`] alias |
//! | [`decode`] | Streaming partial-JSON decoding and tool-call reassembly |
//! | [`call`] | [`TypedCall`] and its validate-and-retry controller |
//! | [`tool`] | Tool handlers, registry, dispatcher, and multi-round loop |
//! | [`transport`] | Backoff retries of transient transport failures |
//! | [`registry`] | Dynamic provider instantiation from configuration |
//! | [`error`] | Unified [`LlmError`] |

#![warn(missing_docs)]

pub mod call;
pub mod chat;
pub mod decode;
pub mod error;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod stream;
pub mod tool;
pub mod transport;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

// ── Core re-exports ────────────────────────────────────────────────
//
// Only the types that appear in nearly every program are re-exported
// at the crate root. Everything else lives in its submodule:
//
//   llm_typed::schema::*     - Record, Scalar, compile, SchemaCache
//   llm_typed::decode::*     - StructuredDecoder, ToolCallAssembler
//   llm_typed::call::*       - CallConfig, OutputMode, RetryContext
//   llm_typed::tool::*       - tool_fn, Dispatcher, run_tool_loop
//   llm_typed::transport::*  - Retrying, TransportRetryConfig
//   llm_typed::registry::*   - ProviderConfig, ProviderFactory
//   llm_typed::mock::*       - MockProvider (test-utils feature)

pub use call::{CallConfig, CallEvent, CallOutcome, TypedCall};
pub use chat::{ChatMessage, ChatRole, ContentBlock, StopReason, ToolCall, ToolResult};
pub use decode::{CompleteValue, PartialValue};
pub use error::LlmError;
pub use provider::{
    Capability, DynProvider, JsonSchema, Provider, ProviderMetadata, ProviderRequest,
    ResponseFormat, ToolChoice, ToolDefinition,
};
pub use registry::ProviderRegistry;
pub use schema::TypeDescriptor;
pub use stream::{ChunkEvent, ChunkStream};
pub use tool::{ToolHandler, ToolLoopConfig, ToolRegistry};
pub use usage::Usage;
