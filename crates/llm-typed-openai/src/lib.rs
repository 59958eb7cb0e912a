//! `OpenAI` Chat Completions adapter for `llm-typed`.
//!
//! [`OpenAiProvider`] translates a [`ProviderRequest`](llm_typed::ProviderRequest)
//! into a streaming `POST /chat/completions` call and normalizes the SSE
//! response into [`ChunkEvent`](llm_typed::ChunkEvent)s. Typed return
//! values go out as `json_schema` response formats or forced strict tool
//! calls, depending on the call's output mode.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use llm_typed::TypedCall;
//! use llm_typed::schema::{Record, TypeDescriptor};
//! use llm_typed_openai::{OpenAiConfig, OpenAiProvider};
//!
//! # async fn example() -> Result<(), llm_typed::LlmError> {
//! let provider = OpenAiProvider::new(OpenAiConfig {
//!     api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
//!     ..Default::default()
//! });
//!
//! let person = Record::new("Person")
//!     .field("name", TypeDescriptor::string())
//!     .field("age", TypeDescriptor::integer());
//! let outcome = TypedCall::new(person)
//!     .user("Invent a person.")
//!     .run(&provider)
//!     .await?;
//! println!("{}", outcome.value.as_value());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod convert;
mod factory;
mod provider;
mod stream;
mod types;

pub use config::OpenAiConfig;
pub use factory::{OpenAiFactory, register_global};
pub use provider::OpenAiProvider;
