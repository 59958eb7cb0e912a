//! Typed calls and their retry controller.
//!
//! [`TypedCall`] runs the whole pipeline for one declared return type:
//! it compiles the schema, assembles each attempt's request, decodes the
//! streamed answer, and re-asks the model with corrective feedback when
//! the answer does not validate.
//!
//! Retries are never silent. Every failed attempt is reported as a
//! [`CallEvent::AttemptFailed`] while streaming, kept in
//! [`CallOutcome::history`] on success, and carried by
//! [`LlmError::ValidationExhausted`](crate::LlmError::ValidationExhausted)
//! when the budget runs out.

mod config;
mod context;
pub(crate) mod controller;

pub use config::{CallConfig, ModelParams, OutputMode};
pub use context::{AttemptFailure, RawOutput, RetryContext};
pub use controller::{CallEvent, CallOutcome, CallStream, TypedCall};
