//! The normalized chunk stream every provider adapter produces.
//!
//! Whatever a backend's wire framing looks like, its adapter translates
//! it into a [`ChunkStream`] of [`ChunkEvent`]s. Everything downstream
//! (decoding, validation, dispatch) only ever sees this shape.
//!
//! # Ordering
//!
//! Events are ordered. For a given tool-call id the sequence is always
//! `ToolCallStart`, zero or more `ToolCallArgDelta`, then `ToolCallEnd`.
//! Argument deltas for one id are concatenated in arrival order; deltas
//! for different ids may interleave freely.
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use llm_typed::stream::{ChunkEvent, ChunkStream};
//!
//! async fn print_text(mut stream: ChunkStream) {
//!     while let Some(event) = stream.next().await {
//!         match event {
//!             Ok(ChunkEvent::TextDelta(text)) => print!("{text}"),
//!             Ok(ChunkEvent::StreamEnd { finish_reason }) => {
//!                 println!("\n[done: {finish_reason:?}]");
//!             }
//!             Err(e) => eprintln!("stream error: {e}"),
//!             _ => {}
//!         }
//!     }
//! }
//! ```

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::chat::StopReason;
use crate::error::LlmError;
use crate::usage::Usage;

/// A pinned, boxed, `Send` stream of [`ChunkEvent`] results.
///
/// The stream is finite and not restartable. Dropping it cancels the
/// underlying request and releases its connection.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChunkEvent, LlmError>> + Send>>;

/// One normalized unit of a provider's streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ChunkEvent {
    /// A fragment of the model's text output.
    TextDelta(String),
    /// Announces a new tool call.
    ToolCallStart {
        /// Provider-assigned identifier linking start, deltas, and end.
        id: String,
        /// Name of the tool being called.
        name: String,
    },
    /// A raw fragment of a tool call's JSON arguments.
    ToolCallArgDelta {
        /// The tool-call id this fragment belongs to.
        id: String,
        /// The fragment, to be appended to that call's buffer.
        json_chunk: String,
    },
    /// No further argument fragments will arrive for this id.
    ToolCallEnd {
        /// The tool-call id that finished.
        id: String,
    },
    /// Token usage for the request.
    Usage(Usage),
    /// The response is complete.
    StreamEnd {
        /// Why the model stopped generating.
        finish_reason: StopReason,
    },
}
