//! Streaming structured decoding.
//!
//! [`StructuredDecoder`] turns a stream of JSON text fragments into
//! progressively more complete [`PartialValue`] snapshots, then a final
//! [`CompleteValue`]. [`ToolCallAssembler`] does the same for several
//! interleaved tool-call argument streams.

mod decoder;
mod partial;
mod tool_calls;
mod value;
mod walk;

pub use decoder::StructuredDecoder;
pub use tool_calls::{AssembledCall, ToolCallAssembler, ToolCallUpdate};
pub use value::{CompleteValue, PartialValue};
