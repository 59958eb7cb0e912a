//! Reassembling interleaved tool-call streams.
//!
//! A provider may stream several tool calls at once, with argument
//! fragments for different ids interleaved. [`ToolCallAssembler`] keeps
//! one decoder per id, so each call's arguments are decoded exactly as
//! if its fragments had arrived alone.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use super::decoder::StructuredDecoder;
use super::value::{CompleteValue, PartialValue};
use crate::error::LlmError;
use crate::schema::CompiledSchema;
use crate::stream::ChunkEvent;

/// A tool call whose argument stream has ended.
#[derive(Debug)]
pub struct AssembledCall {
    /// Position of the call's `ToolCallStart` among all calls.
    pub index: usize,
    /// Provider-assigned call id.
    pub id: String,
    /// Name of the tool the model called.
    pub name: String,
    /// The concatenated argument text.
    pub raw_arguments: String,
    /// The decoded arguments, or why they could not be decoded.
    pub arguments: Result<CompleteValue, LlmError>,
}

/// Progress reported while assembling.
#[derive(Debug)]
#[non_exhaustive]
pub enum ToolCallUpdate {
    /// A new call was announced.
    Started {
        /// Position among all calls.
        index: usize,
        /// Provider-assigned call id.
        id: String,
        /// Name of the tool.
        name: String,
    },
    /// A call's arguments snapshot changed.
    Partial {
        /// Provider-assigned call id.
        id: String,
        /// The new snapshot.
        value: PartialValue,
    },
    /// A call's argument stream ended.
    Finished(AssembledCall),
}

#[derive(Debug)]
struct CallState {
    index: usize,
    name: String,
    decoder: Option<StructuredDecoder>,
    raw: String,
    error: Option<LlmError>,
    finished: bool,
}

/// Demultiplexes tool-call events into per-call decoders.
///
/// Failures are isolated per call: a malformed fragment for one id marks
/// only that call as failed.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    schemas: HashMap<String, Arc<CompiledSchema>>,
    calls: IndexMap<String, CallState>,
}

impl ToolCallAssembler {
    /// Creates an assembler that knows no tools.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the argument schema for a tool name.
    #[must_use]
    pub fn with_schema(mut self, name: impl Into<String>, schema: Arc<CompiledSchema>) -> Self {
        self.schemas.insert(name.into(), schema);
        self
    }

    /// Feeds one chunk event. Events that are not about tool calls are
    /// ignored.
    pub fn apply(&mut self, event: &ChunkEvent) -> Option<ToolCallUpdate> {
        match event {
            ChunkEvent::ToolCallStart { id, name } => {
                let index = self.start(id, name);
                Some(ToolCallUpdate::Started {
                    index,
                    id: id.clone(),
                    name: name.clone(),
                })
            }
            ChunkEvent::ToolCallArgDelta { id, json_chunk } => self.delta(id, json_chunk),
            ChunkEvent::ToolCallEnd { id } => self.end(id).map(ToolCallUpdate::Finished),
            _ => None,
        }
    }

    /// Number of calls seen so far.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Returns `true` if no call has started.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Finishes every call still open, in start order.
    ///
    /// Used when the stream ends without `ToolCallEnd` for some ids.
    pub fn finish_open(&mut self) -> Vec<AssembledCall> {
        let open: Vec<String> = self
            .calls
            .iter()
            .filter(|(_, c)| !c.finished)
            .map(|(id, _)| id.clone())
            .collect();
        open.into_iter().filter_map(|id| self.end(&id)).collect()
    }

    fn start(&mut self, id: &str, name: &str) -> usize {
        let index = self.calls.len();
        let state = self
            .calls
            .entry(id.to_owned())
            .or_insert_with(|| CallState {
                index,
                name: String::new(),
                decoder: None,
                raw: String::new(),
                error: None,
                finished: false,
            });
        if !name.is_empty() {
            state.name = name.to_owned();
        }
        if state.decoder.is_none() {
            if let Some(schema) = self.schemas.get(&state.name) {
                // Fragments that arrived before the name was known are replayed.
                let mut decoder = StructuredDecoder::new(Arc::clone(schema));
                if !state.raw.is_empty() && state.error.is_none() {
                    if let Err(e) = decoder.push(&state.raw) {
                        state.error = Some(e);
                    }
                }
                state.decoder = Some(decoder);
            }
        }
        state.index
    }

    fn delta(&mut self, id: &str, fragment: &str) -> Option<ToolCallUpdate> {
        if !self.calls.contains_key(id) {
            self.start(id, "");
        }
        let state = self.calls.get_mut(id)?;
        state.raw.push_str(fragment);
        if state.error.is_some() || state.finished {
            return None;
        }
        let decoder = state.decoder.as_mut()?;
        match decoder.push(fragment) {
            Ok(Some(value)) => Some(ToolCallUpdate::Partial {
                id: id.to_owned(),
                value,
            }),
            Ok(None) => None,
            Err(e) => {
                state.error = Some(e);
                None
            }
        }
    }

    fn end(&mut self, id: &str) -> Option<AssembledCall> {
        let state = self.calls.get_mut(id)?;
        if state.finished {
            return None;
        }
        state.finished = true;

        let arguments = match (state.error.take(), state.decoder.as_mut()) {
            (Some(e), _) => Err(e),
            (None, None) => Err(LlmError::UnknownTool {
                name: state.name.clone(),
                call_id: id.to_owned(),
            }),
            (None, Some(decoder)) => {
                // Argument-less calls often arrive with no text at all.
                if state.raw.trim().is_empty() {
                    decoder.push("{}").and_then(|_| decoder.finish())
                } else {
                    decoder.finish()
                }
            }
        };

        Some(AssembledCall {
            index: state.index,
            id: id.to_owned(),
            name: state.name.clone(),
            raw_arguments: state.raw.clone(),
            arguments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CompileOptions, DescriptorRegistry, Record, TypeDescriptor, compile};
    use serde_json::json;

    fn assembler() -> ToolCallAssembler {
        let weather: TypeDescriptor = Record::new("Weather")
            .field("city", TypeDescriptor::string())
            .into();
        let schema = compile(&weather, &DescriptorRegistry::new(), CompileOptions::default())
            .unwrap();
        ToolCallAssembler::new().with_schema("weather", Arc::new(schema))
    }

    fn start(id: &str, name: &str) -> ChunkEvent {
        ChunkEvent::ToolCallStart {
            id: id.into(),
            name: name.into(),
        }
    }

    fn delta(id: &str, chunk: &str) -> ChunkEvent {
        ChunkEvent::ToolCallArgDelta {
            id: id.into(),
            json_chunk: chunk.into(),
        }
    }

    fn end(id: &str) -> ChunkEvent {
        ChunkEvent::ToolCallEnd { id: id.into() }
    }

    fn finished(update: Option<ToolCallUpdate>) -> AssembledCall {
        match update {
            Some(ToolCallUpdate::Finished(call)) => call,
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    #[test]
    fn test_interleaved_calls_decode_independently() {
        let mut a = assembler();
        a.apply(&start("1", "weather"));
        a.apply(&start("2", "weather"));
        a.apply(&delta("1", r#"{"city":"Pa"#));
        a.apply(&delta("2", r#"{"city":"Ro"#));
        a.apply(&delta("2", r#"me"}"#));
        a.apply(&delta("1", r#"ris"}"#));

        let second = finished(a.apply(&end("2")));
        let first = finished(a.apply(&end("1")));
        assert_eq!(first.index, 0);
        assert_eq!(second.index, 1);
        assert_eq!(first.arguments.unwrap().into_value(), json!({"city": "Paris"}));
        assert_eq!(second.arguments.unwrap().into_value(), json!({"city": "Rome"}));
    }

    #[test]
    fn test_partial_updates_emitted() {
        let mut a = assembler();
        a.apply(&start("1", "weather"));
        let update = a.apply(&delta("1", r#"{"city":"Oslo""#));
        let Some(ToolCallUpdate::Partial { value, .. }) = update else {
            panic!("expected partial update");
        };
        assert_eq!(value.get("city"), Some(&PartialValue::String("Oslo".into())));
    }

    #[test]
    fn test_malformed_call_is_isolated() {
        let mut a = assembler();
        a.apply(&start("1", "weather"));
        a.apply(&start("2", "weather"));
        a.apply(&delta("1", r#"{"city" 1"#));
        a.apply(&delta("2", r#"{"city":"Lima"}"#));
        let bad = finished(a.apply(&end("1")));
        let good = finished(a.apply(&end("2")));
        assert!(matches!(bad.arguments, Err(LlmError::MalformedOutput { .. })));
        assert_eq!(bad.raw_arguments, r#"{"city" 1"#);
        assert!(good.arguments.is_ok());
    }

    #[test]
    fn test_unknown_tool() {
        let mut a = assembler();
        a.apply(&start("9", "teleport"));
        a.apply(&delta("9", "{}"));
        let call = finished(a.apply(&end("9")));
        assert!(matches!(
            call.arguments,
            Err(LlmError::UnknownTool { ref name, ref call_id }) if name == "teleport" && call_id == "9"
        ));
    }

    #[test]
    fn test_finish_open_calls() {
        let mut a = assembler();
        a.apply(&start("1", "weather"));
        a.apply(&delta("1", r#"{"city":"Kyiv"}"#));
        let open = a.finish_open();
        assert_eq!(open.len(), 1);
        assert!(open[0].arguments.is_ok());
        assert!(a.apply(&end("1")).is_none());
    }

    #[test]
    fn test_arguments_before_start_are_kept() {
        let mut a = assembler();
        a.apply(&delta("1", r#"{"city":"#));
        a.apply(&start("1", "weather"));
        a.apply(&delta("1", r#""Oslo"}"#));
        let call = finished(a.apply(&end("1")));
        assert_eq!(call.name, "weather");
        assert_eq!(call.raw_arguments, r#"{"city":"Oslo"}"#);
        assert_eq!(call.arguments.unwrap().into_value(), json!({"city": "Oslo"}));
    }

    #[test]
    fn test_repeated_start_keeps_buffered_arguments() {
        let mut a = assembler();
        a.apply(&start("1", "weather"));
        a.apply(&delta("1", r#"{"city":"Be"#));
        a.apply(&start("1", "weather"));
        a.apply(&delta("1", r#"rn"}"#));
        a.apply(&start("2", "weather"));
        let call = finished(a.apply(&end("1")));
        assert_eq!(call.index, 0);
        assert_eq!(call.arguments.unwrap().into_value(), json!({"city": "Bern"}));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_empty_arguments_treated_as_empty_object() {
        let schema = compile(
            &Record::new("Now").into(),
            &DescriptorRegistry::new(),
            CompileOptions::default(),
        )
        .unwrap();
        let mut a = ToolCallAssembler::new().with_schema("now", Arc::new(schema));
        a.apply(&start("1", "now"));
        let call = finished(a.apply(&end("1")));
        assert_eq!(call.arguments.unwrap().into_value(), json!({}));
    }
}
