//! SSE stream parser for the `OpenAI` Chat Completions API.
//!
//! Converts a raw `reqwest::Response` byte stream into a [`ChunkStream`].
//! `OpenAI` identifies tool-call fragments by position; the parser maps
//! each position to the id announced in its first fragment so downstream
//! code only ever sees ids. `StreamEnd` is held back until `[DONE]` so
//! the trailing usage chunk is reported before it.

use std::collections::BTreeMap;

use futures::stream::StreamExt;
use llm_typed::chat::StopReason;
use llm_typed::error::LlmError;
use llm_typed::stream::{ChunkEvent, ChunkStream};

use crate::convert::{convert_stop_reason, convert_usage};
use crate::types::StreamChunk;

/// Maximum size for buffers before we abort the stream.
const MAX_BUF: usize = 16 * 1024 * 1024; // 16 MiB

/// Parser state carried across network chunks.
#[derive(Debug, Default)]
struct SseState {
    /// Decoded text not yet split into events.
    buffer: String,
    /// Bytes of an incomplete UTF-8 sequence.
    utf8_buf: Vec<u8>,
    /// Open tool calls, position to id.
    open_calls: BTreeMap<u32, String>,
    finish_reason: Option<StopReason>,
}

/// Convert a reqwest SSE response into a `ChunkStream`.
pub(crate) fn into_stream(response: reqwest::Response) -> ChunkStream {
    let stream = response
        .bytes_stream()
        .scan(SseState::default(), |state, chunk| {
            let result = match chunk {
                Ok(bytes) => Some(state.feed(&bytes)),
                Err(e) => Some(vec![Err(LlmError::Http {
                    status: None,
                    message: format!("Stream read error: {e}"),
                    retryable: true,
                })]),
            };
            async move { result }
        })
        .flat_map(futures::stream::iter);

    Box::pin(stream)
}

impl SseState {
    /// Feeds raw bytes and returns every event they complete.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Result<ChunkEvent, LlmError>> {
        self.utf8_buf.extend_from_slice(bytes);
        if self.utf8_buf.len() > MAX_BUF || self.buffer.len() > MAX_BUF {
            self.utf8_buf.clear();
            self.buffer.clear();
            return vec![Err(LlmError::Provider {
                code: "stream_overflow".into(),
                message: "SSE stream buffer exceeded 16 MiB".into(),
                retryable: false,
            })];
        }
        self.decode_utf8();

        let mut results = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let event_text: String = self.buffer.drain(..pos + 2).collect();
            results.extend(self.parse_event(&event_text));
        }
        results
    }

    /// Moves every complete UTF-8 sequence into the text buffer. A
    /// sequence cut at the end of the input waits for the next chunk;
    /// invalid bytes are dropped.
    fn decode_utf8(&mut self) {
        loop {
            match std::str::from_utf8(&self.utf8_buf) {
                Ok(text) => {
                    push_normalized(&mut self.buffer, text);
                    self.utf8_buf.clear();
                    return;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.utf8_buf[..valid_up_to]) {
                        push_normalized(&mut self.buffer, text);
                    }
                    match e.error_len() {
                        None => {
                            self.utf8_buf.drain(..valid_up_to);
                            return;
                        }
                        Some(invalid) => {
                            self.utf8_buf.drain(..valid_up_to + invalid);
                        }
                    }
                }
            }
        }
    }

    /// Parse a single SSE event into zero or more `ChunkEvent`s.
    fn parse_event(&mut self, event_text: &str) -> Vec<Result<ChunkEvent, LlmError>> {
        let Some(data) = extract_data_line(event_text) else {
            return vec![];
        };

        if data == "[DONE]" {
            let mut events: Vec<_> = self.close_open_calls().into_iter().map(Ok).collect();
            events.push(Ok(ChunkEvent::StreamEnd {
                finish_reason: self.finish_reason.take().unwrap_or_default(),
            }));
            return events;
        }

        let chunk = match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable SSE payload");
                return vec![];
            }
        };

        if let Some(error) = chunk.error {
            return vec![Err(LlmError::Provider {
                code: error.kind.unwrap_or_else(|| "stream_error".into()),
                message: error.message,
                retryable: false,
            })];
        }

        let mut events = Vec::new();

        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(text) = choice.delta.content {
                if !text.is_empty() {
                    events.push(ChunkEvent::TextDelta(text));
                }
            }

            for tc in choice.delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = tc
                    .function
                    .map_or((None, None), |f| (f.name, f.arguments));

                // The first fragment for a position carries the id and name.
                if let Some(id) = tc.id {
                    self.open_calls.insert(tc.index, id.clone());
                    events.push(ChunkEvent::ToolCallStart {
                        id,
                        name: name.unwrap_or_default(),
                    });
                }

                if let Some(json_chunk) = arguments.filter(|a| !a.is_empty()) {
                    match self.open_calls.get(&tc.index) {
                        Some(id) => events.push(ChunkEvent::ToolCallArgDelta {
                            id: id.clone(),
                            json_chunk,
                        }),
                        None => {
                            tracing::warn!(index = tc.index, "Argument fragment for unannounced tool call");
                        }
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                events.extend(self.close_open_calls());
                self.finish_reason = Some(convert_stop_reason(&reason));
            }
        }

        if let Some(usage) = chunk.usage {
            events.push(ChunkEvent::Usage(convert_usage(usage)));
        }

        events.into_iter().map(Ok).collect()
    }

    /// Ends every open tool call, in position order.
    fn close_open_calls(&mut self) -> Vec<ChunkEvent> {
        std::mem::take(&mut self.open_calls)
            .into_values()
            .map(|id| ChunkEvent::ToolCallEnd { id })
            .collect()
    }
}

/// Appends `text`, folding CRLF line endings so events split on `\n\n`.
fn push_normalized(buffer: &mut String, text: &str) {
    if text.contains('\r') {
        buffer.push_str(&text.replace("\r\n", "\n"));
    } else {
        buffer.push_str(text);
    }
}

/// Extract the `data:` payload from an SSE event text block.
fn extract_data_line(event_text: &str) -> Option<&str> {
    event_text.lines().find_map(|line| {
        line.trim_end_matches('\r')
            .strip_prefix("data:")
            .map(str::trim_start)
    })
}
