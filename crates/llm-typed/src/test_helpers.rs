//! Pre-built helpers for testing code that uses `llm-typed`.
//!
//! Available with the `test-utils` feature so downstream crates can
//! reuse them, and always compiled for this crate's own tests. Provides
//! chunk scripts, stream collectors, message shorthands, and a quick
//! [`MockProvider`] factory.

use std::collections::HashSet;

use futures::StreamExt;

use crate::chat::{ChatMessage, StopReason};
use crate::error::LlmError;
use crate::mock::MockProvider;
use crate::provider::{Capability, ProviderMetadata};
use crate::stream::{ChunkEvent, ChunkStream};
use crate::usage::Usage;

/// Returns a [`Usage`] with 100 input / 50 output tokens.
pub fn sample_usage() -> Usage {
    Usage {
        input_tokens: 100,
        output_tokens: 50,
        reasoning_tokens: None,
    }
}

/// A text answer split into `fragments`, followed by [`sample_usage`]
/// and an `EndTurn` stream end.
pub fn json_chunks(fragments: &[&str]) -> Vec<ChunkEvent> {
    let mut events: Vec<ChunkEvent> = fragments
        .iter()
        .map(|f| ChunkEvent::TextDelta((*f).to_owned()))
        .collect();
    events.push(ChunkEvent::Usage(sample_usage()));
    events.push(ChunkEvent::StreamEnd {
        finish_reason: StopReason::EndTurn,
    });
    events
}

/// A single tool call whose arguments arrive as `fragments`, followed by
/// [`sample_usage`] and a `ToolUse` stream end.
pub fn tool_call_chunks(id: &str, name: &str, fragments: &[&str]) -> Vec<ChunkEvent> {
    let mut events = vec![ChunkEvent::ToolCallStart {
        id: id.into(),
        name: name.into(),
    }];
    events.extend(fragments.iter().map(|f| ChunkEvent::ToolCallArgDelta {
        id: id.into(),
        json_chunk: (*f).to_owned(),
    }));
    events.push(ChunkEvent::ToolCallEnd { id: id.into() });
    events.push(ChunkEvent::Usage(sample_usage()));
    events.push(ChunkEvent::StreamEnd {
        finish_reason: StopReason::ToolUse,
    });
    events
}

/// Shorthand for [`ChatMessage::user`].
pub fn user_msg(text: &str) -> ChatMessage {
    ChatMessage::user(text)
}

/// Shorthand for [`ChatMessage::assistant`].
pub fn assistant_msg(text: &str) -> ChatMessage {
    ChatMessage::assistant(text)
}

/// Shorthand for [`ChatMessage::system`].
pub fn system_msg(text: &str) -> ChatMessage {
    ChatMessage::system(text)
}

/// Shorthand for [`ChatMessage::tool_result`].
pub fn tool_result_msg(tool_call_id: &str, content: &str) -> ChatMessage {
    ChatMessage::tool_result(tool_call_id, content)
}

/// Collects stream items, errors included.
pub async fn collect_stream_results(stream: ChunkStream) -> Vec<Result<ChunkEvent, LlmError>> {
    stream.collect::<Vec<_>>().await
}

/// Collects stream items, panicking on any error.
/// Use [`collect_stream_results`] when testing error scenarios.
pub async fn collect_stream(stream: ChunkStream) -> Vec<ChunkEvent> {
    stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|r| r.expect("stream event should be Ok"))
        .collect()
}

/// Creates a [`MockProvider`] advertising tools, structured output, and
/// native unions.
pub fn mock_for(provider_name: &str, model: &str) -> MockProvider {
    mock_with(
        provider_name,
        model,
        &[
            Capability::Tools,
            Capability::StructuredOutput,
            Capability::NativeUnions,
        ],
    )
}

/// Creates a [`MockProvider`] with exactly `capabilities`.
pub fn mock_with(provider_name: &str, model: &str, capabilities: &[Capability]) -> MockProvider {
    MockProvider::new(ProviderMetadata {
        name: provider_name.to_owned().into(),
        model: model.into(),
        capabilities: capabilities.iter().copied().collect::<HashSet<_>>(),
    })
}
