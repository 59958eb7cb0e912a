//! Live tests against the `OpenAI` API.
//!
//! These tests require a valid `OPENAI_API_KEY` environment variable.
//! They are skipped (not failed) when the key is not present.
//!
//! ```sh
//! OPENAI_API_KEY=sk-... cargo test -p llm-typed-openai --test integration
//! ```

use futures::StreamExt;
use llm_typed::call::{CallConfig, OutputMode};
use llm_typed::decode::CompleteValue;
use llm_typed::schema::{Record, TypeDescriptor};
use llm_typed::tool::{ToolError, ToolLoopConfig, ToolRegistry, ToolSpec, run_tool_loop, tool_fn};
use llm_typed::{CallEvent, ChatMessage, ChunkEvent, Provider, ProviderRequest, TypedCall};
use llm_typed_openai::{OpenAiConfig, OpenAiProvider};

/// Returns `None` (and the test is skipped) if no API key is set.
fn test_provider() -> Option<OpenAiProvider> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    if api_key.is_empty() {
        return None;
    }
    Some(OpenAiProvider::new(OpenAiConfig {
        api_key,
        model: "gpt-4o-mini".into(),
        ..Default::default()
    }))
}

macro_rules! skip_without_key {
    () => {
        match test_provider() {
            Some(p) => p,
            None => {
                eprintln!("OPENAI_API_KEY not set, skipping integration test");
                return;
            }
        }
    };
}

fn city() -> Record {
    Record::new("City")
        .field("name", TypeDescriptor::string())
        .field("country", TypeDescriptor::string())
        .field("population", TypeDescriptor::integer().minimum(0.0))
}

#[tokio::test]
async fn test_raw_stream_ends_with_usage_and_stop() {
    let provider = skip_without_key!();

    let request = ProviderRequest {
        messages: vec![ChatMessage::user("What is 2+2? Reply with just the number.")],
        max_tokens: Some(16),
        ..Default::default()
    };
    let events: Vec<ChunkEvent> = provider
        .stream(&request)
        .await
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;

    let text: String = events
        .iter()
        .filter_map(|e| match e {
            ChunkEvent::TextDelta(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert!(text.contains('4'), "Expected '4' in response: {text}");
    assert!(events.iter().any(|e| matches!(e, ChunkEvent::Usage(u) if u.input_tokens > 0)));
    assert!(matches!(events.last(), Some(ChunkEvent::StreamEnd { .. })));
}

#[tokio::test]
async fn test_typed_call_json_mode() {
    let provider = skip_without_key!();

    let outcome = TypedCall::new(city())
        .user("Describe the capital of Japan.")
        .with_config(CallConfig {
            mode: OutputMode::Json,
            ..Default::default()
        })
        .run(&provider)
        .await
        .unwrap();
    assert_eq!(outcome.value.as_value()["country"], "Japan");
    assert!(outcome.usage.input_tokens > 0);
}

#[tokio::test]
async fn test_typed_call_tool_mode_streams_partials() {
    let provider = skip_without_key!();

    let events: Vec<CallEvent> = TypedCall::new(city())
        .user("Describe the capital of France.")
        .with_config(CallConfig {
            mode: OutputMode::Tool,
            ..Default::default()
        })
        .stream(&provider)
        .map(Result::unwrap)
        .collect()
        .await;

    assert!(events.iter().any(|e| matches!(e, CallEvent::Partial { .. })));
    let Some(CallEvent::Complete(outcome)) = events.last() else {
        panic!("last event should be Complete");
    };
    assert_eq!(outcome.value.as_value()["name"], "Paris");
}

#[tokio::test]
async fn test_tool_loop_round_trip() {
    let provider = skip_without_key!();

    let mut registry = ToolRegistry::new();
    registry.register(tool_fn(
        ToolSpec::new(
            "get_weather",
            "Current weather for a city",
            Record::new("WeatherArgs").field("city", TypeDescriptor::string()),
        ),
        |args: CompleteValue| async move {
            let city = args.as_value()["city"].as_str().unwrap_or_default().to_owned();
            Ok::<_, ToolError>(format!("{city}: 21°C, clear"))
        },
    ));

    let result = run_tool_loop(
        &provider,
        &registry,
        vec![ChatMessage::user(
            "What's the weather in Lisbon? Use the tool, then answer in one sentence.",
        )],
        &ToolLoopConfig::default(),
        &(),
    )
    .await
    .unwrap();

    assert!(result.iterations >= 2);
    assert!(result.text.contains("21"), "{}", result.text);
}
