//! The typed call: compile, assemble, stream, decode, validate, retry.
//!
//! A [`TypedCall`] is an explicit bounded loop. Each attempt assembles a
//! fresh request from the caller's messages plus the [`RetryContext`] of
//! earlier failures, streams the response through a decoder, and either
//! finishes with a value or records why it failed. Correctable failures
//! start the next attempt; anything else ends the call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use super::config::{CallConfig, OutputMode};
use super::context::{AttemptFailure, RawOutput, RetryContext};
use crate::chat::{ChatMessage, StopReason};
use crate::decode::{
    AssembledCall, CompleteValue, PartialValue, StructuredDecoder, ToolCallAssembler,
    ToolCallUpdate,
};
use crate::error::LlmError;
use crate::prompt::{OutputSpec, PromptTemplate, assemble};
use crate::provider::{Capability, DynProvider, ProviderMetadata, ProviderRequest};
use crate::schema::{
    CompileOptions, CompiledSchema, DescriptorRegistry, SchemaCache, TypeDescriptor,
};
use crate::stream::ChunkEvent;
use crate::usage::Usage;

/// A pinned, boxed stream of [`CallEvent`]s borrowing the call and the
/// provider.
pub type CallStream<'a> = Pin<Box<dyn Stream<Item = Result<CallEvent, LlmError>> + Send + 'a>>;

/// Progress of a typed call.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CallEvent {
    /// The visible value changed. Only emitted when
    /// [`CallConfig::streaming`] is set.
    Partial {
        /// The attempt the snapshot belongs to.
        attempt: u32,
        /// The snapshot.
        value: PartialValue,
    },
    /// An attempt produced output that failed validation. The next
    /// attempt starts right after this event.
    AttemptFailed(AttemptFailure),
    /// The call succeeded. Always the last event.
    Complete(CallOutcome),
}

/// The result of a successful typed call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// The validated value.
    pub value: CompleteValue,
    /// Number of requests sent, including the successful one.
    pub attempts: u32,
    /// The failed attempts that preceded success.
    pub history: RetryContext,
    /// Token usage summed over every attempt.
    pub usage: Usage,
    /// Why the model stopped on the successful attempt.
    pub finish_reason: StopReason,
    /// What the model produced on the successful attempt.
    pub raw: RawOutput,
}

impl CallOutcome {
    /// Deserializes the value into a Rust type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, LlmError> {
        self.value.deserialize()
    }
}

// ── TypedCall ───────────────────────────────────────────────────────

/// A function whose body is delegated to a model.
///
/// The declared return type is a [`TypeDescriptor`]; the value that comes
/// back always conforms to it.
///
/// ```rust,no_run
/// use llm_typed::call::TypedCall;
/// use llm_typed::schema::{Record, TypeDescriptor};
/// use llm_typed::DynProvider;
///
/// # async fn demo(provider: &dyn DynProvider) -> Result<(), llm_typed::LlmError> {
/// let person = Record::new("Person")
///     .field("name", TypeDescriptor::string())
///     .field("age", TypeDescriptor::integer());
///
/// let outcome = TypedCall::new(person)
///     .user("Invent a person.")
///     .run(provider)
///     .await?;
/// println!("{}", outcome.value.as_value());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TypedCall {
    descriptor: TypeDescriptor,
    registry: DescriptorRegistry,
    messages: Vec<ChatMessage>,
    config: CallConfig,
}

impl TypedCall {
    /// A call returning `descriptor`, with no messages yet.
    pub fn new(descriptor: impl Into<TypeDescriptor>) -> Self {
        Self {
            descriptor: descriptor.into(),
            registry: DescriptorRegistry::new(),
            messages: Vec::new(),
            config: CallConfig::default(),
        }
    }

    /// A call returning the shape of a `schemars` type.
    #[cfg(feature = "schema")]
    pub fn for_type<T: schemars::JsonSchema>() -> Result<Self, LlmError> {
        let (descriptor, registry) = crate::schema::descriptor_for::<T>()?;
        Ok(Self::new(descriptor).with_registry(registry))
    }

    /// A call whose single user message is `template` rendered with
    /// `args`.
    pub fn from_template<K, V>(
        descriptor: impl Into<TypeDescriptor>,
        template: &PromptTemplate,
        args: &[(K, V)],
    ) -> Result<Self, LlmError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Ok(Self::new(descriptor).user(template.render(args)?))
    }

    /// Resolves named references through `registry`.
    #[must_use]
    pub fn with_registry(mut self, registry: DescriptorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    /// Appends messages to the conversation.
    #[must_use]
    pub fn with_messages(mut self, messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        self.messages.extend(messages);
        self
    }

    /// Appends a system message.
    #[must_use]
    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::system(text));
        self
    }

    /// Appends a user message.
    #[must_use]
    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::user(text));
        self
    }

    /// The declared return type.
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// The conversation prefix every attempt starts from.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The call configuration.
    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Compiles the return type for a provider and picks the output mode.
    ///
    /// # Errors
    ///
    /// [`LlmError::UnsupportedType`] if the descriptor cannot be
    /// represented.
    pub fn prepare(
        &self,
        metadata: &ProviderMetadata,
    ) -> Result<(Arc<CompiledSchema>, OutputSpec), LlmError> {
        let (mode, forced_fallback) = self.config.mode.resolve(metadata);
        let native_unions = self
            .config
            .native_unions
            .unwrap_or_else(|| metadata.capabilities.contains(&Capability::NativeUnions));
        let schema = SchemaCache::global().get_or_compile(
            &self.descriptor,
            &self.registry,
            CompileOptions { native_unions },
        )?;
        let output = OutputSpec {
            schema: schema.spec().clone(),
            mode,
            system_prompt_fallback: forced_fallback || self.config.system_prompt_fallback,
        };
        Ok((schema, output))
    }

    /// Runs the call to completion and returns the validated value.
    ///
    /// # Errors
    ///
    /// - [`LlmError::UnsupportedType`] before any request is sent
    /// - [`LlmError::ValidationExhausted`] when every attempt failed
    ///   validation; its history has `max_retries + 1` entries
    /// - [`LlmError::Timeout`] or [`LlmError::Cancelled`]
    /// - transport errors, unchanged
    #[instrument(skip_all, fields(max_retries = self.config.max_retries))]
    pub async fn run(&self, provider: &dyn DynProvider) -> Result<CallOutcome, LlmError> {
        let mut events = self.stream(provider);
        while let Some(event) = events.next().await {
            if let CallEvent::Complete(outcome) = event? {
                return Ok(outcome);
            }
        }
        Err(LlmError::Provider {
            code: "incomplete".into(),
            message: "typed call ended without producing a value".into(),
            retryable: false,
        })
    }

    /// Runs the call, reporting partial snapshots and failed attempts as
    /// they happen.
    ///
    /// The stream ends after [`CallEvent::Complete`] or after the first
    /// `Err`. Dropping it cancels the in-flight request.
    pub fn stream<'a>(&'a self, provider: &'a dyn DynProvider) -> CallStream<'a> {
        Box::pin(try_stream! {
            let started = Instant::now();
            let deadline = self.config.timeout.map(|t| started + t);
            let cancel = self.config.cancel.as_ref();
            let metadata = provider.metadata();
            let (schema, output) = self.prepare(&metadata)?;
            let span = info_span!(
                "typed_call",
                schema = %output.schema.name,
                provider = %metadata.name,
                mode = ?output.mode,
            );

            let max_attempts = self.config.max_retries.saturating_add(1);
            let mut history = RetryContext::new();
            let mut usage = Usage::default();

            for number in 1..=max_attempts {
                let mut request =
                    assemble(&self.messages, &output, (!history.is_empty()).then_some(&history));
                self.apply_params(&mut request);
                let attempt_deadline = earliest(
                    deadline,
                    self.config.request_timeout.map(|t| Instant::now() + t),
                );
                span.in_scope(|| debug!(attempt = number, "starting attempt"));

                let open = provider.stream_boxed(&request).instrument(span.clone());
                let mut chunks = guarded(open, attempt_deadline, cancel, started).await??;
                let mut attempt = Attempt::new(&schema, output.mode);
                let mut early = None;

                while let Some(event) =
                    guarded(chunks.next(), attempt_deadline, cancel, started).await?
                {
                    match attempt.apply(event?) {
                        Ok(Some(value)) => {
                            if self.config.streaming {
                                yield CallEvent::Partial { attempt: number, value };
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            early = Some(e);
                            break;
                        }
                    }
                }
                drop(chunks);

                usage += &attempt.usage;
                let finish_reason = attempt.finish_reason.clone();
                let (raw, result) = attempt.conclude(early);
                match result {
                    Ok(value) => {
                        span.in_scope(|| info!(attempts = number, "typed call complete"));
                        yield CallEvent::Complete(CallOutcome {
                            value,
                            attempts: number,
                            history,
                            usage,
                            finish_reason,
                            raw,
                        });
                        return;
                    }
                    Err(e) if e.is_correctable() => {
                        span.in_scope(|| warn!(attempt = number, error = %e, "attempt failed validation"));
                        let failure = AttemptFailure {
                            attempt: number,
                            output: raw,
                            error: e.to_string(),
                        };
                        history.push(failure.clone());
                        yield CallEvent::AttemptFailed(failure);
                    }
                    Err(e) => Err(e)?,
                }
            }

            span.in_scope(|| warn!(attempts = max_attempts, "validation budget exhausted"));
            Err::<(), _>(LlmError::ValidationExhausted {
                attempts: max_attempts,
                history,
            })?;
        })
    }

    fn apply_params(&self, request: &mut ProviderRequest) {
        let params = &self.config.params;
        request.temperature = params.temperature;
        request.max_tokens = params.max_tokens;
        request.stop.clone_from(&params.stop);
        request.timeout = self.config.request_timeout;
    }
}

// ── Attempt ─────────────────────────────────────────────────────────

/// Where an attempt's output is decoded.
enum Sink {
    Json(StructuredDecoder),
    Tool {
        name: String,
        assembler: ToolCallAssembler,
        first: Option<String>,
        call: Option<AssembledCall>,
    },
}

/// Decode state of one attempt. Discarded when the attempt ends.
struct Attempt {
    sink: Sink,
    text: String,
    usage: Usage,
    finish_reason: StopReason,
}

impl Attempt {
    fn new(schema: &Arc<CompiledSchema>, mode: OutputMode) -> Self {
        let sink = match mode {
            OutputMode::Tool => {
                let name = schema.spec().name.clone();
                Sink::Tool {
                    assembler: ToolCallAssembler::new().with_schema(name.clone(), Arc::clone(schema)),
                    name,
                    first: None,
                    call: None,
                }
            }
            OutputMode::Json | OutputMode::Auto => {
                Sink::Json(StructuredDecoder::new(Arc::clone(schema)))
            }
        };
        Self {
            sink,
            text: String::new(),
            usage: Usage::default(),
            finish_reason: StopReason::default(),
        }
    }

    /// Applies one event. An error ends the attempt early.
    fn apply(&mut self, event: ChunkEvent) -> Result<Option<PartialValue>, LlmError> {
        match event {
            ChunkEvent::Usage(usage) => {
                self.usage += usage;
                return Ok(None);
            }
            ChunkEvent::StreamEnd { finish_reason } => {
                self.finish_reason = finish_reason;
                return Ok(None);
            }
            _ => {}
        }

        match &mut self.sink {
            Sink::Json(decoder) => match event {
                ChunkEvent::TextDelta(text) => decoder.push(&text),
                ChunkEvent::ToolCallStart { name, .. } => Err(LlmError::OutputNotAllowed {
                    expected: "a JSON object".into(),
                    received: format!("a call to `{name}`"),
                }),
                _ => Ok(None),
            },
            Sink::Tool {
                assembler,
                first,
                call,
                ..
            } => {
                if let ChunkEvent::TextDelta(text) = &event {
                    self.text.push_str(text);
                    return Ok(None);
                }
                // Only the first call carries the value; later ones are
                // reported with it if it fails.
                match assembler.apply(&event) {
                    Some(ToolCallUpdate::Started { id, .. }) if first.is_none() => {
                        *first = Some(id);
                        Ok(None)
                    }
                    Some(ToolCallUpdate::Partial { id, value })
                        if first.as_deref() == Some(id.as_str()) =>
                    {
                        Ok(Some(value))
                    }
                    Some(ToolCallUpdate::Finished(done))
                        if first.as_deref() == Some(done.id.as_str()) =>
                    {
                        *call = Some(done);
                        Ok(None)
                    }
                    _ => Ok(None),
                }
            }
        }
    }

    /// Finalizes the attempt, returning what the model produced and the
    /// validated value or the reason it was rejected.
    fn conclude(self, early: Option<LlmError>) -> (RawOutput, Result<CompleteValue, LlmError>) {
        match self.sink {
            Sink::Json(mut decoder) => {
                let result = match early {
                    Some(e) => Err(e),
                    None => decoder.finish(),
                };
                let raw = RawOutput::Text {
                    text: decoder.buffer().to_owned(),
                };
                (raw, result)
            }
            Sink::Tool {
                name,
                mut assembler,
                call,
                ..
            } => {
                let call = call.or_else(|| assembler.finish_open().into_iter().next());
                match call {
                    Some(call) => {
                        let raw = RawOutput::ToolCall {
                            id: call.id,
                            name: call.name,
                            arguments: call.raw_arguments,
                        };
                        (raw, early.map_or(call.arguments, Err))
                    }
                    None => {
                        let received = if self.text.trim().is_empty() {
                            "no output"
                        } else {
                            "plain text"
                        };
                        let error = early.unwrap_or_else(|| LlmError::OutputNotAllowed {
                            expected: format!("a call to `{name}`"),
                            received: received.into(),
                        });
                        (RawOutput::Text { text: self.text }, Err(error))
                    }
                }
            }
        }
    }
}

// ── Deadlines and cancellation ──────────────────────────────────────

pub(crate) fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Awaits `future` unless the deadline passes or the token fires first.
pub(crate) async fn guarded<F: Future>(
    future: F,
    deadline: Option<Instant>,
    cancel: Option<&CancellationToken>,
    started: Instant,
) -> Result<F::Output, LlmError> {
    let timed = async {
        match deadline {
            Some(at) => tokio::time::timeout_at(at, future)
                .await
                .map_err(|_| LlmError::Timeout {
                    elapsed_ms: elapsed_ms(started),
                }),
            None => Ok(future.await),
        }
    };
    match cancel {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => Err(LlmError::Cancelled),
            result = timed => result,
        },
        None => timed.await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::call::ModelParams;
    use crate::mock::MockError;
    use crate::schema::Record;
    use crate::test_helpers::{json_chunks, mock_for, tool_call_chunks};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn person() -> TypeDescriptor {
        Record::new("Person")
            .field("name", TypeDescriptor::string())
            .field("age", TypeDescriptor::integer())
            .into()
    }

    fn json_call() -> TypedCall {
        TypedCall::new(person())
            .user("Invent a person.")
            .with_config(CallConfig::default().mode(OutputMode::Json))
    }

    #[tokio::test]
    async fn test_run_returns_validated_value() {
        let mock = mock_for("mock", "m");
        mock.queue_stream(json_chunks(&[r#"{"na"#, r#"me":"Al"#, r#"ice","age":3"#, "0}"]));

        let outcome = json_call().run(&mock).await.unwrap();
        assert_eq!(outcome.value.as_value(), &json!({"name": "Alice", "age": 30}));
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.history.is_empty());
        assert_eq!(outcome.finish_reason, StopReason::EndTurn);
        assert_eq!(mock.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_reports_partials_then_complete() {
        let mock = mock_for("mock", "m");
        mock.queue_stream(json_chunks(&[r#"{"name":"Al"#, r#"ice","age":3"#, "0}"]));

        let call = json_call();
        let events: Vec<CallEvent> = call
            .stream(&mock)
            .map(|e| e.unwrap())
            .collect()
            .await;

        let partials: Vec<&PartialValue> = events
            .iter()
            .filter_map(|e| match e {
                CallEvent::Partial { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert!(!partials.is_empty());
        let after_age = partials
            .iter()
            .find(|p| p.get("name") == Some(&PartialValue::String("Alice".into())))
            .unwrap();
        assert!(after_age.get("age").unwrap().is_pending());
        for pair in partials.windows(2) {
            assert!(pair[1].refines(pair[0]));
        }
        assert!(matches!(events.last(), Some(CallEvent::Complete(_))));
    }

    #[tokio::test]
    async fn test_streaming_disabled_emits_only_final() {
        let mock = mock_for("mock", "m");
        mock.queue_stream(json_chunks(&[r#"{"name":"Bo","#, r#""age":4}"#]));

        let call = TypedCall::new(person()).user("x").with_config(CallConfig {
            streaming: false,
            mode: OutputMode::Json,
            ..Default::default()
        });
        let events: Vec<_> = call.stream(&mock).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(CallEvent::Complete(_))));
    }

    #[tokio::test]
    async fn test_mismatch_retries_with_feedback() {
        let mock = mock_for("mock", "m");
        mock.queue_stream(json_chunks(&[r#"{"name":"Al","age":"thirty"}"#]));
        mock.queue_stream(json_chunks(&[r#"{"name":"Al","age":30}"#]));

        let outcome = json_call().run(&mock).await.unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.history.len(), 1);
        assert_eq!(outcome.usage.input_tokens, 200);

        let requests = mock.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(
            requests[1].messages[1].text(),
            Some(r#"{"name":"Al","age":"thirty"}"#)
        );
        assert!(requests[1].messages[2].text().unwrap().contains("$.age"));
    }

    #[tokio::test]
    async fn test_exhaustion_sends_exactly_budgeted_requests() {
        let mock = mock_for("mock", "m");
        for _ in 0..2 {
            mock.queue_stream(json_chunks(&[r#"{"name":"Al"}"#]));
        }

        let call = TypedCall::new(person())
            .user("x")
            .with_config(CallConfig::default().mode(OutputMode::Json).max_retries(1));
        let err = call.run(&mock).await.unwrap_err();
        let LlmError::ValidationExhausted { attempts, history } = err else {
            panic!("expected ValidationExhausted, got {err:?}");
        };
        assert_eq!(attempts, 2);
        assert_eq!(history.len(), 2);
        assert_eq!(mock.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_syntax_error_ends_attempt_early() {
        let mock = mock_for("mock", "m");
        mock.queue_stream(json_chunks(&[r#"{"name" "Al"#, r#"","age":1}"#]));
        mock.queue_stream(json_chunks(&[r#"{"name":"Al","age":1}"#]));

        let call = json_call();
        let mut failures = Vec::new();
        let mut events = call.stream(&mock);
        while let Some(event) = events.next().await {
            if let CallEvent::AttemptFailed(failure) = event.unwrap() {
                failures.push(failure);
            }
        }
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].output.as_str(), r#"{"name" "Al"#);
    }

    #[tokio::test]
    async fn test_tool_mode_decodes_forced_call() {
        let mock = mock_for("mock", "m");
        mock.queue_stream(tool_call_chunks(
            "call_1",
            "return_person",
            &[r#"{"name":"#, r#""Cy","age":7}"#],
        ));

        let call = TypedCall::new(person())
            .user("x")
            .with_config(CallConfig::default().mode(OutputMode::Tool));
        let outcome = call.run(&mock).await.unwrap();
        assert_eq!(outcome.value.as_value(), &json!({"name": "Cy", "age": 7}));
        assert_eq!(
            outcome.raw,
            RawOutput::ToolCall {
                id: "call_1".into(),
                name: "return_person".into(),
                arguments: r#"{"name":"Cy","age":7}"#.into(),
            }
        );
        let request = &mock.recorded_requests()[0];
        assert_eq!(request.tools.as_ref().unwrap()[0].name, "return_person");
    }

    #[tokio::test]
    async fn test_tool_mode_rejects_plain_text() {
        let mock = mock_for("mock", "m");
        mock.queue_stream(json_chunks(&["Sure! Here you go."]));
        mock.queue_stream(tool_call_chunks("c2", "return_person", &[r#"{"name":"D","age":1}"#]));

        let call = TypedCall::new(person())
            .user("x")
            .with_config(CallConfig::default().mode(OutputMode::Tool));
        let outcome = call.run(&mock).await.unwrap();
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.history.failures()[0].error.contains("plain text"));
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let mock = mock_for("mock", "m");
        mock.queue_stream_error(MockError::Auth("bad key".into()));

        let err = json_call().run(&mock).await.unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
        assert_eq!(mock.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_type_fails_before_sending() {
        let mock = mock_for("mock", "m");
        let call = TypedCall::new(TypeDescriptor::reference("Missing")).user("x");
        let err = call.run(&mock).await.unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedType { .. }));
        assert!(mock.recorded_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_spans_attempts() {
        let mock = mock_for("mock", "m");
        mock.queue_stalled_stream(vec![ChunkEvent::TextDelta(r#"{"name":"#.into())]);

        let call = TypedCall::new(person())
            .user("x")
            .with_config(CallConfig::default().mode(OutputMode::Json).timeout(Duration::from_secs(5)));
        let err = call.run(&mock).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout { elapsed_ms } if elapsed_ms >= 5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_consumption() {
        let mock = mock_for("mock", "m");
        mock.queue_stalled_stream(vec![ChunkEvent::TextDelta("{".into())]);

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let call = TypedCall::new(person())
            .user("x")
            .with_config(CallConfig::default().mode(OutputMode::Json).cancel_on(token));
        let err = call.run(&mock).await.unwrap_err();
        assert!(matches!(err, LlmError::Cancelled));
    }

    #[tokio::test]
    async fn test_params_forwarded() {
        let mock = mock_for("mock", "m");
        mock.queue_stream(json_chunks(&[r#"{"name":"E","age":2}"#]));

        let call = TypedCall::new(person()).user("x").with_config(CallConfig {
            mode: OutputMode::Json,
            request_timeout: Some(Duration::from_secs(9)),
            params: ModelParams {
                temperature: Some(0.2),
                max_tokens: Some(64),
                stop: None,
            },
            ..Default::default()
        });
        call.run(&mock).await.unwrap();
        let request = &mock.recorded_requests()[0];
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(64));
        assert_eq!(request.timeout, Some(Duration::from_secs(9)));
    }

    #[tokio::test]
    async fn test_from_template_renders_user_message() {
        let template = PromptTemplate::new("Invent a person from {place}.");
        let call = TypedCall::from_template(person(), &template, &[("place", "Porto")]).unwrap();
        assert_eq!(call.messages()[0].text(), Some("Invent a person from Porto."));
    }

    #[tokio::test]
    async fn test_scalar_root_is_unwrapped() {
        let mock = mock_for("mock", "m");
        mock.queue_stream(json_chunks(&[r#"{"value":[1,2"#, ",3]}"]));

        let call = TypedCall::new(TypeDescriptor::sequence(TypeDescriptor::integer()))
            .user("x")
            .with_config(CallConfig::default().mode(OutputMode::Json));
        let outcome = call.run(&mock).await.unwrap();
        let numbers: Vec<i64> = outcome.deserialize().unwrap();
        assert_eq!(numbers, [1, 2, 3]);
    }
}
