//! Multi-round tool use.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::dispatch::{Dispatcher, ToolCallRecord};
use super::registry::ToolRegistry;
use crate::call::controller::guarded;
use crate::call::{AttemptFailure, ModelParams, RetryContext};
use crate::chat::{ChatMessage, StopReason};
use crate::error::LlmError;
use crate::prompt::split_system;
use crate::provider::{Capability, DynProvider, ProviderRequest, ToolChoice};
use crate::schema::CompileOptions;
use crate::usage::Usage;

/// Configuration for [`run_tool_loop`].
#[derive(Debug, Clone)]
pub struct ToolLoopConfig {
    /// Maximum number of generate-dispatch rounds. Default: 10.
    pub max_iterations: u32,
    /// Rounds in which every call was rejected that are tolerated before
    /// the loop fails. Default: 2.
    pub max_retries: u32,
    /// Whether to execute the calls of a round concurrently. Default: true.
    pub parallel_tool_execution: bool,
    /// Whether the model may answer with text instead of calling a tool.
    /// When `false` the loop only ends at `max_iterations`. Default: true.
    pub allow_text: bool,
    /// Emit unions as `anyOf`. When `None`, follows the provider's
    /// [`Capability::NativeUnions`]. Default: none.
    pub native_unions: Option<bool>,
    /// Sampling parameters.
    pub params: ModelParams,
    /// Deadline across all rounds, tool execution excluded. Default: none.
    pub timeout: Option<Duration>,
    /// Cancels the loop when triggered.
    pub cancel: Option<CancellationToken>,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_retries: 2,
            parallel_tool_execution: true,
            allow_text: true,
            native_unions: None,
            params: ModelParams::default(),
            timeout: None,
            cancel: None,
        }
    }
}

/// Why a tool loop terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The model answered without calling a tool.
    Complete,
    /// Hit the `max_iterations` limit.
    MaxIterations {
        /// The configured limit that was reached.
        limit: u32,
    },
}

/// The result of a completed tool loop.
#[derive(Debug)]
pub struct ToolLoopResult {
    /// The model's final text.
    pub text: String,
    /// The full conversation, including every round's calls and results.
    pub messages: Vec<ChatMessage>,
    /// How many rounds were performed.
    pub iterations: u32,
    /// Usage summed over every round.
    pub total_usage: Usage,
    /// Why the model stopped in the last round.
    pub finish_reason: StopReason,
    /// Every tool call of every round, in order.
    pub records: Vec<ToolCallRecord>,
    /// Why the loop ended.
    pub termination_reason: TerminationReason,
}

/// Lets the model call tools until it answers in text.
///
/// Each round sends the conversation with every tool definition, then
/// dispatches the calls in the response and appends the calls and their
/// results. A call with bad arguments gets corrective feedback as its
/// result; a round in which every call was rejected counts against
/// `max_retries`.
///
/// # Errors
///
/// - [`LlmError::UnsupportedType`] if a tool's arguments cannot be
///   represented, before anything is sent
/// - [`LlmError::ValidationExhausted`] when more than `max_retries`
///   rounds had only rejected calls
/// - [`LlmError::Timeout`], [`LlmError::Cancelled`], and transport errors
#[instrument(skip_all, fields(tools = registry.len(), max_iterations = config.max_iterations))]
pub async fn run_tool_loop<Ctx: Send + Sync + 'static>(
    provider: &dyn DynProvider,
    registry: &ToolRegistry<Ctx>,
    messages: Vec<ChatMessage>,
    config: &ToolLoopConfig,
    ctx: &Ctx,
) -> Result<ToolLoopResult, LlmError> {
    let started = Instant::now();
    let deadline = config.timeout.map(|t| started + t);
    let cancel = config.cancel.as_ref();

    let metadata = provider.metadata();
    let native_unions = config
        .native_unions
        .unwrap_or_else(|| metadata.capabilities.contains(&Capability::NativeUnions));
    let options = CompileOptions { native_unions };
    let definitions = registry.definitions(options)?;
    let names: Vec<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
    let tool_choice = ToolChoice::for_tools(&names, config.allow_text);

    let mut dispatcher = Dispatcher::new(registry, options)?
        .parallel(config.parallel_tool_execution)
        .started_at(started);
    if let Some(at) = deadline {
        dispatcher = dispatcher.deadline(at);
    }
    if let Some(token) = cancel {
        dispatcher = dispatcher.cancel_on(token.clone());
    }

    let mut messages = messages;
    let mut total_usage = Usage::default();
    let mut records = Vec::new();
    let mut history = RetryContext::new();
    let mut rejected_rounds = 0u32;
    let mut finish_reason = StopReason::default();

    for iteration in 1..=config.max_iterations {
        let (system, conversation) = split_system(&messages);
        let request = ProviderRequest {
            messages: conversation,
            system,
            tools: (!definitions.is_empty()).then(|| definitions.clone()),
            tool_choice: tool_choice.clone(),
            temperature: config.params.temperature,
            max_tokens: config.params.max_tokens,
            stop: config.params.stop.clone(),
            ..Default::default()
        };
        debug!(iteration, "starting round");

        let stream = guarded(provider.stream_boxed(&request), deadline, cancel, started).await??;
        let outcome = dispatcher.dispatch(stream, ctx).await?;
        total_usage += &outcome.usage;
        finish_reason = outcome.finish_reason.clone();
        messages.extend(outcome.follow_up_messages());

        if !outcome.has_calls() {
            info!(iterations = iteration, "tool loop complete");
            return Ok(ToolLoopResult {
                text: outcome.text,
                messages,
                iterations: iteration,
                total_usage,
                finish_reason,
                records,
                termination_reason: TerminationReason::Complete,
            });
        }

        if outcome.all_rejected() {
            rejected_rounds += 1;
            for record in &outcome.records {
                let error = match &record.arguments {
                    Err(e) => e.to_string(),
                    Ok(_) => String::new(),
                };
                history.push(AttemptFailure::tool_call(
                    iteration,
                    &record.id,
                    &record.name,
                    &record.raw_arguments,
                    error,
                ));
            }
            if rejected_rounds > config.max_retries {
                warn!(rounds = rejected_rounds, "every tool call keeps failing validation");
                return Err(LlmError::ValidationExhausted {
                    attempts: rejected_rounds,
                    history,
                });
            }
            warn!(iteration, "every tool call in the round was rejected");
        }
        records.extend(outcome.records);
    }

    warn!(limit = config.max_iterations, "tool loop hit iteration limit");
    Ok(ToolLoopResult {
        text: String::new(),
        messages,
        iterations: config.max_iterations,
        total_usage,
        finish_reason,
        records,
        termination_reason: TerminationReason::MaxIterations {
            limit: config.max_iterations,
        },
    })
}
