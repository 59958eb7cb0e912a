//! Dispatching the tool calls of one model turn.
//!
//! A [`Dispatcher`] consumes a provider stream, reassembles every tool
//! call announced in it, validates each call's arguments independently,
//! and runs the registered handlers. Results are always reported in the
//! order the calls were announced, regardless of which finished first.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::registry::ToolRegistry;
use crate::call::controller::guarded;
use crate::chat::{ChatMessage, StopReason, ToolCall, ToolResult};
use crate::decode::{AssembledCall, CompleteValue, ToolCallAssembler, ToolCallUpdate};
use crate::error::LlmError;
use crate::prompt::argument_feedback;
use crate::schema::{CompileOptions, CompiledSchema};
use crate::stream::{ChunkEvent, ChunkStream};
use crate::usage::Usage;

/// What happened to one tool call.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum DispatchStatus {
    /// Arguments are valid; execution was not requested.
    Validated,
    /// The handler ran. `is_error` is set when it failed.
    Executed(ToolResult),
    /// The call was not run. Holds the feedback sent back to the model.
    Rejected(String),
}

/// One tool call of a turn and its outcome.
#[derive(Debug)]
pub struct ToolCallRecord {
    /// Position of the call among the turn's calls, in announcement order.
    pub index: usize,
    /// Provider-assigned call id.
    pub id: String,
    /// Name of the tool the model called.
    pub name: String,
    /// The argument text as streamed.
    pub raw_arguments: String,
    /// The validated arguments, or why validation failed.
    pub arguments: Result<CompleteValue, LlmError>,
    /// Dispatch outcome.
    pub status: DispatchStatus,
}

impl ToolCallRecord {
    /// Returns `true` if the call was not run because of its arguments or
    /// an unknown name.
    pub fn is_rejected(&self) -> bool {
        matches!(self.status, DispatchStatus::Rejected(_))
    }

    /// The result message for this call, if there is one to send.
    pub fn result_message(&self) -> Option<ChatMessage> {
        match &self.status {
            DispatchStatus::Validated => None,
            DispatchStatus::Executed(result) => Some(ChatMessage::from_result(result.clone())),
            DispatchStatus::Rejected(feedback) => {
                Some(ChatMessage::tool_error(self.id.clone(), feedback.clone()))
            }
        }
    }

    fn as_tool_call(&self) -> ToolCall {
        ToolCall::from_raw(self.id.clone(), self.name.clone(), &self.raw_arguments)
    }
}

/// Everything a turn produced.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Prose the model wrote alongside or instead of tool calls.
    pub text: String,
    /// Every call, in announcement order.
    pub records: Vec<ToolCallRecord>,
    /// Why the model stopped.
    pub finish_reason: StopReason,
    /// Token usage of the turn.
    pub usage: Usage,
}

impl DispatchOutcome {
    /// Returns `true` if the model called at least one tool.
    pub fn has_calls(&self) -> bool {
        !self.records.is_empty()
    }

    /// Returns `true` if there were calls and none of them could run.
    pub fn all_rejected(&self) -> bool {
        self.has_calls() && self.records.iter().all(ToolCallRecord::is_rejected)
    }

    /// The messages to append to the conversation before the next turn.
    ///
    /// The assistant message carrying the calls comes first, followed by
    /// one result per call in announcement order. Calls that were only
    /// validated have no result and are skipped.
    pub fn follow_up_messages(&self) -> Vec<ChatMessage> {
        if self.records.is_empty() {
            return if self.text.is_empty() {
                Vec::new()
            } else {
                vec![ChatMessage::assistant(self.text.clone())]
            };
        }
        let calls = self.records.iter().map(ToolCallRecord::as_tool_call).collect();
        let mut messages = vec![ChatMessage::assistant_tool_calls(
            Some(self.text.clone()),
            calls,
        )];
        messages.extend(self.records.iter().filter_map(ToolCallRecord::result_message));
        messages
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Decodes and runs the tool calls in a provider stream.
///
/// ```rust,no_run
/// use llm_typed::schema::CompileOptions;
/// use llm_typed::tool::{Dispatcher, ToolRegistry};
/// use llm_typed::ChunkStream;
///
/// # async fn demo(registry: ToolRegistry, stream: ChunkStream) -> Result<(), llm_typed::LlmError> {
/// let dispatcher = Dispatcher::new(&registry, CompileOptions::default())?;
/// let outcome = dispatcher.dispatch(stream, &()).await?;
/// let follow_up = outcome.follow_up_messages();
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher<'r, Ctx = ()>
where
    Ctx: Send + Sync + 'static,
{
    registry: &'r ToolRegistry<Ctx>,
    schemas: Vec<(String, Arc<CompiledSchema>)>,
    execute: bool,
    parallel: bool,
    deadline: Option<Instant>,
    started: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl<Ctx: Send + Sync + 'static> std::fmt::Debug for Dispatcher<'_, Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", self.registry)
            .field("execute", &self.execute)
            .field("parallel", &self.parallel)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl<'r, Ctx: Send + Sync + 'static> Dispatcher<'r, Ctx> {
    /// Compiles every registered tool's argument type.
    ///
    /// # Errors
    ///
    /// [`LlmError::UnsupportedType`] if a tool's arguments cannot be
    /// represented.
    pub fn new(registry: &'r ToolRegistry<Ctx>, options: CompileOptions) -> Result<Self, LlmError> {
        Ok(Self {
            schemas: registry.compile(options)?,
            registry,
            execute: true,
            parallel: true,
            deadline: None,
            started: None,
            cancel: None,
        })
    }

    /// Whether validated calls are run. Default: true.
    #[must_use]
    pub fn execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }

    /// Whether the calls of a turn run concurrently. Default: true.
    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Stops consuming the stream at `deadline`.
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Stops consuming the stream when `token` fires.
    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub(crate) fn started_at(mut self, started: Instant) -> Self {
        self.started = Some(started);
        self
    }

    /// Consumes one turn's stream and dispatches its calls.
    ///
    /// A call with bad arguments or an unknown name is rejected on its
    /// own; its siblings still run.
    ///
    /// # Errors
    ///
    /// Transport errors from the stream, [`LlmError::Timeout`], and
    /// [`LlmError::Cancelled`]. Per-call failures are reported in the
    /// records instead.
    #[instrument(skip_all, fields(tools = self.registry.len(), parallel = self.parallel))]
    pub async fn dispatch(&self, mut stream: ChunkStream, ctx: &Ctx) -> Result<DispatchOutcome, LlmError> {
        let started = self.started.unwrap_or_else(Instant::now);
        let mut assembler = self
            .schemas
            .iter()
            .fold(ToolCallAssembler::new(), |assembler, (name, schema)| {
                assembler.with_schema(name.clone(), Arc::clone(schema))
            });

        let mut text = String::new();
        let mut usage = Usage::default();
        let mut finish_reason = StopReason::default();
        let mut calls = Vec::new();

        while let Some(event) =
            guarded(stream.next(), self.deadline, self.cancel.as_ref(), started).await?
        {
            match event? {
                ChunkEvent::TextDelta(delta) => text.push_str(&delta),
                ChunkEvent::Usage(u) => usage += u,
                ChunkEvent::StreamEnd { finish_reason: r } => finish_reason = r,
                other => {
                    if let Some(ToolCallUpdate::Finished(call)) = assembler.apply(&other) {
                        calls.push(call);
                    }
                }
            }
        }
        drop(stream);

        calls.extend(assembler.finish_open());
        calls.sort_by_key(|call| call.index);
        debug!(calls = calls.len(), "turn assembled");

        let records = self.run(calls, ctx).await;
        Ok(DispatchOutcome {
            text,
            records,
            finish_reason,
            usage,
        })
    }

    async fn run(&self, calls: Vec<AssembledCall>, ctx: &Ctx) -> Vec<ToolCallRecord> {
        let mut records: Vec<ToolCallRecord> = calls.into_iter().map(|c| self.record(c)).collect();
        if !self.execute {
            return records;
        }

        let runnable: Vec<(usize, CompleteValue)> = records
            .iter()
            .enumerate()
            .filter_map(|(i, record)| match (&record.status, &record.arguments) {
                (DispatchStatus::Validated, Ok(args)) => Some((i, args.clone())),
                _ => None,
            })
            .collect();

        let view = &records;
        let results: Vec<(usize, ToolResult)> = if self.parallel {
            join_all(runnable.into_iter().map(|(i, args)| async move {
                let record = &view[i];
                (i, self.registry.execute(&record.name, &record.id, args, ctx).await)
            }))
            .await
        } else {
            let mut results = Vec::with_capacity(runnable.len());
            for (i, args) in runnable {
                let record = &view[i];
                results.push((i, self.registry.execute(&record.name, &record.id, args, ctx).await));
            }
            results
        };

        for (i, result) in results {
            records[i].status = DispatchStatus::Executed(result);
        }
        records
    }

    fn record(&self, call: AssembledCall) -> ToolCallRecord {
        let status = match &call.arguments {
            Ok(_) => DispatchStatus::Validated,
            Err(LlmError::UnknownTool { name, .. }) => {
                let available: Vec<&str> = self.registry.names().collect();
                warn!(tool = %name, call_id = %call.id, "model called an unknown tool");
                DispatchStatus::Rejected(format!(
                    "Unknown tool `{name}`. Available tools: {}.",
                    available.join(", ")
                ))
            }
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "tool arguments rejected");
                DispatchStatus::Rejected(argument_feedback(&call.name, &e.to_string()))
            }
        };
        ToolCallRecord {
            index: call.index,
            id: call.id,
            name: call.name,
            raw_arguments: call.raw_arguments,
            arguments: call.arguments,
            status,
        }
    }
}
