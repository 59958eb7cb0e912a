//! Conversion between `llm-typed` types and `OpenAI` wire types.

use llm_typed::chat::{ChatMessage, ChatRole, ContentBlock, StopReason, ToolCall};
use llm_typed::error::LlmError;
use llm_typed::provider::{ProviderRequest, ToolChoice};
use llm_typed::usage::Usage;
use serde_json::Value;

use crate::config::OpenAiConfig;
use crate::types::{
    ErrorResponse, FunctionCallRequest, FunctionDef, JsonSchemaFormat, Message, NamedFunction,
    Request, ResponseFormat, ResponseUsage, StreamOptions, Tool, ToolCallRequest,
    ToolChoiceParam,
};

// ── Request conversion ───────────────────────────────────────────────

/// Builds a streaming `OpenAI` request.
pub(crate) fn build_request<'a>(request: &'a ProviderRequest, config: &'a OpenAiConfig) -> Request<'a> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(text_message("system", system.clone()));
    }
    messages.extend(request.messages.iter().flat_map(convert_message));

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| Tool {
                kind: "function",
                function: FunctionDef {
                    name: &t.name,
                    description: &t.description,
                    parameters: t.parameters.as_value(),
                    strict: t.strict,
                },
            })
            .collect()
    });
    let response_format = request.response_format.as_ref().map(|format| ResponseFormat {
        kind: "json_schema",
        json_schema: JsonSchemaFormat {
            name: &format.name,
            schema: format.schema.as_value(),
            strict: format.strict,
        },
    });

    Request {
        model: &config.model,
        messages,
        temperature: request.temperature,
        max_completion_tokens: request.max_tokens,
        stop: request.stop.as_deref(),
        stream: true,
        stream_options: StreamOptions {
            include_usage: true,
        },
        tools,
        tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
        response_format,
        metadata: (!request.metadata.is_empty()).then_some(&request.metadata),
    }
}

fn text_message(role: &'static str, text: String) -> Message {
    Message {
        role,
        content: Some(text),
        tool_calls: None,
        tool_call_id: None,
    }
}

fn joined_text(content: &[ContentBlock]) -> Option<String> {
    let parts: Vec<&str> = content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n"))
}

/// Converts one message. A tool-role message carrying several results
/// becomes one `tool` message per result.
fn convert_message(msg: &ChatMessage) -> Vec<Message> {
    match msg.role {
        ChatRole::System => vec![text_message("system", joined_text(&msg.content).unwrap_or_default())],
        ChatRole::User => vec![text_message("user", joined_text(&msg.content).unwrap_or_default())],
        ChatRole::Assistant => {
            let tool_calls: Vec<ToolCallRequest> = msg.tool_calls().map(convert_tool_call).collect();
            vec![Message {
                role: "assistant",
                content: joined_text(&msg.content),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }]
        }
        ChatRole::Tool => msg
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult(result) => Some(Message {
                    role: "tool",
                    content: Some(result.content.clone()),
                    tool_calls: None,
                    tool_call_id: Some(result.tool_call_id.clone()),
                }),
                _ => None,
            })
            .collect(),
    }
}

fn convert_tool_call(call: &ToolCall) -> ToolCallRequest {
    // Unparseable arguments are kept as a JSON string; send them back verbatim.
    let arguments = match &call.arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    };
    ToolCallRequest {
        id: call.id.clone(),
        kind: "function",
        function: FunctionCallRequest {
            name: call.name.clone(),
            arguments,
        },
    }
}

/// Converts a tool choice to `OpenAI`'s `tool_choice` parameter.
fn convert_tool_choice(choice: &ToolChoice) -> ToolChoiceParam<'_> {
    match choice {
        ToolChoice::None => ToolChoiceParam::Mode("none"),
        ToolChoice::Required => ToolChoiceParam::Mode("required"),
        ToolChoice::Specific(name) => ToolChoiceParam::Function {
            kind: "function",
            function: NamedFunction { name },
        },
        _ => ToolChoiceParam::Mode("auto"),
    }
}

// ── Response conversion ──────────────────────────────────────────────

/// Maps `OpenAI` `finish_reason` strings to `StopReason`.
pub(crate) fn convert_stop_reason(reason: &str) -> StopReason {
    match reason {
        "stop" => StopReason::EndTurn,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        "content_filter" => StopReason::ContentFilter,
        other => {
            tracing::warn!(finish_reason = other, "Unexpected OpenAI finish_reason");
            StopReason::EndTurn
        }
    }
}

pub(crate) fn convert_usage(usage: ResponseUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        reasoning_tokens: usage
            .completion_tokens_details
            .and_then(|d| d.reasoning_tokens),
    }
}

// ── Error conversion ─────────────────────────────────────────────────

/// Converts an HTTP status and optional error body into an `LlmError`.
pub(crate) fn convert_error(status: http::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |e| e.error.message);

    if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
        return LlmError::Auth(message);
    }

    if status == http::StatusCode::BAD_REQUEST || status == http::StatusCode::NOT_FOUND {
        return LlmError::InvalidRequest(message);
    }

    let retryable = matches!(status.as_u16(), 408 | 409 | 429 | 500 | 502 | 503 | 504);

    LlmError::Http {
        status: Some(status),
        message,
        retryable,
    }
}
