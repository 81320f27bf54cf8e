//! Conversion between canonical types and Chat Completions wire types.
//!
//! Error mapping lives here too: every OpenAI-compatible endpoint uses
//! the same `{"error": {...}}` body.

use llm_weave::chat::{ContentPart, FinishReason, MediaSource, Message, Role, ToolCall};
use llm_weave::error::{ErrorKind, LlmError};
use llm_weave::provider::{Request, ResponseFormat, ToolChoice};
use llm_weave::transform::{collapse_text, parse_arguments};
use llm_weave::usage::Usage;
use serde_json::{Value, json};

use crate::chat::SystemRole;
use crate::types::{
    self, Conversation, ErrorDetail, ErrorResponse, FileData, FunctionCall, FunctionDef, ImageUrl,
    JsonSchemaFormat, MessageContent, StreamOptions, Tool,
};

// ── Request conversion ───────────────────────────────────────────────

/// Build the request body. `request` has already been validated.
pub(crate) fn build_request(
    request: &Request,
    system_role: SystemRole,
) -> Result<types::Request<'_>, LlmError> {
    let mut messages: Vec<types::Message> = request
        .instruction_parts()
        .into_iter()
        .map(|text| types::Message {
            role: system_role.as_str().into(),
            content: Some(MessageContent::Text(text.to_owned())),
            tool_calls: None,
            tool_call_id: None,
        })
        .collect();
    for message in &request.messages {
        messages.push(encode_message(message, system_role)?);
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| Tool {
                tool_type: "function",
                function: FunctionDef {
                    name: &t.name,
                    description: &t.description,
                    parameters: t.parameters.as_value(),
                },
            })
            .collect()
    });

    Ok(types::Request {
        model: &request.model,
        messages,
        temperature: request.temperature,
        max_completion_tokens: request.max_tokens,
        stream: request.stream.then_some(true),
        stream_options: request.stream.then_some(StreamOptions {
            include_usage: true,
        }),
        tools,
        tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
        response_format: request
            .response_format
            .as_ref()
            .and_then(convert_response_format),
    })
}

fn encode_message(message: &Message, system_role: SystemRole) -> Result<types::Message, LlmError> {
    let role = match message.role {
        Role::System => system_role.as_str(),
        other => other.as_str(),
    };
    let tool_calls = message
        .requested_actions
        .as_ref()
        .filter(|calls| !calls.is_empty())
        .map(|calls| calls.iter().map(encode_call).collect::<Result<Vec<_>, _>>())
        .transpose()?;
    // An assistant turn that only calls tools carries `content: null`.
    let content = if message.content.is_empty() && message.role == Role::Assistant {
        None
    } else {
        Some(encode_content(&message.content))
    };
    Ok(types::Message {
        role: role.into(),
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    })
}

fn encode_call(call: &ToolCall) -> Result<types::ToolCall, LlmError> {
    Ok(types::ToolCall {
        id: call.id.clone(),
        call_type: "function".into(),
        function: FunctionCall {
            name: call.name.clone(),
            arguments: serde_json::to_string(&call.arguments)?,
        },
    })
}

pub(crate) fn encode_content(parts: &[ContentPart]) -> MessageContent {
    if let Some(text) = collapse_text(parts) {
        return MessageContent::Text(text.to_owned());
    }
    MessageContent::Parts(
        parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => types::ContentPart::Text { text: text.clone() },
                ContentPart::Image { source } => types::ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: source.to_url(),
                    },
                },
                ContentPart::Document { source, filename } => types::ContentPart::File {
                    file: FileData {
                        filename: filename.clone(),
                        file_data: source.to_url(),
                    },
                },
            })
            .collect(),
    )
}

pub(crate) fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Required => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Named(name) => json!({"type": "function", "function": {"name": name}}),
    }
}

fn convert_response_format(format: &ResponseFormat) -> Option<types::ResponseFormat<'_>> {
    match format {
        ResponseFormat::Text => None,
        ResponseFormat::JsonObject => Some(types::ResponseFormat {
            format_type: "json_object",
            json_schema: None,
        }),
        ResponseFormat::JsonSchema {
            name,
            schema,
            strict,
        } => Some(types::ResponseFormat {
            format_type: "json_schema",
            json_schema: Some(JsonSchemaFormat {
                name,
                schema: schema.as_value(),
                strict: *strict,
            }),
        }),
    }
}

// ── Reading a request body back ──────────────────────────────────────

/// Canonical messages from a body built by [`build_request`].
///
/// `system` and `developer` messages both read back as system messages,
/// so instructions come back as leading system messages.
pub(crate) fn decode_conversation(wire: &Value) -> Result<Vec<Message>, LlmError> {
    let body: Conversation = serde_json::from_value(wire.clone()).map_err(|e| {
        LlmError::response_format(format!("not a chat completions body: {e}"), wire.to_string())
    })?;
    body.messages.into_iter().map(decode_message).collect()
}

fn decode_message(message: types::Message) -> Result<Message, LlmError> {
    let role = match message.role.as_str() {
        "system" | "developer" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        other => {
            return Err(LlmError::response_format(
                format!("unknown message role `{other}`"),
                other.to_owned(),
            ));
        }
    };
    let content = message.content.map(decode_content).unwrap_or_default();
    let calls: Vec<ToolCall> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(decode_call)
        .collect();
    Ok(Message {
        role,
        content,
        tool_call_id: message.tool_call_id,
        requested_actions: (!calls.is_empty()).then_some(calls),
    })
}

fn decode_content(content: MessageContent) -> Vec<ContentPart> {
    match content {
        MessageContent::Text(text) => vec![ContentPart::Text { text }],
        MessageContent::Parts(parts) => parts
            .into_iter()
            .map(|part| match part {
                types::ContentPart::Text { text } => ContentPart::Text { text },
                types::ContentPart::ImageUrl { image_url } => ContentPart::Image {
                    source: MediaSource::parse(&image_url.url),
                },
                types::ContentPart::File { file } => ContentPart::Document {
                    source: MediaSource::parse(&file.file_data),
                    filename: file.filename,
                },
            })
            .collect(),
    }
}

fn decode_call(call: types::ToolCall) -> ToolCall {
    ToolCall {
        arguments: parse_arguments(&call.function.name, &call.function.arguments),
        id: call.id,
        name: call.function.name,
    }
}

// ── Response conversion ──────────────────────────────────────────────

/// The assistant message and metadata of a non-streamed response.
#[derive(Debug)]
pub(crate) struct Reply {
    pub message: Message,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
    pub id: Option<String>,
    pub model: Option<String>,
}

pub(crate) fn convert_response(wire: &Value) -> Result<Reply, LlmError> {
    let response: types::Response = serde_json::from_value(wire.clone()).map_err(|e| {
        LlmError::response_format(format!("Failed to parse OpenAI response: {e}"), wire.to_string())
    })?;
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(LlmError::response_format(
            "response has no choices",
            wire.to_string(),
        ));
    };

    // A refusal replaces the content; the finish reason says why.
    let text = choice
        .message
        .content
        .filter(|text| !text.is_empty())
        .or(choice.message.refusal);
    let calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(decode_call)
        .collect();

    Ok(Reply {
        message: Message {
            requested_actions: (!calls.is_empty()).then_some(calls),
            ..Message::new(
                Role::Assistant,
                text.map(ContentPart::text).into_iter().collect(),
            )
        },
        usage: response.usage.as_ref().map(convert_usage).unwrap_or_default(),
        finish_reason: choice.finish_reason.as_deref().map(FinishReason::parse),
        id: response.id,
        model: response.model,
    })
}

pub(crate) fn convert_usage(usage: &types::ResponseUsage) -> Usage {
    Usage::from_counts(usage.prompt_tokens, usage.completion_tokens, usage.total_tokens)
        .with_cached(
            usage
                .prompt_tokens_details
                .as_ref()
                .and_then(|d| d.cached_tokens),
        )
        .with_reasoning(
            usage
                .completion_tokens_details
                .as_ref()
                .and_then(|d| d.reasoning_tokens),
        )
}

// ── Errors ───────────────────────────────────────────────────────────

/// `code` is a string for OpenAI and a number for some compatible APIs.
fn error_code(detail: &ErrorDetail) -> String {
    match &detail.code {
        Some(Value::String(code)) => code.clone(),
        Some(Value::Number(code)) => code.to_string(),
        _ => detail
            .error_type
            .clone()
            .unwrap_or_else(|| "unknown".into()),
    }
}

/// Maps an error code or type to an [`ErrorKind`].
///
/// An exhausted quota also arrives as 429 but will not clear on retry.
fn error_kind(detail: &ErrorDetail, status: Option<http::StatusCode>) -> ErrorKind {
    let code = detail.code.as_ref().and_then(Value::as_str);
    match (code, detail.error_type.as_deref()) {
        (Some("insufficient_quota"), _) | (_, Some("insufficient_quota")) => ErrorKind::Other,
        (Some("rate_limit_exceeded"), _) => ErrorKind::RateLimited,
        (Some("model_not_found"), _) => ErrorKind::NotFound,
        (Some("invalid_api_key"), _) | (_, Some("authentication_error")) => {
            ErrorKind::Authentication
        }
        (_, Some("server_error")) => ErrorKind::Server,
        (_, Some("invalid_request_error")) => ErrorKind::InvalidRequest,
        _ => status.map_or(ErrorKind::Other, ErrorKind::from_status),
    }
}

/// An error object received mid-stream.
pub(crate) fn stream_error(detail: ErrorDetail) -> LlmError {
    LlmError::Provider {
        kind: error_kind(&detail, None),
        code: error_code(&detail),
        message: detail.message,
    }
}

/// Map an HTTP error status and body to an [`LlmError`].
///
/// Shared by every OpenAI-compatible provider.
pub fn convert_error(status: http::StatusCode, body: &str) -> LlmError {
    let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) else {
        return match status.as_u16() {
            401 | 403 => LlmError::Auth(body.to_owned()),
            400 => LlmError::InvalidRequest(body.to_owned()),
            _ => LlmError::Http {
                status: Some(status),
                message: body.to_owned(),
            },
        };
    };

    let detail = parsed.error;
    match status.as_u16() {
        401 | 403 => LlmError::Auth(detail.message),
        400 => LlmError::InvalidRequest(detail.message),
        _ => LlmError::Provider {
            kind: error_kind(&detail, Some(status)),
            code: error_code(&detail),
            message: detail.message,
        },
    }
}
