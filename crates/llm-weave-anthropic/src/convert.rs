//! Bidirectional conversion between canonical types and Anthropic wire
//! types.
//!
//! Internal: callers only see canonical types through
//! [`AnthropicTransform`](crate::AnthropicTransform).

use llm_weave::chat::{ContentPart, FinishReason, MediaSource, Message, Role, ToolCall};
use llm_weave::error::{ErrorKind, LlmError};
use llm_weave::provider::{Request, ResponseFormat, ToolChoice};
use llm_weave::usage::Usage;
use serde_json::{Map, Value};
use tracing::debug;

use crate::types::{
    self, ContentBlock, Conversation, ErrorDetail, ErrorResponse, McpServerParam, Source, System,
    Tool, ToolChoiceParam, ToolResultContent, Turn, TurnContent, TurnRole,
};

/// Assistant turn appended in JSON mode. The model continues right after
/// the opening brace.
pub(crate) const JSON_PRIMING: &str = "Here is the JSON requested:\n{";

/// Leading text of the system block added in JSON mode.
pub(crate) const JSON_INSTRUCTION: &str = "Respond only with a single valid JSON object";

/// Joins [`JSON_INSTRUCTION`] and the compact schema.
const SCHEMA_LEAD: &str = " that conforms to this JSON schema:\n";

// ── Request conversion ───────────────────────────────────────────────

/// Build the request body. `request` has already been validated.
pub(crate) fn build_request(
    request: &Request,
    default_max_tokens: u32,
) -> Result<types::Request<'_>, LlmError> {
    let mut system: Vec<String> = request
        .instruction_parts()
        .into_iter()
        .map(str::to_owned)
        .collect();
    system.extend(
        request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(Message::text),
    );
    if let Some(instruction) = json_instruction(request.response_format.as_ref())? {
        system.push(instruction);
    }

    let mut groups: Vec<(TurnRole, Vec<ContentBlock>)> = Vec::new();
    for message in request.messages.iter().filter(|m| m.role != Role::System) {
        let (role, blocks) = encode_message(message);
        push_grouped(&mut groups, role, blocks);
    }
    if request.wants_json() {
        push_grouped(
            &mut groups,
            TurnRole::Assistant,
            vec![ContentBlock::Text {
                text: JSON_PRIMING.into(),
            }],
        );
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| Tool {
                name: &t.name,
                description: &t.description,
                input_schema: t.parameters.as_value(),
            })
            .collect()
    });
    let mcp_servers = request.mcp_servers.as_ref().map(|servers| {
        servers
            .iter()
            .map(|s| McpServerParam {
                server_type: "url",
                url: &s.url,
                name: &s.name,
                authorization_token: s.authorization.as_deref(),
            })
            .collect()
    });

    Ok(types::Request {
        model: &request.model,
        messages: groups
            .into_iter()
            .map(|(role, blocks)| Turn {
                role,
                content: collapse(blocks),
            })
            .collect(),
        max_tokens: request.max_tokens.unwrap_or(default_max_tokens),
        system: encode_system(system),
        temperature: request.temperature,
        stream: request.stream.then_some(true),
        tools,
        tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
        mcp_servers,
    })
}

fn json_instruction(format: Option<&ResponseFormat>) -> Result<Option<String>, LlmError> {
    Ok(match format {
        None | Some(ResponseFormat::Text) => None,
        Some(ResponseFormat::JsonObject) => Some(format!("{JSON_INSTRUCTION}.")),
        Some(ResponseFormat::JsonSchema { schema, .. }) => {
            let schema = serde_json::to_string(schema.as_value())
                .map_err(|e| LlmError::Validation(format!("unprintable schema: {e}")))?;
            Some(format!("{JSON_INSTRUCTION}{SCHEMA_LEAD}{schema}"))
        }
    })
}

fn encode_system(mut parts: Vec<String>) -> Option<System> {
    match parts.len() {
        0 => None,
        1 => parts.pop().map(System::Text),
        _ => Some(System::Blocks(
            parts
                .into_iter()
                .map(|text| ContentBlock::Text { text })
                .collect(),
        )),
    }
}

/// Tool results travel in user turns; tool calls ride along with the
/// assistant's text.
fn encode_message(message: &Message) -> (TurnRole, Vec<ContentBlock>) {
    match message.role {
        Role::Tool => (
            TurnRole::User,
            vec![ContentBlock::ToolResult {
                tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                content: ToolResultContent::Text(message.text()),
                is_error: false,
            }],
        ),
        Role::Assistant => {
            let mut blocks: Vec<ContentBlock> = message.content.iter().map(encode_part).collect();
            blocks.extend(message.requested_actions().iter().map(|call| {
                ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                }
            }));
            (TurnRole::Assistant, blocks)
        }
        Role::User | Role::System => (
            TurnRole::User,
            message.content.iter().map(encode_part).collect(),
        ),
    }
}

fn encode_part(part: &ContentPart) -> ContentBlock {
    match part {
        ContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
        ContentPart::Image { source } => ContentBlock::Image {
            source: encode_source(source),
        },
        ContentPart::Document { source, filename } => ContentBlock::Document {
            source: encode_source(source),
            title: filename.clone(),
        },
    }
}

fn encode_source(source: &MediaSource) -> Source {
    match source {
        MediaSource::Url(url) => Source::Url { url: url.clone() },
        MediaSource::Base64 { media_type, data } => Source::Base64 {
            media_type: media_type.clone(),
            data: data.clone(),
        },
    }
}

fn push_grouped(
    groups: &mut Vec<(TurnRole, Vec<ContentBlock>)>,
    role: TurnRole,
    blocks: Vec<ContentBlock>,
) {
    match groups.last_mut() {
        Some((last, existing)) if *last == role => existing.extend(blocks),
        _ => groups.push((role, blocks)),
    }
}

fn collapse(mut blocks: Vec<ContentBlock>) -> TurnContent {
    if let [ContentBlock::Text { .. }] = blocks.as_slice() {
        if let Some(ContentBlock::Text { text }) = blocks.pop() {
            return TurnContent::Text(text);
        }
    }
    TurnContent::Blocks(blocks)
}

fn convert_tool_choice(choice: &ToolChoice) -> ToolChoiceParam<'_> {
    let (choice_type, name) = match choice {
        ToolChoice::Auto => ("auto", None),
        ToolChoice::Required => ("any", None),
        ToolChoice::None => ("none", None),
        ToolChoice::Named(name) => ("tool", Some(name.as_str())),
    };
    ToolChoiceParam { choice_type, name }
}

// ── Reading a request body back ──────────────────────────────────────

/// Canonical messages from a body built by [`build_request`].
///
/// System text comes back as leading system messages, one per block.
/// When the body is JSON-primed, the priming turn and the generated
/// instruction (the last system block) are dropped.
pub(crate) fn decode_conversation(wire: &Value) -> Result<Vec<Message>, LlmError> {
    let body: Conversation = serde_json::from_value(wire.clone()).map_err(|e| {
        LlmError::response_format(format!("not a messages body: {e}"), wire.to_string())
    })?;

    let mut turns = body.messages;
    let primed = strip_priming(&mut turns);

    let mut system = match body.system {
        None => Vec::new(),
        Some(System::Text(text)) => vec![text],
        Some(System::Blocks(blocks)) => blocks
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect(),
    };
    if primed && system.last().is_some_and(|text| is_json_instruction(text)) {
        system.pop();
    }
    let mut messages: Vec<Message> = system.into_iter().map(Message::system).collect();

    for turn in turns {
        let blocks = turn.content.into_blocks();
        match turn.role {
            TurnRole::Assistant => messages.push(decode_assistant(blocks)),
            TurnRole::User => decode_user(blocks, &mut messages),
        }
    }
    Ok(messages)
}

/// Removes a trailing priming block, reporting whether there was one.
fn strip_priming(turns: &mut Vec<Turn>) -> bool {
    let Some(last) = turns.last_mut() else {
        return false;
    };
    if last.role != TurnRole::Assistant {
        return false;
    }
    let mut blocks =
        std::mem::replace(&mut last.content, TurnContent::Blocks(Vec::new())).into_blocks();
    let primed = matches!(blocks.last(), Some(ContentBlock::Text { text }) if text == JSON_PRIMING);
    if primed {
        blocks.pop();
    }
    if blocks.is_empty() {
        turns.pop();
    } else {
        last.content = collapse(blocks);
    }
    primed
}

/// Whether `text` is exactly what [`json_instruction`] produces.
fn is_json_instruction(text: &str) -> bool {
    let Some(rest) = text.strip_prefix(JSON_INSTRUCTION) else {
        return false;
    };
    if rest == "." {
        return true;
    }
    rest.strip_prefix(SCHEMA_LEAD).is_some_and(|schema| {
        serde_json::from_str::<Value>(schema)
            .and_then(|value| serde_json::to_string(&value))
            .is_ok_and(|compact| compact == schema)
    })
}

fn decode_assistant(blocks: Vec<ContentBlock>) -> Message {
    let mut content = Vec::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::ToolUse { id, name, input } => calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            other => content.extend(decode_part(other)),
        }
    }
    Message {
        requested_actions: (!calls.is_empty()).then_some(calls),
        ..Message::new(Role::Assistant, content)
    }
}

/// A user turn may interleave tool results with ordinary content; each
/// result becomes its own tool message, in order.
fn decode_user(blocks: Vec<ContentBlock>, out: &mut Vec<Message>) {
    let mut pending = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                if !pending.is_empty() {
                    out.push(Message::new(Role::User, std::mem::take(&mut pending)));
                }
                out.push(Message::tool(tool_use_id, content.text()));
            }
            other => pending.extend(decode_part(other)),
        }
    }
    if !pending.is_empty() {
        out.push(Message::new(Role::User, pending));
    }
}

fn decode_part(block: ContentBlock) -> Option<ContentPart> {
    match block {
        ContentBlock::Text { text } => Some(ContentPart::Text { text }),
        ContentBlock::Image { source } => Some(ContentPart::Image {
            source: decode_source(source),
        }),
        ContentBlock::Document { source, title } => Some(ContentPart::Document {
            source: decode_source(source),
            filename: title,
        }),
        ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => None,
    }
}

fn decode_source(source: Source) -> MediaSource {
    match source {
        Source::Url { url } => MediaSource::Url(url),
        Source::Base64 { media_type, data } => MediaSource::Base64 { media_type, data },
    }
}

// ── Response conversion ──────────────────────────────────────────────

/// The assistant message and metadata of a non-streamed response.
pub(crate) struct Reply {
    pub message: Message,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
    pub id: Option<String>,
    pub model: Option<String>,
}

pub(crate) fn convert_response(wire: &Value) -> Result<Reply, LlmError> {
    let response: types::Response = serde_json::from_value(wire.clone()).map_err(|e| {
        LlmError::response_format(
            format!("Failed to parse Anthropic response: {e}"),
            wire.to_string(),
        )
    })?;

    let mut content = Vec::new();
    let mut calls = Vec::new();
    for block in response.content {
        match block.content_type.as_str() {
            "text" => content.push(ContentPart::text(block.text.unwrap_or_default())),
            "tool_use" => calls.push(ToolCall {
                id: block.id.unwrap_or_default(),
                name: block.name.unwrap_or_default(),
                arguments: block.input.unwrap_or_else(|| Value::Object(Map::new())),
            }),
            other => debug!(block_type = other, "skipping response block"),
        }
    }

    Ok(Reply {
        message: Message {
            requested_actions: (!calls.is_empty()).then_some(calls),
            ..Message::new(Role::Assistant, content)
        },
        usage: convert_usage(&response.usage),
        finish_reason: response.stop_reason.as_deref().map(FinishReason::parse),
        id: response.id,
        model: response.model,
    })
}

pub(crate) fn convert_usage(usage: &types::ResponseUsage) -> Usage {
    Usage::from_counts(usage.input_tokens, usage.output_tokens, None)
        .with_cached(usage.cache_read_input_tokens)
}

/// Rebuilds the JSON answer of an emulated JSON-mode generation.
///
/// The model continued after the priming `{`, so the brace is put back
/// before [`check_json`] runs. Replies that request tools are left alone.
pub(crate) fn complete_json(request: &Request, mut message: Message) -> Result<Message, LlmError> {
    if !request.wants_json() || message.has_requested_actions() {
        return Ok(message);
    }
    let text = format!("{{{}", message.text());
    message.content = vec![ContentPart::text(text)];
    check_json(request, message)
}

/// Tidies an emulated JSON answer whose brace is already in place and
/// validates it when the format carries a schema.
pub(crate) fn check_json(request: &Request, mut message: Message) -> Result<Message, LlmError> {
    if !request.wants_json() || message.has_requested_actions() {
        return Ok(message);
    }
    let text = message.text().trim_end().to_owned();
    if let Some(ResponseFormat::JsonSchema { schema, .. }) = &request.response_format {
        let value: Value = serde_json::from_str(&text).map_err(|e| {
            LlmError::response_format(
                format!("emulated JSON output is not JSON: {e}"),
                text.clone(),
            )
        })?;
        schema.validate(&value)?;
    }
    message.content = vec![ContentPart::text(text)];
    Ok(message)
}

// ── Errors ───────────────────────────────────────────────────────────

/// Maps an error `type` from the API to an [`ErrorKind`].
fn error_kind(error_type: &str, status: Option<http::StatusCode>) -> ErrorKind {
    match error_type {
        "rate_limit_error" => ErrorKind::RateLimited,
        "overloaded_error" => ErrorKind::Overloaded,
        "api_error" => ErrorKind::Server,
        "not_found_error" => ErrorKind::NotFound,
        "invalid_request_error" | "request_too_large" => ErrorKind::InvalidRequest,
        "authentication_error" | "permission_error" => ErrorKind::Authentication,
        _ => status.map_or(ErrorKind::Other, ErrorKind::from_status),
    }
}

/// An `error` event received mid-stream.
pub(crate) fn stream_error(detail: ErrorDetail) -> LlmError {
    LlmError::Provider {
        kind: error_kind(&detail.error_type, None),
        code: detail.error_type,
        message: detail.message,
    }
}

/// Map an HTTP error status and body to an [`LlmError`].
pub(crate) fn convert_error(status: http::StatusCode, body: &str) -> LlmError {
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

    let ErrorDetail {
        error_type,
        message,
    } = parsed.error;
    match status.as_u16() {
        401 | 403 => LlmError::Auth(message),
        400 => LlmError::InvalidRequest(message),
        _ => LlmError::Provider {
            kind: error_kind(&error_type, Some(status)),
            code: error_type,
            message,
        },
    }
}
