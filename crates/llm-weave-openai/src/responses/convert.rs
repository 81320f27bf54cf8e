//! Conversion between canonical types and Responses API wire types.

use llm_weave::chat::{ContentPart, FinishReason, MediaSource, Message, Role, ToolCall};
use llm_weave::error::LlmError;
use llm_weave::provider::{Request, ResponseFormat, ToolChoice};
use llm_weave::transform::{collapse_text, parse_arguments};
use llm_weave::usage::Usage;
use serde_json::{Value, json};
use tracing::debug;

use super::types::{
    self, Conversation, FormatParam, InputItem, ItemContent, OutputItem, TextParam, ToolParam,
};

/// Separator between hoisted instruction parts.
const INSTRUCTION_SEPARATOR: &str = "\n\n";

// ── Request conversion ───────────────────────────────────────────────

/// Build the request body. `request` has already been validated.
pub(crate) fn build_request(request: &Request) -> Result<types::Request<'_>, LlmError> {
    let mut instructions: Vec<String> = request
        .instruction_parts()
        .into_iter()
        .map(str::to_owned)
        .collect();
    let mut input = Vec::new();
    for message in &request.messages {
        match message.role {
            Role::System => instructions.push(message.text()),
            _ => encode_message(message, &mut input)?,
        }
    }

    let mut tools: Vec<ToolParam<'_>> = request
        .tools()
        .iter()
        .map(|t| ToolParam::Function {
            name: &t.name,
            description: &t.description,
            parameters: t.parameters.as_value(),
        })
        .collect();
    tools.extend(request.mcp_servers().iter().map(|s| ToolParam::Mcp {
        server_label: &s.name,
        server_url: &s.url,
        authorization: s.authorization.as_deref(),
        require_approval: "never",
    }));

    Ok(types::Request {
        model: &request.model,
        input,
        instructions: (!instructions.is_empty()).then(|| instructions.join(INSTRUCTION_SEPARATOR)),
        temperature: request.temperature,
        max_output_tokens: request.max_tokens,
        stream: request.stream.then_some(true),
        tools: (!tools.is_empty()).then_some(tools),
        tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
        text: request
            .response_format
            .as_ref()
            .and_then(convert_format)
            .map(|format| TextParam { format }),
    })
}

/// Tool calls follow the assistant's message as separate items; tool
/// results are `function_call_output` items.
fn encode_message(message: &Message, input: &mut Vec<InputItem>) -> Result<(), LlmError> {
    match message.role {
        Role::Tool => input.push(InputItem::FunctionCallOutput {
            call_id: message.tool_call_id.clone().unwrap_or_default(),
            output: message.text(),
        }),
        Role::Assistant => {
            if !message.content.is_empty() {
                input.push(InputItem::Message {
                    role: "assistant".into(),
                    content: encode_content(&message.content, true),
                });
            }
            for call in message.requested_actions() {
                input.push(InputItem::FunctionCall {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: serde_json::to_string(&call.arguments)?,
                });
            }
        }
        Role::User | Role::System => input.push(InputItem::Message {
            role: message.role.as_str().into(),
            content: encode_content(&message.content, false),
        }),
    }
    Ok(())
}

fn encode_content(parts: &[ContentPart], assistant: bool) -> ItemContent {
    if let Some(text) = collapse_text(parts) {
        return ItemContent::Text(text.to_owned());
    }
    ItemContent::Parts(
        parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } if assistant => {
                    types::ContentPart::OutputText { text: text.clone() }
                }
                ContentPart::Text { text } => types::ContentPart::InputText { text: text.clone() },
                ContentPart::Image { source } => types::ContentPart::InputImage {
                    image_url: source.to_url(),
                },
                ContentPart::Document { source, filename } => {
                    let (file_data, file_url) = match source {
                        MediaSource::Url(url) => (None, Some(url.clone())),
                        base64 @ MediaSource::Base64 { .. } => (Some(base64.to_url()), None),
                    };
                    types::ContentPart::InputFile {
                        filename: filename.clone(),
                        file_data,
                        file_url,
                    }
                }
            })
            .collect(),
    )
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Required => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Named(name) => json!({"type": "function", "name": name}),
    }
}

fn convert_format(format: &ResponseFormat) -> Option<FormatParam<'_>> {
    match format {
        ResponseFormat::Text => None,
        ResponseFormat::JsonObject => Some(FormatParam::JsonObject),
        ResponseFormat::JsonSchema {
            name,
            schema,
            strict,
        } => Some(FormatParam::JsonSchema {
            name,
            schema: schema.as_value(),
            strict: *strict,
        }),
    }
}

// ── Reading a request body back ──────────────────────────────────────

/// Canonical messages from a body built by [`build_request`].
///
/// `instructions` comes back as one leading system message. Function
/// calls rejoin the assistant message just before them.
pub(crate) fn decode_conversation(wire: &Value) -> Result<Vec<Message>, LlmError> {
    let body: Conversation = serde_json::from_value(wire.clone()).map_err(|e| {
        LlmError::response_format(format!("not a responses body: {e}"), wire.to_string())
    })?;

    let mut messages: Vec<Message> = body.instructions.into_iter().map(Message::system).collect();
    for item in body.input {
        match item {
            InputItem::Message { role, content } => {
                let role = match role.as_str() {
                    "system" | "developer" => Role::System,
                    "user" => Role::User,
                    "assistant" => Role::Assistant,
                    other => {
                        return Err(LlmError::response_format(
                            format!("unknown message role `{other}`"),
                            other.to_owned(),
                        ));
                    }
                };
                messages.push(Message::new(role, decode_content(content)));
            }
            InputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => push_call(
                &mut messages,
                ToolCall {
                    arguments: parse_arguments(&name, &arguments),
                    id: call_id,
                    name,
                },
            ),
            InputItem::FunctionCallOutput { call_id, output } => {
                messages.push(Message::tool(call_id, output));
            }
        }
    }
    Ok(messages)
}

fn push_call(messages: &mut Vec<Message>, call: ToolCall) {
    match messages.last_mut() {
        Some(last) if last.role == Role::Assistant => {
            last.requested_actions.get_or_insert_with(Vec::new).push(call);
        }
        _ => messages.push(Message::assistant_calls(vec![call])),
    }
}

fn decode_content(content: ItemContent) -> Vec<ContentPart> {
    match content {
        ItemContent::Text(text) => vec![ContentPart::Text { text }],
        ItemContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                types::ContentPart::InputText { text }
                | types::ContentPart::OutputText { text } => Some(ContentPart::Text { text }),
                types::ContentPart::InputImage { image_url } => Some(ContentPart::Image {
                    source: MediaSource::parse(&image_url),
                }),
                types::ContentPart::InputFile {
                    filename,
                    file_data,
                    file_url,
                } => file_data.or(file_url).map(|raw| ContentPart::Document {
                    source: MediaSource::parse(&raw),
                    filename,
                }),
            })
            .collect(),
    }
}

// ── Response conversion ──────────────────────────────────────────────

/// The assistant message and metadata of a response object.
pub(crate) struct Reply {
    pub message: Message,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
    pub id: Option<String>,
    pub model: Option<String>,
}

pub(crate) fn parse_response(wire: &Value) -> Result<types::Response, LlmError> {
    serde_json::from_value(wire.clone()).map_err(|e| {
        LlmError::response_format(
            format!("Failed to parse OpenAI Responses response: {e}"),
            wire.to_string(),
        )
    })
}

pub(crate) fn convert_response(response: types::Response) -> Result<Reply, LlmError> {
    if let Some(error) = response.error {
        return Err(crate::convert::stream_error(error));
    }

    let mut content = Vec::new();
    let mut calls = Vec::new();
    for item in &response.output {
        match item.item_type.as_str() {
            "message" => content.extend(item.content.iter().filter_map(|c| {
                match c.content_type.as_str() {
                    "output_text" => c.text.clone().map(ContentPart::text),
                    "refusal" => c.refusal.clone().map(ContentPart::text),
                    _ => None,
                }
            })),
            "function_call" => calls.push(output_call(item)),
            other => debug!(item_type = other, "skipping output item"),
        }
    }

    let finish_reason = finish_reason(&response, !calls.is_empty());
    Ok(Reply {
        message: Message {
            requested_actions: (!calls.is_empty()).then_some(calls),
            ..Message::new(Role::Assistant, content)
        },
        usage: response.usage.as_ref().map(convert_usage).unwrap_or_default(),
        finish_reason,
        id: response.id,
        model: response.model,
    })
}

pub(crate) fn output_call(item: &OutputItem) -> ToolCall {
    let name = item.name.clone().unwrap_or_default();
    ToolCall {
        arguments: parse_arguments(&name, item.arguments.as_deref().unwrap_or_default()),
        id: item.call_id.clone().unwrap_or_default(),
        name,
    }
}

/// Responses carry a status, not a stop reason.
pub(crate) fn finish_reason(response: &types::Response, has_calls: bool) -> Option<FinishReason> {
    match response.status.as_deref()? {
        "completed" if has_calls => Some(FinishReason::ToolCalls),
        "incomplete" => Some(
            response
                .incomplete_details
                .as_ref()
                .and_then(|d| d.reason.as_deref())
                .map_or(FinishReason::Length, FinishReason::parse),
        ),
        other => Some(FinishReason::parse(other)),
    }
}

pub(crate) fn convert_usage(usage: &types::ResponseUsage) -> Usage {
    Usage::from_counts(usage.input_tokens, usage.output_tokens, usage.total_tokens)
        .with_cached(
            usage
                .input_tokens_details
                .as_ref()
                .and_then(|d| d.cached_tokens),
        )
        .with_reasoning(
            usage
                .output_tokens_details
                .as_ref()
                .and_then(|d| d.reasoning_tokens),
        )
}
