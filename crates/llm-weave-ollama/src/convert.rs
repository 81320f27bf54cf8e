//! Conversion between canonical types and Ollama API types.

use std::collections::{HashMap, VecDeque};

use llm_weave::chat::{ContentPart, FinishReason, MediaSource, Message, Role, ToolCall};
use llm_weave::error::{ErrorKind, LlmError};
use llm_weave::provider::{Request, ResponseFormat, ToolChoice};
use llm_weave::usage::Usage;
use serde_json::{Value, json};
use tracing::debug;

use crate::types::{self, Conversation, ErrorResponse, FunctionCall, FunctionDef, Options, Tool};

// ── Request conversion ───────────────────────────────────────────────

/// Build an Ollama chat body. `request` has already been validated.
pub(crate) fn build_request<'a>(
    request: &'a Request,
    keep_alive: Option<&'a str>,
) -> Result<types::Request<'a>, LlmError> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    let instructions = request.instruction_parts();
    if !instructions.is_empty() {
        messages.push(types::Message {
            role: "system".into(),
            content: instructions.join("\n\n"),
            ..Default::default()
        });
    }

    let mut call_names: HashMap<&str, &str> = HashMap::new();
    for message in &request.messages {
        for call in message.requested_actions() {
            call_names.insert(call.id.as_str(), call.name.as_str());
        }
        messages.push(encode_message(message, &call_names)?);
    }

    // `none` cannot be expressed, so the tools are left out instead.
    let tools = match &request.tool_choice {
        Some(ToolChoice::None) => None,
        choice => {
            if matches!(choice, Some(ToolChoice::Required | ToolChoice::Named(_))) {
                debug!("ollama cannot force a tool call; tool choice left to the model");
            }
            request.tools.as_ref().map(|tools| {
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
            })
        }
    };

    let options = (request.temperature.is_some() || request.max_tokens.is_some()).then_some(
        Options {
            temperature: request.temperature,
            num_predict: request.max_tokens,
        },
    );

    let format = match &request.response_format {
        None | Some(ResponseFormat::Text) => None,
        Some(ResponseFormat::JsonObject) => Some(json!("json")),
        Some(ResponseFormat::JsonSchema { schema, .. }) => Some(schema.as_value().clone()),
    };

    Ok(types::Request {
        model: &request.model,
        messages,
        stream: request.stream,
        options,
        tools,
        format,
        keep_alive,
    })
}

fn encode_message(
    message: &Message,
    call_names: &HashMap<&str, &str>,
) -> Result<types::Message, LlmError> {
    let mut texts = Vec::new();
    let mut images = Vec::new();
    for part in &message.content {
        match part {
            ContentPart::Text { text } => texts.push(text.as_str()),
            ContentPart::Image {
                source: MediaSource::Base64 { data, .. },
            } => images.push(data.clone()),
            ContentPart::Image {
                source: MediaSource::Url(_),
            } => {
                return Err(LlmError::capability("ollama", "image urls"));
            }
            ContentPart::Document { .. } => {
                return Err(LlmError::capability("ollama", "documents"));
            }
        }
    }

    let tool_calls = message.has_requested_actions().then(|| {
        message
            .requested_actions()
            .iter()
            .map(|call| types::ToolCall {
                id: Some(call.id.clone()),
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect()
    });
    let tool_name = message
        .tool_call_id
        .as_deref()
        .and_then(|id| call_names.get(id))
        .map(|name| (*name).to_owned());

    Ok(types::Message {
        role: message.role.as_str().into(),
        content: texts.join("\n"),
        images: (!images.is_empty()).then_some(images),
        tool_calls,
        tool_name,
        tool_call_id: message.tool_call_id.clone(),
    })
}

// ── Reading a request body back ──────────────────────────────────────

/// Canonical messages from a body built by [`build_request`].
///
/// Instructions come back as one leading system message. Tool messages
/// without a `tool_call_id` answer the oldest unanswered call of the
/// preceding assistant turn.
pub(crate) fn decode_conversation(wire: &Value) -> Result<Vec<Message>, LlmError> {
    let body: Conversation = serde_json::from_value(wire.clone()).map_err(|e| {
        LlmError::response_format(format!("not an Ollama chat body: {e}"), wire.to_string())
    })?;

    let mut pending: VecDeque<String> = VecDeque::new();
    let mut messages = Vec::with_capacity(body.messages.len());
    for mut message in body.messages {
        let role = match message.role.as_str() {
            "system" => Role::System,
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

        let tool_call_id = if role == Role::Tool {
            match message.tool_call_id.take() {
                Some(id) => {
                    pending.retain(|p| p != &id);
                    Some(id)
                }
                None => Some(pending.pop_front().ok_or_else(|| {
                    LlmError::response_format(
                        "tool message does not answer any pending call",
                        wire.to_string(),
                    )
                })?),
            }
        } else {
            None
        };

        let calls = decode_calls(message.tool_calls.take().unwrap_or_default());
        if !calls.is_empty() {
            pending = calls.iter().map(|c| c.id.clone()).collect();
        }

        messages.push(Message {
            role,
            content: decode_content(message),
            tool_call_id,
            requested_actions: (!calls.is_empty()).then_some(calls),
        });
    }
    Ok(messages)
}

/// Text first, then images. Ollama images carry no MIME type, so it is
/// read from the payload's magic bytes.
fn decode_content(message: types::Message) -> Vec<ContentPart> {
    let mut content = Vec::new();
    if !message.content.is_empty() {
        content.push(ContentPart::text(message.content));
    }
    for data in message.images.unwrap_or_default() {
        content.push(ContentPart::Image {
            source: MediaSource::Base64 {
                media_type: sniff_media_type(&data).into(),
                data,
            },
        });
    }
    content
}

fn sniff_media_type(data: &str) -> &'static str {
    if data.starts_with("iVBOR") {
        "image/png"
    } else if data.starts_with("/9j/") {
        "image/jpeg"
    } else if data.starts_with("R0lGOD") {
        "image/gif"
    } else if data.starts_with("UklGR") {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

fn decode_calls(calls: Vec<types::ToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(index, call)| ToolCall {
            id: call
                .id
                .unwrap_or_else(|| call_id(&call.function.name, index)),
            arguments: normalize_arguments(call.function.arguments),
            name: call.function.name,
        })
        .collect()
}

/// Ollama does not identify tool calls, so ids are derived from the
/// tool name and the call's position in the message.
pub(crate) fn call_id(name: &str, index: usize) -> String {
    format!("call_{name}_{index}")
}

fn normalize_arguments(arguments: Value) -> Value {
    match arguments {
        Value::Object(_) => arguments,
        Value::Null => json!({}),
        other => {
            tracing::warn!(arguments = %other, "tool call arguments are not a JSON object");
            json!({})
        }
    }
}

// ── Response conversion ──────────────────────────────────────────────

/// The assistant message and metadata of a non-streamed response.
pub(crate) struct Reply {
    pub message: Message,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
    pub model: Option<String>,
}

/// Convert a `/api/chat` response body.
pub(crate) fn convert_response(wire: &Value) -> Result<Reply, LlmError> {
    let response: types::Response = serde_json::from_value(wire.clone()).map_err(|e| {
        LlmError::response_format(format!("Failed to parse Ollama response: {e}"), wire.to_string())
    })?;
    let Some(mut message) = response.message else {
        return Err(LlmError::response_format(
            "response has no message",
            wire.to_string(),
        ));
    };

    let calls = decode_calls(message.tool_calls.take().unwrap_or_default());
    let finish_reason = finish_reason(response.done_reason.as_deref(), !calls.is_empty());
    Ok(Reply {
        message: Message {
            requested_actions: (!calls.is_empty()).then_some(calls),
            ..Message::new(Role::Assistant, decode_content(message))
        },
        usage: convert_usage(response.prompt_eval_count, response.eval_count),
        finish_reason: Some(finish_reason),
        model: response.model,
    })
}

pub(crate) fn convert_usage(prompt_eval_count: Option<u64>, eval_count: Option<u64>) -> Usage {
    Usage::from_counts(prompt_eval_count.unwrap_or(0), eval_count.unwrap_or(0), None)
}

/// Ollama reports `stop` even when the model called tools.
pub(crate) fn finish_reason(done_reason: Option<&str>, has_calls: bool) -> FinishReason {
    if has_calls {
        return FinishReason::ToolCalls;
    }
    done_reason.map_or(FinishReason::Stop, FinishReason::parse)
}

// ── Errors ───────────────────────────────────────────────────────────

/// Convert an HTTP status and error body into an [`LlmError`].
pub(crate) fn convert_error(status: http::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map_or_else(|_| body.to_owned(), |e| e.error);

    match status.as_u16() {
        401 | 403 => LlmError::Auth(message),
        400 => LlmError::InvalidRequest(message),
        404 => LlmError::Provider {
            code: "model_not_found".into(),
            message: format!("Model not found: {message}"),
            kind: ErrorKind::NotFound,
        },
        _ => LlmError::Http {
            status: Some(status),
            message,
        },
    }
}

/// An `{"error": ...}` line received after the stream opened.
pub(crate) fn stream_error(message: String) -> LlmError {
    LlmError::Provider {
        code: "stream_error".into(),
        message,
        kind: ErrorKind::Server,
    }
}

#[cfg(test)]
mod tests {
    use llm_weave::provider::{Instructions, JsonSchema, ToolDefinition};

    use super::*;

    fn weather_tool() -> ToolDefinition {
        ToolDefinition {
            name: "get_weather".into(),
            description: "Get weather for a city".into(),
            parameters: JsonSchema::new(json!({
                "type": "object",
                "properties": {"city": {"type": "string"}},
                "required": ["city"]
            })),
        }
    }

    fn body(request: &Request) -> Value {
        serde_json::to_value(build_request(request, None).unwrap()).unwrap()
    }

    #[test]
    fn test_build_request_minimal() {
        let request = Request {
            model: "llama3.2".into(),
            messages: vec![Message::user("Hello")],
            ..Default::default()
        };
        assert_eq!(
            body(&request),
            json!({
                "model": "llama3.2",
                "messages": [{"role": "user", "content": "Hello"}],
                "stream": false
            })
        );
    }

    #[test]
    fn test_instructions_joined_into_one_system_message() {
        let request = Request {
            messages: vec![Message::system("inline"), Message::user("Hi")],
            instructions: Some(Instructions::Multiple(vec!["first".into(), "second".into()])),
            ..Default::default()
        };
        let wire = body(&request);
        assert_eq!(wire["messages"][0], json!({"role": "system", "content": "first\n\nsecond"}));
        assert_eq!(wire["messages"][1], json!({"role": "system", "content": "inline"}));
        assert_eq!(wire["messages"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_options_and_format() {
        let request = Request {
            messages: vec![Message::user("Hi")],
            temperature: Some(0.5),
            max_tokens: Some(100),
            response_format: Some(ResponseFormat::JsonObject),
            ..Default::default()
        };
        let wire = body(&request);
        assert_eq!(wire["options"], json!({"temperature": 0.5, "num_predict": 100}));
        assert_eq!(wire["format"], "json");

        let schema = json!({"type": "object", "properties": {"n": {"type": "integer"}}});
        let request = Request {
            response_format: Some(ResponseFormat::JsonSchema {
                name: "count".into(),
                schema: JsonSchema::new(schema.clone()),
                strict: true,
            }),
            ..request
        };
        assert_eq!(body(&request)["format"], schema);
    }

    #[test]
    fn test_tool_choice_none_omits_tools() {
        let mut request = Request {
            messages: vec![Message::user("Hi")],
            tools: Some(vec![weather_tool()]),
            ..Default::default()
        };
        let wire = body(&request);
        assert_eq!(wire["tools"][0]["type"], "function");
        assert_eq!(wire["tools"][0]["function"]["name"], "get_weather");

        request.tool_choice = Some(ToolChoice::None);
        assert!(body(&request).get("tools").is_none());

        request.tool_choice = Some(ToolChoice::Required);
        assert!(body(&request).get("tools").is_some());
    }

    #[test]
    fn test_images_sent_as_base64() {
        let request = Request {
            messages: vec![Message::new(
                Role::User,
                vec![
                    ContentPart::text("What's this?"),
                    ContentPart::image("data:image/png;base64,iVBORw0KGgo="),
                ],
            )],
            ..Default::default()
        };
        let wire = body(&request);
        assert_eq!(wire["messages"][0]["content"], "What's this?");
        assert_eq!(wire["messages"][0]["images"], json!(["iVBORw0KGgo="]));
        assert_eq!(decode_conversation(&wire).unwrap(), request.messages);
    }

    #[test]
    fn test_url_images_and_documents_rejected() {
        let url_image = Request {
            messages: vec![Message::new(
                Role::User,
                vec![ContentPart::image("https://example.com/cat.png")],
            )],
            ..Default::default()
        };
        let err = build_request(&url_image, None).unwrap_err();
        assert!(err.is_validation());
        assert!(matches!(
            err,
            LlmError::Capability { ref feature, .. } if feature == "image urls"
        ));

        let document = Request {
            messages: vec![Message::new(
                Role::User,
                vec![ContentPart::Document {
                    source: MediaSource::Url("https://example.com/a.pdf".into()),
                    filename: None,
                }],
            )],
            ..Default::default()
        };
        assert!(matches!(
            build_request(&document, None).unwrap_err(),
            LlmError::Capability { ref feature, .. } if feature == "documents"
        ));
    }

    #[test]
    fn test_tool_messages_carry_name_and_id() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "get_weather".into(),
            arguments: json!({"city": "Tokyo"}),
        };
        let request = Request {
            messages: vec![
                Message::user("Weather?"),
                Message::assistant_calls(vec![call]),
                Message::tool("call_1", "Sunny"),
            ],
            tools: Some(vec![weather_tool()]),
            ..Default::default()
        };
        let wire = body(&request);
        assert_eq!(
            wire["messages"][1],
            json!({
                "role": "assistant",
                "content": "",
                "tool_calls": [{"id": "call_1", "function": {"name": "get_weather", "arguments": {"city": "Tokyo"}}}]
            })
        );
        assert_eq!(
            wire["messages"][2],
            json!({"role": "tool", "content": "Sunny", "tool_name": "get_weather", "tool_call_id": "call_1"})
        );
    }

    #[test]
    fn test_decode_pairs_tool_messages_without_ids() {
        let wire = json!({
            "messages": [
                {"role": "user", "content": "Weather in two cities?"},
                {"role": "assistant", "content": "", "tool_calls": [
                    {"function": {"name": "get_weather", "arguments": {"city": "Tokyo"}}},
                    {"function": {"name": "get_weather", "arguments": {"city": "Paris"}}}
                ]},
                {"role": "tool", "content": "Sunny", "tool_name": "get_weather"},
                {"role": "tool", "content": "Rain", "tool_name": "get_weather"}
            ]
        });
        let messages = decode_conversation(&wire).unwrap();
        let ids: Vec<_> = messages[1].requested_actions().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["call_get_weather_0", "call_get_weather_1"]);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_get_weather_0"));
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_get_weather_1"));
    }

    #[test]
    fn test_decode_orphan_tool_message_fails() {
        let wire = json!({"messages": [{"role": "tool", "content": "Sunny"}]});
        assert!(matches!(
            decode_conversation(&wire).unwrap_err(),
            LlmError::ResponseFormat { .. }
        ));
    }

    #[test]
    fn test_convert_response_text() {
        let reply = convert_response(&json!({
            "model": "llama3.2",
            "message": {"role": "assistant", "content": "Hello!"},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 10,
            "eval_count": 5
        }))
        .unwrap();
        assert_eq!(reply.message, Message::assistant("Hello!"));
        assert_eq!(reply.usage, Usage::from_counts(10, 5, None));
        assert_eq!(reply.usage.total_tokens, 15);
        assert_eq!(reply.finish_reason, Some(FinishReason::Stop));
        assert_eq!(reply.model.as_deref(), Some("llama3.2"));
    }

    #[test]
    fn test_convert_response_tool_calls() {
        let reply = convert_response(&json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "get_weather", "arguments": {"city": "Tokyo"}}}]
            },
            "done": true,
            "done_reason": "stop"
        }))
        .unwrap();
        assert!(reply.message.content.is_empty());
        let calls = reply.message.requested_actions();
        assert_eq!(calls[0].id, "call_get_weather_0");
        assert_eq!(calls[0].arguments, json!({"city": "Tokyo"}));
        assert_eq!(reply.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(reply.usage, Usage::default());
    }

    #[test]
    fn test_finish_reason() {
        assert_eq!(finish_reason(Some("length"), false), FinishReason::Length);
        assert_eq!(finish_reason(None, false), FinishReason::Stop);
        assert_eq!(finish_reason(Some("stop"), true), FinishReason::ToolCalls);
    }

    #[test]
    fn test_sniff_media_type() {
        assert_eq!(sniff_media_type("/9j/4AAQ"), "image/jpeg");
        assert_eq!(sniff_media_type("R0lGODlh"), "image/gif");
        assert_eq!(sniff_media_type("AAAA"), "application/octet-stream");
    }

    #[test]
    fn test_convert_error() {
        let err = convert_error(
            http::StatusCode::NOT_FOUND,
            r#"{"error": "model 'nope' not found"}"#,
        );
        assert!(matches!(err, LlmError::Provider { ref message, .. } if message.contains("nope")));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = convert_error(http::StatusCode::BAD_REQUEST, r#"{"error": "bad format"}"#);
        assert!(matches!(err, LlmError::InvalidRequest(ref m) if m == "bad format"));

        let err = convert_error(http::StatusCode::SERVICE_UNAVAILABLE, "loading model");
        assert!(matches!(err, LlmError::Http { ref message, .. } if message == "loading model"));
        assert!(err.is_retryable());
    }
}
