//! Pre-built helpers for testing transforms and providers.
//!
//! Available when the `test-utils` feature is enabled, so provider
//! crates reuse them in their own suites. Also compiled during
//! `#[cfg(test)]` for this crate's tests.

use futures::StreamExt;
use serde_json::{Value, json};

use crate::chat::{Message, Response, ToolCall};
use crate::error::LlmError;
use crate::provider::{JsonSchema, Request, ToolDefinition};
use crate::stream::{StreamAccumulator, StreamEvent, WireStream};
use crate::transform::Transform;

/// A request holding one user message.
pub fn user_request(model: &str, text: &str) -> Request {
    Request {
        model: model.into(),
        messages: vec![Message::user(text)],
        ..Default::default()
    }
}

/// The `get_weather` tool used across scenario tests.
pub fn weather_tool() -> ToolDefinition {
    ToolDefinition {
        name: "get_weather".into(),
        description: "Get the current weather for a location".into(),
        parameters: JsonSchema::new(json!({
            "type": "object",
            "properties": {"location": {"type": "string"}},
            "required": ["location"]
        })),
    }
}

/// A `get_weather` call for Boston.
pub fn weather_call(id: &str) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: "get_weather".into(),
        arguments: json!({"location": "Boston"}),
    }
}

/// A full tool cycle: question, tool request, tool answer.
pub fn weather_cycle(model: &str) -> Request {
    Request {
        model: model.into(),
        messages: vec![
            Message::user("What's the weather in Boston?"),
            Message::assistant_calls(vec![weather_call("call_1")]),
            Message::tool("call_1", "Sunny, 22C"),
        ],
        tools: Some(vec![weather_tool()]),
        ..Default::default()
    }
}

/// Encodes `request` and reads its messages back.
pub fn round_trip(transform: &dyn Transform, request: &Request) -> Result<Vec<Message>, LlmError> {
    let wire = transform.to_wire(request)?;
    transform.decode_messages(&wire)
}

/// Decodes the wire events answering `request` with a fresh decoder,
/// panicking on errors.
pub fn decode_events(
    transform: &dyn Transform,
    request: &Request,
    events: &[Value],
) -> Vec<StreamEvent> {
    let mut decoder = transform.stream_decoder(request);
    events
        .iter()
        .flat_map(|event| {
            decoder
                .decode(event.clone())
                .expect("wire event should decode")
        })
        .collect()
}

/// Runs wire events through decoder, accumulator and `finish_stream`.
pub fn accumulate(
    transform: &dyn Transform,
    request: &Request,
    events: &[Value],
) -> Result<Response, LlmError> {
    let mut accumulator = StreamAccumulator::new();
    for event in decode_events(transform, request, events) {
        accumulator.push(&event, &[])?;
    }
    transform.finish_stream(request, accumulator.finish())
}

/// Collects a wire stream, panicking on any error.
pub async fn collect_wire(stream: WireStream) -> Vec<Value> {
    stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|r| r.expect("wire event should be Ok"))
        .collect()
}

/// Renders events as a server-sent-events body, each under its `type`
/// as the event name.
pub fn sse_body(events: &[Value]) -> String {
    let mut body = String::new();
    for event in events {
        if let Some(name) = event.get("type").and_then(Value::as_str) {
            body.push_str("event: ");
            body.push_str(name);
            body.push('\n');
        }
        body.push_str("data: ");
        body.push_str(&event.to_string());
        body.push_str("\n\n");
    }
    body
}

/// Renders events as newline-delimited JSON.
pub fn json_lines_body(events: &[Value]) -> String {
    events.iter().map(|e| format!("{e}\n")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::FinishReason;
    use crate::mock::MockTransform;

    #[test]
    fn test_weather_cycle_is_valid() {
        assert!(weather_cycle("m").validate().is_ok());
    }

    #[test]
    fn test_round_trip_with_mock() {
        let request = weather_cycle("m");
        let messages = round_trip(&MockTransform::new(), &request).unwrap();
        assert_eq!(messages, request.messages);
    }

    #[test]
    fn test_accumulate_mock_events() {
        let events = [
            json!({"type": "text_delta", "text": "Hi"}),
            json!({"type": "finish", "reason": "stop"}),
        ];
        let response =
            accumulate(&MockTransform::new(), &user_request("m", "hello"), &events).unwrap();
        assert_eq!(response.text(), "Hi");
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn test_sse_body_names_events() {
        let body = sse_body(&[json!({"type": "ping"})]);
        assert_eq!(body, "event: ping\ndata: {\"type\":\"ping\"}\n\n");
    }

    #[test]
    fn test_json_lines_body() {
        assert_eq!(json_lines_body(&[json!({"a": 1}), json!(2)]), "{\"a\":1}\n2\n");
    }
}
