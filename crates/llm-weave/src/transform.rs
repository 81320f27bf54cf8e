//! The per-provider wire mapping.
//!
//! A [`Transform`] is a stateless translator between the canonical model
//! and one provider dialect. It never touches the network: the paired
//! [`Provider`](crate::Provider) moves the JSON it produces.
//!
//! Every transform obeys the round-trip law
//! `decode_messages(to_wire(r)) ≈ r.messages`: the messages it encodes
//! can be read back without loss, modulo the dialect's documented
//! normalizations (system messages hoisted, same-role turns grouped, and
//! so on).

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::chat::{ContentPart, Message, Response};
use crate::embed::{EmbedRequest, EmbedResponse};
use crate::error::LlmError;
use crate::provider::{Capability, Request};
use crate::stream::{StreamEvent, StreamOutcome};

/// Bidirectional mapping between canonical types and one wire dialect.
pub trait Transform: Send + Sync {
    /// Dialect name, used in errors and instrumentation.
    fn name(&self) -> &'static str;

    /// Features this dialect can express.
    fn capabilities(&self) -> HashSet<Capability>;

    /// Shorthand for `capabilities().contains(..)`.
    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Validates `request` and encodes it as a wire body.
    fn to_wire(&self, request: &Request) -> Result<Value, LlmError>;

    /// Decodes a non-streamed wire response.
    ///
    /// The returned conversation is `request.messages` followed by the
    /// assistant reply.
    fn from_wire(&self, request: &Request, wire: Value) -> Result<Response, LlmError>;

    /// Reads canonical messages back out of a wire body built by
    /// [`to_wire`](Self::to_wire).
    fn decode_messages(&self, wire: &Value) -> Result<Vec<Message>, LlmError>;

    /// Fresh per-stream state for decoding the events answering `request`.
    fn stream_decoder(&self, request: &Request) -> Box<dyn StreamDecoder>;

    /// Turns an accumulated stream into a response.
    ///
    /// Dialects that emulate features (Anthropic's JSON priming) override
    /// this to post-process the message.
    fn finish_stream(
        &self,
        request: &Request,
        outcome: StreamOutcome,
    ) -> Result<Response, LlmError> {
        Ok(Response {
            messages: conversation(request, outcome.message),
            usage: outcome.usage,
            finish_reason: outcome.finish_reason,
            id: outcome.id,
            model: outcome.model,
            raw_request: Value::Null,
            raw_response: Value::Null,
        })
    }

    /// Encodes an embeddings request.
    fn embed_to_wire(&self, request: &EmbedRequest) -> Result<Value, LlmError> {
        let _ = request;
        Err(LlmError::capability(self.name(), "embeddings"))
    }

    /// Decodes an embeddings response.
    fn embed_from_wire(
        &self,
        request: &EmbedRequest,
        wire: Value,
    ) -> Result<EmbedResponse, LlmError> {
        let _ = (request, wire);
        Err(LlmError::capability(self.name(), "embeddings"))
    }
}

/// Per-stream state turning wire events into canonical [`StreamEvent`]s.
pub trait StreamDecoder: Send {
    /// Decodes one wire event into zero or more canonical events.
    fn decode(&mut self, event: Value) -> Result<Vec<StreamEvent>, LlmError>;
}

/// Runs [`Request::validate`] and rejects features the dialect lacks.
pub fn check_request(transform: &dyn Transform, request: &Request) -> Result<(), LlmError> {
    request.validate()?;
    if !request.mcp_servers().is_empty() && !transform.supports(Capability::Mcp) {
        return Err(LlmError::capability(transform.name(), "mcp_servers"));
    }
    if !request.tools().is_empty() && !transform.supports(Capability::Tools) {
        return Err(LlmError::capability(transform.name(), "tools"));
    }
    Ok(())
}

/// `request.messages` followed by `assistant`.
pub fn conversation(request: &Request, assistant: Message) -> Vec<Message> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.extend(request.messages.iter().cloned());
    messages.push(assistant);
    messages
}

/// The text of `content` when it is exactly one text part.
pub fn collapse_text(content: &[ContentPart]) -> Option<&str> {
    match content {
        [ContentPart::Text { text }] => Some(text),
        _ => None,
    }
}

/// Parses tool-call arguments accumulated as a JSON string.
///
/// Empty input is `{}`. Anything that is not a JSON object is logged and
/// replaced by `{}` so a malformed fragment never fails the generation.
pub fn parse_arguments(tool: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(args @ Value::Object(_)) => args,
        Ok(_) | Err(_) => {
            tracing::warn!(tool, raw, "tool call arguments are not a JSON object");
            Value::Object(Map::new())
        }
    }
}

/// Reads a string field, `None` when absent or not a string.
pub fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::McpServer;
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("f", ""), json!({}));
        assert_eq!(parse_arguments("f", "{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_arguments("f", "[1]"), json!({}));
        assert_eq!(parse_arguments("f", "{\"a\":"), json!({}));
    }

    #[test]
    fn test_collapse_text() {
        assert_eq!(collapse_text(&[ContentPart::text("hi")]), Some("hi"));
        assert_eq!(
            collapse_text(&[ContentPart::text("a"), ContentPart::text("b")]),
            None
        );
        assert_eq!(collapse_text(&[]), None);
    }

    #[test]
    fn test_conversation_appends() {
        let request = Request {
            messages: vec![Message::user("q")],
            ..Default::default()
        };
        let messages = conversation(&request, Message::assistant("a"));
        assert_eq!(messages, vec![Message::user("q"), Message::assistant("a")]);
    }

    #[test]
    fn test_check_request_rejects_mcp_without_support() {
        let transform = crate::mock::MockTransform::without(Capability::Mcp);
        let request = Request {
            mcp_servers: Some(vec![McpServer {
                name: "docs".into(),
                url: "https://mcp.example.com".into(),
                authorization: None,
            }]),
            ..Default::default()
        };
        let err = check_request(&transform, &request).unwrap_err();
        assert!(matches!(err, LlmError::Capability { ref feature, .. } if feature == "mcp_servers"));
    }
}
