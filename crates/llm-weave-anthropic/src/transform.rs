//! The Anthropic Messages dialect.

use std::collections::HashSet;

use llm_weave::chat::{Message, Response};
use llm_weave::error::LlmError;
use llm_weave::provider::{Capability, Request};
use llm_weave::stream::StreamOutcome;
use llm_weave::transform::{StreamDecoder, Transform, check_request, conversation};
use serde_json::Value;

use crate::convert;
use crate::stream::AnthropicDecoder;

/// Wire mapping for `POST /v1/messages`.
///
/// Normalizations applied by [`to_wire`](Transform::to_wire):
///
/// - instructions and system messages are hoisted into `system`
///   (a string for one part, a text-block array for several);
/// - consecutive messages of the same role share one turn, and tool
///   results ride in user turns;
/// - a turn holding a single text block is sent as a bare string;
/// - JSON output is emulated: a format instruction is appended to
///   `system` and an assistant turn primes the answer with `{`, which
///   [`from_wire`](Transform::from_wire) and the stream decoder put
///   back.
///
/// ```rust
/// use llm_weave::{Message, Request, Transform};
/// use llm_weave_anthropic::AnthropicTransform;
///
/// let transform = AnthropicTransform::default();
/// let wire = transform
///     .to_wire(&Request {
///         model: "claude-sonnet-4-20250514".into(),
///         messages: vec![Message::user("Hello")],
///         ..Default::default()
///     })
///     .unwrap();
/// assert_eq!(wire["messages"][0]["content"], "Hello");
/// assert_eq!(wire["max_tokens"], 4096);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnthropicTransform {
    max_tokens: u32,
}

impl AnthropicTransform {
    /// A transform sending `max_tokens` when the request sets none.
    pub fn new(max_tokens: u32) -> Self {
        Self { max_tokens }
    }
}

impl Default for AnthropicTransform {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl Transform for AnthropicTransform {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([
            Capability::Tools,
            Capability::JsonMode,
            Capability::Mcp,
            Capability::Vision,
            Capability::Documents,
            Capability::MultipleSystemMessages,
            Capability::Streaming,
        ])
    }

    fn to_wire(&self, request: &Request) -> Result<Value, LlmError> {
        check_request(self, request)?;
        let body = convert::build_request(request, self.max_tokens)?;
        Ok(serde_json::to_value(body)?)
    }

    fn from_wire(&self, request: &Request, wire: Value) -> Result<Response, LlmError> {
        let reply = convert::convert_response(&wire)?;
        let message = convert::complete_json(request, reply.message)?;
        Ok(Response {
            messages: conversation(request, message),
            usage: reply.usage,
            finish_reason: reply.finish_reason,
            id: reply.id,
            model: reply.model,
            raw_request: Value::Null,
            raw_response: wire,
        })
    }

    fn decode_messages(&self, wire: &Value) -> Result<Vec<Message>, LlmError> {
        convert::decode_conversation(wire)
    }

    fn stream_decoder(&self, request: &Request) -> Box<dyn StreamDecoder> {
        if request.wants_json() {
            Box::new(AnthropicDecoder::primed())
        } else {
            Box::new(AnthropicDecoder::default())
        }
    }

    fn finish_stream(
        &self,
        request: &Request,
        outcome: StreamOutcome,
    ) -> Result<Response, LlmError> {
        let message = convert::check_json(request, outcome.message)?;
        Ok(Response {
            messages: conversation(request, message),
            usage: outcome.usage,
            finish_reason: outcome.finish_reason,
            id: outcome.id,
            model: outcome.model,
            raw_request: Value::Null,
            raw_response: Value::Null,
        })
    }
}
