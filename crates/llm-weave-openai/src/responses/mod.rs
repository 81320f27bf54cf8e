//! The Responses API dialect.

mod convert;
mod stream;
mod types;

use std::collections::HashSet;

use llm_weave::chat::{Message, Response};
use llm_weave::embed::{EmbedRequest, EmbedResponse};
use llm_weave::error::LlmError;
use llm_weave::provider::{Capability, Request};
use llm_weave::transform::{StreamDecoder, Transform, check_request, conversation};
use serde_json::Value;

use self::stream::ResponsesDecoder;

/// Wire mapping for `POST /responses`.
///
/// Instructions and system messages are joined into the one
/// `instructions` string, so separate system messages are accepted but
/// not kept apart; tools are flat `{type: function, name, ...}` entries, tool
/// calls and results are separate input items, and JSON output goes
/// through `text.format`. Remote MCP servers are sent as `mcp` tools.
///
/// ```rust
/// use llm_weave::{McpServer, Message, Request, Transform};
/// use llm_weave_openai::ResponsesTransform;
///
/// let wire = ResponsesTransform
///     .to_wire(&Request {
///         model: "gpt-4o".into(),
///         messages: vec![Message::user("What changed in the docs?")],
///         mcp_servers: Some(vec![McpServer {
///             name: "docs".into(),
///             url: "https://mcp.example.com/sse".into(),
///             authorization: None,
///         }]),
///         ..Default::default()
///     })
///     .unwrap();
/// assert_eq!(wire["tools"][0]["type"], "mcp");
/// assert_eq!(wire["input"][0]["content"], "What changed in the docs?");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponsesTransform;

impl Transform for ResponsesTransform {
    fn name(&self) -> &'static str {
        "openai-responses"
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([
            Capability::Tools,
            Capability::StructuredOutput,
            Capability::JsonMode,
            Capability::Mcp,
            Capability::Vision,
            Capability::Documents,
            Capability::Streaming,
            Capability::Embeddings,
        ])
    }

    fn to_wire(&self, request: &Request) -> Result<Value, LlmError> {
        check_request(self, request)?;
        let body = convert::build_request(request)?;
        Ok(serde_json::to_value(body)?)
    }

    fn from_wire(&self, request: &Request, wire: Value) -> Result<Response, LlmError> {
        let reply = convert::convert_response(convert::parse_response(&wire)?)?;
        Ok(Response {
            messages: conversation(request, reply.message),
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

    fn stream_decoder(&self, _request: &Request) -> Box<dyn StreamDecoder> {
        Box::new(ResponsesDecoder::default())
    }

    fn embed_to_wire(&self, request: &EmbedRequest) -> Result<Value, LlmError> {
        crate::embed::to_wire(request)
    }

    fn embed_from_wire(
        &self,
        _request: &EmbedRequest,
        wire: Value,
    ) -> Result<EmbedResponse, LlmError> {
        crate::embed::from_wire(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_messages_merge_into_instructions() {
        assert!(!ResponsesTransform.supports(Capability::MultipleSystemMessages));
        let wire = ResponsesTransform
            .to_wire(&Request {
                model: "gpt-4o".into(),
                instructions: Some("Be brief.".into()),
                messages: vec![Message::system("Answer in French."), Message::user("Hi")],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(wire["instructions"], "Be brief.\n\nAnswer in French.");
        assert_eq!(wire["input"].as_array().map(Vec::len), Some(1));
    }
}
