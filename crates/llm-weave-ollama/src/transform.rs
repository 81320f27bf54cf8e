//! The Ollama chat dialect.

use std::collections::HashSet;

use llm_weave::chat::{Message, Response};
use llm_weave::embed::{EmbedRequest, EmbedResponse};
use llm_weave::error::LlmError;
use llm_weave::provider::{Capability, Request};
use llm_weave::transform::{StreamDecoder, Transform, check_request, conversation};
use serde_json::Value;

use crate::stream::OllamaDecoder;
use crate::{convert, embed};

/// Wire mapping for `POST /api/chat` and `POST /api/embed`.
///
/// Normalizations applied by [`to_wire`](Transform::to_wire):
///
/// - instructions become one leading `system` message, joined with a
///   blank line; system messages stay in place;
/// - message content is a plain string, with images as base64 in
///   `images`; several text parts are joined with a newline and read
///   back as one part;
/// - a `none` tool choice omits the tools, and forced choices fall back
///   to letting the model decide;
/// - JSON output uses `format`: `"json"` or the schema itself.
///
/// Documents, URL images and MCP servers are rejected as unsupported
/// capabilities.
///
/// ```rust
/// use llm_weave::{Message, Request, ResponseFormat, Transform};
/// use llm_weave_ollama::OllamaTransform;
///
/// let wire = OllamaTransform::new()
///     .to_wire(&Request {
///         model: "llama3.2".into(),
///         messages: vec![Message::user("List three colors")],
///         response_format: Some(ResponseFormat::JsonObject),
///         ..Default::default()
///     })
///     .unwrap();
/// assert_eq!(wire["format"], "json");
/// assert_eq!(wire["stream"], false);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OllamaTransform {
    keep_alive: Option<String>,
}

impl OllamaTransform {
    /// A transform leaving `keep_alive` to the server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `keep_alive` with every chat and embeddings body.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }
}

impl Transform for OllamaTransform {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([
            Capability::Tools,
            Capability::StructuredOutput,
            Capability::JsonMode,
            Capability::Vision,
            Capability::MultipleSystemMessages,
            Capability::Streaming,
            Capability::Embeddings,
        ])
    }

    fn to_wire(&self, request: &Request) -> Result<Value, LlmError> {
        check_request(self, request)?;
        let body = convert::build_request(request, self.keep_alive.as_deref())?;
        Ok(serde_json::to_value(body)?)
    }

    fn from_wire(&self, request: &Request, wire: Value) -> Result<Response, LlmError> {
        let reply = convert::convert_response(&wire)?;
        Ok(Response {
            messages: conversation(request, reply.message),
            usage: reply.usage,
            finish_reason: reply.finish_reason,
            id: None,
            model: reply.model,
            raw_request: Value::Null,
            raw_response: wire,
        })
    }

    fn decode_messages(&self, wire: &Value) -> Result<Vec<Message>, LlmError> {
        convert::decode_conversation(wire)
    }

    fn stream_decoder(&self, _request: &Request) -> Box<dyn StreamDecoder> {
        Box::new(OllamaDecoder::default())
    }

    fn embed_to_wire(&self, request: &EmbedRequest) -> Result<Value, LlmError> {
        embed::to_wire(request, self.keep_alive.as_deref())
    }

    fn embed_from_wire(
        &self,
        request: &EmbedRequest,
        wire: Value,
    ) -> Result<EmbedResponse, LlmError> {
        embed::from_wire(request, wire)
    }
}
