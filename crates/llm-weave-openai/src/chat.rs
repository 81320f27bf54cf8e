//! The Chat Completions dialect.

use std::collections::HashSet;

use llm_weave::chat::{Message, Response};
use llm_weave::embed::{EmbedRequest, EmbedResponse};
use llm_weave::error::LlmError;
use llm_weave::provider::{Capability, Request};
use llm_weave::transform::{StreamDecoder, Transform, check_request, conversation};
use serde_json::Value;

use crate::stream::ChatDecoder;
use crate::{convert, embed};

/// Role used on the wire for instructions and system messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemRole {
    /// `"developer"`, what current `OpenAI` models expect.
    #[default]
    Developer,
    /// `"system"`, for compatible APIs that predate `developer`.
    System,
}

impl SystemRole {
    /// The wire role name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Developer => "developer",
            Self::System => "system",
        }
    }
}

/// Wire mapping for `POST /chat/completions`.
///
/// Instructions become discrete messages ahead of the conversation and
/// system messages keep their position, both under the configured
/// [`SystemRole`]. Single-text content is sent as a bare string and
/// tools use the nested `{type: function, function: {...}}` shape. JSON
/// output is native (`response_format`). MCP servers are not
/// supported.
///
/// The same mapping serves OpenAI-compatible APIs; see
/// [`with_name`](Self::with_name) and
/// [`with_system_role`](Self::with_system_role).
///
/// ```rust
/// use llm_weave::{Message, Request, Transform};
/// use llm_weave_openai::ChatTransform;
///
/// let wire = ChatTransform::new()
///     .to_wire(&Request {
///         model: "gpt-4o".into(),
///         messages: vec![Message::system("be brief"), Message::user("Hello")],
///         ..Default::default()
///     })
///     .unwrap();
/// assert_eq!(wire["messages"][0]["role"], "developer");
/// assert_eq!(wire["messages"][1]["content"], "Hello");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatTransform {
    name: &'static str,
    system_role: SystemRole,
}

impl ChatTransform {
    /// The `OpenAI` mapping: named `"openai"`, `developer` system role.
    pub fn new() -> Self {
        Self {
            name: "openai",
            system_role: SystemRole::Developer,
        }
    }

    /// Renames the dialect as reported in errors and instrumentation.
    #[must_use]
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Sets the role used for instructions and system messages.
    #[must_use]
    pub fn with_system_role(mut self, role: SystemRole) -> Self {
        self.system_role = role;
        self
    }
}

impl Default for ChatTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for ChatTransform {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([
            Capability::Tools,
            Capability::StructuredOutput,
            Capability::JsonMode,
            Capability::Vision,
            Capability::Documents,
            Capability::MultipleSystemMessages,
            Capability::Streaming,
            Capability::Embeddings,
        ])
    }

    fn to_wire(&self, request: &Request) -> Result<Value, LlmError> {
        check_request(self, request)?;
        let body = convert::build_request(request, self.system_role)?;
        Ok(serde_json::to_value(body)?)
    }

    fn from_wire(&self, request: &Request, wire: Value) -> Result<Response, LlmError> {
        let reply = convert::convert_response(&wire)?;
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
        Box::new(ChatDecoder::default())
    }

    fn embed_to_wire(&self, request: &EmbedRequest) -> Result<Value, LlmError> {
        embed::to_wire(request)
    }

    fn embed_from_wire(
        &self,
        _request: &EmbedRequest,
        wire: Value,
    ) -> Result<EmbedResponse, LlmError> {
        embed::from_wire(wire)
    }
}
