//! The `OpenRouter` dialect: Chat Completions plus routing extensions.

use std::collections::HashSet;

use llm_weave::chat::{Message, Response};
use llm_weave::error::LlmError;
use llm_weave::provider::{Capability, Request};
use llm_weave::stream::StreamOutcome;
use llm_weave::transform::{StreamDecoder, Transform};
use llm_weave_openai::{ChatTransform, SystemRole};
use serde_json::Value;

use crate::config::ProviderRouting;

/// Wire mapping for `OpenRouter`'s `POST /chat/completions`.
///
/// Messages, tools and JSON output follow the `OpenAI` chat mapping,
/// with instructions and system messages sent under the `system` role.
/// On top of that the body carries:
///
/// - `max_tokens` instead of `max_completion_tokens`;
/// - `provider`, the upstream routing preferences;
/// - `models`, the fallback list, when one is configured.
///
/// Embeddings and MCP servers are not supported.
///
/// ```rust
/// use llm_weave::{Message, Request, Transform};
/// use llm_weave_openrouter::OpenRouterTransform;
///
/// let transform = OpenRouterTransform::new()
///     .with_fallback_models(vec!["mistralai/mistral-large".into()]);
/// let wire = transform
///     .to_wire(&Request {
///         model: "openai/gpt-4o".into(),
///         messages: vec![Message::user("Hello")],
///         max_tokens: Some(100),
///         ..Default::default()
///     })
///     .unwrap();
/// assert_eq!(wire["models"][0], "mistralai/mistral-large");
/// assert_eq!(wire["max_tokens"], 100);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRouterTransform {
    chat: ChatTransform,
    routing: Option<ProviderRouting>,
    fallback_models: Vec<String>,
    max_tokens: Option<u32>,
}

impl OpenRouterTransform {
    /// A transform with no routing preferences or fallbacks.
    pub fn new() -> Self {
        Self {
            chat: ChatTransform::new()
                .with_name("openrouter")
                .with_system_role(SystemRole::System),
            routing: None,
            fallback_models: Vec::new(),
            max_tokens: None,
        }
    }

    /// Sets the upstream routing preferences.
    #[must_use]
    pub fn with_routing(mut self, routing: ProviderRouting) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Sets the models tried when the requested one is unavailable.
    #[must_use]
    pub fn with_fallback_models(mut self, models: Vec<String>) -> Self {
        self.fallback_models = models;
        self
    }

    /// Sets the completion budget used when a request sets none.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

impl Default for OpenRouterTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for OpenRouterTransform {
    fn name(&self) -> &'static str {
        self.chat.name()
    }

    fn capabilities(&self) -> HashSet<Capability> {
        let mut capabilities = self.chat.capabilities();
        capabilities.remove(&Capability::Embeddings);
        capabilities
    }

    fn to_wire(&self, request: &Request) -> Result<Value, LlmError> {
        let mut wire = self.chat.to_wire(request)?;
        let Some(body) = wire.as_object_mut() else {
            return Ok(wire);
        };

        let max_tokens = body
            .remove("max_completion_tokens")
            .or_else(|| self.max_tokens.map(Value::from));
        if let Some(max_tokens) = max_tokens {
            body.insert("max_tokens".into(), max_tokens);
        }
        if let Some(routing) = &self.routing {
            body.insert("provider".into(), serde_json::to_value(routing)?);
        }
        if !self.fallback_models.is_empty() {
            body.insert("models".into(), serde_json::to_value(&self.fallback_models)?);
        }
        Ok(wire)
    }

    fn from_wire(&self, request: &Request, wire: Value) -> Result<Response, LlmError> {
        self.chat.from_wire(request, wire)
    }

    fn decode_messages(&self, wire: &Value) -> Result<Vec<Message>, LlmError> {
        self.chat.decode_messages(wire)
    }

    fn stream_decoder(&self, request: &Request) -> Box<dyn StreamDecoder> {
        self.chat.stream_decoder(request)
    }

    fn finish_stream(
        &self,
        request: &Request,
        outcome: StreamOutcome,
    ) -> Result<Response, LlmError> {
        self.chat.finish_stream(request, outcome)
    }
}
