//! The mock dialect.
//!
//! [`MockTransform`] speaks the canonical model itself: its wire body is
//! [`Request::to_plain`](crate::coerce::Coerce::to_plain), and its
//! response body is a small canonical envelope:
//!
//! ```json
//! {"id": "...", "model": "...", "message": {...}, "usage": {...}, "finish_reason": "stop"}
//! ```
//!
//! [`MockProvider`] pairs it with an in-memory transport. Tests push
//! replies and errors onto its queues; every call pops from the front.
//! When the queue is empty the provider answers in echo mode, replying
//! with the text of the last user message. Wire bodies are recorded for
//! later assertion via [`recorded_calls`](MockProvider::recorded_calls).
//!
//! ```rust
//! use llm_weave::mock::MockProvider;
//! use llm_weave::{Config, Generator, Message, Request};
//!
//! # tokio_test::block_on(async {
//! let mock = MockProvider::new("mock-model");
//! mock.queue_message(Message::assistant("Hello!"));
//!
//! let generator = Generator::new(mock.clone(), &Config::default());
//! let request = Request {
//!     messages: vec![Message::user("hi")],
//!     ..Default::default()
//! };
//! assert_eq!(generator.generate(&request).await.unwrap().text(), "Hello!");
//! assert_eq!(generator.generate(&request).await.unwrap().text(), "hi");
//! assert_eq!(mock.recorded_calls().len(), 2);
//! # });
//! ```
//!
//! # Why `MockError` instead of `LlmError`?
//!
//! [`LlmError`] contains `Box<dyn Error>` and is not `Clone`, so it
//! can't be stored in a queue. [`MockError`] mirrors the common error
//! variants in a cloneable form and converts to `LlmError` at dequeue
//! time.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};

use crate::chat::{FinishReason, Message, Response, Role};
use crate::coerce::{Coerce, cast_many};
use crate::embed::{EmbedRequest, EmbedResponse, vector};
use crate::error::{ErrorKind, LlmError};
use crate::provider::{Capability, Endpoint, Provider, ProviderMetadata, Request};
use crate::stream::{StreamEvent, WireStream};
use crate::transform::{StreamDecoder, Transform, check_request, conversation, str_field};
use crate::usage::Usage;

const ALL_CAPABILITIES: [Capability; 9] = [
    Capability::Tools,
    Capability::StructuredOutput,
    Capability::JsonMode,
    Capability::Mcp,
    Capability::Vision,
    Capability::Documents,
    Capability::MultipleSystemMessages,
    Capability::Streaming,
    Capability::Embeddings,
];

// ── Transform ───────────────────────────────────────────────────────

/// The canonical wire dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTransform {
    capabilities: HashSet<Capability>,
}

impl Default for MockTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransform {
    /// A transform supporting every capability.
    pub fn new() -> Self {
        Self {
            capabilities: ALL_CAPABILITIES.into_iter().collect(),
        }
    }

    /// A transform supporting everything except `capability`.
    pub fn without(capability: Capability) -> Self {
        let mut transform = Self::new();
        transform.capabilities.remove(&capability);
        transform
    }
}

impl Transform for MockTransform {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn capabilities(&self) -> HashSet<Capability> {
        self.capabilities.clone()
    }

    fn to_wire(&self, request: &Request) -> Result<Value, LlmError> {
        check_request(self, request)?;
        Ok(request.to_plain())
    }

    fn from_wire(&self, request: &Request, wire: Value) -> Result<Response, LlmError> {
        let Some(raw_message) = wire.get("message") else {
            return Err(LlmError::response_format(
                "mock response has no message",
                wire.to_string(),
            ));
        };
        let message = Message::cast(raw_message)?;
        let usage = Usage::cast_optional(wire.get("usage"))?.unwrap_or_default();
        Ok(Response {
            messages: conversation(request, message),
            usage,
            finish_reason: str_field(&wire, "finish_reason").map(|r| FinishReason::parse(&r)),
            id: str_field(&wire, "id"),
            model: str_field(&wire, "model"),
            raw_request: Value::Null,
            raw_response: wire,
        })
    }

    fn decode_messages(&self, wire: &Value) -> Result<Vec<Message>, LlmError> {
        cast_many(&wire["messages"])
    }

    fn stream_decoder(&self, _request: &Request) -> Box<dyn StreamDecoder> {
        Box::new(MockDecoder)
    }

    fn embed_to_wire(&self, request: &EmbedRequest) -> Result<Value, LlmError> {
        if !self.supports(Capability::Embeddings) {
            return Err(LlmError::capability(self.name(), "embeddings"));
        }
        Ok(json!({ "model": request.model, "input": request.input }))
    }

    fn embed_from_wire(
        &self,
        request: &EmbedRequest,
        wire: Value,
    ) -> Result<EmbedResponse, LlmError> {
        let embeddings = wire["embeddings"]
            .as_array()
            .map(|items| items.iter().map(vector).collect::<Option<Vec<_>>>())
            .unwrap_or_default()
            .ok_or_else(|| {
                LlmError::response_format("mock embeddings are not number arrays", wire.to_string())
            })?;
        if embeddings.len() != request.input.len() {
            return Err(LlmError::response_format(
                format!(
                    "expected {} embeddings, got {}",
                    request.input.len(),
                    embeddings.len()
                ),
                wire.to_string(),
            ));
        }
        Ok(EmbedResponse {
            embeddings,
            usage: Usage::cast_optional(wire.get("usage"))?.unwrap_or_default(),
            model: str_field(&wire, "model"),
            raw_response: wire,
        })
    }
}

/// Wire events are serialized [`StreamEvent`]s.
struct MockDecoder;

impl StreamDecoder for MockDecoder {
    fn decode(&mut self, event: Value) -> Result<Vec<StreamEvent>, LlmError> {
        Ok(vec![serde_json::from_value(event)?])
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// Cloneable error subset for mock queuing.
///
/// Use [`queue_error`](MockProvider::queue_error) to enqueue one; it is
/// converted to `LlmError` when dequeued.
#[derive(Debug, Clone)]
pub enum MockError {
    /// Maps to [`LlmError::Http`].
    Http {
        /// HTTP status code, if any.
        status: Option<http::StatusCode>,
        /// Error message.
        message: String,
    },
    /// Maps to [`LlmError::Auth`].
    Auth(String),
    /// Maps to [`LlmError::InvalidRequest`].
    InvalidRequest(String),
    /// Maps to [`LlmError::Provider`].
    Provider {
        /// Provider error code.
        code: String,
        /// Error message.
        message: String,
        /// Classification.
        kind: ErrorKind,
    },
    /// Maps to [`LlmError::Timeout`].
    Timeout {
        /// Elapsed milliseconds.
        elapsed_ms: u64,
    },
    /// Maps to [`LlmError::ResponseFormat`].
    ResponseFormat {
        /// What went wrong during parsing.
        message: String,
        /// The raw response body.
        raw: String,
    },
}

impl MockError {
    /// Converts into the error the provider returns.
    pub fn into_llm_error(self) -> LlmError {
        match self {
            Self::Http { status, message } => LlmError::Http { status, message },
            Self::Auth(msg) => LlmError::Auth(msg),
            Self::InvalidRequest(msg) => LlmError::InvalidRequest(msg),
            Self::Provider {
                code,
                message,
                kind,
            } => LlmError::Provider {
                code,
                message,
                kind,
            },
            Self::Timeout { elapsed_ms } => LlmError::Timeout { elapsed_ms },
            Self::ResponseFormat { message, raw } => LlmError::ResponseFormat { message, raw },
        }
    }
}

// ── Provider ────────────────────────────────────────────────────────

type QueuedStream = Result<(Vec<StreamEvent>, Option<MockError>), MockError>;

#[derive(Default)]
struct Queues {
    responses: Mutex<VecDeque<Result<Value, MockError>>>,
    streams: Mutex<VecDeque<QueuedStream>>,
    calls: Mutex<Vec<Value>>,
    embed_calls: Mutex<Vec<Value>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A queue-based mock provider for unit and integration tests.
///
/// Clones share queues and recorded calls, so a test can keep a handle
/// after moving the provider into a [`Generator`](crate::Generator).
#[derive(Clone)]
pub struct MockProvider {
    model: String,
    transform: MockTransform,
    queues: Arc<Queues>,
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("model", &self.model)
            .field("queued_responses", &lock(&self.queues.responses).len())
            .field("queued_streams", &lock(&self.queues.streams).len())
            .field("recorded_calls", &lock(&self.queues.calls).len())
            .finish()
    }
}

impl MockProvider {
    /// Creates a mock whose default model is `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            transform: MockTransform::new(),
            queues: Arc::default(),
        }
    }

    /// Replaces the transform, e.g. to drop a capability.
    #[must_use]
    pub fn with_transform(mut self, transform: MockTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Enqueues a raw wire response body for the next generation.
    pub fn queue_wire(&self, wire: Value) -> &Self {
        lock(&self.queues.responses).push_back(Ok(wire));
        self
    }

    /// Enqueues an assistant reply with nominal usage.
    ///
    /// The finish reason is `tool_calls` when the message requests
    /// actions and `stop` otherwise.
    pub fn queue_message(&self, message: Message) -> &Self {
        let finish = if message.has_requested_actions() {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        };
        self.queue_wire(json!({
            "model": self.model,
            "message": message.to_plain(),
            "usage": Usage::from_counts(10, 5, None).to_plain(),
            "finish_reason": finish.as_str(),
        }))
    }

    /// Enqueues an error for the next generation.
    pub fn queue_error(&self, error: MockError) -> &Self {
        lock(&self.queues.responses).push_back(Err(error));
        self
    }

    /// Enqueues events for the next streamed generation.
    pub fn queue_stream(&self, events: Vec<StreamEvent>) -> &Self {
        lock(&self.queues.streams).push_back(Ok((events, None)));
        self
    }

    /// Enqueues events followed by a mid-stream failure.
    pub fn queue_broken_stream(&self, events: Vec<StreamEvent>, error: MockError) -> &Self {
        lock(&self.queues.streams).push_back(Ok((events, Some(error))));
        self
    }

    /// Enqueues an error returned while opening the next stream.
    pub fn queue_stream_error(&self, error: MockError) -> &Self {
        lock(&self.queues.streams).push_back(Err(error));
        self
    }

    /// Generation wire bodies received so far, streamed or not, in order.
    pub fn recorded_calls(&self) -> Vec<Value> {
        lock(&self.queues.calls).clone()
    }

    /// [`recorded_calls`](Self::recorded_calls) read back as requests.
    pub fn recorded_requests(&self) -> Vec<Request> {
        self.recorded_calls()
            .iter()
            .filter_map(|body| Request::cast(body).ok())
            .collect()
    }

    /// Embedding wire bodies received so far.
    pub fn recorded_embeds(&self) -> Vec<Value> {
        lock(&self.queues.embed_calls).clone()
    }

    fn echo(&self, body: &Value) -> (String, Value) {
        let model = str_field(body, "model").unwrap_or_else(|| self.model.clone());
        let text = Request::cast(body)
            .ok()
            .and_then(|request| {
                request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(Message::text)
            })
            .unwrap_or_default();
        (model, Value::String(text))
    }

    fn generate(&self, body: &Value) -> Result<Value, LlmError> {
        lock(&self.queues.calls).push(body.clone());
        if let Some(queued) = lock(&self.queues.responses).pop_front() {
            return queued.map_err(MockError::into_llm_error);
        }
        let (model, text) = self.echo(body);
        let words = word_count(text.as_str().unwrap_or_default());
        Ok(json!({
            "model": model,
            "message": {"role": "assistant", "content": text},
            "usage": Usage::from_counts(words, words, None).to_plain(),
            "finish_reason": "stop",
        }))
    }

    fn embed(&self, body: &Value) -> Value {
        lock(&self.queues.embed_calls).push(body.clone());
        let inputs: Vec<&str> = body["input"]
            .as_array()
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let tokens: u64 = inputs.iter().map(|s| word_count(s)).sum();
        let embeddings: Vec<Value> = inputs
            .iter()
            .map(|s| json!([s.chars().count(), word_count(s), 1.0]))
            .collect();
        json!({
            "model": body["model"],
            "embeddings": embeddings,
            "usage": Usage::from_counts(tokens, 0, None).to_plain(),
        })
    }
}

fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

fn wire_events(events: Vec<StreamEvent>) -> Result<Vec<Result<Value, LlmError>>, LlmError> {
    events
        .into_iter()
        .map(|event| Ok(Ok(serde_json::to_value(event)?)))
        .collect()
}

impl Provider for MockProvider {
    fn transform(&self) -> &dyn Transform {
        &self.transform
    }

    async fn send(&self, endpoint: Endpoint, body: &Value) -> Result<Value, LlmError> {
        match endpoint {
            Endpoint::Generate => self.generate(body),
            Endpoint::Embed => Ok(self.embed(body)),
        }
    }

    async fn send_stream(&self, body: &Value) -> Result<WireStream, LlmError> {
        lock(&self.queues.calls).push(body.clone());
        let queued = lock(&self.queues.streams).pop_front();
        let (events, failure) = match queued {
            Some(queued) => queued.map_err(MockError::into_llm_error)?,
            None => {
                let (model, text) = self.echo(body);
                let text = text.as_str().unwrap_or_default().to_owned();
                let words = word_count(&text);
                let events = vec![
                    StreamEvent::Metadata {
                        id: None,
                        model: Some(model),
                    },
                    StreamEvent::text(text),
                    StreamEvent::Usage {
                        usage: Usage::from_counts(words, words, None),
                    },
                    StreamEvent::Finish {
                        reason: FinishReason::Stop,
                    },
                ];
                (events, None)
            }
        };

        let mut items = wire_events(events)?;
        if let Some(error) = failure {
            items.push(Err(error.into_llm_error()));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "mock".into(),
            model: self.model.clone(),
            embedding_model: None,
            capabilities: self.transform.capabilities(),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::chat::{ContentPart, ToolCall};
    use crate::provider::{DynProvider, Instructions};

    fn request(text: &str) -> Request {
        Request {
            model: "m".into(),
            messages: vec![Message::user(text)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_queued_responses_pop_in_order() {
        let mock = MockProvider::new("m");
        mock.queue_message(Message::assistant("first"))
            .queue_message(Message::assistant("second"));
        let body = mock.transform.to_wire(&request("x")).unwrap();

        let first = mock.send(Endpoint::Generate, &body).await.unwrap();
        let second = mock.send(Endpoint::Generate, &body).await.unwrap();
        assert_eq!(first["message"]["content"][0]["text"], "first");
        assert_eq!(second["message"]["content"][0]["text"], "second");
        assert_eq!(mock.recorded_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_queued_error() {
        let mock = MockProvider::new("m");
        mock.queue_error(MockError::Auth("bad key".into()));
        let err = mock.send(Endpoint::Generate, &json!({})).await.unwrap_err();
        assert!(matches!(err, LlmError::Auth(ref m) if m == "bad key"));
    }

    #[tokio::test]
    async fn test_echo_when_queue_empty() {
        let mock = MockProvider::new("m");
        let req = request("say this back");
        let body = mock.transform.to_wire(&req).unwrap();
        let wire = mock.send(Endpoint::Generate, &body).await.unwrap();
        let response = mock.transform.from_wire(&req, wire).unwrap();

        assert_eq!(response.text(), "say this back");
        assert_eq!(response.usage, Usage::from_counts(3, 3, None));
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_tool_call_reply_finishes_with_tool_calls() {
        let mock = MockProvider::new("m");
        mock.queue_message(Message::assistant_calls(vec![ToolCall {
            id: "call_1".into(),
            name: "get_weather".into(),
            arguments: json!({"location": "Boston"}),
        }]));
        let req = request("weather?");
        let wire = mock.send(Endpoint::Generate, &json!({})).await.unwrap();
        let response = mock.transform.from_wire(&req, wire).unwrap();
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(response.requested_actions()[0].name, "get_weather");
    }

    #[tokio::test]
    async fn test_broken_stream_yields_events_then_error() {
        let mock = MockProvider::new("m");
        mock.queue_broken_stream(
            vec![StreamEvent::text("partial")],
            MockError::Timeout { elapsed_ms: 5 },
        );
        let items: Vec<_> = mock.send_stream(&json!({})).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap()["type"], "text_delta");
        assert!(matches!(items[1], Err(LlmError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_stream_open_error() {
        let mock = MockProvider::new("m");
        mock.queue_stream_error(MockError::Http {
            status: Some(http::StatusCode::UNAUTHORIZED),
            message: "nope".into(),
        });
        assert!(mock.send_stream(&json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_embed_is_deterministic() {
        let mock = MockProvider::new("m");
        let req = EmbedRequest::new(["hello world"]);
        let body = mock.transform.embed_to_wire(&req).unwrap();
        let wire = mock.send(Endpoint::Embed, &body).await.unwrap();
        let response = mock.transform.embed_from_wire(&req, wire).unwrap();
        assert_eq!(response.embeddings, vec![vec![11.0, 2.0, 1.0]]);
        assert_eq!(response.usage.input_tokens, 2);
        assert_eq!(mock.recorded_embeds().len(), 1);
    }

    #[test]
    fn test_embeddings_capability() {
        let transform = MockTransform::without(Capability::Embeddings);
        let err = transform
            .embed_to_wire(&EmbedRequest::new(["x"]))
            .unwrap_err();
        assert!(matches!(err, LlmError::Capability { .. }));
    }

    #[test]
    fn test_round_trip_messages() {
        let transform = MockTransform::new();
        let req = Request {
            instructions: Some(Instructions::Multiple(vec!["a".into(), "b".into()])),
            messages: vec![
                Message::system("be brief"),
                Message::new(
                    Role::User,
                    vec![
                        ContentPart::text("look"),
                        ContentPart::image("https://example.com/cat.png"),
                    ],
                ),
                Message::assistant("a cat"),
            ],
            ..Default::default()
        };
        let wire = transform.to_wire(&req).unwrap();
        assert_eq!(transform.decode_messages(&wire).unwrap(), req.messages);
        assert_eq!(wire["instructions"], json!(["a", "b"]));
    }

    #[test]
    fn test_missing_message_is_response_format_error() {
        let err = MockTransform::new()
            .from_wire(&Request::default(), json!({"usage": {}}))
            .unwrap_err();
        assert!(matches!(err, LlmError::ResponseFormat { .. }));
    }

    #[test]
    fn test_metadata_through_dyn() {
        let mock = MockProvider::new("m").with_transform(MockTransform::without(Capability::Mcp));
        let dynamic: &dyn DynProvider = &mock;
        let meta = dynamic.metadata();
        assert_eq!(meta.name, "mock");
        assert!(!meta.capabilities.contains(&Capability::Mcp));
    }
}
