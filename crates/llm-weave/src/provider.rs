//! Provider trait and request types.
//!
//! This module defines two core abstractions:
//!
//! - **[`Provider`]**: the trait every backend implements. A provider
//!   pairs a stateless [`Transform`] (canonical model to wire JSON and
//!   back) with the transport that moves wire JSON over HTTP. It uses
//!   Rust 2024's native async-fn-in-traits, so implementations are plain
//!   `async fn`s.
//!
//! - **[`DynProvider`]**: an object-safe mirror of `Provider` that uses
//!   boxed futures. A blanket `impl<T: Provider> DynProvider for T`
//!   bridges the two, so any concrete provider can be stored as
//!   `Arc<dyn DynProvider>`.
//!
//! Providers never retry, log events, or loop over tool calls
//! themselves; the [`Generator`](crate::Generator) composes those
//! concerns around them.
//!
//! # Request parameters
//!
//! A generation is described by a [`Request`]. Construct it with
//! struct-update syntax:
//!
//! ```rust
//! use llm_weave::{Message, Request};
//!
//! let request = Request {
//!     model: "gpt-4o".into(),
//!     messages: vec![Message::user("Hello")],
//!     max_tokens: Some(256),
//!     ..Default::default()
//! };
//! assert!(request.validate().is_ok());
//! ```

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{Message, Role};
use crate::error::LlmError;
use crate::stream::WireStream;
use crate::transform::Transform;

/// The core trait every backend implements.
///
/// `send` and `send_stream` move already-encoded wire JSON; encoding and
/// decoding is the job of [`transform`](Self::transform).
///
/// # Object safety
///
/// `Provider` is **not** object-safe because AFIT returns `impl Future`.
/// Use [`DynProvider`] for dynamic dispatch: every `Provider`
/// implements it through a blanket impl.
pub trait Provider: Send + Sync {
    /// The wire mapping this provider speaks.
    fn transform(&self) -> &dyn Transform;

    /// Posts `body` to `endpoint` and returns the decoded JSON body.
    ///
    /// Non-2xx responses are mapped to [`LlmError`] by the provider.
    fn send(
        &self,
        endpoint: Endpoint,
        body: &Value,
    ) -> impl Future<Output = Result<Value, LlmError>> + Send;

    /// Posts a streaming generation request and returns the framed wire
    /// events (one JSON value per server-sent event or JSON line).
    fn send_stream(&self, body: &Value)
    -> impl Future<Output = Result<WireStream, LlmError>> + Send;

    /// Returns static metadata describing this provider instance.
    fn metadata(&self) -> ProviderMetadata;
}

/// Boxed future alias used by the object-safe traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe counterpart of [`Provider`] for dynamic dispatch.
pub trait DynProvider: Send + Sync {
    /// See [`Provider::transform`].
    fn transform(&self) -> &dyn Transform;

    /// Boxed-future version of [`Provider::send`].
    fn send_boxed<'a>(
        &'a self,
        endpoint: Endpoint,
        body: &'a Value,
    ) -> BoxFuture<'a, Result<Value, LlmError>>;

    /// Boxed-future version of [`Provider::send_stream`].
    fn send_stream_boxed<'a>(
        &'a self,
        body: &'a Value,
    ) -> BoxFuture<'a, Result<WireStream, LlmError>>;

    /// See [`Provider::metadata`].
    fn metadata(&self) -> ProviderMetadata;
}

impl<T: Provider> DynProvider for T {
    fn transform(&self) -> &dyn Transform {
        Provider::transform(self)
    }

    fn send_boxed<'a>(
        &'a self,
        endpoint: Endpoint,
        body: &'a Value,
    ) -> BoxFuture<'a, Result<Value, LlmError>> {
        Box::pin(self.send(endpoint, body))
    }

    fn send_stream_boxed<'a>(
        &'a self,
        body: &'a Value,
    ) -> BoxFuture<'a, Result<WireStream, LlmError>> {
        Box::pin(self.send_stream(body))
    }

    fn metadata(&self) -> ProviderMetadata {
        Provider::metadata(self)
    }
}

/// Which API operation a wire body is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Chat / messages / responses generation.
    Generate,
    /// Text embeddings.
    Embed,
}

/// Describes a provider instance: its name, model, and capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Provider name (e.g. `"anthropic"`, `"openai-responses"`).
    pub name: Cow<'static, str>,
    /// The configured default model.
    pub model: String,
    /// Default embedding model, when it differs from `model`.
    pub embedding_model: Option<String>,
    /// Feature flags indicating what this provider supports.
    pub capabilities: HashSet<Capability>,
}

/// A feature that a transform may or may not be able to express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Capability {
    /// Function/tool calling.
    Tools,
    /// Native JSON-Schema constrained output.
    StructuredOutput,
    /// JSON output, native or emulated.
    JsonMode,
    /// Remote MCP server declarations.
    Mcp,
    /// Image inputs.
    Vision,
    /// Document inputs.
    Documents,
    /// Several system/developer messages kept apart on the wire.
    MultipleSystemMessages,
    /// Incremental streaming.
    Streaming,
    /// Text embeddings.
    Embeddings,
}

/// Parameters for one generation.
///
/// # Invariants
///
/// Checked by [`validate`](Self::validate) before any network call:
///
/// - a `json_schema` response format carries a non-empty schema object;
/// - a named tool choice matches one of `tools`;
/// - every tool message answers a tool call requested earlier in the
///   conversation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Request {
    /// Model identifier. Empty means the provider's configured default.
    pub model: String,
    /// The conversation so far.
    pub messages: Vec<Message>,
    /// Instructions given outside the message list.
    pub instructions: Option<Instructions>,
    /// Tools the model may invoke.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Whether and how the model should use tools.
    pub tool_choice: Option<ToolChoice>,
    /// Output format constraint.
    pub response_format: Option<ResponseFormat>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
    /// Stream the response through the accumulator.
    pub stream: bool,
    /// Remote tool servers the provider should connect to.
    pub mcp_servers: Option<Vec<McpServer>>,
}

impl Request {
    /// Checks the request invariants.
    pub fn validate(&self) -> Result<(), LlmError> {
        if let Some(ResponseFormat::JsonSchema { schema, .. }) = &self.response_format {
            let non_empty = schema
                .as_value()
                .as_object()
                .is_some_and(|obj| !obj.is_empty());
            if !non_empty {
                return Err(LlmError::Validation(
                    "json_schema response format requires a non-empty schema object".into(),
                ));
            }
        }

        if let Some(ToolChoice::Named(name)) = &self.tool_choice {
            let known = self.tools().iter().any(|t| &t.name == name);
            if !known {
                return Err(LlmError::Validation(format!(
                    "tool_choice names '{name}' but no such tool is declared"
                )));
            }
        }

        let mut requested: HashSet<&str> = HashSet::new();
        for (index, message) in self.messages.iter().enumerate() {
            for call in message.requested_actions() {
                requested.insert(call.id.as_str());
            }
            if message.role == Role::Tool {
                let Some(id) = message.tool_call_id.as_deref() else {
                    return Err(LlmError::Validation(format!(
                        "tool message at index {index} has no tool_call_id"
                    )));
                };
                if !requested.contains(id) {
                    return Err(LlmError::Validation(format!(
                        "tool message at index {index} answers unknown tool call '{id}'"
                    )));
                }
            }
        }

        if let Some(servers) = &self.mcp_servers {
            for server in servers {
                if server.name.is_empty() || server.url.is_empty() {
                    return Err(LlmError::Validation(
                        "mcp server declarations need a name and a url".into(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Declared tools, empty if none.
    pub fn tools(&self) -> &[ToolDefinition] {
        self.tools.as_deref().unwrap_or_default()
    }

    /// Declared MCP servers, empty if none.
    pub fn mcp_servers(&self) -> &[McpServer] {
        self.mcp_servers.as_deref().unwrap_or_default()
    }

    /// Instruction strings in order, empty if none.
    pub fn instruction_parts(&self) -> Vec<&str> {
        self.instructions
            .as_ref()
            .map(Instructions::parts)
            .unwrap_or_default()
    }

    /// A follow-up request with the same settings and a new conversation.
    #[must_use]
    pub fn continue_with(&self, messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..self.clone()
        }
    }

    /// Whether the response format asks for JSON (object or schema).
    pub fn wants_json(&self) -> bool {
        matches!(
            self.response_format,
            Some(ResponseFormat::JsonObject | ResponseFormat::JsonSchema { .. })
        )
    }
}

/// Instructions given outside the message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instructions {
    /// One instruction string.
    Single(String),
    /// Several instruction strings, kept discrete where the provider allows.
    Multiple(Vec<String>),
}

impl Instructions {
    /// The instruction strings in order.
    pub fn parts(&self) -> Vec<&str> {
        match self {
            Self::Single(text) => vec![text.as_str()],
            Self::Multiple(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for Instructions {
    fn from(text: &str) -> Self {
        Self::Single(text.to_owned())
    }
}

impl From<String> for Instructions {
    fn from(text: String) -> Self {
        Self::Single(text)
    }
}

/// Controls whether the model should use tools and, if so, which ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    /// The model decides.
    Auto,
    /// The model must call at least one tool.
    Required,
    /// The model must not call tools.
    None,
    /// The model must call this tool.
    Named(String),
}

/// Output format constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    /// Free text (the default).
    Text,
    /// Any JSON object.
    JsonObject,
    /// JSON matching a schema.
    JsonSchema {
        /// Schema name, required by some providers.
        name: String,
        /// The schema.
        schema: JsonSchema,
        /// Ask the provider to enforce the schema strictly.
        strict: bool,
    },
}

/// A remote MCP server declaration.
#[derive(Clone, PartialEq, Eq)]
pub struct McpServer {
    /// Label the model uses to refer to the server.
    pub name: String,
    /// Server URL.
    pub url: String,
    /// Bearer token forwarded to the server.
    pub authorization: Option<String>,
}

impl fmt::Debug for McpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.name)
            .field("url", &self.url)
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// A tool the model can invoke during generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ToolDefinition {
    /// The tool's name, matched against [`ToolCall::name`](crate::ToolCall::name).
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema describing the tool's input.
    pub parameters: JsonSchema,
}

/// A JSON Schema document used for structured output or tool parameters.
///
/// Wraps a [`serde_json::Value`] and provides validation via the
/// [`jsonschema`] crate.
///
/// ```rust
/// use llm_weave::JsonSchema;
///
/// let schema = JsonSchema::new(serde_json::json!({
///     "type": "object",
///     "properties": { "name": { "type": "string" } },
///     "required": ["name"]
/// }));
/// assert!(schema.validate(&serde_json::json!({"name": "x"})).is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema(Value);

impl JsonSchema {
    /// Creates a schema from a raw JSON value.
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    /// An object schema with no declared properties.
    pub fn empty_object() -> Self {
        Self(serde_json::json!({"type": "object", "properties": {}}))
    }

    /// Returns a reference to the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Derives a schema from a type implementing [`schemars::JsonSchema`].
    #[cfg(feature = "schema")]
    pub fn from_type<T: schemars::JsonSchema>() -> Result<Self, serde_json::Error> {
        let schema = schemars::schema_for!(T);
        let value = serde_json::to_value(schema)?;
        Ok(Self(value))
    }

    /// Validates `value` against this schema.
    ///
    /// Returns [`LlmError::SchemaValidation`] with details on failure and
    /// [`LlmError::Validation`] if the schema itself is malformed.
    #[cfg(feature = "schema")]
    pub fn validate(&self, value: &Value) -> Result<(), LlmError> {
        let validator = jsonschema::validator_for(&self.0)
            .map_err(|e| LlmError::Validation(format!("invalid JSON schema: {e}")))?;
        let errors: Vec<String> = validator
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LlmError::SchemaValidation {
                message: errors.join("; "),
                schema: self.0.clone(),
                actual: value.clone(),
            })
        }
    }
}
