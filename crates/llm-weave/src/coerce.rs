//! Casting loosely-typed JSON into canonical types, and back.
//!
//! Callers often hand us shorthand: a bare string where content is
//! expected, `{"image": "https://..."}` instead of a tagged part, an
//! OpenAI-style nested tool definition. [`Coerce::cast`] turns every
//! supported shape into the canonical type; [`Coerce::to_plain`] turns
//! it back into canonical JSON.
//!
//! Each `cast` first classifies its input into a closed shape enum and
//! then matches on it. Shapes nothing handles end in an explicit
//! [`LlmError::Coercion`]; nothing is passed through unexamined.
//!
//! # Laws
//!
//! For every supported input `x`:
//!
//! - `cast(to_plain(cast(x))) == cast(x)` (round trip)
//! - a lone item and a one-element array cast to the same `Vec`
//!
//! ```rust
//! use llm_weave::coerce::Coerce;
//! use llm_weave::ContentPart;
//! use serde_json::json;
//!
//! let lone = Vec::<ContentPart>::cast(&json!({"text": "x"})).unwrap();
//! let list = Vec::<ContentPart>::cast(&json!([{"text": "x"}])).unwrap();
//! assert_eq!(lone, list);
//! assert_eq!(lone, vec![ContentPart::text("x")]);
//! ```

use serde_json::{Map, Value, json};

use crate::chat::{ContentPart, MediaSource, Message, Role, ToolCall};
use crate::error::LlmError;
use crate::provider::{
    Instructions, JsonSchema, McpServer, Request, ResponseFormat, ToolChoice, ToolDefinition,
};
use crate::usage::Usage;

/// Bidirectional conversion between loose JSON and a canonical type.
pub trait Coerce: Sized {
    /// Field name used in error messages.
    const FIELD: &'static str;

    /// Casts any supported input shape into the canonical type.
    fn cast(raw: &Value) -> Result<Self, LlmError>;

    /// Serializes back into canonical plain JSON.
    fn to_plain(&self) -> Value;

    /// Like [`cast`](Self::cast) but `null` and absent pass through as `None`.
    fn cast_optional(raw: Option<&Value>) -> Result<Option<Self>, LlmError> {
        match raw {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Self::cast(value).map(Some),
        }
    }
}

fn describe(raw: &Value) -> &'static str {
    match raw {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn unexpected(field: &'static str, expected: &str, found: &Value) -> LlmError {
    LlmError::coercion(field, format!("expected {expected}, found {}", describe(found)))
}

fn object<'a>(field: &'static str, raw: &'a Value) -> Result<&'a Map<String, Value>, LlmError> {
    raw.as_object().ok_or_else(|| unexpected(field, "object", raw))
}

fn required_str<'a>(
    field: &'static str,
    map: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, LlmError> {
    match map.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(unexpected(field, &format!("string '{key}'"), other)),
        None => Err(LlmError::coercion(field, format!("missing '{key}'"))),
    }
}

fn optional_str(
    field: &'static str,
    map: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, LlmError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(unexpected(field, &format!("string '{key}'"), other)),
    }
}

/// Casts a list field. A lone item is treated as a one-element list and
/// `null` as an empty one.
pub fn cast_many<T: Coerce>(raw: &Value) -> Result<Vec<T>, LlmError> {
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(T::cast).collect(),
        single => Ok(vec![T::cast(single)?]),
    }
}

fn plain_many<T: Coerce>(items: &[T]) -> Value {
    Value::Array(items.iter().map(Coerce::to_plain).collect())
}

// ── Content ─────────────────────────────────────────────────────────

enum SourceShape<'a> {
    Text(&'a str),
    Tagged(&'a str, &'a Map<String, Value>),
    UrlKey(&'a str),
    Inline(&'a Map<String, Value>),
    Unsupported(&'a Value),
}

fn source_shape(raw: &Value) -> SourceShape<'_> {
    match raw {
        Value::String(s) => SourceShape::Text(s),
        Value::Object(map) => match (map.get("type"), map.get("url")) {
            (Some(Value::String(tag)), _) => SourceShape::Tagged(tag, map),
            (None, Some(Value::String(url))) => SourceShape::UrlKey(url),
            (None, _) if map.contains_key("data") => SourceShape::Inline(map),
            _ => SourceShape::Unsupported(raw),
        },
        other => SourceShape::Unsupported(other),
    }
}

fn cast_source(field: &'static str, raw: &Value) -> Result<MediaSource, LlmError> {
    match source_shape(raw) {
        SourceShape::Text(s) | SourceShape::UrlKey(s) => Ok(MediaSource::parse(s)),
        SourceShape::Tagged("url", map) => Ok(MediaSource::Url(
            required_str(field, map, "url")?.to_owned(),
        )),
        SourceShape::Tagged("base64", map) | SourceShape::Inline(map) => Ok(MediaSource::Base64 {
            media_type: required_str(field, map, "media_type")?.to_owned(),
            data: required_str(field, map, "data")?.to_owned(),
        }),
        SourceShape::Tagged(tag, _) => Err(LlmError::coercion(
            field,
            format!("unknown source type '{tag}'"),
        )),
        SourceShape::Unsupported(found) => Err(unexpected(field, "url or base64 source", found)),
    }
}

fn plain_source(source: &MediaSource) -> Value {
    match source {
        MediaSource::Url(url) => json!({"type": "url", "url": url}),
        MediaSource::Base64 { media_type, data } => {
            json!({"type": "base64", "media_type": media_type, "data": data})
        }
    }
}

enum PartShape<'a> {
    Bare(&'a str),
    Tagged(&'a str, &'a Map<String, Value>),
    TextKey(&'a Value),
    ImageKey(&'a Value),
    DocumentKey(&'a Value, &'a Map<String, Value>),
    Unsupported(&'a Value),
}

fn part_shape(raw: &Value) -> PartShape<'_> {
    match raw {
        Value::String(s) => PartShape::Bare(s),
        Value::Object(map) => {
            if let Some(Value::String(tag)) = map.get("type") {
                PartShape::Tagged(tag, map)
            } else if let Some(text) = map.get("text") {
                PartShape::TextKey(text)
            } else if let Some(image) = map.get("image") {
                PartShape::ImageKey(image)
            } else if let Some(document) = map.get("document") {
                PartShape::DocumentKey(document, map)
            } else {
                PartShape::Unsupported(raw)
            }
        }
        other => PartShape::Unsupported(other),
    }
}

impl Coerce for ContentPart {
    const FIELD: &'static str = "content";

    fn cast(raw: &Value) -> Result<Self, LlmError> {
        match part_shape(raw) {
            PartShape::Bare(text) => Ok(Self::text(text)),
            PartShape::TextKey(Value::String(text)) => Ok(Self::text(text.as_str())),
            PartShape::TextKey(other) => Err(unexpected(Self::FIELD, "string text", other)),
            PartShape::ImageKey(source) => Ok(Self::Image {
                source: cast_source(Self::FIELD, source)?,
            }),
            PartShape::DocumentKey(source, map) => Ok(Self::Document {
                source: cast_source(Self::FIELD, source)?,
                filename: optional_str(Self::FIELD, map, "filename")?,
            }),
            PartShape::Tagged("text", map) => {
                Ok(Self::text(required_str(Self::FIELD, map, "text")?))
            }
            PartShape::Tagged("image", map) => {
                let source = map.get("source").ok_or_else(|| {
                    LlmError::coercion(Self::FIELD, "image part without 'source'")
                })?;
                Ok(Self::Image {
                    source: cast_source(Self::FIELD, source)?,
                })
            }
            PartShape::Tagged("document", map) => {
                let source = map.get("source").ok_or_else(|| {
                    LlmError::coercion(Self::FIELD, "document part without 'source'")
                })?;
                Ok(Self::Document {
                    source: cast_source(Self::FIELD, source)?,
                    filename: optional_str(Self::FIELD, map, "filename")?,
                })
            }
            PartShape::Tagged(tag, _) => Err(LlmError::coercion(
                Self::FIELD,
                format!("unknown content type '{tag}'"),
            )),
            PartShape::Unsupported(found) => Err(unexpected(
                Self::FIELD,
                "string, tagged part, or text/image/document shorthand",
                found,
            )),
        }
    }

    fn to_plain(&self) -> Value {
        match self {
            Self::Text { text } => json!({"type": "text", "text": text}),
            Self::Image { source } => json!({"type": "image", "source": plain_source(source)}),
            Self::Document { source, filename } => {
                let mut part = json!({"type": "document", "source": plain_source(source)});
                if let Some(name) = filename {
                    part["filename"] = json!(name);
                }
                part
            }
        }
    }
}

impl Coerce for Vec<ContentPart> {
    const FIELD: &'static str = "content";

    fn cast(raw: &Value) -> Result<Self, LlmError> {
        match raw {
            Value::Bool(_) | Value::Number(_) => {
                Err(unexpected(Self::FIELD, "string, part, or list of parts", raw))
            }
            _ => cast_many(raw),
        }
    }

    fn to_plain(&self) -> Value {
        plain_many(self)
    }
}

// ── Messages ────────────────────────────────────────────────────────

fn cast_role(raw: Option<&Value>) -> Result<Role, LlmError> {
    match raw {
        Some(Value::String(role)) => match role.as_str() {
            "system" | "developer" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(LlmError::coercion("role", format!("unknown role '{other}'"))),
        },
        Some(other) => Err(unexpected("role", "string", other)),
        None => Err(LlmError::coercion("role", "missing 'role'")),
    }
}

impl Coerce for ToolCall {
    const FIELD: &'static str = "requested_actions";

    fn cast(raw: &Value) -> Result<Self, LlmError> {
        let map = object(Self::FIELD, raw)?;
        let arguments = match map.get("arguments") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(Value::Object(args)) => Value::Object(args.clone()),
            Some(Value::String(encoded)) if encoded.trim().is_empty() => Value::Object(Map::new()),
            Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
                Ok(Value::Object(args)) => Value::Object(args),
                Ok(other) => return Err(unexpected(Self::FIELD, "object arguments", &other)),
                Err(e) => {
                    return Err(LlmError::coercion(
                        Self::FIELD,
                        format!("arguments are not JSON: {e}"),
                    ));
                }
            },
            Some(other) => return Err(unexpected(Self::FIELD, "object arguments", other)),
        };
        Ok(Self {
            id: required_str(Self::FIELD, map, "id")?.to_owned(),
            name: required_str(Self::FIELD, map, "name")?.to_owned(),
            arguments,
        })
    }

    fn to_plain(&self) -> Value {
        json!({"id": self.id, "name": self.name, "arguments": self.arguments})
    }
}

impl Coerce for Message {
    const FIELD: &'static str = "messages";

    fn cast(raw: &Value) -> Result<Self, LlmError> {
        let map = object(Self::FIELD, raw)?;
        let content = map
            .get("content")
            .map_or_else(|| Ok(Vec::new()), Vec::<ContentPart>::cast)?;
        let requested_actions = match map.get("requested_actions") {
            None | Some(Value::Null) => None,
            Some(calls) => Some(cast_many::<ToolCall>(calls)?),
        };
        Ok(Self {
            role: cast_role(map.get("role"))?,
            content,
            tool_call_id: optional_str(Self::FIELD, map, "tool_call_id")?,
            requested_actions,
        })
    }

    fn to_plain(&self) -> Value {
        let mut out = json!({"role": self.role.as_str(), "content": self.content.to_plain()});
        if let Some(id) = &self.tool_call_id {
            out["tool_call_id"] = json!(id);
        }
        if let Some(calls) = &self.requested_actions {
            out["requested_actions"] = plain_many(calls);
        }
        out
    }
}

// ── Tools ───────────────────────────────────────────────────────────

enum ToolShape<'a> {
    Nested(&'a Map<String, Value>),
    Flat(&'a Map<String, Value>),
    Plain(&'a Map<String, Value>),
    Unsupported(String),
}

fn tool_shape(raw: &Value) -> ToolShape<'_> {
    let Value::Object(map) = raw else {
        return ToolShape::Unsupported(format!("expected object, found {}", describe(raw)));
    };
    match (map.get("type"), map.get("function")) {
        (Some(Value::String(tag)), Some(Value::Object(inner))) if tag == "function" => {
            ToolShape::Nested(inner)
        }
        (Some(Value::String(tag)), _) if tag == "function" => ToolShape::Flat(map),
        (Some(Value::String(tag)), _) => {
            ToolShape::Unsupported(format!("unsupported tool type '{tag}'"))
        }
        (Some(other), _) => ToolShape::Unsupported(format!(
            "tool type must be a string, found {}",
            describe(other)
        )),
        (None, _) => ToolShape::Plain(map),
    }
}

fn tool_fields(map: &Map<String, Value>) -> Result<ToolDefinition, LlmError> {
    const FIELD: &str = "tools";
    let parameters = match map.get("parameters").or_else(|| map.get("input_schema")) {
        None | Some(Value::Null) => JsonSchema::empty_object(),
        Some(schema @ Value::Object(_)) => JsonSchema::new(schema.clone()),
        Some(other) => return Err(unexpected(FIELD, "schema object", other)),
    };
    Ok(ToolDefinition {
        name: required_str(FIELD, map, "name")?.to_owned(),
        description: optional_str(FIELD, map, "description")?.unwrap_or_default(),
        parameters,
    })
}

impl Coerce for ToolDefinition {
    const FIELD: &'static str = "tools";

    fn cast(raw: &Value) -> Result<Self, LlmError> {
        match tool_shape(raw) {
            ToolShape::Nested(map) | ToolShape::Flat(map) | ToolShape::Plain(map) => {
                tool_fields(map)
            }
            ToolShape::Unsupported(message) => Err(LlmError::coercion(Self::FIELD, message)),
        }
    }

    fn to_plain(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters.as_value(),
        })
    }
}

enum ChoiceShape<'a> {
    Keyword(&'a str),
    Named(&'a str),
    Unsupported(&'a Value),
}

fn choice_shape(raw: &Value) -> ChoiceShape<'_> {
    match raw {
        Value::String(keyword) => ChoiceShape::Keyword(keyword),
        Value::Object(map) => {
            let nested = map
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str);
            let flat = map.get("name").and_then(Value::as_str);
            match (nested.or(flat), map.get("type").and_then(Value::as_str)) {
                (Some(name), _) => ChoiceShape::Named(name),
                (None, Some(keyword)) => ChoiceShape::Keyword(keyword),
                (None, None) => ChoiceShape::Unsupported(raw),
            }
        }
        other => ChoiceShape::Unsupported(other),
    }
}

impl Coerce for ToolChoice {
    const FIELD: &'static str = "tool_choice";

    fn cast(raw: &Value) -> Result<Self, LlmError> {
        match choice_shape(raw) {
            ChoiceShape::Keyword("auto") => Ok(Self::Auto),
            ChoiceShape::Keyword("required" | "any") => Ok(Self::Required),
            ChoiceShape::Keyword("none") => Ok(Self::None),
            ChoiceShape::Keyword(other) => Err(LlmError::coercion(
                Self::FIELD,
                format!("unknown tool_choice '{other}'"),
            )),
            ChoiceShape::Named(name) => Ok(Self::Named(name.to_owned())),
            ChoiceShape::Unsupported(found) => {
                Err(unexpected(Self::FIELD, "keyword or {name}", found))
            }
        }
    }

    fn to_plain(&self) -> Value {
        match self {
            Self::Auto => json!("auto"),
            Self::Required => json!("required"),
            Self::None => json!("none"),
            Self::Named(name) => json!({"name": name}),
        }
    }
}

// ── Response format ─────────────────────────────────────────────────

enum FormatShape<'a> {
    Keyword(&'a str),
    Tagged(&'a str, &'a Map<String, Value>),
    SchemaKey(&'a Value),
    Unsupported(&'a Value),
}

fn format_shape(raw: &Value) -> FormatShape<'_> {
    match raw {
        Value::String(keyword) => FormatShape::Keyword(keyword),
        Value::Object(map) => match (map.get("type"), map.get("json_schema")) {
            (Some(Value::String(tag)), _) => FormatShape::Tagged(tag, map),
            (None, Some(spec)) => FormatShape::SchemaKey(spec),
            _ => FormatShape::Unsupported(raw),
        },
        other => FormatShape::Unsupported(other),
    }
}

/// `{name?, schema, strict?}` or a bare schema object.
fn schema_spec(raw: &Value) -> Result<ResponseFormat, LlmError> {
    const FIELD: &str = "response_format";
    let map = object(FIELD, raw)?;
    let Some(schema) = map.get("schema") else {
        return Ok(ResponseFormat::JsonSchema {
            name: "response".into(),
            schema: JsonSchema::new(raw.clone()),
            strict: false,
        });
    };
    let strict = match map.get("strict") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(other) => return Err(unexpected(FIELD, "boolean strict", other)),
    };
    Ok(ResponseFormat::JsonSchema {
        name: optional_str(FIELD, map, "name")?.unwrap_or_else(|| "response".into()),
        schema: JsonSchema::new(schema.clone()),
        strict,
    })
}

impl Coerce for ResponseFormat {
    const FIELD: &'static str = "response_format";

    fn cast(raw: &Value) -> Result<Self, LlmError> {
        match format_shape(raw) {
            FormatShape::Keyword("text") | FormatShape::Tagged("text", _) => Ok(Self::Text),
            FormatShape::Keyword("json_object" | "json")
            | FormatShape::Tagged("json_object", _) => Ok(Self::JsonObject),
            FormatShape::Tagged("json_schema", map) => match map.get("json_schema") {
                Some(spec) => schema_spec(spec),
                None if map.contains_key("schema") => schema_spec(raw),
                None => Err(LlmError::coercion(
                    Self::FIELD,
                    "json_schema format without a schema",
                )),
            },
            FormatShape::SchemaKey(spec) => schema_spec(spec),
            FormatShape::Keyword(other) | FormatShape::Tagged(other, _) => Err(
                LlmError::coercion(Self::FIELD, format!("unknown response format '{other}'")),
            ),
            FormatShape::Unsupported(found) => {
                Err(unexpected(Self::FIELD, "keyword or json_schema object", found))
            }
        }
    }

    fn to_plain(&self) -> Value {
        match self {
            Self::Text => json!("text"),
            Self::JsonObject => json!("json_object"),
            Self::JsonSchema {
                name,
                schema,
                strict,
            } => json!({
                "type": "json_schema",
                "json_schema": {"name": name, "schema": schema.as_value(), "strict": strict},
            }),
        }
    }
}

// ── Request-level fields ────────────────────────────────────────────

impl Coerce for McpServer {
    const FIELD: &'static str = "mcp_servers";

    fn cast(raw: &Value) -> Result<Self, LlmError> {
        let map = object(Self::FIELD, raw)?;
        let name = optional_str(Self::FIELD, map, "name")?
            .or(optional_str(Self::FIELD, map, "server_label")?)
            .ok_or_else(|| LlmError::coercion(Self::FIELD, "missing 'name'"))?;
        let url = optional_str(Self::FIELD, map, "url")?
            .or(optional_str(Self::FIELD, map, "server_url")?)
            .ok_or_else(|| LlmError::coercion(Self::FIELD, "missing 'url'"))?;
        let authorization = optional_str(Self::FIELD, map, "authorization")?
            .or(optional_str(Self::FIELD, map, "authorization_token")?);
        Ok(Self {
            name,
            url,
            authorization,
        })
    }

    fn to_plain(&self) -> Value {
        let mut out = json!({"name": self.name, "url": self.url});
        if let Some(token) = &self.authorization {
            out["authorization"] = json!(token);
        }
        out
    }
}

impl Coerce for Instructions {
    const FIELD: &'static str = "instructions";

    fn cast(raw: &Value) -> Result<Self, LlmError> {
        match raw {
            Value::String(text) => Ok(Self::Single(text.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(text) => Ok(text.clone()),
                    other => Err(unexpected(Self::FIELD, "string", other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Multiple),
            other => Err(unexpected(Self::FIELD, "string or list of strings", other)),
        }
    }

    fn to_plain(&self) -> Value {
        match self {
            Self::Single(text) => json!(text),
            Self::Multiple(items) => json!(items),
        }
    }
}

fn count(map: &Map<String, Value>, key: &str) -> Result<Option<u64>, LlmError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| unexpected("usage", &format!("unsigned integer '{key}'"), value)),
    }
}

impl Coerce for Usage {
    const FIELD: &'static str = "usage";

    fn cast(raw: &Value) -> Result<Self, LlmError> {
        let map = object(Self::FIELD, raw)?;
        Ok(Self::from_counts(
            count(map, "input_tokens")?.unwrap_or(0),
            count(map, "output_tokens")?.unwrap_or(0),
            count(map, "total_tokens")?,
        )
        .with_cached(count(map, "cached_tokens")?)
        .with_reasoning(count(map, "reasoning_tokens")?))
    }

    fn to_plain(&self) -> Value {
        let mut out = json!({
            "input_tokens": self.input_tokens,
            "output_tokens": self.output_tokens,
            "total_tokens": self.total_tokens,
        });
        if let Some(cached) = self.cached_tokens {
            out["cached_tokens"] = json!(cached);
        }
        if let Some(reasoning) = self.reasoning_tokens {
            out["reasoning_tokens"] = json!(reasoning);
        }
        out
    }
}

impl Coerce for Request {
    const FIELD: &'static str = "request";

    fn cast(raw: &Value) -> Result<Self, LlmError> {
        let map = object(Self::FIELD, raw)?;
        let list = |key: &str| map.get(key).filter(|v| !v.is_null());
        let temperature = match map.get("temperature") {
            None | Some(Value::Null) => None,
            Some(value) => {
                #[allow(clippy::cast_possible_truncation)]
                let t = value
                    .as_f64()
                    .ok_or_else(|| unexpected("temperature", "number", value))?
                    as f32;
                Some(t)
            }
        };
        let max_tokens = match map.get("max_tokens") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| unexpected("max_tokens", "unsigned 32-bit integer", value))?,
            ),
        };
        let stream = match map.get("stream") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => return Err(unexpected("stream", "boolean", other)),
        };
        Ok(Self {
            model: optional_str(Self::FIELD, map, "model")?.unwrap_or_default(),
            messages: list("messages").map_or_else(|| Ok(Vec::new()), cast_many)?,
            instructions: Instructions::cast_optional(map.get("instructions"))?,
            tools: list("tools").map(cast_many).transpose()?,
            tool_choice: ToolChoice::cast_optional(map.get("tool_choice"))?,
            response_format: ResponseFormat::cast_optional(map.get("response_format"))?,
            temperature,
            max_tokens,
            stream,
            mcp_servers: list("mcp_servers").map(cast_many).transpose()?,
        })
    }

    fn to_plain(&self) -> Value {
        let mut out = json!({
            "model": self.model,
            "messages": plain_many(&self.messages),
            "stream": self.stream,
        });
        if let Some(instructions) = &self.instructions {
            out["instructions"] = instructions.to_plain();
        }
        if let Some(tools) = &self.tools {
            out["tools"] = plain_many(tools);
        }
        if let Some(choice) = &self.tool_choice {
            out["tool_choice"] = choice.to_plain();
        }
        if let Some(format) = &self.response_format {
            out["response_format"] = format.to_plain();
        }
        if let Some(t) = self.temperature {
            out["temperature"] = json!(t);
        }
        if let Some(n) = self.max_tokens {
            out["max_tokens"] = json!(n);
        }
        if let Some(servers) = &self.mcp_servers {
            out["mcp_servers"] = plain_many(servers);
        }
        out
    }
}

// ── serde glue ──────────────────────────────────────────────────────

macro_rules! serde_via_coerce {
    ($($ty:ty),* $(,)?) => {
        $(
            impl TryFrom<Value> for $ty {
                type Error = LlmError;

                fn try_from(raw: Value) -> Result<Self, Self::Error> {
                    <$ty as Coerce>::cast(&raw)
                }
            }

            impl From<$ty> for Value {
                fn from(typed: $ty) -> Self {
                    typed.to_plain()
                }
            }
        )*
    };
}

serde_via_coerce!(ContentPart, ToolCall, Message, ToolDefinition, Request);

impl TryFrom<Value> for Usage {
    type Error = LlmError;

    fn try_from(raw: Value) -> Result<Self, Self::Error> {
        Self::cast(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_idempotent<T: Coerce + PartialEq + std::fmt::Debug>(raw: &Value) {
        let once = T::cast(raw).unwrap();
        let twice = T::cast(&once.to_plain()).unwrap();
        assert_eq!(once, twice, "not idempotent for {raw}");
    }

    #[test]
    fn test_bare_string_is_text() {
        let parts = Vec::<ContentPart>::cast(&json!("Hi")).unwrap();
        assert_eq!(parts, vec![ContentPart::text("Hi")]);
    }

    #[test]
    fn test_lone_and_list_shorthand_match() {
        let lone = Vec::<ContentPart>::cast(&json!({"text": "x"})).unwrap();
        let list = Vec::<ContentPart>::cast(&json!([{"text": "x"}])).unwrap();
        let tagged = Vec::<ContentPart>::cast(&json!([{"type": "text", "text": "x"}])).unwrap();
        assert_eq!(lone, list);
        assert_eq!(list, tagged);
    }

    #[test]
    fn test_image_shorthand_data_url() {
        let part = ContentPart::cast(&json!({"image": "data:image/png;base64,AAAA"})).unwrap();
        assert_eq!(
            part,
            ContentPart::Image {
                source: MediaSource::Base64 {
                    media_type: "image/png".into(),
                    data: "AAAA".into()
                }
            }
        );
    }

    #[test]
    fn test_document_shorthand_with_filename() {
        let part = ContentPart::cast(&json!({
            "document": {"media_type": "application/pdf", "data": "JVBER"},
            "filename": "report.pdf"
        }))
        .unwrap();
        assert!(matches!(
            part,
            ContentPart::Document { filename: Some(ref f), .. } if f == "report.pdf"
        ));
    }

    #[test]
    fn test_number_content_is_an_error() {
        let err = Vec::<ContentPart>::cast(&json!(42)).unwrap_err();
        assert!(matches!(err, LlmError::Coercion { field: "content", .. }));
        let err = ContentPart::cast(&json!([1])).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_unknown_shapes_are_errors() {
        assert!(ContentPart::cast(&json!({"type": "audio", "data": "x"})).is_err());
        assert!(ContentPart::cast(&json!({"video": "x"})).is_err());
        assert!(ContentPart::cast(&json!({"image": 7})).is_err());
        assert!(ToolChoice::cast(&json!("sometimes")).is_err());
        assert!(ToolChoice::cast(&json!(true)).is_err());
        assert!(ResponseFormat::cast(&json!("yaml")).is_err());
        assert!(Instructions::cast(&json!(["a", 1])).is_err());
        assert!(Message::cast(&json!({"role": "narrator", "content": "x"})).is_err());
        assert!(ToolDefinition::cast(&json!({"type": "mcp", "server_label": "x"})).is_err());
    }

    #[test]
    fn test_cast_optional_null_passthrough() {
        assert_eq!(ToolChoice::cast_optional(None).unwrap(), None);
        assert_eq!(ToolChoice::cast_optional(Some(&Value::Null)).unwrap(), None);
    }

    #[test]
    fn test_tool_definition_shapes_normalize() {
        let schema = json!({"type": "object", "properties": {"q": {"type": "string"}}});
        let nested = json!({
            "type": "function",
            "function": {"name": "search", "description": "Search", "parameters": schema}
        });
        let flat = json!({"type": "function", "name": "search", "description": "Search", "parameters": schema});
        let plain = json!({"name": "search", "description": "Search", "input_schema": schema});

        let a = ToolDefinition::cast(&nested).unwrap();
        let b = ToolDefinition::cast(&flat).unwrap();
        let c = ToolDefinition::cast(&plain).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.parameters.as_value(), &schema);
    }

    #[test]
    fn test_mixed_tool_shapes_accepted_per_item() {
        let tools = cast_many::<ToolDefinition>(&json!([
            {"type": "function", "function": {"name": "a"}},
            {"type": "function", "name": "b"}
        ]))
        .unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[1].name, "b");
        assert_eq!(tools[1].parameters, JsonSchema::empty_object());
    }

    #[test]
    fn test_tool_choice_shapes() {
        assert_eq!(ToolChoice::cast(&json!("auto")).unwrap(), ToolChoice::Auto);
        assert_eq!(ToolChoice::cast(&json!("any")).unwrap(), ToolChoice::Required);
        assert_eq!(
            ToolChoice::cast(&json!({"name": "search"})).unwrap(),
            ToolChoice::Named("search".into())
        );
        assert_eq!(
            ToolChoice::cast(&json!({"type": "function", "function": {"name": "search"}})).unwrap(),
            ToolChoice::Named("search".into())
        );
        assert_eq!(
            ToolChoice::cast(&json!({"type": "none"})).unwrap(),
            ToolChoice::None
        );
    }

    #[test]
    fn test_tool_call_string_arguments() {
        let call = ToolCall::cast(&json!({
            "id": "c1", "name": "get_weather", "arguments": "{\"location\":\"Boston\"}"
        }))
        .unwrap();
        assert_eq!(call.arguments, json!({"location": "Boston"}));
    }

    #[test]
    fn test_response_format_shapes() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "integer"}}});
        let shorthand = ResponseFormat::cast(&json!({"json_schema": schema})).unwrap();
        assert!(matches!(
            &shorthand,
            ResponseFormat::JsonSchema { name, schema: s, strict: false }
                if name == "response" && s.as_value() == &schema
        ));

        let openai = ResponseFormat::cast(&json!({
            "type": "json_schema",
            "json_schema": {"name": "out", "schema": schema, "strict": true}
        }))
        .unwrap();
        assert!(matches!(&openai, ResponseFormat::JsonSchema { name, strict: true, .. } if name == "out"));

        assert_eq!(
            ResponseFormat::cast(&json!({"type": "json_object"})).unwrap(),
            ResponseFormat::JsonObject
        );
    }

    #[test]
    fn test_mcp_aliases() {
        let server = McpServer::cast(&json!({
            "server_label": "docs",
            "server_url": "https://mcp.example.com",
            "authorization_token": "t"
        }))
        .unwrap();
        assert_eq!(server.name, "docs");
        assert_eq!(server.authorization.as_deref(), Some("t"));
        assert!(McpServer::cast(&json!({"name": "docs"})).is_err());
    }

    #[test]
    fn test_request_from_loose_json() {
        let request = Request::cast(&json!({
            "model": "m",
            "messages": [{"role": "user", "content": [{"text": "Hi"}]}],
            "instructions": ["a", "b"],
            "tool_choice": "auto",
            "max_tokens": 100,
            "stream": true
        }))
        .unwrap();
        assert_eq!(request.model, "m");
        assert_eq!(request.messages, vec![Message::user("Hi")]);
        assert_eq!(
            request.instructions,
            Some(Instructions::Multiple(vec!["a".into(), "b".into()]))
        );
        assert_eq!(request.max_tokens, Some(100));
        assert!(request.stream);
    }

    #[test]
    fn test_request_rejects_bad_scalars() {
        assert!(Request::cast(&json!({"max_tokens": -1})).is_err());
        assert!(Request::cast(&json!({"stream": "yes"})).is_err());
        assert!(Request::cast(&json!("hello")).is_err());
    }

    #[test]
    fn test_idempotent_coercion() {
        assert_idempotent::<Vec<ContentPart>>(&json!("Hi"));
        assert_idempotent::<Vec<ContentPart>>(&json!([{"text": "a"}, {"image": "https://x/y.png"}]));
        assert_idempotent::<ContentPart>(&json!({"document": "data:application/pdf;base64,AA", "filename": "a.pdf"}));
        assert_idempotent::<Message>(&json!({
            "role": "assistant",
            "content": null,
            "requested_actions": {"id": "c1", "name": "f", "arguments": "{}"}
        }));
        assert_idempotent::<Message>(&json!({"role": "tool", "tool_call_id": "c1", "content": "ok"}));
        assert_idempotent::<ToolDefinition>(&json!({"type": "function", "function": {"name": "f"}}));
        assert_idempotent::<ToolChoice>(&json!({"type": "tool", "name": "f"}));
        assert_idempotent::<ResponseFormat>(&json!({"json_schema": {"type": "object"}}));
        assert_idempotent::<McpServer>(&json!({"name": "a", "url": "https://a"}));
        assert_idempotent::<Instructions>(&json!("be brief"));
        assert_idempotent::<Usage>(&json!({"input_tokens": 3, "output_tokens": 4}));
        assert_idempotent::<Request>(&json!({
            "model": "m",
            "messages": {"role": "user", "content": "Hi"},
            "tools": [{"name": "f", "input_schema": {"type": "object"}}],
            "temperature": 0.2,
            "mcp_servers": {"name": "a", "url": "https://a"}
        }));
    }

    #[test]
    fn test_serde_goes_through_cast() {
        let msg: Message =
            serde_json::from_value(json!({"role": "user", "content": {"text": "x"}})).unwrap();
        assert_eq!(msg, Message::user("x"));
        let bad = serde_json::from_value::<Message>(json!({"role": "user", "content": 3}));
        assert!(bad.is_err());
    }
}
