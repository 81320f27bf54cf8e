//! Conversation types: messages, content parts, tool calls, and responses.
//!
//! These are the provider-neutral vocabulary every transform speaks.
//! A conversation is an append-only `Vec<Message>`; each [`Message`]
//! holds an ordered list of [`ContentPart`]s.
//!
//! # Serialization
//!
//! Messages and content parts serialize to the canonical JSON shape and
//! deserialize through the coercion layer, so shorthand input is accepted
//! wherever these types are read from JSON:
//!
//! ```rust
//! use llm_weave::{ContentPart, Message, Role};
//!
//! let msg: Message = serde_json::from_value(serde_json::json!({
//!     "role": "user",
//!     "content": {"text": "Hi"}
//! })).unwrap();
//!
//! assert_eq!(msg.role, Role::User);
//! assert_eq!(msg.content, vec![ContentPart::text("Hi")]);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::usage::Usage;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that steer the model.
    System,
    /// The end user.
    User,
    /// The model.
    Assistant,
    /// Output of a locally executed tool.
    Tool,
}

impl Role {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the bytes of an image or document live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// A remote URL the provider fetches itself.
    Url(String),
    /// Inline base64 data.
    Base64 {
        /// MIME type, e.g. `"image/png"`.
        media_type: String,
        /// Base64 payload without the `data:` prefix.
        data: String,
    },
}

impl MediaSource {
    /// Parses a plain URL or a `data:<mime>;base64,<payload>` URL.
    pub fn parse(raw: &str) -> Self {
        Self::from_data_url(raw).unwrap_or_else(|| Self::Url(raw.to_owned()))
    }

    /// Splits a base64 `data:` URL; `None` for anything else.
    pub fn from_data_url(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix("data:")?;
        let (meta, data) = rest.split_once(',')?;
        let media_type = meta.strip_suffix(";base64")?;
        Some(Self::Base64 {
            media_type: media_type.to_owned(),
            data: data.to_owned(),
        })
    }

    /// Renders the source as a URL, inlining base64 data as a `data:` URL.
    pub fn to_url(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        }
    }
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// An image.
    Image {
        /// Where the image bytes live.
        source: MediaSource,
    },
    /// A document such as a PDF.
    Document {
        /// Where the document bytes live.
        source: MediaSource,
        /// Optional display name.
        filename: Option<String>,
    },
}

impl ContentPart {
    /// Creates a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates an image part from a URL or `data:` URL.
    pub fn image(url: &str) -> Self {
        Self::Image {
            source: MediaSource::parse(url),
        }
    }

    /// Returns the text if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A model-requested tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ToolCall {
    /// Provider-assigned id; the paired tool message refers to it.
    pub id: String,
    /// Name of the tool to run.
    pub name: String,
    /// Arguments as a JSON object.
    pub arguments: Value,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Message {
    /// Who authored the message.
    pub role: Role,
    /// Ordered content blocks.
    pub content: Vec<ContentPart>,
    /// For `Role::Tool`: the [`ToolCall::id`] this message answers.
    pub tool_call_id: Option<String>,
    /// For `Role::Assistant`: tools the model wants executed.
    pub requested_actions: Option<Vec<ToolCall>>,
}

impl Message {
    /// Creates a message with arbitrary parts.
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            tool_call_id: None,
            requested_actions: None,
        }
    }

    /// A system message with a single text part.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)])
    }

    /// A user message with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    /// An assistant message with a single text part.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    /// An assistant message that requests tool calls and has no text.
    pub fn assistant_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            requested_actions: Some(calls),
            ..Self::new(Role::Assistant, Vec::new())
        }
    }

    /// A tool-result message answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, vec![ContentPart::text(text)])
        }
    }

    /// Concatenation of all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect()
    }

    /// The tool calls requested by this message, empty if none.
    pub fn requested_actions(&self) -> &[ToolCall] {
        self.requested_actions.as_deref().unwrap_or_default()
    }

    /// Whether the message asks for at least one tool call.
    pub fn has_requested_actions(&self) -> bool {
        !self.requested_actions().is_empty()
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FinishReason {
    /// Natural end of turn.
    Stop,
    /// The model wants tools executed.
    ToolCalls,
    /// The token limit was hit.
    Length,
    /// Output was withheld by a safety filter.
    ContentFilter,
    /// A provider reason with no canonical equivalent.
    Other(String),
}

impl FinishReason {
    /// Maps the stop strings used across providers.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "stop_sequence" | "completed" => Self::Stop,
            "tool_calls" | "tool_use" | "function_call" => Self::ToolCalls,
            "length" | "max_tokens" | "max_output_tokens" => Self::Length,
            "content_filter" | "refusal" => Self::ContentFilter,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Canonical snake-case name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FinishReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FinishReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// The normalized result of one generation.
///
/// `messages` is the full conversation: the request's messages followed
/// by the assistant reply (and, after a tool loop, every tool exchange in
/// between). [`message`](Self::message) is always the last entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    /// The updated conversation.
    pub messages: Vec<Message>,
    /// Token usage for this call.
    pub usage: Usage,
    /// Why generation stopped, if the provider said.
    pub finish_reason: Option<FinishReason>,
    /// Provider response id.
    pub id: Option<String>,
    /// Model that actually served the request.
    pub model: Option<String>,
    /// The wire body that was sent.
    pub raw_request: Value,
    /// The wire body that came back (`Null` for streamed responses).
    pub raw_response: Value,
}

impl Response {
    /// The latest message of the conversation.
    pub fn message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Text of the latest message, empty if there is none.
    pub fn text(&self) -> String {
        self.message().map(Message::text).unwrap_or_default()
    }

    /// Tool calls requested by the latest message.
    pub fn requested_actions(&self) -> &[ToolCall] {
        self.message().map(Message::requested_actions).unwrap_or_default()
    }

    /// Parses the latest message's text as JSON.
    pub fn parsed_json(&self) -> Result<Value, crate::LlmError> {
        let text = self.text();
        serde_json::from_str(text.trim())
            .map_err(|e| crate::LlmError::response_format(format!("not JSON: {e}"), text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::system("be brief").role, Role::System);
        let tool = Message::tool("c1", "42");
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(tool.text(), "42");
    }

    #[test]
    fn test_text_concatenates_text_parts() {
        let msg = Message::new(
            Role::User,
            vec![
                ContentPart::text("a"),
                ContentPart::image("https://example.com/cat.png"),
                ContentPart::text("b"),
            ],
        );
        assert_eq!(msg.text(), "ab");
    }

    #[test]
    fn test_requested_actions_empty_by_default() {
        let msg = Message::assistant("done");
        assert!(msg.requested_actions().is_empty());
        assert!(!msg.has_requested_actions());
    }

    #[test]
    fn test_media_source_data_url() {
        let source = MediaSource::parse("data:image/png;base64,AAAA");
        assert_eq!(
            source,
            MediaSource::Base64 {
                media_type: "image/png".into(),
                data: "AAAA".into()
            }
        );
        assert_eq!(source.to_url(), "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_media_source_plain_url() {
        let source = MediaSource::parse("https://example.com/a.png");
        assert_eq!(source, MediaSource::Url("https://example.com/a.png".into()));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(FinishReason::parse("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("tool_use"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("max_tokens"), FinishReason::Length);
        assert_eq!(FinishReason::parse("refusal"), FinishReason::ContentFilter);
        assert_eq!(
            FinishReason::parse("pause_turn"),
            FinishReason::Other("pause_turn".into())
        );
    }

    #[test]
    fn test_finish_reason_serde() {
        let json = serde_json::to_value(FinishReason::ToolCalls).unwrap();
        assert_eq!(json, json!("tool_calls"));
        let back: FinishReason = serde_json::from_value(json!("length")).unwrap();
        assert_eq!(back, FinishReason::Length);
    }

    #[test]
    fn test_response_message_is_last() {
        let response = Response {
            messages: vec![Message::user("q"), Message::assistant("a")],
            ..Default::default()
        };
        assert_eq!(response.message().unwrap().text(), "a");
        assert_eq!(response.text(), "a");
    }

    #[test]
    fn test_parsed_json() {
        let response = Response {
            messages: vec![Message::assistant(" {\"ok\": true} ")],
            ..Default::default()
        };
        assert_eq!(response.parsed_json().unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_message_serde_canonical_shape() {
        let json = serde_json::to_value(Message::user("Hi")).unwrap();
        assert_eq!(
            json,
            json!({"role": "user", "content": [{"type": "text", "text": "Hi"}]})
        );
    }
}
