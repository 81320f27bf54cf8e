//! Anthropic Messages API wire types.
//!
//! These mirror Anthropic's JSON and are not part of the public API.
//! Conversion to and from canonical types happens in
//! [`convert`](crate::convert).

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Request types ──────────────────────────────────────────────────

/// Top-level request body for `POST /v1/messages`.
#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub model: &'a str,
    pub messages: Vec<Turn>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<System>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoiceParam<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<Vec<McpServerParam<'a>>>,
}

/// The parts of a request body [`decode_messages`](crate::AnthropicTransform)
/// reads back.
#[derive(Debug, Deserialize)]
pub(crate) struct Conversation {
    #[serde(default)]
    pub system: Option<System>,
    pub messages: Vec<Turn>,
}

/// The `system` field: one string, or several text blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum System {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// One conversation turn. Consecutive same-role messages share a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Turn {
    pub role: TurnRole,
    pub content: TurnContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TurnRole {
    User,
    Assistant,
}

/// Turn content: a bare string when the turn is one text block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum TurnContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl TurnContent {
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::Text { text }],
            Self::Blocks(blocks) => blocks,
        }
    }
}

/// A content block within a turn or the system field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: Source,
    },
    Document {
        source: Source,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// Image or document bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Source {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// Tool results are sent as text; other clients may send text blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum ToolResultContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl ToolResultContent {
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect(),
        }
    }
}

/// Tool definition sent in the request.
#[derive(Debug, Serialize)]
pub(crate) struct Tool<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub input_schema: &'a Value,
}

/// `tool_choice` parameter.
#[derive(Debug, Serialize)]
pub(crate) struct ToolChoiceParam<'a> {
    #[serde(rename = "type")]
    pub choice_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
}

/// A remote MCP server the API should connect to.
#[derive(Debug, Serialize)]
pub(crate) struct McpServerParam<'a> {
    #[serde(rename = "type")]
    pub server_type: &'static str,
    pub url: &'a str,
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_token: Option<&'a str>,
}

// ── Response types ─────────────────────────────────────────────────

/// Top-level response from `POST /v1/messages`.
#[derive(Debug, Deserialize)]
pub(crate) struct Response {
    pub id: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<ResponseContent>,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: ResponseUsage,
}

/// A content block in the response. Kept loose: server-side blocks
/// (`thinking`, `mcp_tool_use`, ...) carry fields we do not read.
#[derive(Debug, Deserialize)]
pub(crate) struct ResponseContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub input: Option<Value>,
}

/// Token usage. Field names match the API.
#[derive(Debug, Default, Deserialize)]
#[allow(clippy::struct_field_names)]
pub(crate) struct ResponseUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

// ── Error types ────────────────────────────────────────────────────

/// Error body, both as an HTTP response and as an SSE `error` event.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

// ── Streaming types ────────────────────────────────────────────────

/// One SSE event from the streaming API.
#[derive(Debug, Deserialize)]
pub(crate) struct StreamResponse {
    #[serde(rename = "type")]
    pub event_type: String,
    pub index: Option<u32>,
    pub content_block: Option<ResponseContent>,
    pub delta: Option<StreamDelta>,
    pub message: Option<StreamMessage>,
    pub usage: Option<ResponseUsage>,
    pub error: Option<ErrorDetail>,
}

/// Delta content within `content_block_delta` and `message_delta`.
#[derive(Debug, Deserialize)]
pub(crate) struct StreamDelta {
    #[serde(rename = "type")]
    pub delta_type: Option<String>,
    pub text: Option<String>,
    pub partial_json: Option<String>,
    pub stop_reason: Option<String>,
}

/// Message header from `message_start`.
#[derive(Debug, Deserialize)]
pub(crate) struct StreamMessage {
    pub id: Option<String>,
    pub model: Option<String>,
    pub usage: Option<ResponseUsage>,
}
