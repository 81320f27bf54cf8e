//! Responses API wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ErrorDetail;

// ── Request types ──────────────────────────────────────────────────

/// Top-level request body for `POST /responses`.
#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub model: &'a str,
    pub input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolParam<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextParam<'a>>,
}

/// The part of a request body read back by `decode_messages`.
#[derive(Debug, Deserialize)]
pub(crate) struct Conversation {
    #[serde(default)]
    pub instructions: Option<String>,
    pub input: Vec<InputItem>,
}

/// One item of the `input` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum InputItem {
    Message {
        role: String,
        content: ItemContent,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

/// Message content: a bare string or typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum ItemContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A typed content part. Assistant text is `output_text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentPart {
    InputText {
        text: String,
    },
    OutputText {
        text: String,
    },
    InputImage {
        image_url: String,
    },
    InputFile {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
    },
}

/// Flat tool definitions; remote MCP servers are tools too.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ToolParam<'a> {
    Function {
        name: &'a str,
        description: &'a str,
        parameters: &'a Value,
    },
    Mcp {
        server_label: &'a str,
        server_url: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        authorization: Option<&'a str>,
        require_approval: &'static str,
    },
}

/// Output text configuration.
#[derive(Debug, Serialize)]
pub(crate) struct TextParam<'a> {
    pub format: FormatParam<'a>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum FormatParam<'a> {
    JsonObject,
    JsonSchema {
        name: &'a str,
        schema: &'a Value,
        strict: bool,
    },
}

// ── Response types ─────────────────────────────────────────────────

/// A response object, returned directly or inside stream events.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Response {
    pub id: Option<String>,
    pub model: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    pub usage: Option<ResponseUsage>,
    pub incomplete_details: Option<IncompleteDetails>,
    pub error: Option<ErrorDetail>,
}

/// One output item. Only the fields of `message` and `function_call`
/// items are read.
#[derive(Debug, Deserialize)]
pub(crate) struct OutputItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub id: Option<String>,
    #[serde(default)]
    pub content: Vec<OutputContent>,
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OutputContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: Option<String>,
    pub refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IncompleteDetails {
    pub reason: Option<String>,
}

/// Token usage.
#[derive(Debug, Deserialize)]
pub(crate) struct ResponseUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    pub total_tokens: Option<u64>,
    pub input_tokens_details: Option<InputTokensDetails>,
    pub output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InputTokensDetails {
    pub cached_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OutputTokensDetails {
    pub reasoning_tokens: Option<u64>,
}

// ── Streaming types ────────────────────────────────────────────────

/// A single SSE event. Which fields are set depends on `type`.
#[derive(Debug, Deserialize)]
pub(crate) struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub response: Option<Response>,
    pub item: Option<OutputItem>,
    pub item_id: Option<String>,
    pub output_index: Option<u32>,
    pub delta: Option<String>,
    pub code: Option<Value>,
    pub message: Option<String>,
}
