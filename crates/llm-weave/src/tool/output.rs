//! Tool outputs and results.

use serde_json::Value;

use crate::chat::Message;

/// What a tool handler returns on success.
///
/// Providers expect tool results as text; JSON values are serialized
/// compactly.
///
/// ```rust
/// use llm_weave::tool::ToolOutput;
///
/// let output = ToolOutput::from(serde_json::json!({"temp_c": 21}));
/// assert_eq!(output.content, r#"{"temp_c":21}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Text handed back to the model.
    pub content: String,
}

impl ToolOutput {
    /// Creates an output with the given content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(content: String) -> Self {
        Self { content }
    }
}

impl From<&str> for ToolOutput {
    fn from(content: &str) -> Self {
        Self::new(content)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Self { content: text },
            other => Self {
                content: other.to_string(),
            },
        }
    }
}

/// The outcome of one tool call, ready to append to the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    /// Id of the call this answers.
    pub tool_call_id: String,
    /// Output, or a description of the failure.
    pub content: String,
    /// Whether the call failed.
    pub is_error: bool,
}

impl ToolResult {
    /// A successful result.
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// A failed result.
    pub fn failure(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }

    /// The `Tool` message carrying this result.
    pub fn into_message(self) -> Message {
        Message::tool(self.tool_call_id, self.content)
    }
}
