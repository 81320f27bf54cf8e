//! Ollama API request and response types.
//!
//! These types mirror Ollama's wire format and are not part of the
//! public API. Conversion to and from canonical types happens in
//! [`convert`](crate::convert).

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Request types ──────────────────────────────────────────────────

/// Top-level request body for `POST /api/chat`.
#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub model: &'a str,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Options>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<&'a str>,
}

/// The part of a chat body that is read back into canonical messages.
#[derive(Debug, Deserialize)]
pub(crate) struct Conversation {
    pub messages: Vec<Message>,
}

/// A single message, sent in requests and returned in responses.
///
/// `tool_call_id` is not part of Ollama's schema; the server ignores it
/// and it lets a conversation be read back with its call ids intact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub(crate) struct Message {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Generation options.
#[derive(Debug, Serialize)]
pub(crate) struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

/// A tool call. Ollama sends no id; one is synthesized on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub function: FunctionCall,
}

/// Function call details. `arguments` is a JSON object, not a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Tool definition sent in the request.
#[derive(Debug, Serialize)]
pub(crate) struct Tool<'a> {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: FunctionDef<'a>,
}

/// Function tool definition.
#[derive(Debug, Serialize)]
pub(crate) struct FunctionDef<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub parameters: &'a Value,
}

/// Request body for `POST /api/embed`.
#[derive(Debug, Serialize)]
pub(crate) struct EmbedRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<&'a str>,
}

// ── Response types ─────────────────────────────────────────────────

/// Top-level response from `POST /api/chat` (non-streaming).
#[derive(Debug, Deserialize)]
pub(crate) struct Response {
    pub message: Option<Message>,
    pub model: Option<String>,
    /// Reason the generation stopped (e.g. `"stop"`, `"length"`).
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

/// Response from `POST /api/embed`.
#[derive(Debug, Deserialize)]
pub(crate) struct EmbedResponse {
    pub model: Option<String>,
    #[serde(default)]
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
}

// ── Error types ────────────────────────────────────────────────────

/// Error response body from the API.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

// ── Streaming types ────────────────────────────────────────────────

/// A single JSON line from the streaming API.
///
/// A failure after the stream opened arrives as a line holding only
/// `error`.
#[derive(Debug, Deserialize)]
pub(crate) struct StreamChunk {
    pub model: Option<String>,
    pub message: Option<Message>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_serialization_minimal() {
        let req = Request {
            model: "llama3.2",
            messages: vec![Message {
                role: "user".into(),
                content: "Hello".into(),
                ..Default::default()
            }],
            stream: false,
            options: None,
            tools: None,
            format: None,
            keep_alive: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "llama3.2");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0], json!({"role": "user", "content": "Hello"}));
        assert!(json.get("options").is_none());
        assert!(json.get("tools").is_none());
        assert!(json.get("keep_alive").is_none());
    }

    #[test]
    fn test_request_with_options() {
        let req = Request {
            model: "llama3.2",
            messages: vec![],
            stream: true,
            options: Some(Options {
                temperature: Some(0.7),
                num_predict: Some(100),
            }),
            tools: None,
            format: Some(json!("json")),
            keep_alive: Some("5m"),
        };
        let json = serde_json::to_value(&req).unwrap();
        let temp = json["options"]["temperature"].as_f64().unwrap();
        assert!((temp - 0.7).abs() < 0.001, "Expected ~0.7, got {temp}");
        assert_eq!(json["options"]["num_predict"], 100);
        assert_eq!(json["format"], "json");
        assert_eq!(json["keep_alive"], "5m");
    }

    #[test]
    fn test_response_with_tool_calls() {
        let resp: Response = serde_json::from_value(json!({
            "model": "llama3.2",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "function": {"name": "get_weather", "arguments": {"city": "Tokyo"}}
                }]
            },
            "done": true
        }))
        .unwrap();
        let tc = &resp.message.unwrap().tool_calls.unwrap()[0];
        assert!(tc.id.is_none());
        assert_eq!(tc.function.name, "get_weather");
        assert_eq!(tc.function.arguments["city"], "Tokyo");
    }

    #[test]
    fn test_error_response_deserialization() {
        let err: ErrorResponse =
            serde_json::from_value(json!({"error": "model not found"})).unwrap();
        assert_eq!(err.error, "model not found");
    }

    #[test]
    fn test_stream_chunk_final() {
        let chunk: StreamChunk = serde_json::from_value(json!({
            "model": "llama3.2",
            "message": {"role": "assistant", "content": ""},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 42,
            "eval_count": 10
        }))
        .unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.prompt_eval_count, Some(42));
        assert_eq!(chunk.eval_count, Some(10));
        assert!(chunk.error.is_none());
    }

    #[test]
    fn test_embed_response() {
        let resp: EmbedResponse = serde_json::from_value(json!({
            "model": "nomic-embed-text",
            "embeddings": [[0.25, -0.5], [1, 0]],
            "prompt_eval_count": 6
        }))
        .unwrap();
        assert_eq!(resp.embeddings, vec![vec![0.25, -0.5], vec![1.0, 0.0]]);
        assert_eq!(resp.prompt_eval_count, Some(6));
    }
}
