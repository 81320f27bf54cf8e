//! Decoder for Ollama's JSON-lines chat stream.
//!
//! Each line is a standalone chunk. Tool calls arrive whole, usually in
//! the last chunk before `done`, so each one becomes a start event
//! followed by a single argument fragment.

use llm_weave::error::LlmError;
use llm_weave::stream::StreamEvent;
use llm_weave::transform::StreamDecoder;
use serde_json::Value;

use crate::convert::{call_id, convert_usage, finish_reason, stream_error};
use crate::types::StreamChunk;

/// Per-stream state for `/api/chat`.
#[derive(Debug, Default)]
pub(crate) struct OllamaDecoder {
    metadata_sent: bool,
    calls: usize,
}

impl StreamDecoder for OllamaDecoder {
    fn decode(&mut self, event: Value) -> Result<Vec<StreamEvent>, LlmError> {
        let chunk: StreamChunk = serde_json::from_value(event.clone()).map_err(|e| {
            LlmError::response_format(format!("unexpected stream chunk: {e}"), event.to_string())
        })?;
        if let Some(error) = chunk.error {
            return Err(stream_error(error));
        }

        let mut events = Vec::new();
        if !self.metadata_sent && chunk.model.is_some() {
            self.metadata_sent = true;
            events.push(StreamEvent::Metadata {
                id: None,
                model: chunk.model,
            });
        }

        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                events.push(StreamEvent::text(message.content));
            }
            for call in message.tool_calls.unwrap_or_default() {
                let id = call
                    .id
                    .unwrap_or_else(|| call_id(&call.function.name, self.calls));
                self.calls += 1;
                events.push(StreamEvent::ToolCallStart {
                    id: id.clone(),
                    name: call.function.name,
                });
                if !call.function.arguments.is_null() {
                    events.push(StreamEvent::ToolCallDelta {
                        id,
                        json_chunk: call.function.arguments.to_string(),
                    });
                }
            }
        }

        if chunk.done {
            if chunk.prompt_eval_count.is_some() || chunk.eval_count.is_some() {
                events.push(StreamEvent::Usage {
                    usage: convert_usage(chunk.prompt_eval_count, chunk.eval_count),
                });
            }
            events.push(StreamEvent::Finish {
                reason: finish_reason(chunk.done_reason.as_deref(), self.calls > 0),
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use llm_weave::chat::FinishReason;
    use llm_weave::usage::Usage;
    use serde_json::json;

    use super::*;

    fn decode(events: &[Value]) -> Vec<StreamEvent> {
        let mut decoder = OllamaDecoder::default();
        events
            .iter()
            .flat_map(|e| decoder.decode(e.clone()).unwrap())
            .collect()
    }

    #[test]
    fn test_text_then_done() {
        let events = decode(&[
            json!({"model": "llama3.2", "message": {"role": "assistant", "content": "Hel"}, "done": false}),
            json!({"model": "llama3.2", "message": {"role": "assistant", "content": "lo"}, "done": false}),
            json!({"model": "llama3.2", "message": {"role": "assistant", "content": ""}, "done": true,
                "done_reason": "stop", "prompt_eval_count": 42, "eval_count": 10}),
        ]);
        assert_eq!(
            events,
            vec![
                StreamEvent::Metadata {
                    id: None,
                    model: Some("llama3.2".into())
                },
                StreamEvent::text("Hel"),
                StreamEvent::text("lo"),
                StreamEvent::Usage {
                    usage: Usage::from_counts(42, 10, None)
                },
                StreamEvent::Finish {
                    reason: FinishReason::Stop
                },
            ]
        );
    }

    #[test]
    fn test_tool_calls_get_sequential_ids() {
        let events = decode(&[
            json!({"message": {"content": "", "tool_calls": [
                {"function": {"name": "get_weather", "arguments": {"city": "Tokyo"}}}
            ]}, "done": false}),
            json!({"message": {"content": "", "tool_calls": [
                {"function": {"name": "get_weather", "arguments": {"city": "Paris"}}}
            ]}, "done": false}),
            json!({"message": {"content": ""}, "done": true, "done_reason": "stop"}),
        ]);
        assert_eq!(
            events,
            vec![
                StreamEvent::ToolCallStart {
                    id: "call_get_weather_0".into(),
                    name: "get_weather".into()
                },
                StreamEvent::ToolCallDelta {
                    id: "call_get_weather_0".into(),
                    json_chunk: r#"{"city":"Tokyo"}"#.into()
                },
                StreamEvent::ToolCallStart {
                    id: "call_get_weather_1".into(),
                    name: "get_weather".into()
                },
                StreamEvent::ToolCallDelta {
                    id: "call_get_weather_1".into(),
                    json_chunk: r#"{"city":"Paris"}"#.into()
                },
                StreamEvent::Finish {
                    reason: FinishReason::ToolCalls
                },
            ]
        );
    }

    #[test]
    fn test_error_line() {
        let mut decoder = OllamaDecoder::default();
        let err = decoder
            .decode(json!({"error": "model runner has unexpectedly stopped"}))
            .unwrap_err();
        assert!(matches!(err, LlmError::Provider { ref code, .. } if code == "stream_error"));
    }

    #[test]
    fn test_length_finish() {
        let events = decode(&[json!({"done": true, "done_reason": "length", "eval_count": 8})]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Finish {
                reason: FinishReason::Length
            })
        );
    }
}
