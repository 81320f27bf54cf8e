//! Decoder for Chat Completions SSE chunks.
//!
//! Tool-call fragments are keyed by `index`; only the first fragment of
//! a call carries its id, so the decoder remembers which id each index
//! belongs to.

use std::collections::HashMap;

use llm_weave::chat::FinishReason;
use llm_weave::error::LlmError;
use llm_weave::stream::StreamEvent;
use llm_weave::transform::StreamDecoder;
use serde_json::Value;
use tracing::warn;

use crate::convert::{convert_usage, stream_error};
use crate::types::{StreamChoice, StreamChunk};

/// Per-stream state for Chat Completions.
#[derive(Debug, Default)]
pub(crate) struct ChatDecoder {
    metadata_sent: bool,
    tool_ids: HashMap<u32, String>,
}

impl StreamDecoder for ChatDecoder {
    fn decode(&mut self, event: Value) -> Result<Vec<StreamEvent>, LlmError> {
        let chunk: StreamChunk = serde_json::from_value(event.clone()).map_err(|e| {
            LlmError::response_format(format!("unexpected stream chunk: {e}"), event.to_string())
        })?;
        if let Some(error) = chunk.error {
            return Err(stream_error(error));
        }

        let mut events = Vec::new();
        if !self.metadata_sent && (chunk.id.is_some() || chunk.model.is_some()) {
            self.metadata_sent = true;
            events.push(StreamEvent::Metadata {
                id: chunk.id,
                model: chunk.model,
            });
        }
        for choice in chunk.choices {
            self.decode_choice(choice, &mut events);
        }
        if let Some(usage) = &chunk.usage {
            events.push(StreamEvent::Usage {
                usage: convert_usage(usage),
            });
        }
        Ok(events)
    }
}

impl ChatDecoder {
    fn decode_choice(&mut self, choice: StreamChoice, events: &mut Vec<StreamEvent>) {
        if let Some(delta) = choice.delta {
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::text(text));
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let function = call.function;
                if let Some(id) = call.id {
                    self.tool_ids.insert(call.index, id.clone());
                    events.push(StreamEvent::ToolCallStart {
                        id,
                        name: function
                            .as_ref()
                            .and_then(|f| f.name.clone())
                            .unwrap_or_default(),
                    });
                }
                let Some(json_chunk) = function
                    .and_then(|f| f.arguments)
                    .filter(|a| !a.is_empty())
                else {
                    continue;
                };
                match self.tool_ids.get(&call.index) {
                    Some(id) => events.push(StreamEvent::ToolCallDelta {
                        id: id.clone(),
                        json_chunk,
                    }),
                    None => warn!(index = call.index, "arguments for an unknown tool call"),
                }
            }
        }
        if let Some(reason) = choice.finish_reason {
            events.push(StreamEvent::Finish {
                reason: FinishReason::parse(&reason),
            });
        }
    }
}
