//! Decoder for Anthropic Messages SSE events.
//!
//! Framing (bytes to JSON events) is done by
//! [`llm_weave::framing::sse_events`]; this module turns each event into
//! canonical [`StreamEvent`]s. Tool-call argument fragments are keyed by
//! content-block index on the wire, so the decoder remembers which call
//! id each index belongs to.
//!
//! In emulated JSON mode the model continues after a priming `{` it
//! never streams back, so the decoder emits that brace ahead of the
//! first text fragment. Observers then see JSON from the start.

use std::collections::HashMap;

use llm_weave::chat::FinishReason;
use llm_weave::error::LlmError;
use llm_weave::stream::StreamEvent;
use llm_weave::transform::StreamDecoder;
use serde_json::Value;
use tracing::trace;

use crate::convert::{convert_usage, stream_error};
use crate::types::StreamResponse;

/// Per-stream state: content-block index to tool-call id, and whether
/// the priming brace is still owed.
#[derive(Debug, Default)]
pub(crate) struct AnthropicDecoder {
    tool_ids: HashMap<u32, String>,
    owes_brace: bool,
}

impl AnthropicDecoder {
    /// A decoder for a JSON-primed generation.
    pub(crate) fn primed() -> Self {
        Self {
            owes_brace: true,
            ..Self::default()
        }
    }

    fn restore_brace(&mut self, mut events: Vec<StreamEvent>) -> Vec<StreamEvent> {
        if !self.owes_brace {
            return events;
        }
        if let Some(at) = events
            .iter()
            .position(|e| matches!(e, StreamEvent::TextDelta { .. }))
        {
            self.owes_brace = false;
            events.insert(at, StreamEvent::text("{"));
        }
        events
    }
}

impl StreamDecoder for AnthropicDecoder {
    fn decode(&mut self, event: Value) -> Result<Vec<StreamEvent>, LlmError> {
        let Ok(response) = serde_json::from_value::<StreamResponse>(event) else {
            return Ok(vec![]);
        };

        match response.event_type.as_str() {
            "message_start" => Ok(handle_message_start(response)),
            "content_block_start" => {
                let events = self.handle_block_start(response);
                Ok(self.restore_brace(events))
            }
            "content_block_delta" => {
                let events = self.handle_block_delta(response);
                Ok(self.restore_brace(events))
            }
            "message_delta" => Ok(handle_message_delta(&response)),
            "error" => Err(response.error.map_or_else(
                || LlmError::response_format("error event without details", String::new()),
                stream_error,
            )),
            other => {
                trace!(event = other, "ignoring stream event");
                Ok(vec![])
            }
        }
    }
}

impl AnthropicDecoder {
    fn handle_block_start(&mut self, response: StreamResponse) -> Vec<StreamEvent> {
        let Some(block) = response.content_block else {
            return vec![];
        };
        match block.content_type.as_str() {
            "tool_use" => {
                let id = block.id.unwrap_or_default();
                if let Some(index) = response.index {
                    self.tool_ids.insert(index, id.clone());
                }
                vec![StreamEvent::ToolCallStart {
                    id,
                    name: block.name.unwrap_or_default(),
                }]
            }
            "text" => match block.text {
                Some(text) if !text.is_empty() => vec![StreamEvent::text(text)],
                _ => vec![],
            },
            _ => vec![],
        }
    }

    fn handle_block_delta(&self, response: StreamResponse) -> Vec<StreamEvent> {
        let Some(delta) = response.delta else {
            return vec![];
        };
        match delta.delta_type.as_deref() {
            Some("text_delta") => delta
                .text
                .map(|text| vec![StreamEvent::text(text)])
                .unwrap_or_default(),
            Some("input_json_delta") => {
                let id = response
                    .index
                    .and_then(|index| self.tool_ids.get(&index).cloned());
                match (id, delta.partial_json) {
                    (Some(id), Some(json_chunk)) if !json_chunk.is_empty() => {
                        vec![StreamEvent::ToolCallDelta { id, json_chunk }]
                    }
                    _ => vec![],
                }
            }
            _ => vec![],
        }
    }
}

fn handle_message_start(response: StreamResponse) -> Vec<StreamEvent> {
    let Some(message) = response.message else {
        return vec![];
    };
    let mut events = vec![StreamEvent::Metadata {
        id: message.id,
        model: message.model,
    }];
    if let Some(usage) = &message.usage {
        events.push(StreamEvent::Usage {
            usage: convert_usage(usage),
        });
    }
    events
}

fn handle_message_delta(response: &StreamResponse) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if let Some(usage) = &response.usage {
        events.push(StreamEvent::Usage {
            usage: convert_usage(usage),
        });
    }
    if let Some(reason) = response
        .delta
        .as_ref()
        .and_then(|d| d.stop_reason.as_deref())
    {
        events.push(StreamEvent::Finish {
            reason: FinishReason::parse(reason),
        });
    }
    events
}
