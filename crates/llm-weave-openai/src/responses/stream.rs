//! Decoder for Responses API SSE events.
//!
//! Argument fragments name their output item by `item_id` and
//! `output_index`; the call id only appears when the item is added.

use std::collections::HashMap;

use llm_weave::error::LlmError;
use llm_weave::stream::StreamEvent;
use llm_weave::transform::StreamDecoder;
use serde_json::Value;
use tracing::{trace, warn};

use super::convert::{convert_usage, finish_reason};
use super::types::{self, Response};
use crate::convert::stream_error;
use crate::types::ErrorDetail;

/// Per-stream state for the Responses API.
#[derive(Debug, Default)]
pub(crate) struct ResponsesDecoder {
    by_item: HashMap<String, String>,
    by_index: HashMap<u32, String>,
    saw_call: bool,
}

impl StreamDecoder for ResponsesDecoder {
    fn decode(&mut self, event: Value) -> Result<Vec<StreamEvent>, LlmError> {
        let event: types::StreamEvent = serde_json::from_value(event.clone()).map_err(|e| {
            LlmError::response_format(format!("unexpected stream event: {e}"), event.to_string())
        })?;

        match event.event_type.as_str() {
            "response.created" => Ok(event
                .response
                .map(|r| StreamEvent::Metadata {
                    id: r.id,
                    model: r.model,
                })
                .into_iter()
                .collect()),
            "response.output_text.delta" | "response.refusal.delta" => Ok(event
                .delta
                .filter(|d| !d.is_empty())
                .map(StreamEvent::text)
                .into_iter()
                .collect()),
            "response.output_item.added" => Ok(self.item_added(event)),
            "response.function_call_arguments.delta" => Ok(self.arguments_delta(event)),
            "response.completed" | "response.incomplete" => {
                Ok(self.finished(event.response.unwrap_or_default()))
            }
            "response.failed" => Err(event
                .response
                .and_then(|r| r.error)
                .map_or_else(
                    || LlmError::response_format("response failed without details", String::new()),
                    stream_error,
                )),
            "error" => Err(stream_error(ErrorDetail {
                message: event.message.unwrap_or_default(),
                error_type: None,
                code: event.code,
            })),
            other => {
                trace!(event = other, "ignoring stream event");
                Ok(vec![])
            }
        }
    }
}

impl ResponsesDecoder {
    fn item_added(&mut self, event: types::StreamEvent) -> Vec<StreamEvent> {
        let Some(item) = event.item.filter(|i| i.item_type == "function_call") else {
            return vec![];
        };
        let id = item.call_id.unwrap_or_default();
        if let Some(item_id) = item.id {
            self.by_item.insert(item_id, id.clone());
        }
        if let Some(index) = event.output_index {
            self.by_index.insert(index, id.clone());
        }
        self.saw_call = true;
        vec![StreamEvent::ToolCallStart {
            id,
            name: item.name.unwrap_or_default(),
        }]
    }

    fn arguments_delta(&self, event: types::StreamEvent) -> Vec<StreamEvent> {
        let Some(json_chunk) = event.delta.filter(|d| !d.is_empty()) else {
            return vec![];
        };
        let id = event
            .item_id
            .as_ref()
            .and_then(|item| self.by_item.get(item))
            .or_else(|| event.output_index.and_then(|i| self.by_index.get(&i)));
        match id {
            Some(id) => vec![StreamEvent::ToolCallDelta {
                id: id.clone(),
                json_chunk,
            }],
            None => {
                warn!(item_id = ?event.item_id, "arguments for an unknown tool call");
                vec![]
            }
        }
    }

    fn finished(&self, response: Response) -> Vec<StreamEvent> {
        let has_calls = self.saw_call
            || response.output.iter().any(|i| i.item_type == "function_call");
        let mut events = Vec::new();
        if let Some(usage) = &response.usage {
            events.push(StreamEvent::Usage {
                usage: convert_usage(usage),
            });
        }
        if let Some(reason) = finish_reason(&response, has_calls) {
            events.push(StreamEvent::Finish { reason });
        }
        events
    }
}
