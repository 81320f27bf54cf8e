//! Streaming types and the chunk accumulator.
//!
//! A streamed generation arrives in three layers:
//!
//! 1. a [`WireStream`] of provider JSON events, produced by a provider's
//!    transport (see [`framing`](crate::framing)),
//! 2. canonical [`StreamEvent`]s, produced from wire events by a
//!    per-stream [`StreamDecoder`](crate::transform::StreamDecoder),
//! 3. a growing assistant [`Message`], built by the
//!    [`StreamAccumulator`].
//!
//! After every event the accumulator hands a [`StreamChunk`] (the
//! message so far plus the event that changed it) to each registered
//! [`StreamObserver`], synchronously and in arrival order. An observer
//! may return [`Abort`] to stop reading; the generation then fails with
//! [`LlmError::Aborted`].
//!
//! # Tool-call reassembly
//!
//! Tool calls arrive as a [`ToolCallStart`](StreamEvent::ToolCallStart)
//! followed by any number of [`ToolCallDelta`](StreamEvent::ToolCallDelta)
//! fragments, keyed by call id. Fragments may interleave across calls.
//! While the stream is open, a started call shows up in
//! `requested_actions` with `Null` arguments; the concatenated fragments
//! are parsed once, in [`StreamAccumulator::finish`].

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{ContentPart, FinishReason, Message, Role, ToolCall};
use crate::error::LlmError;
use crate::transform::parse_arguments;
use crate::usage::Usage;

/// A pinned, boxed, `Send` stream of wire events (one JSON value each).
pub type WireStream = Pin<Box<dyn Stream<Item = Result<Value, LlmError>> + Send>>;

/// A canonical, provider-neutral streaming event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum StreamEvent {
    /// A fragment of assistant text.
    TextDelta {
        /// The fragment.
        text: String,
    },
    /// A new tool call.
    ToolCallStart {
        /// Provider-assigned call id.
        id: String,
        /// Tool name.
        name: String,
    },
    /// A fragment of a tool call's JSON arguments.
    ToolCallDelta {
        /// Id of the call this fragment belongs to.
        id: String,
        /// Raw JSON text.
        json_chunk: String,
    },
    /// A usage report; counters are cumulative.
    Usage {
        /// The reported counters.
        usage: Usage,
    },
    /// The model stopped.
    Finish {
        /// Why.
        reason: FinishReason,
    },
    /// Response id and/or serving model.
    Metadata {
        /// Provider response id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Model name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
}

impl StreamEvent {
    /// Shorthand for a [`TextDelta`](Self::TextDelta).
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    /// Classifies the event for the `stream_chunk` instrumentation event.
    pub fn kind(&self) -> ChunkKind {
        match self {
            Self::TextDelta { .. } => ChunkKind::Text,
            Self::ToolCallStart { .. } | Self::ToolCallDelta { .. } => ChunkKind::ToolCall,
            Self::Usage { .. } => ChunkKind::Usage,
            Self::Finish { .. } => ChunkKind::Finish,
            Self::Metadata { .. } => ChunkKind::Metadata,
        }
    }

    /// Whether the event changes the message rather than its metadata.
    pub fn is_content(&self) -> bool {
        matches!(self.kind(), ChunkKind::Text | ChunkKind::ToolCall)
    }
}

/// Coarse classification of a [`StreamEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Text delta.
    Text,
    /// Tool call start or argument fragment.
    ToolCall,
    /// Usage report.
    Usage,
    /// Finish reason.
    Finish,
    /// Response id / model.
    Metadata,
}

impl ChunkKind {
    /// Snake-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::ToolCall => "tool_call",
            Self::Usage => "usage",
            Self::Finish => "finish",
            Self::Metadata => "metadata",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What observers see after each event.
#[derive(Debug, Clone, Copy)]
pub struct StreamChunk<'a> {
    /// The assistant message accumulated so far.
    pub message: &'a Message,
    /// The event that produced this chunk; `None` for metadata-only events.
    pub delta: Option<&'a StreamEvent>,
}

/// Returned by an observer to stop the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abort {
    /// Shown in the resulting [`LlmError::Aborted`].
    pub reason: String,
}

impl Abort {
    /// Creates an abort signal.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Receives every chunk of a streamed generation.
///
/// Closures work directly:
///
/// ```rust
/// use std::sync::Arc;
/// use llm_weave::stream::{Abort, StreamChunk, StreamObserver};
///
/// let printer: Arc<dyn StreamObserver> = Arc::new(|chunk: &StreamChunk<'_>| {
///     if chunk.message.text().len() > 10_000 {
///         return Err(Abort::new("too long"));
///     }
///     Ok(())
/// });
/// # let _ = printer;
/// ```
pub trait StreamObserver: Send + Sync {
    /// Called synchronously, in arrival order.
    fn on_chunk(&self, chunk: &StreamChunk<'_>) -> Result<(), Abort>;
}

impl<F> StreamObserver for F
where
    F: Fn(&StreamChunk<'_>) -> Result<(), Abort> + Send + Sync,
{
    fn on_chunk(&self, chunk: &StreamChunk<'_>) -> Result<(), Abort> {
        self(chunk)
    }
}

/// Everything the accumulator collected once the stream closed.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    /// The final assistant message, tool arguments parsed.
    pub message: Message,
    /// Folded usage reports.
    pub usage: Usage,
    /// Last reported finish reason.
    pub finish_reason: Option<FinishReason>,
    /// Provider response id.
    pub id: Option<String>,
    /// Serving model.
    pub model: Option<String>,
}

/// Merges [`StreamEvent`]s into one assistant message.
#[derive(Debug)]
pub struct StreamAccumulator {
    message: Message,
    usage: Usage,
    finish_reason: Option<FinishReason>,
    id: Option<String>,
    model: Option<String>,
    arguments: HashMap<String, String>,
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAccumulator {
    /// Opens an accumulator around an empty assistant message.
    pub fn new() -> Self {
        Self {
            message: Message::new(Role::Assistant, Vec::new()),
            usage: Usage::default(),
            finish_reason: None,
            id: None,
            model: None,
            arguments: HashMap::new(),
        }
    }

    /// The message accumulated so far.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Merges one event and notifies `observers`.
    ///
    /// Returns [`LlmError::Aborted`] as soon as an observer aborts; the
    /// remaining observers are not called for that chunk.
    pub fn push(
        &mut self,
        event: &StreamEvent,
        observers: &[Arc<dyn StreamObserver>],
    ) -> Result<(), LlmError> {
        self.apply(event);
        let chunk = StreamChunk {
            message: &self.message,
            delta: event.is_content().then_some(event),
        };
        for observer in observers {
            observer
                .on_chunk(&chunk)
                .map_err(|abort| LlmError::Aborted(abort.reason))?;
        }
        Ok(())
    }

    fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { text } => match self.message.content.last_mut() {
                Some(ContentPart::Text { text: tail }) => tail.push_str(text),
                _ => self.message.content.push(ContentPart::text(text.as_str())),
            },
            StreamEvent::ToolCallStart { id, name } => {
                self.arguments.entry(id.clone()).or_default();
                self.message
                    .requested_actions
                    .get_or_insert_with(Vec::new)
                    .push(ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: Value::Null,
                    });
            }
            StreamEvent::ToolCallDelta { id, json_chunk } => match self.arguments.get_mut(id) {
                Some(buffer) => buffer.push_str(json_chunk),
                None => tracing::warn!(call_id = %id, "argument fragment for unknown tool call"),
            },
            StreamEvent::Usage { usage } => self.usage.merge_reported(usage),
            StreamEvent::Finish { reason } => self.finish_reason = Some(reason.clone()),
            StreamEvent::Metadata { id, model } => {
                if id.is_some() {
                    self.id.clone_from(id);
                }
                if model.is_some() {
                    self.model.clone_from(model);
                }
            }
        }
    }

    /// Closes the accumulator, parsing the buffered tool arguments.
    pub fn finish(mut self) -> StreamOutcome {
        if let Some(calls) = self.message.requested_actions.as_mut() {
            for call in calls.iter_mut() {
                let raw = self.arguments.remove(&call.id).unwrap_or_default();
                call.arguments = parse_arguments(&call.name, &raw);
            }
        }
        StreamOutcome {
            message: self.message,
            usage: self.usage,
            finish_reason: self.finish_reason,
            id: self.id,
            model: self.model,
        }
    }
}
