//! Named instrumentation events.
//!
//! The [`Generator`](crate::Generator) reports what it is doing through
//! an [`Instrumenter`]. Consumers subscribe to events by name and receive
//! a read-only [`Event`] snapshot:
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use llm_weave::instrument::{Event, Instrumenter};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let instrumenter = Instrumenter::default();
//! instrumenter.subscribe("stream_open", move |event: &Event| {
//!     sink.lock().unwrap().push(event.name());
//! });
//!
//! instrumenter.emit(&Event::StreamOpen);
//! instrumenter.emit(&Event::StreamClose);
//! assert_eq!(*seen.lock().unwrap(), vec!["stream_open"]);
//! ```
//!
//! Every event is also logged to `tracing` at debug level under the
//! `llm_weave::instrument` target.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::chat::FinishReason;
use crate::error::ErrorKind;
use crate::stream::ChunkKind;
use crate::usage::Usage;

/// An instrumentation event and its payload.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Event {
    /// A generation is about to be sent.
    PromptStart {
        /// Requested model.
        model: String,
        /// Messages in the request.
        message_count: usize,
        /// Whether tools were declared.
        has_tools: bool,
        /// Whether the response is streamed.
        stream: bool,
    },
    /// A generation finished.
    PromptComplete {
        /// Usage of this call.
        usage: Usage,
        /// Finish reason, if reported.
        finish_reason: Option<FinishReason>,
        /// Provider response id, if reported.
        response_id: Option<String>,
    },
    /// An embeddings request is about to be sent.
    EmbedStart {
        /// Requested model.
        model: String,
        /// Number of input strings.
        input_size: usize,
    },
    /// An embeddings request finished.
    EmbedComplete {
        /// Usage of this call.
        usage: Usage,
        /// Number of vectors returned.
        embedding_count: usize,
    },
    /// An attempt failed and will be retried.
    RetryAttempt {
        /// 1-based number of the failed attempt.
        attempt: u32,
        /// Configured retry budget.
        max_retries: u32,
        /// Kind of the failure.
        exception_kind: ErrorKind,
        /// Wait before the next attempt.
        backoff_seconds: f64,
    },
    /// The retry budget is spent.
    RetryExhausted {
        /// Configured retry budget.
        max_retries: u32,
        /// Kind of the last failure.
        exception_kind: ErrorKind,
    },
    /// A stream was opened.
    StreamOpen,
    /// A stream event was merged.
    StreamChunk {
        /// What kind of event it was.
        chunk_kind: ChunkKind,
    },
    /// A stream was closed.
    StreamClose,
}

impl Event {
    /// The name subscribers use.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PromptStart { .. } => "prompt_start",
            Self::PromptComplete { .. } => "prompt_complete",
            Self::EmbedStart { .. } => "embed_start",
            Self::EmbedComplete { .. } => "embed_complete",
            Self::RetryAttempt { .. } => "retry_attempt",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::StreamOpen => "stream_open",
            Self::StreamChunk { .. } => "stream_chunk",
            Self::StreamClose => "stream_close",
        }
    }
}

type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

/// Fan-out of [`Event`]s to subscribers keyed by event name.
///
/// Cloning is cheap and clones share subscribers.
#[derive(Clone, Default)]
pub struct Instrumenter {
    subscribers: Arc<RwLock<HashMap<&'static str, Vec<Subscriber>>>>,
}

impl fmt::Debug for Instrumenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = subscribers.keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("Instrumenter")
            .field("subscribed", &names)
            .finish()
    }
}

impl Instrumenter {
    /// Registers `callback` for events named `name`.
    ///
    /// Unknown names are accepted; they simply never fire.
    pub fn subscribe<F>(&self, name: &'static str, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Delivers `event` to its subscribers in registration order.
    pub fn emit(&self, event: &Event) {
        tracing::debug!(target: "llm_weave::instrument", event = event.name(), payload = ?event);

        let callbacks: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event.name())
            .cloned()
            .unwrap_or_default();
        for callback in callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_subscribers_filtered_by_name() {
        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let instrumenter = Instrumenter::default();
        for name in ["retry_attempt", "retry_exhausted"] {
            let sink = Arc::clone(&seen);
            instrumenter.subscribe(name, move |e: &Event| sink.lock().unwrap().push(e.name()));
        }

        instrumenter.emit(&Event::StreamOpen);
        instrumenter.emit(&Event::RetryAttempt {
            attempt: 1,
            max_retries: 3,
            exception_kind: ErrorKind::Timeout,
            backoff_seconds: 1.0,
        });
        instrumenter.emit(&Event::RetryExhausted {
            max_retries: 3,
            exception_kind: ErrorKind::Timeout,
        });

        assert_eq!(*seen.lock().unwrap(), vec!["retry_attempt", "retry_exhausted"]);
    }

    /// Counts events logged under the instrumentation target.
    #[derive(Default)]
    struct TargetCounter(Arc<Mutex<usize>>);

    impl tracing::Subscriber for TargetCounter {
        fn register_callsite(
            &self,
            _: &'static tracing::Metadata<'static>,
        ) -> tracing::subscriber::Interest {
            tracing::subscriber::Interest::sometimes()
        }

        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }

        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}

        fn event(&self, event: &tracing::Event<'_>) {
            if event.metadata().target() == "llm_weave::instrument" {
                *self.0.lock().unwrap() += 1;
            }
        }

        fn enter(&self, _: &tracing::span::Id) {}

        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[test]
    fn test_emit_logs_without_subscribers() {
        let counter = TargetCounter::default();
        let logged = Arc::clone(&counter.0);
        tracing::subscriber::with_default(counter, || {
            let instrumenter = Instrumenter::default();
            instrumenter.emit(&Event::StreamOpen);
            instrumenter.emit(&Event::StreamClose);
        });
        assert_eq!(*logged.lock().unwrap(), 2);
    }

    #[test]
    fn test_clones_share_subscribers() {
        let count = Arc::new(Mutex::new(0));
        let a = Instrumenter::default();
        let b = a.clone();
        let sink = Arc::clone(&count);
        a.subscribe("stream_close", move |_: &Event| *sink.lock().unwrap() += 1);
        b.emit(&Event::StreamClose);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_subscriber_may_subscribe_during_emit() {
        let instrumenter = Instrumenter::default();
        let inner = instrumenter.clone();
        instrumenter.subscribe("stream_open", move |_: &Event| {
            inner.subscribe("stream_close", |_: &Event| {});
        });
        instrumenter.emit(&Event::StreamOpen);
        assert!(format!("{instrumenter:?}").contains("stream_close"));
    }

    #[test]
    fn test_event_names() {
        assert_eq!(
            Event::StreamChunk {
                chunk_kind: ChunkKind::Text
            }
            .name(),
            "stream_chunk"
        );
        assert_eq!(
            Event::EmbedStart {
                model: "m".into(),
                input_size: 2
            }
            .name(),
            "embed_start"
        );
    }
}
