//! The generation pipeline.
//!
//! A [`Generator`] composes one provider with the cross-cutting pieces
//! around it:
//!
//! ```text
//!   Request ─▶ Transform::to_wire ─▶ Retrier( Provider::send ) ─▶ Transform::from_wire ─▶ Response
//!                                   └─ stream: Retrier( send_stream ) ─▶ StreamDecoder ─▶ StreamAccumulator
//!   failure ─▶ ExceptionPolicy
//! ```
//!
//! Validation happens inside `to_wire`, before any network call, and its
//! errors skip both the retrier and the exception handler. Streaming
//! calls are retried only while the stream is being opened; once events
//! flow, a failure ends the call.

use std::borrow::Cow;
use std::sync::Arc;

use futures::StreamExt;
use tracing::instrument;

use crate::chat::Response;
use crate::embed::{EmbedRequest, EmbedResponse};
use crate::error::LlmError;
use crate::exception::{ExceptionHandler, ExceptionPolicy};
use crate::instrument::{Event, Instrumenter};
use crate::provider::{DynProvider, Endpoint, ProviderMetadata, Request};
use crate::retry::{Retrier, RetryPolicy, Sleeper};
use crate::stream::{StreamAccumulator, StreamObserver, WireStream};
use crate::tool::ToolLoopConfig;
use crate::transform::StreamDecoder;

/// Engine configuration, built once and passed by reference.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Retry behaviour around provider calls.
    pub retry: RetryPolicy,
    /// Tool continuation settings.
    pub tool_loop: ToolLoopConfig,
}

/// One provider wrapped with retry, instrumentation, exception handling
/// and stream observers.
///
/// ```rust
/// use llm_weave::mock::MockProvider;
/// use llm_weave::{Config, Generator, Message, Request};
///
/// # tokio_test::block_on(async {
/// let generator = Generator::new(MockProvider::new("echo"), &Config::default());
/// let response = generator
///     .generate(&Request {
///         messages: vec![Message::user("ping")],
///         ..Default::default()
///     })
///     .await
///     .unwrap();
/// assert_eq!(response.text(), "ping");
/// assert_eq!(response.messages.len(), 2);
/// # });
/// ```
#[derive(Clone)]
pub struct Generator {
    provider: Arc<dyn DynProvider>,
    retrier: Retrier,
    instrumenter: Instrumenter,
    exceptions: ExceptionPolicy,
    observers: Vec<Arc<dyn StreamObserver>>,
    tool_loop: ToolLoopConfig,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("provider", &self.provider.metadata())
            .field("retrier", &self.retrier)
            .field("exceptions", &self.exceptions)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Generator {
    /// Wraps `provider` using `config`.
    pub fn new(provider: impl DynProvider + 'static, config: &Config) -> Self {
        Self::from_shared(Arc::new(provider), config)
    }

    /// Wraps an already shared provider.
    pub fn from_shared(provider: Arc<dyn DynProvider>, config: &Config) -> Self {
        let instrumenter = Instrumenter::default();
        Self {
            provider,
            retrier: Retrier::new(config.retry.clone(), instrumenter.clone()),
            instrumenter,
            exceptions: ExceptionPolicy::default(),
            observers: Vec::new(),
            tool_loop: config.tool_loop.clone(),
        }
    }

    /// Emits events on `instrumenter` instead of a private one.
    #[must_use]
    pub fn with_instrumenter(mut self, instrumenter: Instrumenter) -> Self {
        self.retrier = self.retrier.with_instrumenter(instrumenter.clone());
        self.instrumenter = instrumenter;
        self
    }

    /// Replaces the sleeper used between builtin retries.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retrier = self.retrier.with_sleeper(sleeper);
        self
    }

    /// Installs an exception handler.
    #[must_use]
    pub fn with_exception_handler(mut self, handler: impl ExceptionHandler + 'static) -> Self {
        self.exceptions = ExceptionPolicy::new(Arc::new(handler));
        self
    }

    /// Adds a stream observer. Observers run in registration order.
    #[must_use]
    pub fn with_observer(mut self, observer: impl StreamObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// The instrumenter events are emitted on.
    pub fn instrumenter(&self) -> &Instrumenter {
        &self.instrumenter
    }

    /// Tool continuation settings from the [`Config`].
    pub fn tool_loop_config(&self) -> &ToolLoopConfig {
        &self.tool_loop
    }

    /// The wrapped provider's metadata.
    pub fn metadata(&self) -> ProviderMetadata {
        self.provider.metadata()
    }

    /// Runs one generation.
    ///
    /// Failures that survive the retry policy go to the exception
    /// handler, which may supply a fallback response.
    #[instrument(skip_all, fields(provider = self.provider.transform().name(), model = %request.model))]
    pub async fn generate(&self, request: &Request) -> Result<Response, LlmError> {
        let request = self.with_default_model(request);
        match self.try_generate(&request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                tracing::debug!(error = %err, kind = %err.kind(), "generation failed");
                self.exceptions.resolve(err, &request)
            }
        }
    }

    async fn try_generate(&self, request: &Request) -> Result<Response, LlmError> {
        let transform = self.provider.transform();
        let body = transform.to_wire(request)?;

        self.instrumenter.emit(&Event::PromptStart {
            model: request.model.clone(),
            message_count: request.messages.len(),
            has_tools: !request.tools().is_empty(),
            stream: request.stream,
        });

        let mut response = if request.stream {
            self.generate_stream(request, &body).await?
        } else {
            self.retrier
                .run(|| async {
                    let wire = self.provider.send_boxed(Endpoint::Generate, &body).await?;
                    transform.from_wire(request, wire)
                })
                .await?
        };
        response.raw_request = body;

        self.instrumenter.emit(&Event::PromptComplete {
            usage: response.usage.clone(),
            finish_reason: response.finish_reason.clone(),
            response_id: response.id.clone(),
        });
        Ok(response)
    }

    async fn generate_stream(
        &self,
        request: &Request,
        body: &serde_json::Value,
    ) -> Result<Response, LlmError> {
        let transform = self.provider.transform();
        let mut wire = self
            .retrier
            .run(|| self.provider.send_stream_boxed(body))
            .await?;

        let mut decoder = transform.stream_decoder(request);
        let mut accumulator = StreamAccumulator::new();
        self.instrumenter.emit(&Event::StreamOpen);
        let drained = self
            .drain(&mut wire, decoder.as_mut(), &mut accumulator)
            .await;
        self.instrumenter.emit(&Event::StreamClose);
        drained?;

        transform.finish_stream(request, accumulator.finish())
    }

    async fn drain(
        &self,
        wire: &mut WireStream,
        decoder: &mut dyn StreamDecoder,
        accumulator: &mut StreamAccumulator,
    ) -> Result<(), LlmError> {
        while let Some(item) = wire.next().await {
            for event in decoder.decode(item?)? {
                accumulator.push(&event, &self.observers)?;
                self.instrumenter.emit(&Event::StreamChunk {
                    chunk_kind: event.kind(),
                });
            }
        }
        Ok(())
    }

    /// Embeds `request.input`, one vector per string.
    #[instrument(skip_all, fields(provider = self.provider.transform().name(), model = %request.model))]
    pub async fn embed(&self, request: &EmbedRequest) -> Result<EmbedResponse, LlmError> {
        let request = if request.model.is_empty() {
            let metadata = self.provider.metadata();
            Cow::Owned(EmbedRequest {
                model: metadata.embedding_model.unwrap_or(metadata.model),
                ..request.clone()
            })
        } else {
            Cow::Borrowed(request)
        };
        let transform = self.provider.transform();
        let body = transform.embed_to_wire(&request)?;

        self.instrumenter.emit(&Event::EmbedStart {
            model: request.model.clone(),
            input_size: request.input.len(),
        });

        let response = self
            .retrier
            .run(|| async {
                let wire = self.provider.send_boxed(Endpoint::Embed, &body).await?;
                transform.embed_from_wire(&request, wire)
            })
            .await?;

        self.instrumenter.emit(&Event::EmbedComplete {
            usage: response.usage.clone(),
            embedding_count: response.embeddings.len(),
        });
        Ok(response)
    }

    fn with_default_model<'r>(&self, request: &'r Request) -> Cow<'r, Request> {
        if request.model.is_empty() {
            Cow::Owned(Request {
                model: self.provider.metadata().model,
                ..request.clone()
            })
        } else {
            Cow::Borrowed(request)
        }
    }
}
