//! `OpenAI` `Provider` implementation.

use llm_weave::error::LlmError;
use llm_weave::framing::sse_events;
use llm_weave::provider::{Endpoint, Provider, ProviderMetadata};
use llm_weave::stream::WireStream;
use llm_weave::transform::Transform;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::chat::ChatTransform;
use crate::config::{OpenAiApi, OpenAiConfig};
use crate::convert;
use crate::responses::ResponsesTransform;

#[derive(Debug)]
enum Dialect {
    Chat(ChatTransform),
    Responses(ResponsesTransform),
}

/// `OpenAI` provider implementing [`Provider`].
///
/// Speaks Chat Completions or the Responses API depending on
/// [`OpenAiConfig::api`], and embeddings through `/embeddings` either
/// way. Works with any OpenAI-compatible endpoint via `base_url`.
///
/// # Example
///
/// ```rust,no_run
/// use llm_weave::{Config, EmbedRequest, Generator};
/// use llm_weave_openai::{OpenAiConfig, OpenAiProvider};
///
/// # async fn example() -> Result<(), llm_weave::LlmError> {
/// let provider = OpenAiProvider::new(OpenAiConfig {
///     api_key: std::env::var("OPENAI_API_KEY").unwrap(),
///     ..Default::default()
/// });
/// let generator = Generator::new(provider, &Config::default());
///
/// let vectors = generator
///     .embed(&EmbedRequest::new(["first document", "second document"]))
///     .await?;
/// assert_eq!(vectors.embeddings.len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
    dialect: Dialect,
}

impl OpenAiProvider {
    /// Builds the provider for the configured API, reusing
    /// `config.client` when one is given.
    pub fn new(config: OpenAiConfig) -> Self {
        let client = config.http_client();
        let dialect = match config.api {
            OpenAiApi::Chat => Dialect::Chat(ChatTransform::new()),
            OpenAiApi::Responses => Dialect::Responses(ResponsesTransform),
        };
        Self {
            config,
            client,
            dialect,
        }
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                .map_err(|_| LlmError::Auth("API key contains invalid header characters".into()))?,
        );
        if let Some(org) = &self.config.organization {
            headers.insert(
                "OpenAI-Organization",
                HeaderValue::from_str(org).map_err(|_| {
                    LlmError::InvalidRequest(
                        "organization contains invalid header characters".into(),
                    )
                })?,
            );
        }
        Ok(headers)
    }

    fn url(&self, endpoint: Endpoint) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let path = match (endpoint, &self.dialect) {
            (Endpoint::Embed, _) => "embeddings",
            (Endpoint::Generate, Dialect::Chat(_)) => "chat/completions",
            (Endpoint::Generate, Dialect::Responses(_)) => "responses",
        };
        format!("{base}/{path}")
    }

    /// Post `body` and return the response after validating the status.
    async fn post(&self, endpoint: Endpoint, body: &Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(self.url(endpoint))
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, "openai request failed");
            return Err(convert::convert_error(status, &body));
        }
        Ok(response)
    }

    fn transport_error(&self, e: &reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                elapsed_ms: self
                    .config
                    .timeout
                    .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            }
        } else {
            LlmError::Http {
                status: e.status(),
                message: e.to_string(),
            }
        }
    }
}

impl Provider for OpenAiProvider {
    fn transform(&self) -> &dyn Transform {
        match &self.dialect {
            Dialect::Chat(chat) => chat,
            Dialect::Responses(responses) => responses,
        }
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn send(&self, endpoint: Endpoint, body: &Value) -> Result<Value, LlmError> {
        let response = self.post(endpoint, body).await?;
        let text = response.text().await.map_err(|e| self.transport_error(&e))?;
        serde_json::from_str(&text).map_err(|e| {
            LlmError::response_format(format!("Failed to parse OpenAI response: {e}"), text)
        })
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn send_stream(&self, body: &Value) -> Result<WireStream, LlmError> {
        let response = self.post(Endpoint::Generate, body).await?;
        Ok(sse_events(response.bytes_stream()))
    }

    fn metadata(&self) -> ProviderMetadata {
        let transform = self.transform();
        ProviderMetadata {
            name: transform.name().into(),
            model: self.config.model.clone(),
            embedding_model: Some(self.config.embedding_model.clone()),
            capabilities: transform.capabilities(),
        }
    }
}
