//! `OpenRouter` `Provider` implementation.

use llm_weave::error::LlmError;
use llm_weave::framing::sse_events;
use llm_weave::provider::{Endpoint, Provider, ProviderMetadata};
use llm_weave::stream::WireStream;
use llm_weave::transform::Transform;
use llm_weave_openai::convert_error;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::OpenRouterConfig;
use crate::transform::OpenRouterTransform;

/// `OpenRouter` provider implementing [`Provider`].
///
/// # Example
///
/// ```rust,no_run
/// use llm_weave::{Config, Generator, Message, Request};
/// use llm_weave_openrouter::{OpenRouterConfig, OpenRouterProvider};
///
/// # async fn example() -> Result<(), llm_weave::LlmError> {
/// let provider = OpenRouterProvider::new(OpenRouterConfig {
///     api_key: std::env::var("OPENROUTER_API_KEY").unwrap(),
///     model: "anthropic/claude-sonnet-4".into(),
///     fallback_models: vec!["openai/gpt-4o".into()],
///     ..Default::default()
/// });
/// let generator = Generator::new(provider, &Config::default());
///
/// let response = generator
///     .generate(&Request {
///         messages: vec![Message::user("Hello!")],
///         ..Default::default()
///     })
///     .await?;
/// println!("{} answered", response.model.unwrap_or_default());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenRouterProvider {
    config: OpenRouterConfig,
    client: reqwest::Client,
    transform: OpenRouterTransform,
}

impl OpenRouterProvider {
    /// Builds the provider, carrying routing and fallbacks into every
    /// request body.
    pub fn new(config: OpenRouterConfig) -> Self {
        let client = config.http_client();
        let mut transform = OpenRouterTransform::new()
            .with_fallback_models(config.fallback_models.clone())
            .with_max_tokens(config.max_tokens);
        if let Some(routing) = &config.routing {
            transform = transform.with_routing(routing.clone());
        }
        Self {
            config,
            client,
            transform,
        }
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                .map_err(|_| LlmError::Auth("API key contains invalid header characters".into()))?,
        );
        let attribution = [
            ("HTTP-Referer", &self.config.app_url),
            ("X-Title", &self.config.app_name),
        ];
        for (name, value) in attribution {
            if let Some(value) = value {
                headers.insert(
                    name,
                    HeaderValue::from_str(value).map_err(|_| {
                        LlmError::InvalidRequest(format!(
                            "{name} contains invalid header characters"
                        ))
                    })?,
                );
            }
        }
        Ok(headers)
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    /// Post `body` and return the response after validating the status.
    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(self.completions_url())
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, "openrouter request failed");
            return Err(convert_error(status, &body));
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

impl Provider for OpenRouterProvider {
    fn transform(&self) -> &dyn Transform {
        &self.transform
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn send(&self, endpoint: Endpoint, body: &Value) -> Result<Value, LlmError> {
        if endpoint == Endpoint::Embed {
            return Err(LlmError::capability("openrouter", "embeddings"));
        }
        let response = self.post(body).await?;
        let text = response.text().await.map_err(|e| self.transport_error(&e))?;
        serde_json::from_str(&text).map_err(|e| {
            LlmError::response_format(format!("Failed to parse OpenRouter response: {e}"), text)
        })
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn send_stream(&self, body: &Value) -> Result<WireStream, LlmError> {
        let response = self.post(body).await?;
        Ok(sse_events(response.bytes_stream()))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "openrouter".into(),
            model: self.config.model.clone(),
            embedding_model: None,
            capabilities: self.transform.capabilities(),
        }
    }
}
