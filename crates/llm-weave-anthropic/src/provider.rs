//! Anthropic `Provider` implementation.

use llm_weave::error::LlmError;
use llm_weave::framing::sse_events;
use llm_weave::provider::{Endpoint, Provider, ProviderMetadata};
use llm_weave::stream::WireStream;
use llm_weave::transform::Transform;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::AnthropicConfig;
use crate::convert;
use crate::transform::AnthropicTransform;

/// Anthropic Claude provider implementing [`Provider`].
///
/// Moves [`AnthropicTransform`] bodies over the Messages API. Wrap it in
/// a [`Generator`](llm_weave::Generator) for retry, streaming and
/// instrumentation.
///
/// # Example
///
/// ```rust,no_run
/// use llm_weave::{Config, Generator, Message, Request};
/// use llm_weave_anthropic::{AnthropicConfig, AnthropicProvider};
///
/// # async fn example() -> Result<(), llm_weave::LlmError> {
/// let provider = AnthropicProvider::new(AnthropicConfig {
///     api_key: std::env::var("ANTHROPIC_API_KEY").unwrap(),
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
/// println!("{}", response.text());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: reqwest::Client,
    transform: AnthropicTransform,
}

impl AnthropicProvider {
    /// Builds the provider, reusing `config.client` when one is given.
    pub fn new(config: AnthropicConfig) -> Self {
        let client = config.http_client();
        let transform = AnthropicTransform::new(config.max_tokens);
        Self {
            config,
            client,
            transform,
        }
    }

    /// Build the headers for one request. MCP declarations need the
    /// beta flag.
    fn headers(&self, body: &Value) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|_| LlmError::Auth("API key contains invalid header characters".into()))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(&self.config.api_version).map_err(|_| {
                LlmError::InvalidRequest("API version contains invalid header characters".into())
            })?,
        );
        if body.get("mcp_servers").is_some() {
            headers.insert(
                "anthropic-beta",
                HeaderValue::from_str(&self.config.mcp_beta).map_err(|_| {
                    LlmError::InvalidRequest("beta flag contains invalid header characters".into())
                })?,
            );
        }
        Ok(headers)
    }

    fn messages_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/v1/messages")
    }

    /// Post `body` and return the response after validating the status.
    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(self.messages_url())
            .headers(self.headers(body)?)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, "anthropic request failed");
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

impl Provider for AnthropicProvider {
    fn transform(&self) -> &dyn Transform {
        &self.transform
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn send(&self, endpoint: Endpoint, body: &Value) -> Result<Value, LlmError> {
        if endpoint == Endpoint::Embed {
            return Err(LlmError::capability("anthropic", "embeddings"));
        }
        let response = self.post(body).await?;
        let text = response.text().await.map_err(|e| self.transport_error(&e))?;
        serde_json::from_str(&text).map_err(|e| {
            LlmError::response_format(format!("Failed to parse Anthropic response: {e}"), text)
        })
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn send_stream(&self, body: &Value) -> Result<WireStream, LlmError> {
        let response = self.post(body).await?;
        Ok(sse_events(response.bytes_stream()))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "anthropic".into(),
            model: self.config.model.clone(),
            embedding_model: None,
            capabilities: self.transform.capabilities(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use llm_weave::provider::Capability;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_metadata() {
        let provider = AnthropicProvider::new(AnthropicConfig {
            model: "claude-3-5-haiku-20241022".into(),
            ..Default::default()
        });
        let meta = provider.metadata();
        assert_eq!(meta.name, "anthropic");
        assert_eq!(meta.model, "claude-3-5-haiku-20241022");
        assert!(meta.capabilities.contains(&Capability::Mcp));
        assert!(!meta.capabilities.contains(&Capability::Embeddings));
    }

    #[test]
    fn test_messages_url_trailing_slash() {
        let provider = AnthropicProvider::new(AnthropicConfig {
            base_url: "https://proxy.example.com/".into(),
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        assert_eq!(provider.messages_url(), "https://proxy.example.com/v1/messages");
    }

    #[test]
    fn test_beta_header_only_with_mcp() {
        let provider = AnthropicProvider::new(AnthropicConfig {
            api_key: "k".into(),
            ..Default::default()
        });
        let plain = provider.headers(&json!({"messages": []})).unwrap();
        assert!(plain.get("anthropic-beta").is_none());
        let with_mcp = provider
            .headers(&json!({"messages": [], "mcp_servers": []}))
            .unwrap();
        assert_eq!(with_mcp["anthropic-beta"], "mcp-client-2025-04-04");
    }

    #[test]
    fn test_max_tokens_flow_into_transform() {
        let provider = AnthropicProvider::new(AnthropicConfig {
            max_tokens: 99,
            ..Default::default()
        });
        assert_eq!(provider.transform, AnthropicTransform::new(99));
    }
}
