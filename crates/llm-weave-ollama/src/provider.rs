//! Ollama `Provider` implementation.

use llm_weave::error::LlmError;
use llm_weave::framing::json_lines;
use llm_weave::provider::{Endpoint, Provider, ProviderMetadata};
use llm_weave::stream::WireStream;
use llm_weave::transform::Transform;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::OllamaConfig;
use crate::convert;
use crate::transform::OllamaTransform;

/// Ollama provider implementing [`Provider`].
///
/// Talks to a local (or remote) Ollama server. Streaming uses
/// newline-delimited JSON rather than server-sent events.
///
/// # Example
///
/// ```rust,no_run
/// use llm_weave::{Config, EmbedRequest, Generator, Message, Request};
/// use llm_weave_ollama::{OllamaConfig, OllamaProvider};
///
/// # async fn example() -> Result<(), llm_weave::LlmError> {
/// let provider = OllamaProvider::new(OllamaConfig::default());
/// let generator = Generator::new(provider, &Config::default());
///
/// let response = generator
///     .generate(&Request {
///         messages: vec![Message::user("Hello!")],
///         ..Default::default()
///     })
///     .await?;
/// println!("{}", response.text());
///
/// let vectors = generator.embed(&EmbedRequest::new(["hello"])).await?;
/// println!("{} dimensions", vectors.embeddings[0].len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OllamaProvider {
    config: OllamaConfig,
    client: reqwest::Client,
    transform: OllamaTransform,
}

impl OllamaProvider {
    /// Builds the provider, reusing `config.client` when one is given.
    pub fn new(config: OllamaConfig) -> Self {
        let client = config.http_client();
        let mut transform = OllamaTransform::new();
        if let Some(keep_alive) = &config.keep_alive {
            transform = transform.with_keep_alive(keep_alive.clone());
        }
        Self {
            config,
            client,
            transform,
        }
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.config.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
                    LlmError::Auth("API key contains invalid header characters".into())
                })?,
            );
        }
        Ok(headers)
    }

    fn url(&self, endpoint: Endpoint) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match endpoint {
            Endpoint::Generate => format!("{base}/api/chat"),
            Endpoint::Embed => format!("{base}/api/embed"),
        }
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
            debug!(%status, "ollama request failed");
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

impl Provider for OllamaProvider {
    fn transform(&self) -> &dyn Transform {
        &self.transform
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn send(&self, endpoint: Endpoint, body: &Value) -> Result<Value, LlmError> {
        let response = self.post(endpoint, body).await?;
        let text = response.text().await.map_err(|e| self.transport_error(&e))?;
        serde_json::from_str(&text).map_err(|e| {
            LlmError::response_format(format!("Failed to parse Ollama response: {e}"), text)
        })
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn send_stream(&self, body: &Value) -> Result<WireStream, LlmError> {
        let response = self.post(Endpoint::Generate, body).await?;
        Ok(json_lines(response.bytes_stream()))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "ollama".into(),
            model: self.config.model.clone(),
            embedding_model: Some(self.config.embedding_model.clone()),
            capabilities: self.transform.capabilities(),
        }
    }
}

#[cfg(test)]
mod tests {
    use llm_weave::provider::Capability;

    use super::*;

    #[test]
    fn test_metadata() {
        let provider = OllamaProvider::new(OllamaConfig {
            model: "mistral".into(),
            ..Default::default()
        });
        let meta = provider.metadata();
        assert_eq!(meta.name, "ollama");
        assert_eq!(meta.model, "mistral");
        assert_eq!(meta.embedding_model.as_deref(), Some("nomic-embed-text"));
        assert!(meta.capabilities.contains(&Capability::Tools));
        assert!(meta.capabilities.contains(&Capability::Vision));
        assert!(!meta.capabilities.contains(&Capability::Mcp));
    }

    #[test]
    fn test_urls() {
        let provider = OllamaProvider::new(OllamaConfig {
            base_url: "http://gpu-box:11434/".into(),
            ..Default::default()
        });
        assert_eq!(provider.url(Endpoint::Generate), "http://gpu-box:11434/api/chat");
        assert_eq!(provider.url(Endpoint::Embed), "http://gpu-box:11434/api/embed");
    }

    #[test]
    fn test_bearer_only_when_configured() {
        let local = OllamaProvider::new(OllamaConfig::default());
        assert!(local.headers().unwrap().get(AUTHORIZATION).is_none());

        let hosted = OllamaProvider::new(OllamaConfig {
            api_key: Some("ollama-key".into()),
            ..Default::default()
        });
        assert_eq!(hosted.headers().unwrap()[AUTHORIZATION], "Bearer ollama-key");
    }

    #[test]
    fn test_keep_alive_flows_into_transform() {
        let provider = OllamaProvider::new(OllamaConfig {
            keep_alive: Some("0".into()),
            ..Default::default()
        });
        assert_eq!(provider.transform, OllamaTransform::new().with_keep_alive("0"));
    }
}
