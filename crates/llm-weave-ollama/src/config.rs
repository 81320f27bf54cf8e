//! Ollama provider configuration.

use std::time::Duration;

/// Settings for [`OllamaProvider`](crate::OllamaProvider).
///
/// ```rust
/// use llm_weave_ollama::OllamaConfig;
///
/// let config = OllamaConfig {
///     model: "qwen2.5".into(),
///     keep_alive: Some("10m".into()),
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct OllamaConfig {
    /// Model used when a request leaves `model` empty.
    pub model: String,
    /// Model used when an embeddings request leaves `model` empty.
    pub embedding_model: String,
    /// Server root, `http://localhost:11434` unless overridden.
    pub base_url: String,
    /// Bearer token for hosted or proxied instances. A local server
    /// needs none.
    pub api_key: Option<String>,
    /// How long the server keeps the model loaded after a request
    /// (e.g. `"5m"`, `"0"`). `None` leaves the server default.
    pub keep_alive: Option<String>,
    /// Per-request deadline. `None` leaves reqwest's default; local
    /// models can be slow to load.
    pub timeout: Option<Duration>,
    /// Shared client, reused instead of building one.
    pub client: Option<reqwest::Client>,
}

impl OllamaConfig {
    /// Reads `OLLAMA_HOST` and `OLLAMA_API_KEY` when present. A host
    /// without a scheme gets `http://`.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let base_url = match var("OLLAMA_HOST").filter(|h| !h.is_empty()) {
            Some(host) if host.contains("://") => host,
            Some(host) => format!("http://{host}"),
            None => defaults.base_url.clone(),
        };
        Self {
            base_url,
            api_key: var("OLLAMA_API_KEY").filter(|k| !k.is_empty()),
            ..defaults
        }
    }

    pub(crate) fn http_client(&self) -> reqwest::Client {
        if let Some(client) = &self.client {
            return client.clone();
        }
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().expect("failed to build HTTP client")
    }
}

impl std::fmt::Debug for OllamaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaConfig")
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("keep_alive", &self.keep_alive)
            .field("timeout", &self.timeout)
            .field("shared_client", &self.client.is_some())
            .finish()
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            embedding_model: "nomic-embed-text".into(),
            base_url: "http://localhost:11434".into(),
            api_key: None,
            keep_alive: None,
            timeout: None,
            client: None,
        }
    }
}
