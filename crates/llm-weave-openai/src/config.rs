//! `OpenAI` provider configuration.

use std::time::Duration;

/// Which generation API the provider talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenAiApi {
    /// `POST /chat/completions`.
    #[default]
    Chat,
    /// `POST /responses`. Needed for remote MCP servers.
    Responses,
}

/// Settings for [`OpenAiProvider`](crate::OpenAiProvider).
///
/// ```rust
/// use llm_weave_openai::{OpenAiApi, OpenAiConfig};
///
/// let config = OpenAiConfig {
///     api_key: "sk-...".into(),
///     api: OpenAiApi::Responses,
///     ..Default::default()
/// };
/// assert_eq!(config.model, "gpt-4o");
/// ```
#[derive(Clone)]
pub struct OpenAiConfig {
    /// Bearer token.
    pub api_key: String,
    /// Model used when a request leaves `model` empty.
    pub model: String,
    /// Model used when an embeddings request leaves `model` empty.
    pub embedding_model: String,
    /// API root including the version segment. Any compatible server
    /// works.
    pub base_url: String,
    /// Sent as `OpenAI-Organization` when set.
    pub organization: Option<String>,
    /// Generation API dialect.
    pub api: OpenAiApi,
    /// Per-request deadline. `None` leaves reqwest's default.
    pub timeout: Option<Duration>,
    /// Shared client, reused instead of building one.
    pub client: Option<reqwest::Client>,
}

impl OpenAiConfig {
    /// Reads `OPENAI_API_KEY`, plus `OPENAI_BASE_URL`, `OPENAI_MODEL`
    /// and `OPENAI_ORG_ID` when present.
    ///
    /// Returns `None` when no API key is set.
    pub fn from_env() -> Option<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let defaults = Self::default();
        Some(Self {
            api_key: var("OPENAI_API_KEY").filter(|k| !k.is_empty())?,
            model: var("OPENAI_MODEL").unwrap_or(defaults.model),
            base_url: var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            organization: var("OPENAI_ORG_ID"),
            ..defaults
        })
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

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("api", &self.api)
            .field("timeout", &self.timeout)
            .field("shared_client", &self.client.is_some())
            .finish()
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o".into(),
            embedding_model: "text-embedding-3-small".into(),
            base_url: "https://api.openai.com/v1".into(),
            organization: None,
            api: OpenAiApi::Chat,
            timeout: None,
            client: None,
        }
    }
}
