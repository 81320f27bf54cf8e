//! Anthropic provider configuration.

use std::time::Duration;

/// Settings for [`AnthropicProvider`](crate::AnthropicProvider).
///
/// Start from [`Default`] and override what differs, or read the
/// standard environment variables with [`from_env`](Self::from_env):
///
/// ```rust
/// use llm_weave_anthropic::AnthropicConfig;
///
/// let config = AnthropicConfig {
///     api_key: "sk-ant-...".into(),
///     max_tokens: 8192,
///     ..Default::default()
/// };
/// assert_eq!(config.model, "claude-sonnet-4-20250514");
/// ```
#[derive(Clone)]
pub struct AnthropicConfig {
    /// Sent as `x-api-key`.
    pub api_key: String,
    /// Model used when a request leaves `model` empty.
    pub model: String,
    /// API root; point it at a proxy or a test server.
    pub base_url: String,
    /// `max_tokens` sent when the request does not set one. The Messages
    /// API requires the field.
    pub max_tokens: u32,
    /// Sent as `anthropic-version`.
    pub api_version: String,
    /// Beta flag sent in `anthropic-beta` when a request declares MCP
    /// servers.
    pub mcp_beta: String,
    /// Per-request deadline. `None` leaves reqwest's default.
    pub timeout: Option<Duration>,
    /// Shared client, reused instead of building one.
    pub client: Option<reqwest::Client>,
}

impl AnthropicConfig {
    /// Reads `ANTHROPIC_API_KEY`, and `ANTHROPIC_MODEL` /
    /// `ANTHROPIC_BASE_URL` when present.
    ///
    /// Returns `None` when no API key is set.
    pub fn from_env() -> Option<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let defaults = Self::default();
        Some(Self {
            api_key: var("ANTHROPIC_API_KEY").filter(|k| !k.is_empty())?,
            model: var("ANTHROPIC_MODEL").unwrap_or(defaults.model),
            base_url: var("ANTHROPIC_BASE_URL").unwrap_or(defaults.base_url),
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

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("api_version", &self.api_version)
            .field("mcp_beta", &self.mcp_beta)
            .field("timeout", &self.timeout)
            .field("shared_client", &self.client.is_some())
            .finish()
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-sonnet-4-20250514".into(),
            base_url: "https://api.anthropic.com".into(),
            max_tokens: 4096,
            api_version: "2023-06-01".into(),
            mcp_beta: "mcp-client-2025-04-04".into(),
            timeout: None,
            client: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_target_messages_api() {
        let config = AnthropicConfig::default();
        assert_eq!(config.base_url, "https://api.anthropic.com");
        assert_eq!(config.api_version, "2023-06-01");
        assert_eq!(config.mcp_beta, "mcp-client-2025-04-04");
        assert_eq!(config.max_tokens, 4096);
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_from_vars() {
        let config = AnthropicConfig::from_vars(vars(&[
            ("ANTHROPIC_API_KEY", "sk-ant-env"),
            ("ANTHROPIC_MODEL", "claude-opus-4-20250514"),
        ]))
        .unwrap();
        assert_eq!(config.api_key, "sk-ant-env");
        assert_eq!(config.model, "claude-opus-4-20250514");
        assert_eq!(config.base_url, "https://api.anthropic.com");
    }

    #[test]
    fn test_from_vars_requires_key() {
        assert!(AnthropicConfig::from_vars(vars(&[])).is_none());
        assert!(AnthropicConfig::from_vars(vars(&[("ANTHROPIC_API_KEY", "")])).is_none());
    }

    #[test]
    fn test_debug_hides_key() {
        let config = AnthropicConfig {
            api_key: "sk-ant-super-secret".into(),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(rendered.contains("shared_client: false"));
    }
}
