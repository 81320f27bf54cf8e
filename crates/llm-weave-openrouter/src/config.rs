//! `OpenRouter` provider configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upstream routing preferences, sent as the `provider` object.
///
/// Every field is optional; unset fields are omitted so `OpenRouter`
/// applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRouting {
    /// Upstream providers to try, in order (e.g. `["anthropic", "openai"]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<String>>,
    /// Only these upstream providers may serve the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only: Option<Vec<String>>,
    /// Upstream providers that must not serve the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore: Option<Vec<String>>,
    /// Whether other providers may be used when the preferred ones fail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_fallbacks: Option<bool>,
    /// Only route to providers supporting every request parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_parameters: Option<bool>,
    /// Whether providers that may retain prompts are acceptable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_collection: Option<DataCollection>,
    /// How to rank candidate providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<ProviderSort>,
}

/// Data retention policy for upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataCollection {
    /// Any provider.
    Allow,
    /// Only providers that do not store prompts.
    Deny,
}

/// Ranking criterion for upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSort {
    /// Cheapest first.
    Price,
    /// Highest tokens per second first.
    Throughput,
    /// Lowest latency first.
    Latency,
}

/// Configuration for the `OpenRouter` provider.
///
/// ```rust
/// use llm_weave_openrouter::{OpenRouterConfig, ProviderRouting};
///
/// let config = OpenRouterConfig {
///     api_key: "sk-or-...".into(),
///     model: "anthropic/claude-sonnet-4".into(),
///     fallback_models: vec!["openai/gpt-4o".into()],
///     routing: Some(ProviderRouting {
///         allow_fallbacks: Some(false),
///         ..Default::default()
///     }),
///     app_name: Some("My App".into()),
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct OpenRouterConfig {
    /// Bearer token.
    pub api_key: String,
    /// Model used when a request leaves `model` empty.
    pub model: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Models tried in order when the requested one is unavailable.
    pub fallback_models: Vec<String>,
    /// Upstream provider preferences.
    pub routing: Option<ProviderRouting>,
    /// Sent as `HTTP-Referer` for app attribution.
    pub app_url: Option<String>,
    /// Sent as `X-Title` for app attribution.
    pub app_name: Option<String>,
    /// Default completion budget when a request sets none.
    pub max_tokens: Option<u32>,
    /// Per-request deadline. `None` leaves reqwest's default.
    pub timeout: Option<Duration>,
    /// Shared client, reused instead of building one.
    pub client: Option<reqwest::Client>,
}

impl OpenRouterConfig {
    /// Reads `OPENROUTER_API_KEY`, and `OPENROUTER_MODEL` when present.
    ///
    /// Returns `None` when no API key is set.
    pub fn from_env() -> Option<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let defaults = Self::default();
        Some(Self {
            api_key: var("OPENROUTER_API_KEY").filter(|k| !k.is_empty())?,
            model: var("OPENROUTER_MODEL").unwrap_or(defaults.model),
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

impl std::fmt::Debug for OpenRouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("fallback_models", &self.fallback_models)
            .field("routing", &self.routing)
            .field("app_url", &self.app_url)
            .field("app_name", &self.app_name)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("shared_client", &self.client.is_some())
            .finish()
    }
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "openai/gpt-4o".into(),
            base_url: "https://openrouter.ai/api/v1".into(),
            fallback_models: Vec::new(),
            routing: None,
            app_url: None,
            app_name: None,
            max_tokens: None,
            timeout: None,
            client: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = OpenRouterConfig::default();
        assert_eq!(config.base_url, "https://openrouter.ai/api/v1");
        assert!(config.fallback_models.is_empty());
        assert!(config.routing.is_none());
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = OpenRouterConfig {
            api_key: "sk-or-secret".into(),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-or-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_from_vars() {
        let config = OpenRouterConfig::from_vars(|name| match name {
            "OPENROUTER_API_KEY" => Some("sk-or-env".into()),
            "OPENROUTER_MODEL" => Some("meta-llama/llama-3.1-70b-instruct".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.api_key, "sk-or-env");
        assert_eq!(config.model, "meta-llama/llama-3.1-70b-instruct");
        assert!(OpenRouterConfig::from_vars(|_| None).is_none());
    }

    #[test]
    fn test_routing_omits_unset_fields() {
        let routing = ProviderRouting {
            order: Some(vec!["anthropic".into()]),
            data_collection: Some(DataCollection::Deny),
            sort: Some(ProviderSort::Throughput),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&routing).unwrap(),
            json!({"order": ["anthropic"], "data_collection": "deny", "sort": "throughput"})
        );
    }
}
