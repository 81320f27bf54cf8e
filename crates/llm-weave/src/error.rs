//! Unified error type for all generation operations.
//!
//! Every provider maps its native failures into [`LlmError`], giving
//! callers a single type to match against regardless of which backend
//! is in use. Each variant classifies into an [`ErrorKind`], which is
//! what the retry engine consults when deciding whether to try again:
//!
//! ```rust
//! use llm_weave::error::{ErrorKind, LlmError};
//!
//! let err = LlmError::Http {
//!     status: Some(http::StatusCode::TOO_MANY_REQUESTS),
//!     message: "slow down".into(),
//! };
//! assert_eq!(err.kind(), ErrorKind::RateLimited);
//! assert!(err.is_retryable());
//! ```
//!
//! # Taxonomy
//!
//! | Family | Variants | Retried |
//! |--------|----------|---------|
//! | transport | [`Http`](LlmError::Http) without status, [`Timeout`](LlmError::Timeout) | by default |
//! | provider API | [`Http`](LlmError::Http) with status, [`Provider`](LlmError::Provider), [`Auth`](LlmError::Auth), [`InvalidRequest`](LlmError::InvalidRequest), [`ResponseFormat`](LlmError::ResponseFormat) | when the kind is listed in `retries_on` |
//! | validation | [`Validation`](LlmError::Validation), [`Coercion`](LlmError::Coercion), [`Capability`](LlmError::Capability) | never |
//! | tool execution | [`ToolExecution`](LlmError::ToolExecution), [`MaxRoundsExceeded`](LlmError::MaxRoundsExceeded), [`Aborted`](LlmError::Aborted) | never |

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse classification of an [`LlmError`].
///
/// Retry policies are expressed as a set of kinds
/// (see [`RetryPolicy::retries_on`](crate::retry::RetryPolicy::retries_on)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// Connection reset, DNS failure, broken stream.
    Transport,
    /// The request did not complete before its deadline.
    Timeout,
    /// HTTP 429 or a provider rate-limit error code.
    RateLimited,
    /// The provider is temporarily over capacity (503, 529).
    Overloaded,
    /// Any other 5xx response.
    Server,
    /// Credentials were rejected.
    Authentication,
    /// The provider rejected the request as malformed.
    InvalidRequest,
    /// Unknown model or endpoint.
    NotFound,
    /// The provider answered with something we could not parse.
    MalformedResponse,
    /// The canonical request failed a local check before any network call.
    Validation,
    /// A local tool failed fatally or the continuation loop ran away.
    Tool,
    /// A stream observer stopped the stream.
    Aborted,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// The kinds retried when no explicit `retries_on` set is configured.
    pub fn default_retryable() -> HashSet<Self> {
        HashSet::from([
            Self::Transport,
            Self::Timeout,
            Self::RateLimited,
            Self::Overloaded,
            Self::Server,
        ])
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: http::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Authentication,
            404 => Self::NotFound,
            408 => Self::Timeout,
            400 | 409 | 413 | 422 => Self::InvalidRequest,
            429 => Self::RateLimited,
            503 | 529 => Self::Overloaded,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }

    /// Snake-case name used in instrumentation payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Overloaded => "overloaded",
            Self::Server => "server",
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid_request",
            Self::NotFound => "not_found",
            Self::MalformedResponse => "malformed_response",
            Self::Validation => "validation",
            Self::Tool => "tool",
            Self::Aborted => "aborted",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified error type returned by all operations.
///
/// Variants are `#[non_exhaustive]`: new error kinds may be added in
/// minor releases without breaking downstream matches (always include a
/// wildcard arm).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LlmError {
    /// An HTTP-level failure.
    ///
    /// `status` is `None` when the request never received a response
    /// (e.g. DNS failure, connection reset, broken stream).
    #[error("HTTP error (status={status:?}): {message}")]
    Http {
        /// The HTTP status code, if one was received.
        status: Option<http::StatusCode>,
        /// A human-readable description of the failure.
        message: String,
    },

    /// The API key or token was rejected.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The provider rejected the request as malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A structured provider error carrying the provider's own code.
    #[error("Provider error ({code}): {message}")]
    Provider {
        /// Provider-defined error code (e.g. `"overloaded_error"`).
        code: String,
        /// Human-readable error description.
        message: String,
        /// Classification derived from the code and status.
        kind: ErrorKind,
    },

    /// The response body could not be parsed.
    #[error("Response format error: {message}")]
    ResponseFormat {
        /// What went wrong during parsing.
        message: String,
        /// The raw response body, for diagnostics.
        raw: String,
    },

    /// A structured-output response failed JSON Schema validation.
    #[error("Schema validation error: {message}")]
    SchemaValidation {
        /// Concatenated validation error messages.
        message: String,
        /// The schema the value was validated against.
        schema: Value,
        /// The value that failed validation.
        actual: Value,
    },

    /// The canonical request violates an invariant. Raised before any
    /// network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Loosely-typed input could not be cast into a canonical type.
    #[error("Cannot coerce {field}: {message}")]
    Coercion {
        /// The field being cast (e.g. `"content"`, `"tool_choice"`).
        field: &'static str,
        /// What shape was found instead.
        message: String,
    },

    /// The request uses a feature the target provider cannot express.
    #[error("{provider} does not support {feature}")]
    Capability {
        /// Transform name (e.g. `"ollama"`).
        provider: String,
        /// The unsupported feature (e.g. `"mcp_servers"`).
        feature: String,
    },

    /// A tool invocation failed fatally.
    #[error("Tool execution error ({tool_name}): {source}")]
    ToolExecution {
        /// The name of the tool that failed.
        tool_name: String,
        /// The underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The model kept requesting tools after the configured number of
    /// continuation rounds.
    #[error("tool continuation exceeded {limit} rounds")]
    MaxRoundsExceeded {
        /// The configured round limit.
        limit: u32,
    },

    /// The operation exceeded its deadline.
    #[error("Operation timed out after {elapsed_ms}ms")]
    Timeout {
        /// Milliseconds elapsed before the timeout fired.
        elapsed_ms: u64,
    },

    /// A stream observer aborted the stream.
    #[error("stream aborted: {0}")]
    Aborted(String),
}

impl LlmError {
    /// Classifies this error for retry and reporting purposes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http { status: None, .. } => ErrorKind::Transport,
            Self::Http {
                status: Some(status),
                ..
            } => ErrorKind::from_status(*status),
            Self::Auth(_) => ErrorKind::Authentication,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Provider { kind, .. } => *kind,
            Self::ResponseFormat { .. } | Self::SchemaValidation { .. } => {
                ErrorKind::MalformedResponse
            }
            Self::Validation(_) | Self::Coercion { .. } | Self::Capability { .. } => {
                ErrorKind::Validation
            }
            Self::ToolExecution { .. } | Self::MaxRoundsExceeded { .. } => ErrorKind::Tool,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Aborted(_) => ErrorKind::Aborted,
        }
    }

    /// Returns `true` if the error belongs to the default retryable set.
    ///
    /// ```rust
    /// use llm_weave::LlmError;
    ///
    /// assert!(LlmError::Timeout { elapsed_ms: 5000 }.is_retryable());
    /// assert!(!LlmError::Auth("bad key".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        ErrorKind::default_retryable().contains(&self.kind())
    }

    /// Validation failures skip both retry and exception handlers.
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub(crate) fn coercion(field: &'static str, message: impl Into<String>) -> Self {
        Self::Coercion {
            field,
            message: message.into(),
        }
    }

    /// Shorthand for [`LlmError::Capability`].
    pub fn capability(provider: impl Into<String>, feature: impl Into<String>) -> Self {
        Self::Capability {
            provider: provider.into(),
            feature: feature.into(),
        }
    }

    /// Shorthand for a parse failure with the offending body attached.
    pub fn response_format(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::ResponseFormat {
            message: message.into(),
            raw: raw.into(),
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::ResponseFormat {
            message: err.to_string(),
            raw: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_http() {
        let err = LlmError::Http {
            status: Some(http::StatusCode::TOO_MANY_REQUESTS),
            message: "rate limited".into(),
        };
        let display = format!("{err}");
        assert!(display.contains("429"));
        assert!(display.contains("rate limited"));
    }

    #[test]
    fn test_error_display_capability() {
        let err = LlmError::capability("ollama", "mcp_servers");
        assert_eq!(format!("{err}"), "ollama does not support mcp_servers");
    }

    #[test]
    fn test_error_display_coercion() {
        let err = LlmError::coercion("content", "expected text, found number");
        let display = format!("{err}");
        assert!(display.contains("content"));
        assert!(display.contains("number"));
    }

    #[test]
    fn test_error_display_max_rounds() {
        let err = LlmError::MaxRoundsExceeded { limit: 10 };
        assert!(format!("{err}").contains("10 rounds"));
    }

    #[test]
    fn test_transport_kind_without_status() {
        let err = LlmError::Http {
            status: None,
            message: "connection reset".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_status_classification() {
        use http::StatusCode;
        assert_eq!(
            ErrorKind::from_status(StatusCode::UNAUTHORIZED),
            ErrorKind::Authentication
        );
        assert_eq!(
            ErrorKind::from_status(StatusCode::BAD_REQUEST),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            ErrorKind::from_status(StatusCode::SERVICE_UNAVAILABLE),
            ErrorKind::Overloaded
        );
        assert_eq!(
            ErrorKind::from_status(StatusCode::from_u16(529).unwrap()),
            ErrorKind::Overloaded
        );
        assert_eq!(
            ErrorKind::from_status(StatusCode::BAD_GATEWAY),
            ErrorKind::Server
        );
        assert_eq!(
            ErrorKind::from_status(StatusCode::IM_A_TEAPOT),
            ErrorKind::Other
        );
    }

    #[test]
    fn test_validation_family() {
        for err in [
            LlmError::Validation("bad".into()),
            LlmError::coercion("content", "bad"),
            LlmError::capability("ollama", "mcp_servers"),
        ] {
            assert!(err.is_validation());
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_provider_kind_passthrough() {
        let err = LlmError::Provider {
            code: "overloaded_error".into(),
            message: "busy".into(),
            kind: ErrorKind::Overloaded,
        };
        assert_eq!(err.kind(), ErrorKind::Overloaded);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invalid_request_not_retryable() {
        assert!(!LlmError::InvalidRequest("missing model".into()).is_retryable());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LlmError>();
    }

    #[test]
    fn test_error_source_trait() {
        use std::error::Error;
        let err = LlmError::ToolExecution {
            tool_name: "test".into(),
            source: Box::new(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
        };
        assert!(err.source().is_some());
        assert_eq!(err.kind(), ErrorKind::Tool);
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<Value>("not valid json").unwrap_err();
        let llm_err: LlmError = json_err.into();
        assert_eq!(llm_err.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::RateLimited.to_string(), "rate_limited");
    }
}
