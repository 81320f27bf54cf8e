//! Tool error type.

/// Error returned by a tool handler.
///
/// Ordinary errors are reported back to the model as the content of
/// the tool message, so it can correct itself. A [`fatal`](Self::fatal)
/// error stops the continuation loop with
/// [`LlmError::ToolExecution`](crate::LlmError::ToolExecution).
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    /// Human-readable error description.
    pub message: String,
    /// Whether the loop must stop.
    pub fatal: bool,
}

impl ToolError {
    /// A recoverable error, shown to the model.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    /// An error that aborts the continuation loop.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}
