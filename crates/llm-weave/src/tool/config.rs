//! Tool loop configuration.

/// Settings for [`tool_loop`](super::tool_loop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLoopConfig {
    /// Continuation rounds allowed before the loop fails with
    /// [`LlmError::MaxRoundsExceeded`](crate::LlmError::MaxRoundsExceeded).
    pub max_rounds: u32,
    /// Run the calls of one round concurrently. Results are appended in
    /// call order regardless.
    pub parallel: bool,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            parallel: true,
        }
    }
}
