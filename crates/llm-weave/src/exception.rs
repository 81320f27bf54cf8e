//! Last-chance handling of generation failures.
//!
//! Once retries are exhausted (or an error was never retryable), the
//! [`Generator`](crate::Generator) hands the error to its
//! [`ExceptionPolicy`]. A registered [`ExceptionHandler`] may turn the
//! failure into a fallback [`Response`] or let it propagate unchanged.
//! Validation errors never reach the handler.

use std::fmt;
use std::sync::Arc;

use crate::chat::Response;
use crate::error::LlmError;
use crate::provider::Request;

/// What an [`ExceptionHandler`] decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    /// End the call successfully with this response.
    Fallback(Response),
    /// Propagate the original error.
    Reraise,
}

/// Decides what happens to a failed generation.
pub trait ExceptionHandler: Send + Sync {
    /// Inspects the error and the request that caused it.
    fn handle(&self, error: &LlmError, request: &Request) -> Handled;
}

impl<F> ExceptionHandler for F
where
    F: Fn(&LlmError, &Request) -> Handled + Send + Sync,
{
    fn handle(&self, error: &LlmError, request: &Request) -> Handled {
        self(error, request)
    }
}

/// The optional handler a generator consults.
#[derive(Clone, Default)]
pub struct ExceptionPolicy {
    handler: Option<Arc<dyn ExceptionHandler>>,
}

impl fmt::Debug for ExceptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionPolicy")
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl ExceptionPolicy {
    /// A policy with `handler` installed.
    pub fn new(handler: Arc<dyn ExceptionHandler>) -> Self {
        Self {
            handler: Some(handler),
        }
    }

    /// Resolves a failure into a response or the original error.
    pub fn resolve(&self, error: LlmError, request: &Request) -> Result<Response, LlmError> {
        if error.is_validation() {
            return Err(error);
        }
        let Some(handler) = &self.handler else {
            return Err(error);
        };
        match handler.handle(&error, request) {
            Handled::Fallback(response) => {
                tracing::debug!(error = %error, "exception handler supplied a fallback response");
                Ok(response)
            }
            Handled::Reraise => Err(error),
        }
    }
}
