//! Tool registry: lookup, argument validation and dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::{ToolHandler, ToolResult};
use crate::chat::ToolCall;
use crate::error::LlmError;
use crate::provider::ToolDefinition;

/// Tool handlers indexed by name, kept in registration order.
///
/// Generic over the context type `Ctx` passed to every handler.
pub struct ToolRegistry<Ctx = ()>
where
    Ctx: Send + Sync + 'static,
{
    handlers: Vec<Arc<dyn ToolHandler<Ctx>>>,
    index: HashMap<String, usize>,
}

impl<Ctx> Default for ToolRegistry<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<Ctx> Clone for ToolRegistry<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
            index: self.index.clone(),
        }
    }
}

impl<Ctx> std::fmt::Debug for ToolRegistry<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self
            .handlers
            .iter()
            .map(|h| h.definition().name.as_str())
            .collect();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl<Ctx: Send + Sync + 'static> ToolRegistry<Ctx> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any handler with the same name.
    pub fn register(&mut self, handler: impl ToolHandler<Ctx> + 'static) -> &mut Self {
        self.register_shared(Arc::new(handler))
    }

    /// Registers a shared handler.
    pub fn register_shared(&mut self, handler: Arc<dyn ToolHandler<Ctx>>) -> &mut Self {
        let name = handler.definition().name.clone();
        match self.index.get(&name) {
            Some(&slot) => self.handlers[slot] = handler,
            None => {
                self.index.insert(name, self.handlers.len());
                self.handlers.push(handler);
            }
        }
        self
    }

    /// The handler registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler<Ctx>>> {
        self.index.get(name).map(|&slot| &self.handlers[slot])
    }

    /// Whether a tool named `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Definitions of every registered tool, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.handlers
            .iter()
            .map(|h| h.definition().clone())
            .collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Executes one tool call.
    ///
    /// Unknown tools, arguments that fail schema validation and ordinary
    /// handler errors become failed [`ToolResult`]s the model can read.
    /// Only a fatal [`ToolError`](super::ToolError) is returned as
    /// [`LlmError::ToolExecution`].
    pub async fn execute(&self, call: &ToolCall, ctx: &Ctx) -> Result<ToolResult, LlmError> {
        let Some(handler) = self.get(&call.name) else {
            warn!(tool = %call.name, "model requested an unknown tool");
            return Ok(ToolResult::failure(
                &call.id,
                format!("Unknown tool: {}", call.name),
            ));
        };

        #[cfg(feature = "schema")]
        if let Err(e) = handler.definition().parameters.validate(&call.arguments) {
            debug!(tool = %call.name, error = %e, "tool arguments failed validation");
            return Ok(ToolResult::failure(
                &call.id,
                format!("Invalid arguments for tool '{}': {e}", call.name),
            ));
        }

        match handler.call(call.arguments.clone(), ctx).await {
            Ok(output) => {
                debug!(tool = %call.name, call_id = %call.id, "tool call succeeded");
                Ok(ToolResult::success(&call.id, output.content))
            }
            Err(err) if err.fatal => {
                warn!(tool = %call.name, error = %err, "tool failed fatally");
                Err(LlmError::ToolExecution {
                    tool_name: call.name.clone(),
                    source: Box::new(err),
                })
            }
            Err(err) => {
                debug!(tool = %call.name, error = %err, "tool call failed");
                Ok(ToolResult::failure(&call.id, format!("Error: {}", err.message)))
            }
        }
    }

    /// Executes `calls`, concurrently when `parallel` is set.
    ///
    /// Results come back in call order either way.
    pub async fn execute_all(
        &self,
        calls: &[ToolCall],
        ctx: &Ctx,
        parallel: bool,
    ) -> Result<Vec<ToolResult>, LlmError> {
        if !parallel || calls.len() <= 1 {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute(call, ctx).await?);
            }
            return Ok(results);
        }
        join_all(calls.iter().map(|call| self.execute(call, ctx)))
            .await
            .into_iter()
            .collect()
    }
}
