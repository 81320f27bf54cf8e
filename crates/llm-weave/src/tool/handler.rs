//! Tool handler trait and closure adapters.

use std::future::Future;
use std::marker::PhantomData;

use serde_json::Value;

use super::{ToolError, ToolOutput};
use crate::provider::{BoxFuture, ToolDefinition};

/// A tool the model can invoke.
///
/// Generic over a context type `Ctx` handed to every call, so tools can
/// reach shared state (a database pool, the current user) without
/// capturing it. The trait is object-safe; the registry stores handlers
/// as `Arc<dyn ToolHandler<Ctx>>`.
///
/// Implement it directly for stateful tools; wrap closures with
/// [`tool_fn`] or [`tool_fn_with_ctx`] otherwise.
///
/// ```rust
/// use llm_weave::provider::BoxFuture;
/// use llm_weave::tool::{ToolError, ToolHandler, ToolOutput};
/// use llm_weave::{JsonSchema, ToolDefinition};
/// use serde_json::Value;
///
/// struct Session {
///     user: String,
/// }
///
/// struct WhoAmI(ToolDefinition);
///
/// impl ToolHandler<Session> for WhoAmI {
///     fn definition(&self) -> &ToolDefinition {
///         &self.0
///     }
///
///     fn call<'a>(
///         &'a self,
///         _arguments: Value,
///         ctx: &'a Session,
///     ) -> BoxFuture<'a, Result<ToolOutput, ToolError>> {
///         Box::pin(async move { Ok(ToolOutput::new(ctx.user.clone())) })
///     }
/// }
/// # let _ = WhoAmI(ToolDefinition {
/// #     name: "whoami".into(),
/// #     description: String::new(),
/// #     parameters: JsonSchema::empty_object(),
/// # });
/// ```
pub trait ToolHandler<Ctx = ()>: Send + Sync {
    /// Name, description and parameter schema.
    fn definition(&self) -> &ToolDefinition;

    /// Runs the tool with already validated arguments.
    fn call<'a>(
        &'a self,
        arguments: Value,
        ctx: &'a Ctx,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolError>>;
}

/// A tool backed by an async closure taking the call context.
///
/// Created with [`tool_fn`] or [`tool_fn_with_ctx`].
pub struct FnTool<Ctx, F> {
    definition: ToolDefinition,
    handler: F,
    _ctx: PhantomData<fn(&Ctx)>,
}

impl<Ctx, F> std::fmt::Debug for FnTool<Ctx, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

impl<Ctx, F, Fut, O> ToolHandler<Ctx> for FnTool<Ctx, F>
where
    Ctx: Send + Sync + 'static,
    F: for<'c> Fn(Value, &'c Ctx) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    fn call<'a>(
        &'a self,
        arguments: Value,
        ctx: &'a Ctx,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolError>> {
        let pending = (self.handler)(arguments, ctx);
        Box::pin(async move { pending.await.map(Into::into) })
    }
}

/// Wraps a context-free async closure.
///
/// ```rust
/// use llm_weave::tool::{ToolError, tool_fn};
/// use llm_weave::{JsonSchema, ToolDefinition};
/// use serde_json::Value;
///
/// let add = tool_fn(
///     ToolDefinition {
///         name: "add".into(),
///         description: "Add two numbers".into(),
///         parameters: JsonSchema::new(serde_json::json!({
///             "type": "object",
///             "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
///             "required": ["a", "b"]
///         })),
///     },
///     |args: Value| async move {
///         let sum = args["a"].as_f64().unwrap_or(0.0) + args["b"].as_f64().unwrap_or(0.0);
///         Ok::<_, ToolError>(sum.to_string())
///     },
/// );
/// # let _ = add;
/// ```
pub fn tool_fn<F, Fut, O>(
    definition: ToolDefinition,
    handler: F,
) -> FnTool<(), impl for<'c> Fn(Value, &'c ()) -> Fut + Send + Sync>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    tool_fn_with_ctx(definition, move |arguments: Value, _: &()| handler(arguments))
}

/// Wraps an async closure that also receives the call context.
///
/// The returned future may not borrow the context; clone what it needs
/// before the `async move` block.
pub fn tool_fn_with_ctx<Ctx, F, Fut, O>(definition: ToolDefinition, handler: F) -> FnTool<Ctx, F>
where
    Ctx: Send + Sync + 'static,
    F: for<'c> Fn(Value, &'c Ctx) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    FnTool {
        definition,
        handler,
        _ctx: PhantomData,
    }
}
