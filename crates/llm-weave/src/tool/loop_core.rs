//! The tool-call continuation loop.

use std::borrow::Cow;

use tracing::{debug, instrument, warn};

use super::{ToolRegistry, ToolResult};
use crate::chat::Response;
use crate::error::LlmError;
use crate::generator::Generator;
use crate::provider::{Request, ToolChoice};
use crate::usage::Usage;

/// What [`tool_loop`] returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolLoopResult {
    /// The final response; its conversation holds every round.
    pub response: Response,
    /// Tool rounds executed.
    pub rounds: u32,
    /// Usage summed over every generation.
    pub total_usage: Usage,
}

/// Generates, executes requested tools and continues until the model
/// stops asking for tools.
///
/// Each round appends one `Tool` message per requested call, in call
/// order, and generates again from the extended conversation. When the
/// request declares no tools, the registry's definitions are sent.
/// A forced [`ToolChoice`] (`Required` or `Named`) applies to the first
/// generation only; later rounds use `Auto` so the model can answer.
///
/// Fails with [`LlmError::MaxRoundsExceeded`] when the model still
/// requests tools after [`max_rounds`](super::ToolLoopConfig::max_rounds)
/// rounds, and with [`LlmError::ToolExecution`] when a tool fails fatally.
///
/// ```rust
/// use llm_weave::mock::MockProvider;
/// use llm_weave::tool::{ToolError, ToolRegistry, tool_fn, tool_loop};
/// use llm_weave::{Config, Generator, JsonSchema, Message, Request, ToolCall, ToolDefinition};
/// use serde_json::{Value, json};
///
/// # tokio_test::block_on(async {
/// let mock = MockProvider::new("m");
/// mock.queue_message(Message::assistant_calls(vec![ToolCall {
///     id: "call_1".into(),
///     name: "get_weather".into(),
///     arguments: json!({"location": "Boston"}),
/// }]));
/// mock.queue_message(Message::assistant("It is sunny in Boston."));
///
/// let mut registry = ToolRegistry::new();
/// registry.register(tool_fn(
///     ToolDefinition {
///         name: "get_weather".into(),
///         description: "Current weather".into(),
///         parameters: JsonSchema::empty_object(),
///     },
///     |_: Value| async { Ok::<_, ToolError>("sunny") },
/// ));
///
/// let generator = Generator::new(mock, &Config::default());
/// let request = Request {
///     messages: vec![Message::user("Weather in Boston?")],
///     ..Default::default()
/// };
/// let result = tool_loop(&generator, &registry, &request, &()).await.unwrap();
/// assert_eq!(result.rounds, 1);
/// assert_eq!(result.response.text(), "It is sunny in Boston.");
/// assert_eq!(result.response.messages.len(), 4);
/// # });
/// ```
#[instrument(skip_all, fields(tools = registry.len()))]
pub async fn tool_loop<Ctx>(
    generator: &Generator,
    registry: &ToolRegistry<Ctx>,
    request: &Request,
    ctx: &Ctx,
) -> Result<ToolLoopResult, LlmError>
where
    Ctx: Send + Sync + 'static,
{
    let config = generator.tool_loop_config();
    let mut current = Cow::Borrowed(request);
    if current.tools.is_none() && !registry.is_empty() {
        current.to_mut().tools = Some(registry.definitions());
    }

    let mut total_usage = Usage::default();
    let mut rounds = 0;
    loop {
        let response = generator.generate(&current).await?;
        total_usage += &response.usage;

        let calls = response.requested_actions().to_vec();
        if calls.is_empty() {
            debug!(rounds, "tool loop finished");
            return Ok(ToolLoopResult {
                response,
                rounds,
                total_usage,
            });
        }
        if rounds >= config.max_rounds {
            warn!(limit = config.max_rounds, "model still requests tools");
            return Err(LlmError::MaxRoundsExceeded {
                limit: config.max_rounds,
            });
        }

        rounds += 1;
        debug!(round = rounds, calls = calls.len(), "executing requested tools");
        let results = registry.execute_all(&calls, ctx, config.parallel).await?;

        let mut messages = response.messages;
        messages.extend(results.into_iter().map(ToolResult::into_message));
        let mut next = current.continue_with(messages);
        if matches!(
            next.tool_choice,
            Some(ToolChoice::Required | ToolChoice::Named(_))
        ) {
            next.tool_choice = Some(ToolChoice::Auto);
        }
        current = Cow::Owned(next);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::chat::{Message, Role, ToolCall};
    use crate::generator::Config;
    use crate::mock::MockProvider;
    use crate::provider::{JsonSchema, ToolDefinition};
    use crate::tool::{ToolError, ToolLoopConfig, tool_fn};

    fn weather_call(id: &str) -> Message {
        Message::assistant_calls(vec![ToolCall {
            id: id.into(),
            name: "get_weather".into(),
            arguments: json!({"location": "Boston"}),
        }])
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(tool_fn(
            ToolDefinition {
                name: "get_weather".into(),
                description: "Current weather".into(),
                parameters: JsonSchema::new(json!({
                    "type": "object",
                    "properties": {"location": {"type": "string"}},
                    "required": ["location"]
                })),
            },
            |args: Value| async move {
                Ok::<_, ToolError>(json!({"location": args["location"], "sky": "clear"}))
            },
        ));
        registry
    }

    fn generator(mock: &MockProvider, max_rounds: u32) -> Generator {
        let config = Config {
            tool_loop: ToolLoopConfig {
                max_rounds,
                parallel: true,
            },
            ..Default::default()
        };
        Generator::new(mock.clone(), &config)
    }

    fn ask() -> Request {
        Request {
            messages: vec![Message::user("Weather in Boston?")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_single_round_appends_tool_message() {
        let mock = MockProvider::new("m");
        mock.queue_message(weather_call("call_1"));
        mock.queue_message(Message::assistant("Clear skies."));

        let result = tool_loop(&generator(&mock, 10), &registry(), &ask(), &())
            .await
            .unwrap();

        assert_eq!(result.rounds, 1);
        let roles: Vec<Role> = result.response.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        let tool_message = &result.response.messages[2];
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_message.text(), r#"{"location":"Boston","sky":"clear"}"#);

        // 10 + 5 per queued reply
        assert_eq!(result.total_usage.total_tokens, 30);

        let sent = mock.recorded_requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].tools().len(), 1);
        assert_eq!(sent[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_terminates_after_exactly_max_rounds() {
        let mock = MockProvider::new("m");
        for i in 0..4 {
            mock.queue_message(weather_call(&format!("call_{i}")));
        }

        let err = tool_loop(&generator(&mock, 3), &registry(), &ask(), &())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MaxRoundsExceeded { limit: 3 }));
        assert_eq!(mock.recorded_calls().len(), 4);
    }

    #[tokio::test]
    async fn test_forced_choice_relaxed_after_first_round() {
        let mock = MockProvider::new("m");
        mock.queue_message(weather_call("call_1"));
        mock.queue_message(Message::assistant("done"));
        let request = Request {
            tool_choice: Some(ToolChoice::Required),
            ..ask()
        };

        tool_loop(&generator(&mock, 10), &registry(), &request, &())
            .await
            .unwrap();

        let sent = mock.recorded_requests();
        assert_eq!(sent[0].tool_choice, Some(ToolChoice::Required));
        assert_eq!(sent[1].tool_choice, Some(ToolChoice::Auto));
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let mock = MockProvider::new("m");
        mock.queue_message(Message::assistant_calls(vec![ToolCall {
            id: "x".into(),
            name: "launch_rockets".into(),
            arguments: json!({}),
        }]));
        mock.queue_message(Message::assistant("I cannot do that."));

        let result = tool_loop(&generator(&mock, 10), &registry(), &ask(), &())
            .await
            .unwrap();
        assert_eq!(result.response.messages[2].text(), "Unknown tool: launch_rockets");
    }

    #[tokio::test]
    async fn test_no_tool_calls_means_zero_rounds() {
        let mock = MockProvider::new("m");
        let result = tool_loop(&generator(&mock, 10), &registry(), &ask(), &())
            .await
            .unwrap();
        assert_eq!(result.rounds, 0);
        assert_eq!(result.response.text(), "Weather in Boston?");
    }
}
