//! End-to-end tests of the engine against the mock dialect.
//!
//! Requests start as loose JSON, go through coercion, the generator
//! pipeline and the tool loop, and come back as canonical responses.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use llm_weave::exception::Handled;
use llm_weave::instrument::Event;
use llm_weave::mock::{MockError, MockProvider};
use llm_weave::provider::BoxFuture;
use llm_weave::retry::{Attempt, RetryPolicy, RetryStrategy, Sleeper};
use llm_weave::stream::StreamEvent;
use llm_weave::tool::{ToolError, ToolRegistry, tool_fn, tool_loop};
use llm_weave::{
    Config, ErrorKind, FinishReason, Generator, JsonSchema, LlmError, Message, Request, Response,
    Role, ToolCall, ToolDefinition, Usage,
};

/// Records waits instead of sleeping.
#[derive(Clone, Default)]
struct InstantSleeper(Arc<Mutex<Vec<Duration>>>);

impl InstantSleeper {
    fn sleeps(&self) -> Vec<Duration> {
        self.0.lock().unwrap().clone()
    }
}

impl Sleeper for InstantSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        self.0.lock().unwrap().push(duration);
        Box::pin(async {})
    }
}

fn overloaded() -> MockError {
    MockError::Http {
        status: Some(http::StatusCode::SERVICE_UNAVAILABLE),
        message: "overloaded".into(),
    }
}

fn record(generator: &Generator, names: &[&'static str]) -> Arc<Mutex<Vec<Event>>> {
    let events: Arc<Mutex<Vec<Event>>> = Arc::default();
    for name in names {
        let sink = Arc::clone(&events);
        generator
            .instrumenter()
            .subscribe(name, move |e: &Event| sink.lock().unwrap().push(e.clone()));
    }
    events
}

#[tokio::test]
async fn loose_json_request_through_generator() {
    let request: Request = serde_json::from_value(json!({
        "messages": [
            {"role": "system", "content": "be terse"},
            {"role": "user", "content": {"text": "hello there"}}
        ],
        "tool_choice": "auto",
        "tools": {
            "type": "function",
            "function": {"name": "noop", "parameters": {"type": "object"}}
        }
    }))
    .unwrap();

    let mock = MockProvider::new("mock-1");
    let generator = Generator::new(mock.clone(), &Config::default());
    let response = generator.generate(&request).await.unwrap();

    assert_eq!(response.text(), "hello there");
    assert_eq!(response.message().map(|m| m.role), Some(Role::Assistant));
    assert_eq!(response.raw_request["model"], "mock-1");
    assert_eq!(response.raw_request["tools"][0]["name"], "noop");
    assert_eq!(mock.recorded_requests()[0].messages, request.messages);
}

#[tokio::test]
async fn builtin_backoff_surfaces_last_error() {
    let mock = MockProvider::new("m");
    for _ in 0..4 {
        mock.queue_error(overloaded());
    }
    let sleeper = InstantSleeper::default();
    let generator =
        Generator::new(mock.clone(), &Config::default()).with_sleeper(Arc::new(sleeper.clone()));
    let events = record(&generator, &["retry_attempt", "retry_exhausted"]);

    let err = generator
        .generate(&Request {
            messages: vec![Message::user("hi")],
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Overloaded);
    assert_eq!(mock.recorded_calls().len(), 4);
    assert_eq!(sleeper.sleeps(), [1, 2, 4].map(Duration::from_secs));
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 4);
    assert!(matches!(
        events[3],
        Event::RetryExhausted {
            max_retries: 3,
            exception_kind: ErrorKind::Overloaded
        }
    ));
}

struct Patient {
    attempts: u32,
}

impl RetryStrategy for Patient {
    fn run<'a>(&'a self, mut attempt: Attempt<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            for _ in 0..self.attempts {
                match attempt().await {
                    Ok(()) => return,
                    Err(failure) if !failure.retryable => return,
                    Err(_) => {}
                }
            }
        })
    }
}

#[tokio::test]
async fn custom_strategy_drives_attempts() {
    let mock = MockProvider::new("m");
    for _ in 0..5 {
        mock.queue_error(overloaded());
    }
    mock.queue_message(Message::assistant("finally"));
    let config = Config {
        retry: RetryPolicy::custom(Patient { attempts: 6 }),
        ..Default::default()
    };
    let generator = Generator::new(mock.clone(), &config);

    let response = generator
        .generate(&Request {
            messages: vec![Message::user("hi")],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.text(), "finally");
    assert_eq!(mock.recorded_calls().len(), 6);
}

#[tokio::test]
async fn handler_reraise_keeps_error() {
    let mock = MockProvider::new("m");
    mock.queue_error(MockError::Auth("revoked".into()));
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let generator = Generator::new(mock, &Config::default()).with_exception_handler(
        move |err: &LlmError, _: &Request| {
            *sink.lock().unwrap() = Some(err.kind());
            Handled::Reraise
        },
    );

    let err = generator
        .generate(&Request {
            messages: vec![Message::user("hi")],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Auth(_)));
    assert_eq!(*seen.lock().unwrap(), Some(ErrorKind::Authentication));
}

#[tokio::test]
async fn stream_failure_after_open_is_not_retried() {
    let mock = MockProvider::new("m");
    mock.queue_broken_stream(
        vec![StreamEvent::text("par")],
        MockError::Timeout { elapsed_ms: 1 },
    );
    let generator = Generator::new(mock.clone(), &Config::default())
        .with_sleeper(Arc::new(InstantSleeper::default()));

    let err = generator
        .generate(&Request {
            messages: vec![Message::user("hi")],
            stream: true,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Timeout { .. }));
    assert_eq!(mock.recorded_calls().len(), 1);
}

#[tokio::test]
async fn stream_open_failure_is_retried() {
    let mock = MockProvider::new("m");
    mock.queue_stream_error(overloaded());
    let sleeper = InstantSleeper::default();
    let generator =
        Generator::new(mock.clone(), &Config::default()).with_sleeper(Arc::new(sleeper.clone()));

    let response = generator
        .generate(&Request {
            messages: vec![Message::user("echo me")],
            stream: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.text(), "echo me");
    assert_eq!(response.finish_reason, Some(FinishReason::Stop));
    assert_eq!(sleeper.sleeps(), [Duration::from_secs(1)]);
}

#[tokio::test]
async fn streamed_tool_cycle() {
    let mock = MockProvider::new("m");
    mock.queue_stream(vec![
        StreamEvent::ToolCallStart {
            id: "call_1".into(),
            name: "get_weather".into(),
        },
        StreamEvent::ToolCallDelta {
            id: "call_1".into(),
            json_chunk: "{\"location\":".into(),
        },
        StreamEvent::ToolCallDelta {
            id: "call_1".into(),
            json_chunk: "\"Boston\"}".into(),
        },
        StreamEvent::Usage {
            usage: Usage::from_counts(20, 8, None),
        },
        StreamEvent::Finish {
            reason: FinishReason::ToolCalls,
        },
    ]);
    mock.queue_stream(vec![
        StreamEvent::text("Sunny in Boston."),
        StreamEvent::Usage {
            usage: Usage::from_counts(40, 6, None),
        },
    ]);

    let seen_args = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = Arc::clone(&seen_args);
    let mut registry = ToolRegistry::new();
    registry.register(tool_fn(weather_tool(), move |args: Value| {
        sink.lock().unwrap().push(args);
        async { Ok::<_, ToolError>("sunny") }
    }));

    let generator = Generator::new(mock, &Config::default());
    let result = tool_loop(
        &generator,
        &registry,
        &Request {
            messages: vec![Message::user("Weather in Boston?")],
            stream: true,
            ..Default::default()
        },
        &(),
    )
    .await
    .unwrap();

    assert_eq!(result.rounds, 1);
    assert_eq!(result.response.text(), "Sunny in Boston.");
    assert_eq!(result.total_usage, Usage::from_counts(60, 14, None));
    assert_eq!(*seen_args.lock().unwrap(), vec![json!({"location": "Boston"})]);
    assert_eq!(
        result.response.messages[1].requested_actions(),
        [ToolCall {
            id: "call_1".into(),
            name: "get_weather".into(),
            arguments: json!({"location": "Boston"}),
        }]
    );
}

#[tokio::test]
async fn fallback_response_after_exhaustion() {
    let mock = MockProvider::new("m");
    for _ in 0..4 {
        mock.queue_error(MockError::Timeout { elapsed_ms: 100 });
    }
    let generator = Generator::new(mock, &Config::default())
        .with_sleeper(Arc::new(InstantSleeper::default()))
        .with_exception_handler(|_: &LlmError, request: &Request| {
            let mut messages = request.messages.clone();
            messages.push(Message::assistant("Please try again later."));
            Handled::Fallback(Response {
                messages,
                ..Default::default()
            })
        });

    let response = generator
        .generate(&Request {
            messages: vec![Message::user("hi")],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.text(), "Please try again later.");
}

fn weather_tool() -> ToolDefinition {
    ToolDefinition {
        name: "get_weather".into(),
        description: "Current weather".into(),
        parameters: JsonSchema::new(json!({
            "type": "object",
            "properties": {"location": {"type": "string"}},
            "required": ["location"]
        })),
    }
}
