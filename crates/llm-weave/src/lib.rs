//! # llm-weave
//!
//! A provider-agnostic generation engine for large language models.
//!
//! Application code builds one canonical [`Request`] (a conversation plus
//! optional tools, tool choice, response format, MCP servers and a
//! streaming flag) and gets back a normalized [`Response`], while the
//! request itself is dispatched to one of several incompatible provider
//! APIs. This crate holds everything that is not provider-specific:
//!
//! - the canonical model ([`chat`], [`provider`], [`usage`]),
//! - loose-JSON coercion into that model ([`coerce`]),
//! - the [`Transform`] and [`Provider`] traits every backend implements,
//! - the [`Generator`], which wraps one provider with retry
//!   ([`retry`]), instrumentation ([`instrument`]), exception handling
//!   ([`exception`]) and stream accumulation ([`stream`]),
//! - the tool-call continuation loop ([`tool`]),
//! - a canonical [`mock`] dialect for tests and examples.
//!
//! # Provider Crates
//!
//! | Crate | Dialects |
//! |-------|----------|
//! | `llm-weave-openai` | OpenAI Chat Completions, OpenAI Responses, embeddings |
//! | `llm-weave-anthropic` | Anthropic Messages (JSON mode emulated) |
//! | `llm-weave-openrouter` | OpenRouter (Chat dialect plus routing extensions) |
//! | `llm-weave-ollama` | Ollama chat (JSON lines), embeddings |
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐ ┌────────────────┐ ┌──────────────────┐ ┌──────────────┐
//!  │ -anthropic   │ │ -openai        │ │ -openrouter      │ │ -ollama      │
//!  └──────┬───────┘ └───────┬────────┘ └────────┬─────────┘ └──────┬───────┘
//!         └──────────┬──────┴───────────┬───────┴──────────────────┘
//!                    ▼                  ▼
//!         ┌──────────────────────────────────────────┐
//!         │                llm-weave                 │  ← you are here
//!         │ Request ─ Transform ─ Generator ─ tools  │
//!         └──────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust
//! use llm_weave::mock::MockProvider;
//! use llm_weave::{Config, Generator, Message, Request};
//!
//! # tokio_test::block_on(async {
//! let generator = Generator::new(MockProvider::new("mock"), &Config::default());
//! let request = Request {
//!     messages: vec![Message::user("Explain ownership in Rust")],
//!     max_tokens: Some(1024),
//!     ..Default::default()
//! };
//! let response = generator.generate(&request).await?;
//! assert_eq!(response.text(), "Explain ownership in Rust");
//! # Ok::<_, llm_weave::LlmError>(())
//! # }).unwrap();
//! ```
//!
//! # Feature flags
//!
//! | Feature | Default | Effect |
//! |---------|---------|--------|
//! | `schema` | yes | [`JsonSchema::from_type`] and [`JsonSchema::validate`]; tool arguments are validated before dispatch |
//! | `test-utils` | no | [`test_helpers`] and [`retry::RecordingSleeper`] |

#![warn(missing_docs)]

pub mod chat;
pub mod coerce;
pub mod embed;
pub mod error;
pub mod exception;
pub mod framing;
pub mod generator;
pub mod instrument;
pub mod mock;
pub mod provider;
pub mod retry;
pub mod stream;
pub mod tool;
pub mod transform;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

// ── Core re-exports ────────────────────────────────────────────────
//
// Only the types nearly every program touches live at the root:
//
//   llm_weave::retry::*      RetryPolicy, RetryStrategy, Sleeper
//   llm_weave::stream::*     StreamEvent, StreamObserver, Abort
//   llm_weave::instrument::* Event, Instrumenter
//   llm_weave::tool::*       ToolRegistry, tool_fn, tool_loop

pub use chat::{ContentPart, FinishReason, MediaSource, Message, Response, Role, ToolCall};
pub use coerce::Coerce;
pub use embed::{EmbedRequest, EmbedResponse};
pub use error::{ErrorKind, LlmError};
pub use generator::{Config, Generator};
pub use provider::{
    Capability, DynProvider, Instructions, JsonSchema, McpServer, Provider, ProviderMetadata,
    Request, ResponseFormat, ToolChoice, ToolDefinition,
};
pub use transform::Transform;
pub use usage::Usage;
