//! Anthropic Messages dialect for llm-weave.
//!
//! [`AnthropicTransform`] maps canonical requests onto the Messages API
//! (system hoisting, turn grouping, emulated JSON mode, remote MCP
//! servers) and [`AnthropicProvider`] moves them over HTTP, streaming
//! through server-sent events.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use llm_weave::{Config, Generator, Message, Request, ResponseFormat};
//! use llm_weave_anthropic::{AnthropicConfig, AnthropicProvider};
//!
//! # async fn example() -> Result<(), llm_weave::LlmError> {
//! let provider = AnthropicProvider::new(AnthropicConfig {
//!     api_key: std::env::var("ANTHROPIC_API_KEY").unwrap(),
//!     ..Default::default()
//! });
//! let generator = Generator::new(provider, &Config::default());
//!
//! let response = generator
//!     .generate(&Request {
//!         messages: vec![Message::user("Name three primary colors")],
//!         response_format: Some(ResponseFormat::JsonObject),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("{}", response.parsed_json()?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod convert;
mod provider;
mod stream;
mod transform;
mod types;

pub use config::AnthropicConfig;
pub use provider::AnthropicProvider;
pub use transform::AnthropicTransform;
