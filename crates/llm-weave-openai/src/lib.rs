//! `OpenAI` dialects for llm-weave.
//!
//! Two generation dialects share one provider:
//!
//! - [`ChatTransform`] maps canonical requests onto Chat Completions.
//!   It is reusable by OpenAI-compatible APIs through
//!   [`ChatTransform::with_name`] and [`SystemRole`].
//! - [`ResponsesTransform`] maps them onto the Responses API, which also
//!   carries remote MCP servers.
//!
//! [`OpenAiProvider`] picks one through [`OpenAiConfig::api`], streams
//! through server-sent events and serves embeddings from `/embeddings`.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use llm_weave::{Config, Generator, Message, Request};
//! use llm_weave_openai::{OpenAiConfig, OpenAiProvider};
//!
//! # async fn example() -> Result<(), llm_weave::LlmError> {
//! let provider = OpenAiProvider::new(OpenAiConfig {
//!     api_key: std::env::var("OPENAI_API_KEY").unwrap(),
//!     ..Default::default()
//! });
//! let generator = Generator::new(provider, &Config::default());
//!
//! let response = generator
//!     .generate(&Request {
//!         messages: vec![Message::user("Hello!")],
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod chat;
mod config;
mod convert;
mod embed;
mod provider;
mod responses;
mod stream;
mod types;

pub use chat::{ChatTransform, SystemRole};
pub use config::{OpenAiApi, OpenAiConfig};
pub use convert::convert_error;
pub use provider::OpenAiProvider;
pub use responses::ResponsesTransform;
