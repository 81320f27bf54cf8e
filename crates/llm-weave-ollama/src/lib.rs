//! Ollama dialect for llm-weave.
//!
//! [`OllamaTransform`] maps canonical requests onto `/api/chat` and
//! `/api/embed`. [`OllamaProvider`] moves them to a local or remote
//! Ollama server, streaming newline-delimited JSON.
//!
//! No API key is needed for a local server. Set
//! [`OllamaConfig::api_key`] for hosted or authenticated instances.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use llm_weave::{Config, Generator, Message, Request};
//! use llm_weave_ollama::{OllamaConfig, OllamaProvider};
//!
//! # async fn example() -> Result<(), llm_weave::LlmError> {
//! let provider = OllamaProvider::new(OllamaConfig {
//!     model: "llama3.2".into(),
//!     ..Default::default()
//! });
//! let generator = Generator::new(provider, &Config::default());
//!
//! let response = generator
//!     .generate(&Request {
//!         messages: vec![Message::user("Why is the sky blue?")],
//!         stream: true,
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod convert;
mod embed;
mod provider;
mod stream;
mod transform;
mod types;

pub use config::OllamaConfig;
pub use provider::OllamaProvider;
pub use transform::OllamaTransform;
