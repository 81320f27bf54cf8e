//! `OpenRouter` dialect for llm-weave.
//!
//! `OpenRouter` speaks the `OpenAI` chat protocol, so
//! [`OpenRouterTransform`] reuses the `OpenAI` chat mapping and adds
//! upstream routing preferences ([`ProviderRouting`]) and model
//! fallbacks. [`OpenRouterProvider`] sends app attribution headers when
//! configured.

#![warn(missing_docs)]

mod config;
mod provider;
mod transform;

pub use config::{DataCollection, OpenRouterConfig, ProviderRouting, ProviderSort};
pub use provider::OpenRouterProvider;
pub use transform::OpenRouterTransform;
