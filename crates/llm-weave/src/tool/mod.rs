//! Tool execution and the continuation loop.
//!
//! # Architecture
//!
//! ```text
//!   ToolHandler     defines one tool (definition + async call)
//!       │
//!   ToolRegistry    stores handlers by name, validates arguments, dispatches
//!       │
//!   tool_loop()     generate → execute requested tools → continue
//! ```
//!
//! A registry is generic over a context type handed to every handler:
//!
//! ```rust
//! use std::sync::Arc;
//! use llm_weave::tool::{ToolError, ToolRegistry, tool_fn_with_ctx};
//! use llm_weave::{JsonSchema, ToolDefinition};
//! use serde_json::Value;
//!
//! struct AppState {
//!     user_id: Arc<str>,
//! }
//!
//! let mut registry: ToolRegistry<AppState> = ToolRegistry::new();
//! registry.register(tool_fn_with_ctx(
//!     ToolDefinition {
//!         name: "whoami".into(),
//!         description: "Current user id".into(),
//!         parameters: JsonSchema::empty_object(),
//!     },
//!     |_: Value, state: &AppState| {
//!         let user = Arc::clone(&state.user_id);
//!         async move { Ok::<_, ToolError>(user.to_string()) }
//!     },
//! ));
//! assert!(registry.contains("whoami"));
//! ```

mod config;
mod error;
mod handler;
mod loop_core;
mod output;
mod registry;

pub use config::ToolLoopConfig;
pub use error::ToolError;
pub use handler::{FnTool, ToolHandler, tool_fn, tool_fn_with_ctx};
pub use loop_core::{ToolLoopResult, tool_loop};
pub use output::{ToolOutput, ToolResult};
pub use registry::ToolRegistry;
