//! Model-backend abstraction.
//!
//! The backend is an opaque capability: submit a conversation, receive a
//! stream of content/tool-call events and a final usage report.

mod anthropic;
mod error;
pub mod mock;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use error::ModelError;
pub use provider::ModelProvider;
pub use types::{
    ChatRequest, Message, ModelEvent, ModelStream, Role, ToolCall, ToolDefinition, UsageReport,
};
