//! Model provider trait.

use async_trait::async_trait;

use super::error::ModelError;
use super::types::{ChatRequest, ModelStream};

/// An opaque model backend: submit a conversation, receive a stream of
/// content/tool-call events and a final usage report.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Start a streaming chat completion.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ModelStream, ModelError>;
}
