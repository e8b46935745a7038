//! Tool trait.
//!
//! Each tool is a self-contained struct holding its own dependencies, so
//! new tools are added by registration rather than by editing a dispatch
//! match.

use async_trait::async_trait;

use super::error::ToolError;
use crate::llm::ToolDefinition;

/// A tool the dispatcher can route calls to.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// The definition advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Invoke the tool with JSON input, returning JSON output.
    async fn invoke(&self, input: &serde_json::Value) -> Result<serde_json::Value, ToolError>;
}
