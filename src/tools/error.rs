//! Tool error types.

use thiserror::Error;

/// Errors from tool dispatch and execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The model named a tool that is not in the registry.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The tool input did not match the tool's schema.
    #[error("invalid input for {tool}: {reason}")]
    InvalidInput { tool: String, reason: String },

    /// The tool did not finish within the dispatcher's bound.
    #[error("tool {tool} timed out after {seconds} seconds")]
    Timeout { tool: String, seconds: u64 },

    /// The tool ran and failed.
    #[error("tool execution failed: {0}")]
    Failed(String),
}
