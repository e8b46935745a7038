//! Tool dispatcher.
//!
//! A closed registry mapping tool names to handlers. Unknown names are a
//! typed error, every call runs under a bounded timeout, and the
//! dispatcher never retries — retry policy belongs to the turn loop so it
//! can vary per tool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::error::ToolError;
use super::tool::Tool;
use crate::llm::ToolDefinition;

/// Routes model-requested tool calls to registered handlers.
pub struct ToolDispatcher {
    tools: HashMap<String, Arc<dyn Tool>>,
    call_timeout: Duration,
}

impl ToolDispatcher {
    /// Create an empty dispatcher with the given per-call timeout.
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            call_timeout,
        }
    }

    /// Register a tool. Later registrations with the same name win.
    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    /// Definitions for every registered tool, sorted by name so the
    /// advertised table is stable across calls (a cacheable prefix).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Invoke a tool by name with a bounded timeout.
    pub async fn invoke(
        &self,
        name: &str,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        debug!(tool = %name, "invoking tool");

        match tokio::time::timeout(self.call_timeout, tool.invoke(input)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: name.to_string(),
                seconds: self.call_timeout.as_secs(),
            }),
        }
    }
}
