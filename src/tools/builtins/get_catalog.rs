//! Catalog listing tool.

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::ToolDefinition;
use crate::tools::{KnowledgeBase, Tool, ToolError};

pub struct GetCatalog {
    kb: Arc<dyn KnowledgeBase>,
}

impl GetCatalog {
    pub fn new(kb: Arc<dyn KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl Tool for GetCatalog {
    fn name(&self) -> &str {
        "get_catalog"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_catalog".to_string(),
            description: "List all available knowledge modules.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    async fn invoke(&self, _input: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let modules = self.kb.catalog().await?;
        Ok(serde_json::json!({ "modules": modules }))
    }
}
