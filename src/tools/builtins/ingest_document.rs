//! Document ingestion tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::ToolDefinition;
use crate::tools::{KnowledgeBase, Tool, ToolError};

pub struct IngestDocument {
    kb: Arc<dyn KnowledgeBase>,
}

impl IngestDocument {
    pub fn new(kb: Arc<dyn KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[derive(Deserialize)]
struct Args {
    module: String,
    content: String,
}

#[async_trait]
impl Tool for IngestDocument {
    fn name(&self) -> &str {
        "ingest_document"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "ingest_document".to_string(),
            description: "Ingest a new document into a knowledge module.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "module": {"type": "string", "description": "Target knowledge module"},
                    "content": {"type": "string", "description": "Document content"}
                },
                "required": ["module", "content"]
            }),
        }
    }

    async fn invoke(&self, input: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let args: Args =
            serde_json::from_value(input.clone()).map_err(|e| ToolError::InvalidInput {
                tool: "ingest_document".to_string(),
                reason: e.to_string(),
            })?;

        let count = self.kb.store(&args.module, &args.content).await?;

        Ok(serde_json::json!({
            "module": args.module,
            "documents": count,
        }))
    }
}
