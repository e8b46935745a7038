//! Documentation search tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::ToolDefinition;
use crate::tools::{KnowledgeBase, Tool, ToolError};

const DEFAULT_LIMIT: usize = 5;

pub struct SearchDocs {
    kb: Arc<dyn KnowledgeBase>,
}

impl SearchDocs {
    pub fn new(kb: Arc<dyn KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[derive(Deserialize)]
struct Args {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for SearchDocs {
    fn name(&self) -> &str {
        "search_docs"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_docs".to_string(),
            description: "Search the documentation knowledge base for relevant passages."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"},
                    "limit": {"type": "integer", "description": "Maximum results", "default": DEFAULT_LIMIT}
                },
                "required": ["query"]
            }),
        }
    }

    async fn invoke(&self, input: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let args: Args =
            serde_json::from_value(input.clone()).map_err(|e| ToolError::InvalidInput {
                tool: "search_docs".to_string(),
                reason: e.to_string(),
            })?;

        let hits = self
            .kb
            .search(&args.query, args.limit.unwrap_or(DEFAULT_LIMIT))
            .await?;
        let total = hits.len();

        Ok(serde_json::json!({
            "results": hits,
            "total": total,
        }))
    }
}
