//! Skill lookup tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::ToolDefinition;
use crate::tools::{KnowledgeBase, Tool, ToolError};

pub struct QuerySkill {
    kb: Arc<dyn KnowledgeBase>,
}

impl QuerySkill {
    pub fn new(kb: Arc<dyn KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[derive(Deserialize)]
struct Args {
    name: String,
}

#[async_trait]
impl Tool for QuerySkill {
    fn name(&self) -> &str {
        "query_skill"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "query_skill".to_string(),
            description: "Fetch detailed guidance from a named skill.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Skill name"}
                },
                "required": ["name"]
            }),
        }
    }

    async fn invoke(&self, input: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let args: Args =
            serde_json::from_value(input.clone()).map_err(|e| ToolError::InvalidInput {
                tool: "query_skill".to_string(),
                reason: e.to_string(),
            })?;

        match self.kb.skill(&args.name).await? {
            Some(skill) => Ok(serde_json::json!({
                "name": skill.name,
                "description": skill.description,
                "content": skill.content,
            })),
            None => Err(ToolError::Failed(format!("skill '{}' not found", args.name))),
        }
    }
}
