//! Knowledge-base capability.
//!
//! The persistent multi-database store is an external collaborator; the
//! engine consumes it through this search/store trait. The in-memory
//! implementation backs the default binary and the test suite.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::error::ToolError;

/// One search hit from the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocHit {
    pub module: String,
    pub snippet: String,
    pub score: f64,
}

/// Summary of one knowledge module for the catalog listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub module: String,
    pub documents: usize,
}

/// An expert-guidance skill entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub content: String,
}

/// Search/store capability over the documentation knowledge base.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<DocHit>, ToolError>;

    /// Ingest a document into a module. Returns the stored document count
    /// for that module.
    async fn store(&self, module: &str, content: &str) -> Result<usize, ToolError>;

    async fn skill(&self, name: &str) -> Result<Option<Skill>, ToolError>;

    async fn catalog(&self) -> Result<Vec<ModuleSummary>, ToolError>;
}

/// In-memory knowledge base with naive substring scoring.
#[derive(Default)]
pub struct InMemoryKnowledgeBase {
    docs: RwLock<HashMap<String, Vec<String>>>,
    skills: RwLock<HashMap<String, Skill>>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a skill entry (used at startup and in tests).
    pub async fn add_skill(&self, skill: Skill) {
        self.skills.write().await.insert(skill.name.clone(), skill);
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<DocHit>, ToolError> {
        let needle = query.to_lowercase();
        let docs = self.docs.read().await;

        let mut hits: Vec<DocHit> = docs
            .iter()
            .flat_map(|(module, contents)| {
                contents.iter().filter_map(|content| {
                    let haystack = content.to_lowercase();
                    let matches = haystack.matches(&needle).count();
                    if matches == 0 {
                        return None;
                    }
                    Some(DocHit {
                        module: module.clone(),
                        snippet: content.chars().take(240).collect(),
                        score: matches as f64 / haystack.len().max(1) as f64,
                    })
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn store(&self, module: &str, content: &str) -> Result<usize, ToolError> {
        if module.is_empty() {
            return Err(ToolError::Failed("module name must not be empty".into()));
        }
        let mut docs = self.docs.write().await;
        let entry = docs.entry(module.to_string()).or_default();
        entry.push(content.to_string());
        Ok(entry.len())
    }

    async fn skill(&self, name: &str) -> Result<Option<Skill>, ToolError> {
        Ok(self.skills.read().await.get(name).cloned())
    }

    async fn catalog(&self) -> Result<Vec<ModuleSummary>, ToolError> {
        let docs = self.docs.read().await;
        let mut modules: Vec<ModuleSummary> = docs
            .iter()
            .map(|(module, contents)| ModuleSummary {
                module: module.clone(),
                documents: contents.len(),
            })
            .collect();
        modules.sort_by(|a, b| a.module.cmp(&b.module));
        Ok(modules)
    }
}
