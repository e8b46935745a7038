//! Tool dispatch.
//!
//! Tools are external capabilities reached through a closed registry: the
//! model names a tool, the dispatcher routes the call and normalizes the
//! outcome. Side effects belong to the tools themselves.

pub mod builtins;
mod dispatcher;
mod error;
mod knowledge;
mod tool;

pub use dispatcher::ToolDispatcher;
pub use error::ToolError;
pub use knowledge::{DocHit, InMemoryKnowledgeBase, KnowledgeBase, ModuleSummary, Skill};
pub use tool::Tool;

use std::sync::Arc;

/// Build a dispatcher with the standard knowledge tools registered.
pub fn knowledge_dispatcher(
    kb: Arc<dyn KnowledgeBase>,
    timeout: std::time::Duration,
) -> ToolDispatcher {
    ToolDispatcher::new(timeout)
        .register(Arc::new(builtins::SearchDocs::new(kb.clone())))
        .register(Arc::new(builtins::IngestDocument::new(kb.clone())))
        .register(Arc::new(builtins::QuerySkill::new(kb.clone())))
        .register(Arc::new(builtins::GetCatalog::new(kb)))
}
