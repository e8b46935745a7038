//! Built-in knowledge tools.
//!
//! Thin adapters from the model-facing tool contract to the external
//! [`KnowledgeBase`](crate::tools::KnowledgeBase) capability.

mod get_catalog;
mod ingest_document;
mod query_skill;
mod search_docs;

pub use get_catalog::GetCatalog;
pub use ingest_document::IngestDocument;
pub use query_skill::QuerySkill;
pub use search_docs::SearchDocs;
