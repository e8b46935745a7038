//! Shared test infrastructure.

use std::sync::Arc;
use std::time::Duration;

use archivist::cost::PricingTable;
use archivist::llm::mock::ScriptedProvider;
use archivist::llm::{ModelEvent, UsageReport};
use archivist::server::{build_app, AppState};
use archivist::session::{SessionRegistry, TurnOptions};
use archivist::tools::{knowledge_dispatcher, InMemoryKnowledgeBase, KnowledgeBase};
use axum::Router;

pub fn usage(input: u64, output: u64, cache_read: u64) -> UsageReport {
    UsageReport {
        input_tokens: input,
        output_tokens: output,
        cache_write_tokens: 0,
        cache_read_tokens: cache_read,
    }
}

/// App state driven by a scripted model backend and an in-memory
/// knowledge base seeded with one document.
pub async fn test_app_state(scripts: Vec<Vec<ModelEvent>>) -> AppState {
    let kb = Arc::new(InMemoryKnowledgeBase::new());
    kb.store("rust", "Pinning guarantees a value will not move.")
        .await
        .unwrap();

    AppState {
        registry: SessionRegistry::new(),
        provider: Arc::new(ScriptedProvider::new(scripts)),
        dispatcher: Arc::new(knowledge_dispatcher(kb, Duration::from_secs(5))),
        pricing: PricingTable::default(),
        turn_options: TurnOptions::default(),
        model: "mock".to_string(),
        system_prompt: None,
        temperature: None,
        max_output_tokens: 1024,
        keep_alive_interval_seconds: 15,
        max_connections: 32,
    }
}

pub async fn test_app(scripts: Vec<Vec<ModelEvent>>) -> Router {
    build_app(test_app_state(scripts).await, 30)
}

/// Parse SSE events from a response body into (event, data) pairs.
pub fn parse_sse_events(body: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut current_data = String::new();

    for line in body.lines() {
        if let Some(event_name) = line.strip_prefix("event:") {
            current_event = event_name.trim().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            current_data = data.trim().to_string();
        } else if line.is_empty() && !current_event.is_empty() {
            events.push((current_event.clone(), current_data.clone()));
            current_event.clear();
            current_data.clear();
        }
    }
    if !current_event.is_empty() {
        events.push((current_event, current_data));
    }
    events
}
