//! Application state and router assembly.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::cost::PricingTable;
use crate::handlers;
use crate::llm::ModelProvider;
use crate::session::{SessionRegistry, TurnContext, TurnOptions};
use crate::tools::ToolDispatcher;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub provider: Arc<dyn ModelProvider>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub pricing: PricingTable,
    pub turn_options: TurnOptions,
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: u32,
    pub keep_alive_interval_seconds: u64,
    pub max_connections: usize,
}

impl AppState {
    /// Assemble the context one turn needs.
    pub fn turn_context(&self) -> TurnContext {
        TurnContext {
            provider: self.provider.clone(),
            dispatcher: self.dispatcher.clone(),
            pricing: self.pricing.clone(),
            options: self.turn_options.clone(),
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    let max_connections = state.max_connections;

    // Streaming routes: no request timeout (the turn loop applies its own
    // per-suspension-point timeouts).
    let streaming_routes = Router::new()
        .route(
            "/sessions/{session_id}/messages",
            post(handlers::v1::send_message),
        )
        .route(
            "/ws/sessions/{session_id}",
            get(handlers::v1::ws_session),
        )
        .with_state(state.clone());

    // Regular API routes: bounded by the request timeout.
    let api_routes = Router::new()
        .route(
            "/sessions",
            get(handlers::v1::list_sessions).post(handlers::v1::create_session),
        )
        .route(
            "/sessions/{session_id}",
            delete(handlers::v1::delete_session),
        )
        .route(
            "/sessions/{session_id}/history",
            get(handlers::v1::get_history),
        )
        .route("/sessions/{session_id}/stats", get(handlers::v1::get_stats))
        .with_state(state.clone())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ));

    let api_v1 = Router::new()
        .merge(streaming_routes)
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024)) // 2 MB
        .layer(ConcurrencyLimitLayer::new(max_connections));

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .with_state(state)
        .nest("/api/v1", api_v1)
}
