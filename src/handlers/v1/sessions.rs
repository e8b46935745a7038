//! Session HTTP handlers.
//!
//! The send-message handler is the gateway into the turn loop: it claims
//! the session's turn gate, spawns the orchestrator, and streams its
//! events back as SSE frames. Precondition failures surface as synchronous
//! problem+json responses; the stream only opens once `begin_turn`
//! succeeds.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::api::{
    CreateSessionResponse, HistoryResponse, ListSessionsResponse, SendMessageRequest,
    SessionSummary, StatsResponse,
};
use crate::handlers::problem_details;
use crate::server::AppState;
use crate::session::{run_turn, SessionError, TurnEvent, UserMessage};
use crate::wire::WireEvent;

/// Channel capacity for turn events in flight to one client.
const EVENT_BUFFER: usize = 64;

/// POST /api/v1/sessions
pub async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let handle = state.registry.create().await;

    let created_at = match handle.metadata().await {
        Ok(meta) => meta.created_at.to_rfc3339(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read fresh session metadata");
            return problem_details::internal_error("failed to create session").into_response();
        }
    };

    debug!(session_id = %handle.id(), "session created");
    let response = CreateSessionResponse {
        session_id: handle.id().to_string(),
        created_at,
    };
    (StatusCode::CREATED, Json(response)).into_response()
}

/// GET /api/v1/sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|m| SessionSummary {
            session_id: m.id,
            created_at: m.created_at.to_rfc3339(),
            last_activity_at: m.last_activity_at.to_rfc3339(),
            turn_count: m.turn_count,
        })
        .collect();

    Json(ListSessionsResponse { sessions })
}

/// GET /api/v1/sessions/{session_id}/history
pub async fn get_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(handle) = state.registry.get(&session_id) else {
        return problem_details::not_found("session not found").into_response();
    };

    match handle.history().await {
        Ok(turns) => (
            StatusCode::OK,
            Json(HistoryResponse { session_id, turns }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read history");
            problem_details::internal_error("failed to read history").into_response()
        }
    }
}

/// GET /api/v1/sessions/{session_id}/stats
pub async fn get_stats(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    let Some(handle) = state.registry.get(&session_id) else {
        return problem_details::not_found("session not found").into_response();
    };

    match handle.metadata().await {
        Ok(meta) => {
            let age = (chrono::Utc::now() - meta.created_at)
                .to_std()
                .unwrap_or_default()
                .as_secs_f64();
            let response = StatsResponse {
                session_id,
                turn_count: meta.turn_count,
                total_cost_usd: meta.totals.cost_usd,
                total_savings_usd: meta.totals.savings_usd,
                cache_hit_ratio: meta.totals.cache_hit_ratio(),
                session_age_seconds: age,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to read session metadata");
            problem_details::internal_error("failed to read session metadata").into_response()
        }
    }
}

/// DELETE /api/v1/sessions/{session_id}
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if state.registry.remove(&session_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        problem_details::not_found("session not found").into_response()
    }
}

/// POST /api/v1/sessions/{session_id}/messages
///
/// Runs one turn and streams its events as SSE frames:
/// `message_start`, `content`*, (`tool_call` `tool_result`)*, then
/// `message_end` or `error`.
pub async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    let Some(handle) = state.registry.get(&session_id) else {
        return problem_details::not_found("session not found").into_response();
    };

    // Precondition check before the stream opens; a second in-flight turn
    // would corrupt the append-only ordering invariant.
    match handle.begin_turn().await {
        Ok(()) => {}
        Err(SessionError::TurnInProgress) => {
            return problem_details::conflict("a turn is already in progress for this session")
                .into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to begin turn");
            return problem_details::internal_error("failed to begin turn").into_response();
        }
    }

    let user = UserMessage {
        content: req.message,
        requester_id: req.requester_id,
        requester_type: req.requester_type,
    };

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();

    debug!(session_id = %session_id, "starting turn stream");
    tokio::spawn(run_turn(
        state.turn_context(),
        handle,
        user,
        tx,
        cancel.clone(),
    ));

    let stream = TurnEventStream {
        rx: ReceiverStream::new(rx),
        // Dropping the response stream (client gone) cancels the turn at
        // its next suspension point.
        _disconnect: cancel.drop_guard(),
    };

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.keep_alive_interval_seconds))
        .text("keep-alive");

    Sse::new(stream).keep_alive(keep_alive).into_response()
}

/// Adapter from orchestrator events to SSE frames, carrying the
/// disconnect guard for the turn's cancellation token.
struct TurnEventStream {
    rx: ReceiverStream<TurnEvent>,
    _disconnect: DropGuard,
}

impl Stream for TurnEventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                let wire = WireEvent::from(event);
                let sse = Event::default()
                    .event(wire.tag())
                    .json_data(wire.payload())
                    .unwrap_or_else(|_| Event::default().event(wire.tag()).data("{}"));
                Poll::Ready(Some(Ok(sse)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl From<TurnEvent> for WireEvent {
    fn from(event: TurnEvent) -> Self {
        match event {
            TurnEvent::Started { session_id } => WireEvent::MessageStart { session_id },
            TurnEvent::Content { text } => WireEvent::Content { text },
            TurnEvent::ToolCall { name, input } => WireEvent::ToolCall { name, input },
            TurnEvent::ToolResult { name, output } => match output {
                Ok(value) => WireEvent::ToolResult {
                    name,
                    output: Some(value),
                    error: None,
                },
                Err(message) => WireEvent::ToolResult {
                    name,
                    output: None,
                    error: Some(message),
                },
            },
            TurnEvent::Completed { usage } => WireEvent::MessageEnd { usage },
            TurnEvent::Failed { kind, message } => WireEvent::Error {
                kind: kind.as_str().to_string(),
                message,
            },
        }
    }
}
