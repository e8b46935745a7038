//! WebSocket transport.
//!
//! Carries the same typed events as the SSE endpoint, each as one whole
//! text message tagged with `type`. The client sends
//! `{"type":"message","content":"..."}` frames; the turn gate applies
//! exactly as on the HTTP path, except the rejection arrives as a typed
//! `error` event because the socket is already open.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::server::AppState;
use crate::session::{run_turn, SessionError, SessionHandle, UserMessage};
use crate::wire::WireEvent;

type WsSink = SplitSink<WebSocket, WsMessage>;
type WsStream = SplitStream<WebSocket>;

/// Frames the client may send.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Message {
        content: String,
        #[serde(default)]
        requester_id: Option<String>,
        #[serde(default)]
        requester_type: Option<String>,
    },
}

/// GET /api/v1/ws/sessions/{session_id}
pub async fn ws_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(state, session_id, socket))
}

async fn handle_socket(state: AppState, session_id: String, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let Some(handle) = state.registry.get(&session_id) else {
        let event = WireEvent::Error {
            kind: "session_not_found".to_string(),
            message: format!("session '{session_id}' not found"),
        };
        let _ = send_event(&mut sink, &event).await;
        let _ = sink.close().await;
        return;
    };

    debug!(session_id = %session_id, "websocket connected");

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let parsed: ClientFrame = match serde_json::from_str(&message) {
            Ok(frame) => frame,
            Err(e) => {
                // Malformed client frames are a soft error on this side too.
                let event = WireEvent::Error {
                    kind: "bad_request".to_string(),
                    message: format!("unparseable frame: {e}"),
                };
                if send_event(&mut sink, &event).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let ClientFrame::Message {
            content,
            requester_id,
            requester_type,
        } = parsed;

        let user = UserMessage {
            content,
            requester_id: requester_id.unwrap_or_else(|| "user".to_string()),
            requester_type: requester_type.unwrap_or_else(|| "human".to_string()),
        };

        if !run_socket_turn(&state, &handle, &mut sink, &mut stream, user).await {
            break;
        }
    }

    debug!(session_id = %session_id, "websocket disconnected");
}

/// Run one turn over the socket. Returns false when the socket is gone.
async fn run_socket_turn(
    state: &AppState,
    handle: &SessionHandle,
    sink: &mut WsSink,
    stream: &mut WsStream,
    user: UserMessage,
) -> bool {
    match handle.begin_turn().await {
        Ok(()) => {}
        Err(SessionError::TurnInProgress) => {
            let event = WireEvent::Error {
                kind: "turn_in_progress".to_string(),
                message: "a turn is already in progress for this session".to_string(),
            };
            return send_event(sink, &event).await.is_ok();
        }
        Err(e) => {
            warn!(error = %e, "failed to begin turn");
            let event = WireEvent::Error {
                kind: "internal_error".to_string(),
                message: "failed to begin turn".to_string(),
            };
            return send_event(sink, &event).await.is_ok();
        }
    }

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let turn = tokio::spawn(run_turn(
        state.turn_context(),
        handle.clone(),
        user,
        tx,
        cancel.clone(),
    ));

    // Forward events while watching the socket for closure.
    let mut socket_open = true;
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let wire = WireEvent::from(event);
                let terminal = wire.is_terminal();
                if send_event(sink, &wire).await.is_err() {
                    cancel.cancel();
                    socket_open = false;
                    break;
                }
                if terminal {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => {
                        cancel.cancel();
                        socket_open = false;
                        break;
                    }
                    // Frames arriving mid-turn are dropped: one turn per
                    // session at a time.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // Let the orchestrator reach its terminal state and record the turn.
    let _ = turn.await;
    socket_open
}

async fn send_event(sink: &mut WsSink, event: &WireEvent) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    sink.send(WsMessage::Text(json.into())).await
}
