//! Session actor command protocol and shared types.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;

use super::turn::Turn;
use crate::cost::CostMetrics;
use crate::llm::Message;

/// Commands a session actor processes sequentially.
pub enum SessionCommand {
    /// Claim the turn gate. Fails when a turn is already in flight.
    BeginTurn {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Append a finished turn, fold its usage into totals, release the gate.
    AppendTurn {
        turn: Box<Turn>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    GetHistory {
        reply: oneshot::Sender<Result<Vec<Turn>, SessionError>>,
    },
    /// Conversation history flattened into model messages.
    GetConversation {
        reply: oneshot::Sender<Result<Vec<Message>, SessionError>>,
    },
    GetMetadata {
        reply: oneshot::Sender<Result<SessionMetadata, SessionError>>,
    },
}

/// Errors from session operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No session with this ID.
    #[error("session not found: {0}")]
    NotFound(String),

    /// A turn is already in flight for this session.
    #[error("a turn is already in progress for this session")]
    TurnInProgress,

    /// The actor has shut down.
    #[error("session actor has shut down")]
    ActorShutdown,
}

/// Snapshot of a session's bookkeeping (returned by GetMetadata).
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub turn_count: usize,
    pub totals: CostMetrics,
    pub turn_in_flight: bool,
}

/// Channel capacity for actor commands.
///
/// Sized for burst traffic during tool-heavy turns; a full channel applies
/// backpressure to callers.
pub const CHANNEL_CAPACITY: usize = 64;
