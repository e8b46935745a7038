//! Session handle.
//!
//! A thin, cheaply-cloneable wrapper around the actor's command sender.

use tokio::sync::{mpsc, oneshot};

use super::actor_types::{SessionCommand, SessionError, SessionMetadata};
use super::turn::Turn;
use crate::llm::Message;

/// Handle for interacting with one session actor.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    id: String,
}

impl SessionHandle {
    pub(crate) fn new(tx: mpsc::Sender<SessionCommand>, id: String) -> Self {
        Self { tx, id }
    }

    /// The session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Claim the turn gate. Fails with `TurnInProgress` when a prior turn
    /// has not reached a terminal state.
    pub async fn begin_turn(&self) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::BeginTurn { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;
        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// Append a finished turn and release the gate.
    pub async fn append_turn(&self, turn: Turn) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::AppendTurn {
                turn: Box::new(turn),
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;
        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// All completed turns, in append order.
    pub async fn history(&self) -> Result<Vec<Turn>, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::GetHistory { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;
        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// History flattened into model messages.
    pub async fn conversation(&self) -> Result<Vec<Message>, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::GetConversation { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;
        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// Session bookkeeping snapshot.
    pub async fn metadata(&self) -> Result<SessionMetadata, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::GetMetadata { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;
        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}
