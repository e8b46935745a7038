//! Per-session actor.
//!
//! Each session gets a dedicated task that serializes all mutations via
//! message passing. History appends and totals updates for one session
//! never race; different sessions never contend.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::actor_types::{SessionCommand, SessionError, SessionMetadata, CHANNEL_CAPACITY};
use super::turn::Turn;
use crate::cost::CostMetrics;
use crate::llm::Message;

/// Actor owning one session's state.
pub struct SessionActor {
    id: String,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    turns: Vec<Turn>,
    totals: CostMetrics,
    turn_in_flight: bool,

    command_rx: mpsc::Receiver<SessionCommand>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionActor {
    /// Spawn an actor for a fresh session.
    ///
    /// Returns the command sender and the task handle.
    pub fn spawn(
        id: String,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (mpsc::Sender<SessionCommand>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let now = Utc::now();

        let actor = Self {
            id,
            created_at: now,
            last_activity_at: now,
            turns: Vec::new(),
            totals: CostMetrics::default(),
            turn_in_flight: false,
            command_rx: rx,
            shutdown_rx,
        };

        let handle = tokio::spawn(actor.run());
        (tx, handle)
    }

    async fn run(mut self) {
        debug!(session_id = %self.id, "session actor started");

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        debug!(session_id = %self.id, "session actor received shutdown signal");
                        break;
                    }
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!(session_id = %self.id, "all handles dropped, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!(session_id = %self.id, "session actor stopped");
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::BeginTurn { reply } => {
                let _ = reply.send(self.begin_turn());
            }
            SessionCommand::AppendTurn { turn, reply } => {
                let _ = reply.send(self.append_turn(*turn));
            }
            SessionCommand::GetHistory { reply } => {
                let _ = reply.send(Ok(self.turns.clone()));
            }
            SessionCommand::GetConversation { reply } => {
                let _ = reply.send(Ok(self.conversation()));
            }
            SessionCommand::GetMetadata { reply } => {
                let _ = reply.send(Ok(self.metadata()));
            }
        }
    }

    fn begin_turn(&mut self) -> Result<(), SessionError> {
        if self.turn_in_flight {
            return Err(SessionError::TurnInProgress);
        }
        self.turn_in_flight = true;
        self.last_activity_at = Utc::now();
        Ok(())
    }

    fn append_turn(&mut self, turn: Turn) -> Result<(), SessionError> {
        self.totals.fold(&turn.usage);
        self.turns.push(turn);
        self.turn_in_flight = false;
        self.last_activity_at = Utc::now();
        Ok(())
    }

    fn conversation(&self) -> Vec<Message> {
        self.turns.iter().flat_map(Turn::to_messages).collect()
    }

    fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            id: self.id.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            turn_count: self.turns.len(),
            totals: self.totals.clone(),
            turn_in_flight: self.turn_in_flight,
        }
    }
}
