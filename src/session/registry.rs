//! Session registry.
//!
//! Maps session IDs to handles, spawns actors, and runs the idle-eviction
//! sweep. Lookups across different session IDs proceed without contention;
//! no single lock guards all sessions.

use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::actor::SessionActor;
use super::actor_types::SessionMetadata;
use super::handle::SessionHandle;
use crate::api::SESSION_ID_PREFIX;

/// Maximum concurrent metadata fetches for `list()`.
const LIST_CONCURRENCY: usize = 32;

/// Registry for session actors. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    handles: Arc<DashMap<String, SessionHandle>>,
    task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            handles: Arc::new(DashMap::new()),
            task_handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Create a new session with a fresh 128-bit identifier.
    pub async fn create(&self) -> SessionHandle {
        let id = format!("{}{}", SESSION_ID_PREFIX, Ulid::new());

        let (tx, task_handle) = SessionActor::spawn(id.clone(), self.shutdown_rx.clone());
        let handle = SessionHandle::new(tx, id.clone());

        self.handles.insert(id, handle.clone());

        let mut guard = self.task_handles.lock().await;
        guard.retain(|h| !h.is_finished());
        guard.push(task_handle);

        handle
    }

    /// Get a session handle by ID.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.handles.get(id).map(|r| r.clone())
    }

    /// Remove a session. Returns true when one was removed.
    ///
    /// The actor shuts down once all handle clones are dropped.
    pub fn remove(&self, id: &str) -> bool {
        self.handles.remove(id).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Metadata for all sessions, most recent activity first.
    pub async fn list(&self) -> Vec<SessionMetadata> {
        // Collect handles first to avoid holding map references across await.
        let handles: Vec<_> = self
            .handles
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut sessions: Vec<SessionMetadata> = stream::iter(handles)
            .map(|handle| async move { handle.metadata().await })
            .buffer_unordered(LIST_CONCURRENCY)
            .filter_map(|result| async move { result.ok() })
            .collect()
            .await;

        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        sessions
    }

    /// Remove sessions idle longer than `max_idle`.
    ///
    /// Never removes a session with a turn in flight: eviction is advisory
    /// cleanup, not correctness-critical. Returns the number evicted.
    pub async fn evict_older_than(&self, max_idle: chrono::Duration) -> usize {
        let now = chrono::Utc::now();

        let handles: Vec<SessionHandle> = self
            .handles
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut evicted = 0;
        for handle in handles {
            let Ok(meta) = handle.metadata().await else {
                continue;
            };

            if meta.turn_in_flight {
                continue;
            }
            if now - meta.last_activity_at < max_idle {
                continue;
            }

            info!(
                session_id = %meta.id,
                idle_minutes = (now - meta.last_activity_at).num_minutes(),
                "evicting inactive session"
            );
            self.handles.remove(&meta.id);
            evicted += 1;
        }

        if evicted > 0 {
            debug!(evicted, "session eviction sweep complete");
        }
        evicted
    }

    /// Spawn the periodic eviction sweep.
    pub fn spawn_eviction_sweep(
        &self,
        max_idle: chrono::Duration,
        interval: std::time::Duration,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut shutdown_rx = registry.shutdown_rx.clone();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.evict_older_than(max_idle).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Gracefully shut down all session actors.
    pub async fn shutdown(&self) {
        info!("shutting down session registry");

        if self.shutdown_tx.send(true).is_err() {
            warn!("failed to send shutdown signal");
            return;
        }

        let task_handles = {
            let mut handles = self.task_handles.lock().await;
            std::mem::take(&mut *handles)
        };
        for task_handle in task_handles {
            if let Err(e) = task_handle.await {
                warn!(error = ?e, "actor task panicked during shutdown");
            }
        }

        info!("session registry shutdown complete");
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
