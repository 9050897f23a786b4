//! Session registry for managing worker lifecycles.
//!
//! The registry is responsible for:
//! - Admitting new sessions and starting their workers
//! - Dispatching operations to a session by ID
//! - Listing sessions
//! - Graceful shutdown of all workers

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::client::ClientFactory;

use super::handle::SessionHandle;
use super::types::{CLIENT_ID_PREFIX, Operation, OperationResult, SessionError, SessionMetadata};
use super::worker::{SessionState, SessionWorker};

/// A registered session: its queue handle plus public metadata.
#[derive(Clone)]
pub(crate) struct SessionEntry {
    pub handle: SessionHandle,
    pub metadata: SessionMetadata,
}

/// Registry map shared with workers so they can deregister themselves.
pub(crate) type SessionEntries = Arc<DashMap<String, SessionEntry>>;

// ============================================================================
// Session Registry
// ============================================================================

/// Registry for session workers.
///
/// Thread-safe and cheap to clone. An entry exists from admission until its
/// worker has released the client and exited.
#[derive(Clone)]
pub struct SessionRegistry {
    /// Sessions by ID.
    entries: SessionEntries,
    /// Creates one messaging client per admitted session.
    factory: Arc<dyn ClientFactory>,
    /// Bound on how long a caller waits for an outcome.
    operation_timeout: Option<Duration>,
    /// Worker task handles for graceful shutdown.
    task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    /// Shutdown signal sender.
    shutdown_tx: Arc<watch::Sender<bool>>,
    /// Shutdown signal receiver (cloned for each worker).
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionRegistry {
    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Create a new session registry.
    ///
    /// `operation_timeout` of `None` waits for outcomes indefinitely.
    pub fn new(factory: Arc<dyn ClientFactory>, operation_timeout: Option<Duration>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            entries: Arc::new(DashMap::new()),
            factory,
            operation_timeout,
            task_handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Gracefully shut down all session workers.
    ///
    /// Workers fail their queued operations, disconnect without logging out,
    /// and deregister. Waits for every worker to finish.
    pub async fn shutdown(&self) {
        info!(sessions = self.entries.len(), "Shutting down session registry");

        if self.shutdown_tx.send(true).is_err() {
            warn!("Failed to send shutdown signal");
            return;
        }

        let task_handles = {
            let mut handles = self.task_handles.lock().await;
            std::mem::take(&mut *handles)
        };

        for task_handle in task_handles {
            if let Err(e) = task_handle.await {
                warn!(error = ?e, "Session worker panicked during shutdown");
            }
        }

        info!("Session registry shutdown complete");
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    // ------------------------------------------------------------------------
    // Core API
    // ------------------------------------------------------------------------

    /// Admit a new session for `identity` and start its worker.
    ///
    /// The session is visible in the registry before the worker starts. It is
    /// not authenticated; submit `RequestCode` next.
    pub async fn admit(&self, identity: &str) -> Result<SessionHandle, SessionError> {
        if self.is_shutting_down() {
            return Err(SessionError::SessionGone);
        }

        let id = format!("{}{}", CLIENT_ID_PREFIX, Ulid::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(
            tx,
            id.clone(),
            identity.to_string(),
            self.operation_timeout,
        );

        // Insert FIRST so the worker's own removal can never precede it.
        self.entries.insert(
            id.clone(),
            SessionEntry {
                handle: handle.clone(),
                metadata: SessionMetadata {
                    id: id.clone(),
                    identity: identity.to_string(),
                    created_at: Utc::now(),
                },
            },
        );

        let client = self.factory.create(&id, identity);
        let state = SessionState::new(id.clone(), identity.to_string(), client);
        let task_handle = SessionWorker::spawn(
            state,
            rx,
            self.shutdown_rx.clone(),
            self.entries.clone(),
        );

        let mut guard = self.task_handles.lock().await;
        guard.retain(|h| !h.is_finished());
        guard.push(task_handle);

        info!(
            session_id = %id,
            backend = self.factory.backend(),
            "Session admitted"
        );
        Ok(handle)
    }

    /// Submit an operation to a session and wait for its outcome.
    pub async fn dispatch(&self, id: &str, operation: Operation) -> OperationResult {
        let handle = self
            .get(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        handle.submit_and_wait(operation).await
    }

    /// Get a session handle by ID.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.entries.get(id).map(|entry| entry.handle.clone())
    }

    /// Check if a session exists.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Point-in-time snapshot of all sessions, oldest first.
    pub fn list(&self) -> Vec<SessionMetadata> {
        let mut sessions: Vec<SessionMetadata> = self
            .entries
            .iter()
            .map(|entry| entry.metadata.clone())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Get the number of registered sessions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Roll back an admission: drop the entry, then terminate the worker.
    ///
    /// The entry goes first, so the session disappears from lookups even while
    /// its worker is still busy with an earlier operation.
    pub async fn discard(&self, id: &str) {
        let Some((_, entry)) = self.entries.remove(id) else {
            return;
        };
        debug!(session_id = %id, "Removed discarded session");

        if let Err(e) = entry.handle.terminate().await {
            debug!(session_id = %id, error = %e, "Discarded session did not terminate cleanly");
        }
    }
}
