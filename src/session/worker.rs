//! Per-session worker.
//!
//! Each session gets a dedicated worker task that:
//! - Owns the session's auth phase and its messaging client
//! - Drains the session queue one operation at a time
//! - Releases the client and deregisters itself when it exits
//!
//! Exit happens on `Terminate`, on a failed connect, on the registry's
//! shutdown signal, or when every handle has been dropped.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{EntityRef, MessagingClient};

use super::registry::SessionEntries;
use super::types::{AuthPhase, Operation, OperationResult, Outcome, SessionCommand, SessionError};

// ============================================================================
// Session State
// ============================================================================

/// State owned by exactly one worker.
pub(crate) struct SessionState {
    id: String,
    identity: String,
    phase: AuthPhase,
    client: Box<dyn MessagingClient>,
}

impl SessionState {
    pub(crate) fn new(id: String, identity: String, client: Box<dyn MessagingClient>) -> Self {
        Self {
            id,
            identity,
            phase: AuthPhase::Unauthenticated,
            client,
        }
    }

    /// Apply one operation. Errors become the operation's outcome; the phase
    /// only advances on success, except for `Terminate`.
    async fn apply(&mut self, operation: Operation) -> OperationResult {
        if self.phase == AuthPhase::Terminated {
            return Err(SessionError::SessionTerminated);
        }

        match operation {
            Operation::RequestCode => self.request_code().await,
            Operation::SubmitCode { code } => self.submit_code(&code).await,
            Operation::SendMessage { to, text } => self.send_message(to, &text).await,
            Operation::SendMessageToSelf { text } => self.send_message_to_self(&text).await,
            Operation::Terminate => self.terminate().await,
        }
    }

    async fn request_code(&mut self) -> OperationResult {
        if self.phase == AuthPhase::Authenticated {
            return Ok(Outcome::AlreadyAuthorized);
        }

        if self.client.is_authorized().await? {
            debug!(session_id = %self.id, "Account already authorized, skipping code");
            self.phase = AuthPhase::Authenticated;
            return Ok(Outcome::AlreadyAuthorized);
        }

        self.client.request_code(&self.identity).await?;
        self.phase = AuthPhase::CodeRequested;
        Ok(Outcome::CodeSent)
    }

    async fn submit_code(&mut self, code: &str) -> OperationResult {
        if self.phase == AuthPhase::Authenticated {
            return Ok(Outcome::SignedIn);
        }

        self.client.verify_code(&self.identity, code).await?;
        self.phase = AuthPhase::Authenticated;
        Ok(Outcome::SignedIn)
    }

    /// Resolve the recipient, registering it as a contact when unknown, then
    /// send. Registration and the second resolve happen at most once.
    async fn send_message(&mut self, to: String, text: &str) -> OperationResult {
        self.require_authenticated()?;

        let entity = match self.client.resolve_entity(&to).await? {
            Some(entity) => entity,
            None => self.register_and_resolve(to).await?,
        };

        self.client.send_message(&entity, text).await?;
        Ok(Outcome::MessageSent)
    }

    async fn register_and_resolve(&mut self, to: String) -> Result<EntityRef, SessionError> {
        debug!(session_id = %self.id, recipient = %to, "Recipient unknown, registering contact");

        let import = self.client.register_contact(&to).await?;
        if !import.is_imported() {
            return Err(SessionError::UnknownRecipient(to));
        }

        match self.client.resolve_entity(&to).await? {
            Some(entity) => Ok(entity),
            None => Err(SessionError::UnknownRecipient(to)),
        }
    }

    async fn send_message_to_self(&mut self, text: &str) -> OperationResult {
        self.require_authenticated()?;

        let me = self.client.get_self().await?;
        self.client.send_message(&me, text).await?;
        Ok(Outcome::MessageSent)
    }

    /// Log out when signed in. The session ends even if logging out fails.
    async fn terminate(&mut self) -> OperationResult {
        let result = if self.phase == AuthPhase::Authenticated {
            self.client
                .log_out()
                .await
                .map(|()| Outcome::Terminated)
                .map_err(SessionError::from)
        } else {
            Ok(Outcome::Terminated)
        };

        if let Err(e) = &result {
            warn!(session_id = %self.id, error = %e, "Log out failed, terminating anyway");
        }
        self.phase = AuthPhase::Terminated;
        result
    }

    fn require_authenticated(&self) -> Result<(), SessionError> {
        if self.phase == AuthPhase::Authenticated {
            Ok(())
        } else {
            Err(SessionError::NotAuthenticated)
        }
    }
}

// ============================================================================
// Session Worker
// ============================================================================

/// Why the command loop ended.
enum Exit {
    /// `Terminate` was applied. Its reply is held back until the worker has
    /// deregistered, so later dispatches never find a half-dead session.
    Terminated {
        reply: oneshot::Sender<OperationResult>,
        result: OperationResult,
    },
    ConnectFailed,
    Shutdown,
    /// Every handle was dropped.
    Abandoned,
}

pub(crate) struct SessionWorker {
    state: SessionState,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    shutdown_rx: watch::Receiver<bool>,
    entries: SessionEntries,
}

impl SessionWorker {
    /// Spawn the worker task. The session must already be registered in
    /// `entries`; the worker removes it on exit.
    pub(crate) fn spawn(
        state: SessionState,
        command_rx: mpsc::UnboundedReceiver<SessionCommand>,
        shutdown_rx: watch::Receiver<bool>,
        entries: SessionEntries,
    ) -> JoinHandle<()> {
        let worker = Self {
            state,
            command_rx,
            shutdown_rx,
            entries,
        };
        tokio::spawn(worker.run())
    }

    async fn run(mut self) {
        debug!(session_id = %self.state.id, "Session worker started");

        let exit = match self.state.client.connect().await {
            Ok(()) => {
                debug!(session_id = %self.state.id, "Messaging client connected");
                self.command_loop().await
            }
            Err(e) => {
                warn!(session_id = %self.state.id, error = %e, "Messaging client failed to connect");
                Exit::ConnectFailed
            }
        };

        self.finish(exit).await;
    }

    /// Main command processing loop.
    async fn command_loop(&mut self) -> Exit {
        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        debug!(session_id = %self.state.id, "Session worker received shutdown signal");
                        return Exit::Shutdown;
                    }
                }

                command = self.command_rx.recv() => {
                    let Some(SessionCommand { operation, reply }) = command else {
                        debug!(session_id = %self.state.id, "All handles dropped");
                        return Exit::Abandoned;
                    };

                    let name = operation.name();
                    debug!(session_id = %self.state.id, operation = name, phase = %self.state.phase, "Applying operation");

                    let result = self.state.apply(operation).await;
                    if let Err(e) = &result {
                        warn!(session_id = %self.state.id, operation = name, error = %e, "Operation failed");
                    }

                    if self.state.phase == AuthPhase::Terminated {
                        return Exit::Terminated { reply, result };
                    }
                    let _ = reply.send(result);
                }
            }
        }
    }

    /// Stop accepting work, fail whatever is still queued, release the client,
    /// and deregister.
    async fn finish(mut self, exit: Exit) {
        self.command_rx.close();

        let queued_error = match exit {
            Exit::Terminated { .. } => SessionError::SessionTerminated,
            _ => SessionError::SessionGone,
        };
        let mut dropped = 0usize;
        while let Ok(command) = self.command_rx.try_recv() {
            let _ = command.reply.send(Err(queued_error.clone()));
            dropped += 1;
        }
        if dropped > 0 {
            debug!(session_id = %self.state.id, dropped, "Failed queued operations");
        }

        if let Err(e) = self.state.client.disconnect().await {
            warn!(session_id = %self.state.id, error = %e, "Failed to release messaging client");
        }

        self.entries.remove(&self.state.id);

        let reason = match &exit {
            Exit::Terminated { .. } => "terminated",
            Exit::ConnectFailed => "connect_failed",
            Exit::Shutdown => "shutdown",
            Exit::Abandoned => "abandoned",
        };
        info!(session_id = %self.state.id, reason, "Session worker stopped");

        if let Exit::Terminated { reply, result } = exit {
            let _ = reply.send(result);
        }
    }
}
