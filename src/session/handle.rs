//! Session handle: the caller side of a session's operation queue.
//!
//! `SessionHandle` wraps an unbounded `mpsc::UnboundedSender<SessionCommand>`.
//! Every submission carries its own `oneshot` slot, so concurrent callers each
//! get back exactly the outcome of the operation they submitted. The handle is
//! cheap to clone.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::types::{Operation, OperationResult, SessionCommand, SessionError};

/// Handle for submitting operations to a session worker.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
    id: String,
    identity: String,
    timeout: Option<Duration>,
}

/// An enqueued operation whose outcome has not been collected yet.
#[must_use = "the outcome is lost unless the pending operation is awaited"]
pub struct PendingOutcome {
    rx: oneshot::Receiver<OperationResult>,
    timeout: Option<Duration>,
}

impl SessionHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<SessionCommand>,
        id: String,
        identity: String,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            tx,
            id,
            identity,
            timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// True once the worker has stopped accepting operations.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Enqueue an operation without waiting for it.
    ///
    /// Operations are processed in the order `submit` is called. Fails with
    /// `SessionGone` if the worker has already exited.
    pub fn submit(&self, operation: Operation) -> Result<PendingOutcome, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand { operation, reply })
            .map_err(|_| SessionError::SessionGone)?;

        Ok(PendingOutcome {
            rx,
            timeout: self.timeout,
        })
    }

    /// Enqueue an operation and wait until the worker has recorded its outcome.
    pub async fn submit_and_wait(&self, operation: Operation) -> OperationResult {
        self.submit(operation)?.wait().await
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    pub async fn request_code(&self) -> OperationResult {
        self.submit_and_wait(Operation::RequestCode).await
    }

    pub async fn submit_code(&self, code: impl Into<String>) -> OperationResult {
        self.submit_and_wait(Operation::SubmitCode { code: code.into() })
            .await
    }

    pub async fn send_message(
        &self,
        to: impl Into<String>,
        text: impl Into<String>,
    ) -> OperationResult {
        self.submit_and_wait(Operation::SendMessage {
            to: to.into(),
            text: text.into(),
        })
        .await
    }

    pub async fn send_message_to_self(&self, text: impl Into<String>) -> OperationResult {
        self.submit_and_wait(Operation::SendMessageToSelf { text: text.into() })
            .await
    }

    pub async fn terminate(&self) -> OperationResult {
        self.submit_and_wait(Operation::Terminate).await
    }
}

impl PendingOutcome {
    /// Wait for the outcome.
    ///
    /// A worker that exits without answering yields `SessionGone`; a wait longer
    /// than the configured operation timeout yields `Timeout`. After a timeout
    /// the operation may still run, but its outcome is discarded.
    pub async fn wait(self) -> OperationResult {
        let received = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.rx)
                .await
                .map_err(|_| SessionError::Timeout(limit))?,
            None => self.rx.await,
        };

        received.map_err(|_| SessionError::SessionGone)?
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .finish()
    }
}
