//! Session operation protocol, outcomes, and errors.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::client::ClientError;

/// Prefix for generated session identifiers.
pub const CLIENT_ID_PREFIX: &str = "client_";

// ============================================================================
// Operations
// ============================================================================

/// Work a caller can submit to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Ask the service to send a confirmation code to the session's phone.
    RequestCode,
    /// Sign in with the confirmation code.
    SubmitCode { code: String },
    /// Send a text message to another phone number.
    SendMessage { to: String, text: String },
    /// Send a text message to the session's own account.
    SendMessageToSelf { text: String },
    /// Log out, release the client, and end the session.
    Terminate,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::RequestCode => "request_code",
            Operation::SubmitCode { .. } => "submit_code",
            Operation::SendMessage { .. } => "send_message",
            Operation::SendMessageToSelf { .. } => "send_message_to_self",
            Operation::Terminate => "terminate",
        }
    }
}

/// Successful result of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A confirmation code was sent.
    CodeSent,
    /// The account was already authorized; no code was needed.
    AlreadyAuthorized,
    /// The confirmation code was accepted.
    SignedIn,
    MessageSent,
    Terminated,
}

/// What the submitter of an operation receives back.
pub type OperationResult = Result<Outcome, SessionError>;

/// An operation on its way to a worker, with the slot for its outcome.
pub(crate) struct SessionCommand {
    pub operation: Operation,
    pub reply: oneshot::Sender<OperationResult>,
}

// ============================================================================
// Auth Phase
// ============================================================================

/// Authentication phase of a session. Only the owning worker reads or writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Unauthenticated,
    CodeRequested,
    Authenticated,
    Terminated,
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthPhase::Unauthenticated => "unauthenticated",
            AuthPhase::CodeRequested => "code_requested",
            AuthPhase::Authenticated => "authenticated",
            AuthPhase::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Why an operation did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No session with this identifier is registered.
    #[error("client not registered: {0}")]
    UnknownSession(String),

    /// The session worker has exited.
    #[error("session has shut down")]
    SessionGone,

    /// The operation requires a signed-in session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The operation arrived after the session was terminated.
    #[error("session has been terminated")]
    SessionTerminated,

    /// The messaging service reported a failure.
    #[error(transparent)]
    External(#[from] ClientError),

    /// The recipient could not be resolved, even after adding it as a contact.
    #[error("recipient {0} could not be resolved (contact not imported)")]
    UnknownRecipient(String),

    /// No outcome arrived within the operation timeout.
    #[error("timed out after {0:?} waiting for the session")]
    Timeout(Duration),
}

// ============================================================================
// Metadata
// ============================================================================

/// Public, read-only facts about a session.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub id: String,
    pub identity: String,
    pub created_at: DateTime<Utc>,
}
