//! Messaging client error types.

use thiserror::Error;

/// Result type for messaging client calls.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors reported by a messaging client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The service rejected the call.
    #[error("{message} ({code})")]
    Service { code: String, message: String },

    /// The connection to the service (or the bridge process) failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The bridge sent something the client did not expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The call did not complete in time.
    #[error("call timed out after {0}s")]
    Timeout(u64),

    /// The client is not connected.
    #[error("client is not connected")]
    NotConnected,
}

impl ClientError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Service {
            code: code.into(),
            message: message.into(),
        }
    }
}
