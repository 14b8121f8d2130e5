//! Error types for Skiff controller client operations.
//!
//! This module provides [`ClientError`], the error type for every fallible
//! operation in the crate, and the status-code taxonomy the request executor
//! maps HTTP responses into.

use crate::types::ValidationError;

/// Error variants for controller client operations.
///
/// The request executor classifies HTTP responses into the first three
/// variants; the remaining variants cover transport, codec, and protocol
/// failures below the HTTP layer.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// The requested resource does not exist (HTTP status 404).
    ///
    /// The response body is discarded; 404 always maps here regardless of
    /// what the server put in the body.
    #[error("controller: not found")]
    NotFound,

    /// The server rejected the input (HTTP status 400) with a structured,
    /// machine-readable reason.
    #[error("controller: validation failed: {0}")]
    Validation(ValidationError),

    /// Any other non-200 status. Carries the request method, URL, and status
    /// code so the failure can be located without extra context.
    #[error("controller: unexpected status {status} from {method} {url}")]
    UnexpectedStatus {
        method: http::Method,
        url: String,
        status: u16,
    },

    /// The client could not be constructed from the given configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Service discovery failed: the registry was unreachable or had no
    /// live instances registered for the service.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Transport-level error (dial failed, connection reset, etc.).
    #[error("transport error: {0}")]
    Transport(String),

    /// Request payload encoding error.
    #[error("encode error: {0}")]
    Encode(String),

    /// Response payload decoding error.
    #[error("decode error: {0}")]
    Decode(String),

    /// Protocol error (malformed response head, unexpected data, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// True when the error is the 404 sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound)
    }

    /// The structured validation payload, if the server returned one.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            ClientError::Validation(v) => Some(v),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}
