// Bridge Error Types

use thiserror::Error;

use crate::models::bridge::{ClientId, RequestId};

/// Errors raised by the registry, correlator and dispatcher
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Shared secret did not match
    #[error("Invalid auth token")]
    AuthenticationFailed,

    /// Frame received before a successful `register`
    #[error("Not authenticated: send a register frame first")]
    NotAuthenticated,

    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    Timeout { request_id: RequestId, timeout_ms: u64 },

    /// The connection owning a pending call went away
    #[error("Connection lost: {client_id}")]
    ConnectionLost { client_id: ClientId },

    #[error("Client not found: {0}")]
    ClientNotFound(ClientId),

    /// No authenticated connection can receive the call
    #[error("No connected UI client")]
    NoTarget,

    #[error("Failed to send to {0}: connection closed")]
    SendFailed(ClientId),

    /// The UI answered with an error
    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
