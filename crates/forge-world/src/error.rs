//! Error types for the world-handle layer

use forge_protocol::{BatchError, ProtocolError};

/// Errors raised while driving one simulated world.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// Transport-level failure bubbled up from the wire.
    #[error("protocol failure: {0}")]
    Protocol(#[from] ProtocolError),

    /// Batch lifecycle misuse or whole-batch transport loss.
    #[error("batch failure: {0}")]
    Batch(#[from] BatchError),

    /// A reply could not be interpreted as the shape the command promises.
    #[error("cannot decode reply to {command:?}: {reason}")]
    Decode { command: String, reason: String },

    /// A candidate program exceeded its evaluation deadline.
    #[error("evaluation exceeded its {0:?} deadline")]
    Timeout(std::time::Duration),

    /// The simulator does not advertise scripts this client requires.
    #[error("script catalog mismatch, missing: {missing:?}")]
    CatalogMismatch { missing: Vec<String> },

    /// A script name not present in the loaded catalog.
    #[error("unknown catalog script {0:?}")]
    UnknownScript(String),

    /// A script rendered with the wrong number of arguments.
    #[error("script {name:?} takes {expected} argument(s), got {got}")]
    ScriptArity {
        name: String,
        expected: usize,
        got: usize,
    },

    /// A reset round trip failed, leaving world state unknown.
    #[error("world reset failed: {0}")]
    ResetFailed(String),

    /// Operation is not legal in the handle's current lifecycle state.
    #[error("handle {id} is {state} but {operation} requires {required}")]
    InvalidState {
        id: String,
        state: String,
        operation: &'static str,
        required: &'static str,
    },
}

impl WorldError {
    /// Whether reconnecting and retrying could plausibly succeed.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Protocol(e) => e.is_connection_loss(),
            Self::Batch(BatchError::Transport(e)) => e.is_connection_loss(),
            Self::Batch(_) => false,
            Self::Decode { .. } => false,
            Self::Timeout(_) => false,
            Self::CatalogMismatch { .. } => false,
            Self::UnknownScript(_) | Self::ScriptArity { .. } => false,
            Self::ResetFailed(_) => true,
            Self::InvalidState { .. } => false,
        }
    }
}
