//! Error types for the simulator wire protocol
//!
//! Covers the three failure surfaces of this crate:
//! - Transport failures (connect, auth, peer loss, framing)
//! - Reply parse failures (surfaced as values, not errors - see `decode`)
//! - Batch lifecycle misuse

/// Transport-layer errors
///
/// No retry policy lives at this layer. Retries with backoff belong to the
/// world-handle boundary, which owns the reconnect decision.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Underlying socket failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The simulator rejected our credentials
    #[error("authentication rejected by simulator")]
    AuthFailed,

    /// Peer closed the connection mid-exchange
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Operation attempted on a closed transport
    #[error("transport is not connected")]
    NotConnected,

    /// A frame violated the length/id/type wire layout
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A reply arrived with an id we did not send in this exchange
    #[error("reply id mismatch: expected {expected}, got {got}")]
    ReplyIdMismatch { expected: i32, got: i32 },

    /// Command body exceeds the wire limit
    #[error("command body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    /// Whether a fresh connection could plausibly clear this error
    #[inline]
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionClosed | Self::NotConnected
        )
    }
}

/// Batch lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// `add` called after `execute` without an intervening `begin`
    #[error("cannot add command {0:?}: batch already executed, call begin() first")]
    AddAfterExecute(String),

    /// Command identifier already present in this batch
    #[error("duplicate command identifier in batch: {0:?}")]
    DuplicateId(String),

    /// `execute` called on an empty batch
    #[error("cannot execute an empty batch")]
    Empty,

    /// The whole round-trip failed at the transport
    #[error("batch transport failure: {0}")]
    Transport(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_loss_classification() {
        assert!(ProtocolError::ConnectionClosed.is_connection_loss());
        assert!(ProtocolError::NotConnected.is_connection_loss());
        assert!(!ProtocolError::AuthFailed.is_connection_loss());
        assert!(!ProtocolError::MalformedFrame("x".into()).is_connection_loss());
    }

    #[test]
    fn batch_error_display() {
        let err = BatchError::DuplicateId("clear_inventory".into());
        assert!(err.to_string().contains("clear_inventory"));
    }
}
