//! # Forge Protocol
//!
//! Wire protocol for talking to a live simulated world: a framed TCP
//! transport with password authentication, a decoder for the simulator's
//! table-literal reply syntax, and a transaction batcher that turns
//! multi-command setup into a single round trip.
//!
//! Layering, bottom up:
//! - [`transport`]: framed request/reply exchange over TCP, plus the
//!   [`Transport`] trait that lets tests substitute an in-memory peer.
//! - [`decode`]: reply text to [`Value`] trees, with integer-keyed tables
//!   collapsed to sequences. Parse failures are values, never panics.
//! - [`batch`]: ordered, single-use command batches with per-command
//!   outcomes.
//!
//! Higher layers (world handles, pools) build on these without knowing
//! about sockets or frame layout.

pub mod batch;
pub mod decode;
pub mod error;
pub mod transport;

pub use batch::{CommandBatch, CommandOutcome, ERROR_PREFIX, RAW_PREFIX};
pub use decode::{decode, Decoded, Key, Value};
pub use error::{BatchError, ProtocolError};
pub use transport::{BatchCommand, RawReply, RconTransport, Transport};

/// Commonly used types, for glob import in downstream crates.
pub mod prelude {
    pub use crate::batch::{CommandBatch, CommandOutcome};
    pub use crate::decode::{decode, Decoded, Key, Value};
    pub use crate::error::{BatchError, ProtocolError};
    pub use crate::transport::{BatchCommand, RawReply, RconTransport, Transport};
}
