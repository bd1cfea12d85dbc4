//! # Forge World
//!
//! Lifecycle management for one simulated world. A [`WorldHandle`] owns an
//! authenticated transport and exposes the operations program search needs:
//! reset to a baseline or to a captured snapshot, full-state capture,
//! telemetry reads, clock control, and bounded-time candidate evaluation.
//!
//! State capture is observational: a [`WorldSnapshot`] records what an
//! agent can see (inventory, entities, research, clock), and restore means
//! reproducing that view, not bit-identical server state.

pub mod catalog;
pub mod error;
pub mod handle;
pub mod snapshot;
pub mod telemetry;

pub use catalog::ScriptCatalog;
pub use error::WorldError;
pub use handle::{EvalOutcome, HandleState, RetryConfig, WorldConfig, WorldHandle};
pub use snapshot::{EntityRecord, ResearchState, SnapshotId, WorldSnapshot};
pub use telemetry::{ProductionStats, RewardWeights, TelemetryDelta};

/// Commonly used types, for glob import in downstream crates.
pub mod prelude {
    pub use crate::catalog::ScriptCatalog;
    pub use crate::error::WorldError;
    pub use crate::handle::{EvalOutcome, HandleState, WorldConfig, WorldHandle};
    pub use crate::snapshot::{SnapshotId, WorldSnapshot};
    pub use crate::telemetry::{ProductionStats, RewardWeights, TelemetryDelta};
}
