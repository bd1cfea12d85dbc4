//! Error types for the search layer

use forge_pool::PoolError;
use forge_world::WorldError;

/// Errors raised while coordinating a search run.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The candidate generator failed to produce output.
    #[error("candidate generation failed: {0}")]
    Generation(String),

    /// The node store rejected an operation.
    #[error("node store failure: {0}")]
    Storage(String),

    /// A lineage walk hit a parent id the store does not know.
    #[error("unknown node {0} in lineage")]
    UnknownNode(String),

    /// Pool-level failure.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// World-level failure outside a contained per-candidate fault.
    #[error(transparent)]
    World(#[from] WorldError),

    /// Every group exhausted its worlds before the run finished.
    #[error("no groups left with healthy worlds")]
    NoHealthyGroups,
}
