//! Error types for the pool layer

use forge_world::WorldError;

/// Errors raised while assembling or driving a world pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Not enough endpoints to give every group its actives and holdout.
    /// Raised before any connection is attempted.
    #[error("insufficient worlds: {available} endpoint(s) for {required} required")]
    InsufficientWorlds { available: usize, required: usize },

    /// Config file could not be read.
    #[error("cannot read pool config: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Config file could not be parsed.
    #[error("cannot parse pool config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Config parsed but fails a structural constraint.
    #[error("invalid pool config: {0}")]
    ConfigInvalid(String),

    /// Failure on a specific world during setup.
    #[error("world failure: {0}")]
    World(#[from] WorldError),

    /// Every active world in a group is unhealthy; the group cannot make
    /// progress and the step must not silently no-op.
    #[error("group {group} has no healthy active worlds")]
    GroupExhausted { group: usize },
}
