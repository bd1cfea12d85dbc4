//! # Forge Pool
//!
//! Groups of simulated worlds for parallel candidate evaluation. Each
//! group holds several active worlds and one holdout; rewards are computed
//! net of the drift the holdout measures over the same window, so ambient
//! world activity is never credited to a candidate.
//!
//! The pool is configuration-driven: endpoints, group shape, window
//! length, and the evaluation deadline all come from one TOML file, and
//! structural validation runs before any endpoint is contacted.

pub mod config;
pub mod error;
pub mod holdout;
pub mod pool;

pub use config::{Endpoint, PoolConfig};
pub use error::PoolError;
pub use holdout::{
    ActiveOutcome, ActiveReport, StepAssignment, StepReport, WorldGroup,
};
pub use pool::{PoolStats, WorldPool};

/// Commonly used types, for glob import in downstream crates.
pub mod prelude {
    pub use crate::config::PoolConfig;
    pub use crate::error::PoolError;
    pub use crate::holdout::{ActiveOutcome, ActiveReport, StepAssignment, StepReport, WorldGroup};
    pub use crate::pool::{PoolStats, WorldPool};
}
