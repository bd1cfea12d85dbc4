//! # Forge Search
//!
//! Parallel program search over pooled simulated worlds. Candidates come
//! from a [`CandidateGenerator`], run holdout-corrected on a
//! [`WorldPool`](forge_pool::WorldPool) group, become [`SearchNode`]s in a
//! [`NodeStore`], and a [`SelectionPolicy`] decides which survivors are
//! worth expanding next. The [`SearchCoordinator`] wires these together,
//! one task per group.
//!
//! The search tree is built from observable world states: every node
//! records the snapshot it started from and, if it survived, the snapshot
//! it ended in, which its children start from.

pub mod coordinator;
pub mod error;
pub mod evaluator;
pub mod extract;
pub mod generator;
pub mod node;
pub mod policy;
pub mod store;

pub use coordinator::{GroupOutcome, SearchConfig, SearchCoordinator, SearchReport};
pub use error::SearchError;
pub use evaluator::nodes_from_report;
pub use extract::{extract_code, Extraction, ExtractionTier};
pub use generator::{Candidate, CandidateGenerator, GeneratorConfig, ParentContext};
pub use node::{NodeId, NodeMeta, NodeRecord, SearchNode};
pub use policy::{BeamUnification, IndependentBeams, SelectionPolicy};
pub use store::{MemoryStore, NodeStore};

/// Commonly used types, for glob import in downstream crates.
pub mod prelude {
    pub use crate::coordinator::{SearchConfig, SearchCoordinator, SearchReport};
    pub use crate::error::SearchError;
    pub use crate::extract::{extract_code, Extraction, ExtractionTier};
    pub use crate::generator::{Candidate, CandidateGenerator, ParentContext};
    pub use crate::node::{NodeId, NodeRecord, SearchNode};
    pub use crate::policy::{BeamUnification, IndependentBeams, SelectionPolicy};
    pub use crate::store::{MemoryStore, NodeStore};
}
