//! Candidate generation
//!
//! The coordinator is generic over where candidate programs come from; a
//! [`CandidateGenerator`] receives the parent's context (code, outcome,
//! lineage rewards, observable state) and proposes the next programs to
//! try. Implementations wrap a language model; tests use scripted
//! generators.

use crate::error::SearchError;
use crate::extract::{extract_code, Extraction};
use crate::node::NodeMeta;
use forge_world::WorldSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Sampling configuration passed through to the model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    2048
}

/// Everything a generator may condition on when expanding a node.
/// A root expansion has no parent code or outcome.
#[derive(Debug, Clone, Default)]
pub struct ParentContext {
    pub code: Option<String>,
    pub outcome_text: Option<String>,
    pub failure: Option<String>,
    /// Rewards along the lineage from the root to the parent, in order.
    /// Lets the generator see whether this line of work is improving.
    pub lineage_rewards: Vec<f64>,
    /// Observable state the next program will start from.
    pub start_state: Option<Arc<WorldSnapshot>>,
}

/// One proposed program, already reduced to runnable code.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub code: String,
    pub meta: NodeMeta,
}

impl Candidate {
    /// Build a candidate from raw model output, extracting runnable code.
    #[must_use]
    pub fn from_response(response: &str, meta: NodeMeta) -> Self {
        let Extraction { code, .. } = extract_code(response);
        Self { code, meta }
    }
}

/// Source of candidate programs.
#[async_trait::async_trait]
pub trait CandidateGenerator: Send + Sync {
    /// Propose up to `count` candidates for expanding the given parent.
    async fn generate(
        &self,
        context: &ParentContext,
        count: usize,
    ) -> Result<Vec<Candidate>, SearchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_extract_code_from_responses() {
        let candidate = Candidate::from_response(
            "Here is my plan:\n```\nmine coal 5\n```",
            NodeMeta::default(),
        );
        assert_eq!(candidate.code, "mine coal 5");
    }
}
