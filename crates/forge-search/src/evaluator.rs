//! Mapping evaluation reports to search nodes
//!
//! One step report covers a wave of candidates on one group. Each report
//! entry becomes a node: completions carry their end snapshot and
//! holdout-corrected reward; semantic errors and faulted worlds become
//! zero-reward dead branches that record what went wrong.

use crate::generator::Candidate;
use crate::node::{NodeId, SearchNode};
use forge_pool::{ActiveOutcome, StepReport};
use forge_world::WorldSnapshot;
use std::sync::Arc;

/// Build nodes for one evaluated wave.
///
/// `candidates` must be the wave that produced `report`; entries are
/// matched by assignment index. `start_state` is the snapshot the wave
/// started from and becomes each node's start.
#[must_use]
pub fn nodes_from_report(
    report: &StepReport,
    candidates: &[Candidate],
    parent: Option<NodeId>,
    start_state: &Arc<WorldSnapshot>,
) -> Vec<SearchNode> {
    let mut nodes = Vec::with_capacity(report.reports.len());
    for active in &report.reports {
        let Some(candidate) = candidates.get(active.assignment) else {
            tracing::warn!(
                assignment = active.assignment,
                "report entry without a matching candidate, skipping"
            );
            continue;
        };
        let base = SearchNode {
            id: NodeId::new(),
            parent,
            group: report.group,
            code: candidate.code.clone(),
            start_state: Arc::clone(start_state),
            end_state: None,
            delta: Default::default(),
            value: 0.0,
            outcome_text: String::new(),
            failure: None,
            meta: candidate.meta.clone(),
        };
        let node = match &active.outcome {
            ActiveOutcome::Completed {
                eval,
                net_delta,
                reward,
                end_snapshot,
                ..
            } => {
                if let Some(error) = &eval.error {
                    // A semantic error leaves no usable end state: the
                    // program died somewhere inside its own window.
                    SearchNode {
                        outcome_text: eval.text.clone(),
                        failure: Some(error.clone()),
                        ..base
                    }
                } else {
                    SearchNode {
                        end_state: Some(Arc::new(end_snapshot.clone())),
                        delta: net_delta.clone(),
                        value: *reward,
                        outcome_text: eval.text.clone(),
                        ..base
                    }
                }
            }
            ActiveOutcome::Failed { error, .. } => SearchNode {
                failure: Some(error.clone()),
                ..base
            },
        };
        nodes.push(node);
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeMeta;
    use forge_pool::ActiveReport;
    use forge_world::{EvalOutcome, TelemetryDelta};

    fn candidate(code: &str) -> Candidate {
        Candidate {
            code: code.into(),
            meta: NodeMeta::default(),
        }
    }

    fn completed(reward: f64, error: Option<&str>) -> ActiveOutcome {
        ActiveOutcome::Completed {
            eval: EvalOutcome {
                score: 0.0,
                goal: None,
                text: "out".into(),
                error: error.map(str::to_string),
            },
            active_delta: TelemetryDelta::default(),
            net_delta: TelemetryDelta::default(),
            reward,
            end_snapshot: WorldSnapshot::empty(),
        }
    }

    fn report(outcomes: Vec<ActiveOutcome>) -> StepReport {
        StepReport {
            group: 2,
            holdout_delta: TelemetryDelta::default(),
            holdout_ok: true,
            reports: outcomes
                .into_iter()
                .enumerate()
                .map(|(i, outcome)| ActiveReport {
                    world_id: format!("world-{i}"),
                    assignment: i,
                    outcome,
                })
                .collect(),
        }
    }

    #[test]
    fn completions_become_live_nodes() {
        let start = Arc::new(WorldSnapshot::empty());
        let nodes = nodes_from_report(
            &report(vec![completed(7.5, None)]),
            &[candidate("mine coal 7")],
            None,
            &start,
        );
        assert_eq!(nodes.len(), 1);
        assert!(!nodes[0].is_dead_end());
        assert_eq!(nodes[0].value, 7.5);
        assert_eq!(nodes[0].group, 2);
    }

    #[test]
    fn semantic_errors_become_zero_reward_dead_branches() {
        let start = Arc::new(WorldSnapshot::empty());
        let nodes = nodes_from_report(
            &report(vec![completed(7.5, Some("no ore nearby"))]),
            &[candidate("mine unobtainium 1")],
            None,
            &start,
        );
        assert!(nodes[0].is_dead_end());
        assert_eq!(nodes[0].value, 0.0);
        assert_eq!(nodes[0].failure.as_deref(), Some("no ore nearby"));
    }

    #[test]
    fn faulted_worlds_become_dead_branches_with_the_fault_recorded() {
        let start = Arc::new(WorldSnapshot::empty());
        let nodes = nodes_from_report(
            &report(vec![ActiveOutcome::Failed {
                error: "connection closed by peer".into(),
                recovered: true,
            }]),
            &[candidate("noop")],
            Some(NodeId::new()),
            &start,
        );
        assert!(nodes[0].is_dead_end());
        assert!(nodes[0].parent.is_some());
        assert_eq!(
            nodes[0].failure.as_deref(),
            Some("connection closed by peer")
        );
    }
}
