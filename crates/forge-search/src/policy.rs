//! Selection policies
//!
//! A policy decides which live node each group expands next, and prunes
//! the shared frontier after new nodes arrive. Dead branches never enter
//! the frontier; an empty frontier means expand from the baseline.

use crate::node::SearchNode;
use std::sync::Arc;

/// Frontier selection and pruning.
pub trait SelectionPolicy: Send + Sync {
    /// Pick the node `group` should expand, or `None` to expand from the
    /// baseline.
    fn choose<'a>(
        &self,
        frontier: &'a [Arc<SearchNode>],
        group: usize,
    ) -> Option<&'a Arc<SearchNode>>;

    /// Cap the frontier after inserting newly evaluated nodes.
    fn prune(&self, frontier: &mut Vec<Arc<SearchNode>>);
}

fn best_of<'a, I>(nodes: I) -> Option<&'a Arc<SearchNode>>
where
    I: Iterator<Item = &'a Arc<SearchNode>>,
{
    nodes.max_by(|a, b| f64::total_cmp(&a.value, &b.value))
}

fn keep_top(frontier: &mut Vec<Arc<SearchNode>>, width: usize) {
    frontier.sort_by(|a, b| f64::total_cmp(&b.value, &a.value));
    frontier.truncate(width);
}

/// One shared beam: every group expands from the globally best nodes, so
/// strong lines of work get all the worlds.
#[derive(Debug, Clone)]
pub struct BeamUnification {
    pub beam_width: usize,
}

impl SelectionPolicy for BeamUnification {
    fn choose<'a>(
        &self,
        frontier: &'a [Arc<SearchNode>],
        _group: usize,
    ) -> Option<&'a Arc<SearchNode>> {
        best_of(frontier.iter())
    }

    fn prune(&self, frontier: &mut Vec<Arc<SearchNode>>) {
        keep_top(frontier, self.beam_width);
    }
}

/// Per-group beams: each group expands only its own lineage, trading
/// exploitation for diversity across groups.
#[derive(Debug, Clone)]
pub struct IndependentBeams {
    pub beam_width_per_group: usize,
}

impl SelectionPolicy for IndependentBeams {
    fn choose<'a>(
        &self,
        frontier: &'a [Arc<SearchNode>],
        group: usize,
    ) -> Option<&'a Arc<SearchNode>> {
        best_of(frontier.iter().filter(|n| n.group == group))
    }

    fn prune(&self, frontier: &mut Vec<Arc<SearchNode>>) {
        // Top-k per group rather than a global cut.
        frontier.sort_by(|a, b| {
            a.group
                .cmp(&b.group)
                .then(f64::total_cmp(&b.value, &a.value))
        });
        let mut kept: Vec<Arc<SearchNode>> = Vec::with_capacity(frontier.len());
        let mut current_group = usize::MAX;
        let mut in_group = 0;
        for node in frontier.drain(..) {
            if node.group != current_group {
                current_group = node.group;
                in_group = 0;
            }
            if in_group < self.beam_width_per_group {
                kept.push(node);
                in_group += 1;
            }
        }
        *frontier = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeId, NodeMeta};
    use forge_world::{TelemetryDelta, WorldSnapshot};

    fn node(group: usize, value: f64) -> Arc<SearchNode> {
        Arc::new(SearchNode {
            id: NodeId::new(),
            parent: None,
            group,
            code: "noop".into(),
            start_state: Arc::new(WorldSnapshot::empty()),
            end_state: Some(Arc::new(WorldSnapshot::empty())),
            delta: TelemetryDelta::default(),
            value,
            outcome_text: String::new(),
            failure: None,
            meta: NodeMeta::default(),
        })
    }

    #[test]
    fn unification_picks_the_global_best_for_every_group() {
        let frontier = vec![node(0, 1.0), node(1, 5.0), node(0, 3.0)];
        let policy = BeamUnification { beam_width: 2 };
        assert_eq!(policy.choose(&frontier, 0).unwrap().value, 5.0);
        assert_eq!(policy.choose(&frontier, 7).unwrap().value, 5.0);
    }

    #[test]
    fn unification_prunes_to_the_global_top_k() {
        let mut frontier = vec![node(0, 1.0), node(1, 5.0), node(0, 3.0), node(1, 2.0)];
        BeamUnification { beam_width: 2 }.prune(&mut frontier);
        let values: Vec<f64> = frontier.iter().map(|n| n.value).collect();
        assert_eq!(values, vec![5.0, 3.0]);
    }

    #[test]
    fn independent_beams_stay_within_their_group() {
        let frontier = vec![node(0, 1.0), node(1, 5.0)];
        let policy = IndependentBeams {
            beam_width_per_group: 1,
        };
        assert_eq!(policy.choose(&frontier, 0).unwrap().value, 1.0);
        assert_eq!(policy.choose(&frontier, 1).unwrap().value, 5.0);
        assert!(policy.choose(&frontier, 2).is_none());
    }

    #[test]
    fn independent_beams_prune_per_group() {
        let mut frontier = vec![
            node(0, 1.0),
            node(0, 4.0),
            node(0, 2.0),
            node(1, 9.0),
            node(1, 8.0),
        ];
        IndependentBeams {
            beam_width_per_group: 1,
        }
        .prune(&mut frontier);
        assert_eq!(frontier.len(), 2);
        assert!(frontier.iter().any(|n| n.group == 0 && n.value == 4.0));
        assert!(frontier.iter().any(|n| n.group == 1 && n.value == 9.0));
    }

    #[test]
    fn empty_frontier_selects_the_baseline() {
        let policy = BeamUnification { beam_width: 4 };
        assert!(policy.choose(&[], 0).is_none());
    }
}
