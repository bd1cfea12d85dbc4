//! Search coordinator
//!
//! Drives the whole search: every pool group runs as its own task, and
//! each iteration a group asks the policy for a parent, asks the generator
//! for candidates, evaluates the wave holdout-corrected, persists the
//! resulting nodes, and feeds the live ones back into the shared frontier.
//! Groups only meet at the frontier and the store, so a group losing its
//! worlds slows the search down instead of stopping it.

use crate::error::SearchError;
use crate::evaluator::nodes_from_report;
use crate::generator::{CandidateGenerator, ParentContext};
use crate::node::{NodeRecord, SearchNode};
use crate::policy::SelectionPolicy;
use crate::store::NodeStore;
use forge_pool::{PoolError, StepAssignment, WorldPool};
use forge_world::WorldSnapshot;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shape of one search run.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Expansion rounds each group performs.
    pub iterations_per_group: usize,
    /// Candidates requested per expansion; capped by the group's healthy
    /// active worlds each round.
    pub branching: usize,
}

/// How one group's loop ended.
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub group: usize,
    pub iterations: usize,
    pub nodes: usize,
    /// Present when the loop stopped early.
    pub error: Option<String>,
}

/// Result of one search run.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub nodes_created: usize,
    pub best: Option<NodeRecord>,
    pub groups: Vec<GroupOutcome>,
}

/// Generic driver over a generator, a store, and a selection policy.
pub struct SearchCoordinator<G, S, P> {
    generator: Arc<G>,
    store: Arc<S>,
    policy: Arc<P>,
    config: SearchConfig,
}

impl<G, S, P> SearchCoordinator<G, S, P>
where
    G: CandidateGenerator + 'static,
    S: NodeStore + 'static,
    P: SelectionPolicy + 'static,
{
    pub fn new(generator: G, store: S, policy: P, config: SearchConfig) -> Self {
        Self {
            generator: Arc::new(generator),
            store: Arc::new(store),
            policy: Arc::new(policy),
            config,
        }
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run the search to completion. `baseline` is the world state an
    /// expansion starts from when the frontier is empty.
    pub async fn run(
        &self,
        pool: Arc<WorldPool>,
        baseline: Arc<WorldSnapshot>,
    ) -> Result<SearchReport, SearchError> {
        let frontier: Arc<Mutex<Vec<Arc<SearchNode>>>> = Arc::new(Mutex::new(Vec::new()));
        let best: Arc<Mutex<Option<Arc<SearchNode>>>> = Arc::new(Mutex::new(None));

        let tasks = (0..pool.group_count()).map(|group| {
            let pool = Arc::clone(&pool);
            let generator = Arc::clone(&self.generator);
            let store = Arc::clone(&self.store);
            let policy = Arc::clone(&self.policy);
            let frontier = Arc::clone(&frontier);
            let best = Arc::clone(&best);
            let baseline = Arc::clone(&baseline);
            let config = self.config.clone();
            tokio::spawn(async move {
                run_group_loop(
                    group, pool, generator, store, policy, frontier, best, baseline, config,
                )
                .await
            })
        });

        let mut groups = Vec::new();
        for joined in join_all(tasks).await {
            match joined {
                Ok(outcome) => groups.push(outcome),
                Err(e) => {
                    return Err(SearchError::Generation(format!("group task panicked: {e}")))
                }
            }
        }

        if groups.iter().all(|g| g.iterations == 0 && g.error.is_some()) {
            return Err(SearchError::NoHealthyGroups);
        }

        let best = best.lock().await.as_deref().map(NodeRecord::from);
        Ok(SearchReport {
            nodes_created: self.store.len().await?,
            best,
            groups,
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_group_loop<G, S, P>(
    group_id: usize,
    pool: Arc<WorldPool>,
    generator: Arc<G>,
    store: Arc<S>,
    policy: Arc<P>,
    frontier: Arc<Mutex<Vec<Arc<SearchNode>>>>,
    best: Arc<Mutex<Option<Arc<SearchNode>>>>,
    baseline: Arc<WorldSnapshot>,
    config: SearchConfig,
) -> GroupOutcome
where
    G: CandidateGenerator,
    S: NodeStore,
    P: SelectionPolicy,
{
    let group = &pool.groups()[group_id];
    let mut outcome = GroupOutcome {
        group: group_id,
        iterations: 0,
        nodes: 0,
        error: None,
    };

    for _ in 0..config.iterations_per_group {
        let parent: Option<Arc<SearchNode>> = {
            let frontier = frontier.lock().await;
            policy.choose(&frontier, group_id).cloned()
        };

        let context = match build_context(&store, parent.as_deref()).await {
            Ok(context) => context,
            Err(e) => {
                outcome.error = Some(e.to_string());
                break;
            }
        };

        let width = config.branching.min(group.healthy_actives());
        if width == 0 {
            outcome.error = Some(format!("group {group_id} has no healthy worlds left"));
            break;
        }

        let mut candidates = match generator.generate(&context, width).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(group = group_id, error = %e, "generator failed");
                outcome.error = Some(e.to_string());
                break;
            }
        };
        candidates.truncate(width);
        if candidates.is_empty() {
            tracing::debug!(group = group_id, "generator proposed nothing this round");
            outcome.iterations += 1;
            continue;
        }

        // Live parents always carry an end state; the frontier never
        // holds dead branches.
        let start_state = parent
            .as_ref()
            .and_then(|p| p.end_state.clone())
            .unwrap_or_else(|| Arc::clone(&baseline));
        let assignments: Vec<StepAssignment> = candidates
            .iter()
            .map(|c| StepAssignment {
                code: c.code.clone(),
                start: parent.as_ref().and_then(|p| p.end_state.clone()),
            })
            .collect();

        let report = match group.run_step(&assignments).await {
            Ok(report) => report,
            Err(PoolError::GroupExhausted { .. }) => {
                outcome.error = Some(format!("group {group_id} exhausted its worlds"));
                break;
            }
            Err(e) => {
                outcome.error = Some(e.to_string());
                break;
            }
        };
        if !report.holdout_ok {
            tracing::warn!(group = group_id, "holdout failed, rewards uncorrected this round");
        }

        let nodes = nodes_from_report(
            &report,
            &candidates,
            parent.as_ref().map(|p| p.id),
            &start_state,
        );
        let mut persisted = Vec::with_capacity(nodes.len());
        let mut persist_err = None;
        for node in nodes {
            if let Err(e) = store.create(&node).await {
                persist_err = Some(e.to_string());
                break;
            }
            persisted.push(Arc::new(node));
        }
        if let Some(e) = persist_err {
            outcome.error = Some(e);
            break;
        }
        outcome.nodes += persisted.len();

        {
            let mut best = best.lock().await;
            for node in &persisted {
                let better = best.as_ref().map_or(true, |b| node.value > b.value);
                if better {
                    *best = Some(Arc::clone(node));
                }
            }
        }
        {
            let mut frontier = frontier.lock().await;
            frontier.extend(persisted.into_iter().filter(|n| !n.is_dead_end()));
            policy.prune(&mut frontier);
        }

        outcome.iterations += 1;
        tracing::info!(
            group = group_id,
            iteration = outcome.iterations,
            nodes = outcome.nodes,
            "search iteration complete"
        );
    }

    outcome
}

async fn build_context<S: NodeStore>(
    store: &Arc<S>,
    parent: Option<&SearchNode>,
) -> Result<ParentContext, SearchError> {
    let Some(parent) = parent else {
        return Ok(ParentContext::default());
    };
    Ok(ParentContext {
        code: Some(parent.code.clone()),
        outcome_text: Some(parent.outcome_text.clone()),
        failure: parent.failure.clone(),
        lineage_rewards: store.lineage_rewards(parent.id).await?,
        start_state: parent.end_state.clone(),
    })
}
