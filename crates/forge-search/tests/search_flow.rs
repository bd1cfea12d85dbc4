//! End-to-end search runs over in-memory simulators: tree growth from
//! snapshots, dead-branch handling, and policy-driven expansion.

use forge_pool::{PoolConfig, WorldPool};
use forge_search::{
    BeamUnification, Candidate, CandidateGenerator, IndependentBeams, MemoryStore, NodeMeta,
    ParentContext, SearchConfig, SearchCoordinator, SearchError,
};
use forge_test_utils::{init_test_logging, SimTransport};
use forge_world::{RewardWeights, WorldConfig, WorldHandle};
use std::sync::Arc;

fn pool_config(group_count: usize) -> PoolConfig {
    PoolConfig {
        endpoints: Vec::new(),
        group_count,
        holdout_window_ticks: 50,
        eval_timeout_secs: 5,
        world: WorldConfig::default(),
        reward_weights: RewardWeights::default(),
    }
}

async fn drifting_pool(worlds: usize, group_count: usize) -> Arc<WorldPool> {
    let mut handles = Vec::new();
    for i in 0..worlds {
        let transport = SimTransport::with_drift("coal", 0.1);
        let mut handle =
            WorldHandle::new(format!("world-{i}"), Box::new(transport), WorldConfig::default());
        handle.connect().await.expect("connect");
        handle.initialize().await.expect("initialize");
        handles.push(handle);
    }
    Arc::new(WorldPool::assemble(&pool_config(group_count), handles).expect("assemble"))
}

fn baseline() -> Arc<forge_world::WorldSnapshot> {
    Arc::new(WorldConfig::default().baseline_snapshot())
}

/// Root expansions propose a good miner and some prose; deeper expansions
/// propose a smaller follow-up.
struct ScriptedGenerator;

#[async_trait::async_trait]
impl CandidateGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        context: &ParentContext,
        count: usize,
    ) -> Result<Vec<Candidate>, SearchError> {
        let responses: Vec<&str> = if context.code.is_none() {
            vec![
                "Plan: dig.\n```\nmine coal 10\n```",
                "I would just think about mining for a while.",
            ]
        } else {
            vec!["mine coal 3"]
        };
        Ok(responses
            .into_iter()
            .take(count)
            .map(|r| Candidate::from_response(r, NodeMeta::default()))
            .collect())
    }
}

#[tokio::test]
async fn search_builds_a_tree_of_holdout_corrected_nodes() {
    init_test_logging();
    // One group: two actives plus a holdout, all drifting identically.
    let pool = drifting_pool(3, 1).await;
    let coordinator = SearchCoordinator::new(
        ScriptedGenerator,
        MemoryStore::new(),
        BeamUnification { beam_width: 4 },
        SearchConfig {
            iterations_per_group: 2,
            branching: 2,
        },
    );

    let report = coordinator.run(pool, baseline()).await.unwrap();

    // Round one evaluated two candidates, round two expanded the winner.
    assert_eq!(report.nodes_created, 3);
    let best = report.best.expect("a best node");
    assert_eq!(best.value, 10.0);
    assert!(best.parent.is_none());

    let records = coordinator.store().records();
    let child = records
        .iter()
        .find(|r| r.parent.is_some())
        .expect("an expanded child");
    // The child started from its parent's end state, not the baseline.
    assert_eq!(child.parent, Some(best.id));
    assert_eq!(child.start_state.inventory.get("coal"), Some(&10));
    let end = child.end_state.as_ref().expect("live child");
    assert_eq!(end.inventory.get("coal"), Some(&13));
    // Its own reward is net of drift: three coal, not three plus drift.
    assert_eq!(child.value, 3.0);

    // Lineage rewards read root to leaf.
    use forge_search::NodeStore;
    assert_eq!(
        coordinator.store().lineage_rewards(child.id).await.unwrap(),
        vec![10.0, 3.0]
    );
}

#[tokio::test]
async fn prose_candidates_survive_as_harmless_noops() {
    init_test_logging();
    let pool = drifting_pool(3, 1).await;
    let coordinator = SearchCoordinator::new(
        ScriptedGenerator,
        MemoryStore::new(),
        BeamUnification { beam_width: 4 },
        SearchConfig {
            iterations_per_group: 1,
            branching: 2,
        },
    );
    coordinator.run(pool, baseline()).await.unwrap();

    let records = coordinator.store().records();
    let noop = records
        .iter()
        .find(|r| r.code.starts_with("--"))
        .expect("commented prose candidate");
    assert_eq!(noop.value, 0.0);
    assert!(noop.failure.is_none());
}

struct FailingProgramGenerator;

#[async_trait::async_trait]
impl CandidateGenerator for FailingProgramGenerator {
    async fn generate(
        &self,
        _context: &ParentContext,
        count: usize,
    ) -> Result<Vec<Candidate>, SearchError> {
        Ok((0..count)
            .map(|_| Candidate::from_response("fail no ore nearby", NodeMeta::default()))
            .collect())
    }
}

#[tokio::test]
async fn semantic_errors_become_dead_branches_and_search_continues() {
    init_test_logging();
    let pool = drifting_pool(2, 1).await;
    let coordinator = SearchCoordinator::new(
        FailingProgramGenerator,
        MemoryStore::new(),
        BeamUnification { beam_width: 4 },
        SearchConfig {
            iterations_per_group: 3,
            branching: 1,
        },
    );
    let report = coordinator.run(pool, baseline()).await.unwrap();

    // Every candidate died, but every iteration still ran from baseline.
    assert_eq!(report.groups[0].iterations, 3);
    assert_eq!(report.nodes_created, 3);
    for record in coordinator.store().records() {
        assert!(record.end_state.is_none());
        assert_eq!(record.value, 0.0);
        assert_eq!(record.failure.as_deref(), Some("no ore nearby"));
        // Dead branches never become parents.
        assert!(record.parent.is_none());
    }
}

struct BrokenGenerator;

#[async_trait::async_trait]
impl CandidateGenerator for BrokenGenerator {
    async fn generate(
        &self,
        _context: &ParentContext,
        _count: usize,
    ) -> Result<Vec<Candidate>, SearchError> {
        Err(SearchError::Generation("model backend offline".into()))
    }
}

#[tokio::test]
async fn a_run_with_no_working_groups_fails_loudly() {
    init_test_logging();
    let pool = drifting_pool(2, 1).await;
    let coordinator = SearchCoordinator::new(
        BrokenGenerator,
        MemoryStore::new(),
        BeamUnification { beam_width: 4 },
        SearchConfig {
            iterations_per_group: 2,
            branching: 1,
        },
    );
    let err = coordinator.run(pool, baseline()).await.unwrap_err();
    assert!(matches!(err, SearchError::NoHealthyGroups));
}

#[tokio::test]
async fn independent_beams_keep_groups_on_their_own_lineages() {
    init_test_logging();
    // Two groups of one active plus holdout each.
    let pool = drifting_pool(4, 2).await;
    let coordinator = SearchCoordinator::new(
        ScriptedGenerator,
        MemoryStore::new(),
        IndependentBeams {
            beam_width_per_group: 2,
        },
        SearchConfig {
            iterations_per_group: 2,
            branching: 1,
        },
    );
    let report = coordinator.run(pool, baseline()).await.unwrap();

    assert_eq!(report.groups.len(), 2);
    let records = coordinator.store().records();
    for group in 0..2 {
        let group_records: Vec<_> = records.iter().filter(|r| r.group == group).collect();
        assert_eq!(group_records.len(), 2, "group {group} grew its own line");
        // The second-round node descends from the group's own first node.
        let child = group_records.iter().find(|r| r.parent.is_some()).unwrap();
        let parent = group_records.iter().find(|r| r.parent.is_none()).unwrap();
        assert_eq!(child.parent, Some(parent.id));
    }
}
