//! Grouped evaluation with holdout correction
//!
//! A [`WorldGroup`] owns a set of active worlds plus one holdout world.
//! Every evaluation step the holdout is reset to the same starting state
//! as the actives and left idle over the same simulated window; whatever
//! it produces is background drift, and is subtracted from every active's
//! delta before reward is computed. A candidate is credited only with what
//! it caused.

use crate::error::PoolError;
use dashmap::DashMap;
use forge_world::{
    EvalOutcome, HandleState, RewardWeights, TelemetryDelta, WorldError, WorldHandle,
    WorldSnapshot,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One candidate to run: the program and the snapshot to start from.
/// `None` starts from the configured baseline.
#[derive(Debug, Clone)]
pub struct StepAssignment {
    pub code: String,
    pub start: Option<Arc<WorldSnapshot>>,
}

impl StepAssignment {
    #[must_use]
    pub fn from_baseline(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            start: None,
        }
    }

    #[must_use]
    pub fn from_snapshot(code: impl Into<String>, start: Arc<WorldSnapshot>) -> Self {
        Self {
            code: code.into(),
            start: Some(start),
        }
    }
}

/// What one active world did with its assignment.
#[derive(Debug, Clone)]
pub enum ActiveOutcome {
    Completed {
        eval: EvalOutcome,
        /// Raw flow change on the active world over the window.
        active_delta: TelemetryDelta,
        /// Flow change net of the holdout's drift.
        net_delta: TelemetryDelta,
        /// Weighted reward over the net delta.
        reward: f64,
        /// World state after the evaluation window.
        end_snapshot: WorldSnapshot,
    },
    /// The world faulted. Other actives in the same step are unaffected.
    Failed { error: String, recovered: bool },
}

impl ActiveOutcome {
    #[inline]
    #[must_use]
    pub fn reward(&self) -> f64 {
        match self {
            Self::Completed { reward, .. } => *reward,
            Self::Failed { .. } => 0.0,
        }
    }
}

/// Per-active result of one step, in assignment order.
#[derive(Debug, Clone)]
pub struct ActiveReport {
    pub world_id: String,
    pub assignment: usize,
    pub outcome: ActiveOutcome,
}

/// Result of one group step.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub group: usize,
    /// Drift measured on the idle holdout over the window.
    pub holdout_delta: TelemetryDelta,
    /// False when the holdout itself failed; deltas are then uncorrected.
    pub holdout_ok: bool,
    pub reports: Vec<ActiveReport>,
}

impl StepReport {
    /// Reward of the best completed assignment, if any completed.
    #[must_use]
    pub fn best_reward(&self) -> Option<f64> {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, ActiveOutcome::Completed { .. }))
            .map(|r| r.outcome.reward())
            .max_by(f64::total_cmp)
    }
}

/// Intermediate result of one active task, before holdout correction.
enum ActiveRun {
    Done {
        eval: EvalOutcome,
        active_delta: TelemetryDelta,
        end_snapshot: WorldSnapshot,
    },
    Failed {
        error: String,
        recovered: bool,
    },
}

/// A set of active worlds sharing one holdout.
pub struct WorldGroup {
    id: usize,
    actives: Vec<Arc<Mutex<WorldHandle>>>,
    active_ids: Vec<String>,
    holdout: Arc<Mutex<WorldHandle>>,
    health: DashMap<String, bool>,
    window_ticks: u64,
    eval_timeout: Duration,
    weights: RewardWeights,
}

impl WorldGroup {
    pub(crate) fn new(
        id: usize,
        actives: Vec<WorldHandle>,
        holdout: WorldHandle,
        window_ticks: u64,
        eval_timeout: Duration,
        weights: RewardWeights,
    ) -> Self {
        let health = DashMap::new();
        let active_ids: Vec<String> = actives.iter().map(|h| h.id().to_string()).collect();
        for id in &active_ids {
            health.insert(id.clone(), true);
        }
        health.insert(holdout.id().to_string(), true);
        Self {
            id,
            actives: actives
                .into_iter()
                .map(|h| Arc::new(Mutex::new(h)))
                .collect(),
            active_ids,
            holdout: Arc::new(Mutex::new(holdout)),
            health,
            window_ticks,
            eval_timeout,
            weights,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.actives.len()
    }

    /// Actives currently marked healthy.
    #[must_use]
    pub fn healthy_actives(&self) -> usize {
        self.active_ids
            .iter()
            .filter(|id| self.health.get(*id).is_some_and(|h| *h))
            .count()
    }

    /// Probe every world in the group and refresh the health map. A world
    /// that is not `Ready` gets one recovery attempt first, so a handle
    /// lost to a transient outage rejoins once its endpoint answers again.
    pub async fn recheck_health(&self) {
        for handle in self.actives.iter().chain(std::iter::once(&self.holdout)) {
            let mut guard = handle.lock().await;
            if guard.state() != HandleState::Ready {
                if let Err(e) = guard.recover().await {
                    tracing::debug!(world = %guard.id(), error = %e, "recovery attempt failed");
                }
            }
            let healthy = guard.health_check().await;
            self.health.insert(guard.id().to_string(), healthy);
        }
    }

    /// Run one wave of assignments, at most one per healthy active world.
    ///
    /// The holdout is reset and pre-sampled before any active starts, so
    /// its window brackets every evaluation. Active failures are contained
    /// per world; a holdout failure yields uncorrected deltas and a
    /// warning rather than a lost step.
    pub async fn run_step(&self, assignments: &[StepAssignment]) -> Result<StepReport, PoolError> {
        let healthy: Vec<Arc<Mutex<WorldHandle>>> = self
            .actives
            .iter()
            .zip(&self.active_ids)
            .filter(|(_, id)| self.health.get(*id).is_some_and(|h| *h))
            .map(|(handle, _)| Arc::clone(handle))
            .collect();
        if healthy.is_empty() {
            return Err(PoolError::GroupExhausted { group: self.id });
        }
        if assignments.is_empty() {
            return Ok(StepReport {
                group: self.id,
                holdout_delta: TelemetryDelta::default(),
                holdout_ok: true,
                reports: Vec::new(),
            });
        }
        if assignments.len() > healthy.len() {
            return Err(PoolError::ConfigInvalid(format!(
                "{} assignments for {} healthy active world(s); chunk into waves",
                assignments.len(),
                healthy.len()
            )));
        }

        // Phase one: put the holdout at the same starting state and take
        // its pre-sample before any active runs.
        let shared_start = assignments[0].start.clone();
        let holdout_pre = {
            let mut holdout = self.holdout.lock().await;
            match prepare_world(&mut holdout, shared_start.as_deref()).await {
                Ok(pre) => Some(pre),
                Err(e) => {
                    tracing::warn!(group = self.id, error = %e, "holdout preparation failed");
                    self.health.insert(holdout.id().to_string(), false);
                    None
                }
            }
        };

        // Phase two: idle the holdout over the window while the actives
        // evaluate their candidates over the same window.
        let holdout_fut = async {
            let Some(pre) = holdout_pre else {
                return (TelemetryDelta::default(), false);
            };
            let mut holdout = self.holdout.lock().await;
            let run = async {
                holdout.advance_time(self.window_ticks).await?;
                let post = holdout.production_stats().await?;
                Ok::<_, WorldError>(post.delta_since(&pre))
            };
            match run.await {
                Ok(delta) => (delta, true),
                Err(e) => {
                    tracing::warn!(group = self.id, error = %e, "holdout window failed");
                    self.health.insert(holdout.id().to_string(), false);
                    (TelemetryDelta::default(), false)
                }
            }
        };

        let active_futs = assignments.iter().enumerate().map(|(i, assignment)| {
            let handle = Arc::clone(&healthy[i]);
            let assignment = assignment.clone();
            let window_ticks = self.window_ticks;
            let eval_timeout = self.eval_timeout;
            async move {
                let mut world = handle.lock().await;
                let world_id = world.id().to_string();
                let run = run_assignment(&mut world, &assignment, window_ticks, eval_timeout);
                let outcome = match run.await {
                    Ok(run) => run,
                    Err(e) => {
                        let recovered = if world.state() == HandleState::Faulted {
                            world.recover().await.is_ok()
                        } else {
                            false
                        };
                        tracing::warn!(
                            world = %world_id,
                            error = %e,
                            recovered,
                            "active world failed its assignment"
                        );
                        ActiveRun::Failed {
                            error: e.to_string(),
                            recovered,
                        }
                    }
                };
                (i, world_id, outcome)
            }
        });

        let (holdout_result, active_results) =
            tokio::join!(holdout_fut, join_all(active_futs));
        let (holdout_delta, holdout_ok) = holdout_result;

        let mut reports = Vec::with_capacity(active_results.len());
        for (assignment, world_id, run) in active_results {
            let outcome = match run {
                ActiveRun::Done {
                    eval,
                    active_delta,
                    end_snapshot,
                } => {
                    let net_delta = active_delta.net(&holdout_delta);
                    let reward = net_delta.reward(&self.weights);
                    ActiveOutcome::Completed {
                        eval,
                        active_delta,
                        net_delta,
                        reward,
                        end_snapshot,
                    }
                }
                ActiveRun::Failed { error, recovered } => {
                    if !recovered {
                        self.health.insert(world_id.clone(), false);
                    }
                    ActiveOutcome::Failed { error, recovered }
                }
            };
            reports.push(ActiveReport {
                world_id,
                assignment,
                outcome,
            });
        }

        Ok(StepReport {
            group: self.id,
            holdout_delta,
            holdout_ok,
            reports,
        })
    }

    /// Convenience wrapper: evaluate one candidate from the baseline.
    pub async fn evaluate_with_holdout(&self, code: &str) -> Result<ActiveReport, PoolError> {
        let mut report = self
            .run_step(&[StepAssignment::from_baseline(code)])
            .await?;
        report
            .reports
            .pop()
            .ok_or(PoolError::GroupExhausted { group: self.id })
    }
}

impl std::fmt::Debug for WorldGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldGroup")
            .field("id", &self.id)
            .field("actives", &self.actives.len())
            .field("window_ticks", &self.window_ticks)
            .finish_non_exhaustive()
    }
}

/// Reset a world to the given start and take its telemetry pre-sample.
async fn prepare_world(
    world: &mut WorldHandle,
    start: Option<&WorldSnapshot>,
) -> Result<forge_world::ProductionStats, WorldError> {
    world.reset(start).await?;
    world.production_stats().await
}

async fn run_assignment(
    world: &mut WorldHandle,
    assignment: &StepAssignment,
    window_ticks: u64,
    eval_timeout: Duration,
) -> Result<ActiveRun, WorldError> {
    let pre = prepare_world(world, assignment.start.as_deref()).await?;
    let eval = world.evaluate(&assignment.code, eval_timeout).await?;
    world.advance_time(window_ticks).await?;
    let post = world.production_stats().await?;
    let end_snapshot = world.snapshot().await?;
    Ok(ActiveRun::Done {
        eval,
        active_delta: post.delta_since(&pre),
        end_snapshot,
    })
}
