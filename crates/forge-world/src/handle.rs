//! World handle
//!
//! One handle owns one simulated world: a framed transport, the script
//! catalog, and the lifecycle state machine. All world mutation funnels
//! through here so that reset, capture, and evaluation stay serialized per
//! world even when many worlds run concurrently.

use crate::catalog::ScriptCatalog;
use crate::error::WorldError;
use crate::snapshot::{
    entities_from_value, entities_to_value, inventory_from_value, inventory_to_value,
    research_from_value, research_to_value, EntityRecord, ResearchState, WorldSnapshot,
};
use crate::telemetry::ProductionStats;
use forge_protocol::{CommandBatch, CommandOutcome, Transport, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Lifecycle of one handle.
///
/// `Faulted` is entered on evaluation timeout or exhausted retries; the
/// transport may hold an unread reply at that point, so only
/// [`WorldHandle::recover`] (which reconnects) leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleState {
    Disconnected,
    Connected,
    Ready,
    Faulted,
}

impl std::fmt::Display for HandleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Retry policy for world round trips. Delays double per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Per-world configuration: the baseline every reset returns to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldConfig {
    #[serde(default)]
    pub starting_inventory: BTreeMap<String, u64>,
    #[serde(default)]
    pub starting_research: ResearchState,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl WorldConfig {
    /// The snapshot a bare `reset(None)` restores: starting inventory and
    /// research, no entities, clock at zero.
    #[must_use]
    pub fn baseline_snapshot(&self) -> WorldSnapshot {
        let mut snapshot = WorldSnapshot::empty();
        snapshot.inventory = self.starting_inventory.clone();
        snapshot.research = self.starting_research.clone();
        snapshot
    }
}

/// Result of evaluating one candidate program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalOutcome {
    /// Self-reported score from the program, zero if it reported none.
    pub score: f64,
    /// Goal marker the program claims to have reached, if any.
    pub goal: Option<String>,
    /// Captured program output.
    pub text: String,
    /// Semantic error raised by the program, if it failed. A semantic
    /// error is an outcome, not a transport fault: the world stays usable.
    pub error: Option<String>,
}

impl EvalOutcome {
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A live, exclusively-owned connection to one simulated world.
pub struct WorldHandle {
    id: String,
    transport: Box<dyn Transport>,
    catalog: ScriptCatalog,
    config: WorldConfig,
    state: HandleState,
}

impl std::fmt::Debug for WorldHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl WorldHandle {
    /// Wrap an authenticated transport. The handle starts `Connected` if
    /// the transport is open, `Disconnected` otherwise.
    #[must_use]
    pub fn new(id: impl Into<String>, transport: Box<dyn Transport>, config: WorldConfig) -> Self {
        let state = if transport.is_open() {
            HandleState::Connected
        } else {
            HandleState::Disconnected
        };
        Self {
            id: id.into(),
            transport,
            catalog: ScriptCatalog::standard(),
            config,
            state,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> HandleState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    fn require(&self, required: HandleState, operation: &'static str) -> Result<(), WorldError> {
        if self.state == required {
            return Ok(());
        }
        Err(WorldError::InvalidState {
            id: self.id.clone(),
            state: self.state.to_string(),
            operation,
            required: match required {
                HandleState::Disconnected => "disconnected",
                HandleState::Connected => "connected",
                HandleState::Ready => "ready",
                HandleState::Faulted => "faulted",
            },
        })
    }

    /// Open (or reopen) the transport.
    pub async fn connect(&mut self) -> Result<(), WorldError> {
        if !self.transport.is_open() {
            self.transport.reconnect().await?;
        }
        self.state = HandleState::Connected;
        Ok(())
    }

    /// Verify the script catalog and restore the configured baseline.
    /// The handle is `Ready` afterwards.
    pub async fn initialize(&mut self) -> Result<(), WorldError> {
        self.require(HandleState::Connected, "initialize")?;
        self.catalog.verify(self.transport.as_mut()).await?;
        self.state = HandleState::Ready;
        match self.reset(None).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = HandleState::Connected;
                Err(e)
            }
        }
    }

    /// Restore the world to `target`, or to the configured baseline when
    /// `target` is `None`. One batched round trip. Safe to call on a
    /// faulted handle: the transport is reopened first, since a stale
    /// reply may still be in flight on the old connection.
    pub async fn reset(&mut self, target: Option<&WorldSnapshot>) -> Result<(), WorldError> {
        if self.state == HandleState::Faulted {
            self.transport.reconnect().await?;
            self.state = HandleState::Ready;
        }
        self.require(HandleState::Ready, "reset")?;
        let baseline = self.config.baseline_snapshot();
        let target = target.unwrap_or(&baseline);

        let mut entries: Vec<(&'static str, String)> = vec![
            ("clear_inventory", self.catalog.render("inventory.clear", &[])?),
            ("clear_entities", self.catalog.render("entities.clear", &[])?),
            ("home", self.catalog.render("agent.home", &[])?),
            (
                "set_clock",
                self.catalog
                    .render("clock.set", &[Value::Int(target.elapsed_ticks as i64)])?,
            ),
            (
                "set_research",
                self.catalog
                    .render("research.set", &[research_to_value(&target.research)])?,
            ),
        ];
        if !target.inventory.is_empty() {
            entries.push((
                "set_inventory",
                self.catalog
                    .render("inventory.set", &[inventory_to_value(&target.inventory)])?,
            ));
        }
        if !target.entities.is_empty() {
            entries.push((
                "load_entities",
                self.catalog
                    .render("entities.load", &[entities_to_value(&target.entities)])?,
            ));
        }

        let outcomes = self.run_batch(&entries).await?;
        if let Some((id, outcome)) = outcomes.iter().find(|(_, o)| o.is_failure()) {
            self.state = HandleState::Faulted;
            return Err(WorldError::ResetFailed(format!(
                "step {id:?} failed: {}",
                outcome.failure_message().unwrap_or("no detail")
            )));
        }
        Ok(())
    }

    /// Capture the full observable world state.
    pub async fn snapshot(&mut self) -> Result<WorldSnapshot, WorldError> {
        self.require(HandleState::Ready, "snapshot")?;
        let entries = [
            ("inventory", self.catalog.render("inventory.get", &[])?),
            ("entities", self.catalog.render("entities.get", &[])?),
            ("research", self.catalog.render("research.get", &[])?),
            ("clock", self.catalog.render("clock.get", &[])?),
        ];
        let outcomes = self.run_batch(&entries).await?;

        let mut snapshot = WorldSnapshot::empty();
        snapshot.inventory = inventory_from_value(decoded(&outcomes, "inventory")?)
            .map_err(|reason| decode_err("inventory.get", reason))?;
        snapshot.entities = entities_from_value(decoded(&outcomes, "entities")?)
            .map_err(|reason| decode_err("entities.get", reason))?;
        snapshot.research = research_from_value(decoded(&outcomes, "research")?)
            .map_err(|reason| decode_err("research.get", reason))?;
        snapshot.elapsed_ticks = decoded(&outcomes, "clock")?
            .as_i64()
            .filter(|t| *t >= 0)
            .ok_or_else(|| decode_err("clock.get", "expected a non-negative tick count".into()))?
            as u64;
        Ok(snapshot)
    }

    /// Run a candidate program with a hard wall-clock deadline.
    ///
    /// On timeout the handle faults: the reply may still arrive later and
    /// would desynchronize the stream, so the transport must be reopened
    /// via [`recover`](Self::recover) before further use.
    pub async fn evaluate(
        &mut self,
        code: &str,
        deadline: Duration,
    ) -> Result<EvalOutcome, WorldError> {
        self.require(HandleState::Ready, "evaluate")?;
        let command = format!("run {code}");
        let reply = match tokio::time::timeout(deadline, self.transport.send(&command)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                if e.is_connection_loss() {
                    self.state = HandleState::Faulted;
                }
                return Err(e.into());
            }
            Err(_) => {
                tracing::warn!(world = %self.id, ?deadline, "evaluation deadline exceeded");
                self.state = HandleState::Faulted;
                return Err(WorldError::Timeout(deadline));
            }
        };
        Ok(parse_eval_reply(&reply))
    }

    /// Current item inventory.
    pub async fn inspect_inventory(&mut self) -> Result<BTreeMap<String, u64>, WorldError> {
        self.require(HandleState::Ready, "inspect_inventory")?;
        let entries = [("inventory", self.catalog.render("inventory.get", &[])?)];
        let outcomes = self.run_batch(&entries).await?;
        inventory_from_value(decoded(&outcomes, "inventory")?)
            .map_err(|reason| decode_err("inventory.get", reason))
    }

    /// Currently placed entities.
    pub async fn inspect_entities(&mut self) -> Result<Vec<EntityRecord>, WorldError> {
        self.require(HandleState::Ready, "inspect_entities")?;
        let entries = [("entities", self.catalog.render("entities.get", &[])?)];
        let outcomes = self.run_batch(&entries).await?;
        entities_from_value(decoded(&outcomes, "entities")?)
            .map_err(|reason| decode_err("entities.get", reason))
    }

    /// Cumulative production telemetry.
    pub async fn production_stats(&mut self) -> Result<ProductionStats, WorldError> {
        self.require(HandleState::Ready, "production_stats")?;
        let entries = [("stats", self.catalog.render("stats.get", &[])?)];
        let outcomes = self.run_batch(&entries).await?;
        ProductionStats::from_value(decoded(&outcomes, "stats")?)
            .map_err(|reason| decode_err("stats.get", reason))
    }

    /// Advance the world clock. Returns the new elapsed tick count.
    pub async fn advance_time(&mut self, ticks: u64) -> Result<u64, WorldError> {
        self.require(HandleState::Ready, "advance_time")?;
        let entries = [(
            "advance",
            self.catalog
                .render("clock.advance", &[Value::Int(ticks as i64)])?,
        )];
        let outcomes = self.run_batch(&entries).await?;
        decoded(&outcomes, "advance")?
            .as_i64()
            .filter(|t| *t >= 0)
            .map(|t| t as u64)
            .ok_or_else(|| decode_err("clock.advance", "expected a tick count".into()))
    }

    /// Cheap liveness probe: one clock read.
    pub async fn health_check(&mut self) -> bool {
        if self.state != HandleState::Ready {
            return false;
        }
        let Ok(command) = self.catalog.render("clock.get", &[]) else {
            return false;
        };
        matches!(self.transport.send(&command).await, Ok(reply) if !reply.is_empty())
    }

    /// Reopen the transport and restore the baseline after a fault.
    pub async fn recover(&mut self) -> Result<(), WorldError> {
        tracing::info!(world = %self.id, state = %self.state, "recovering world handle");
        self.transport.reconnect().await?;
        self.state = HandleState::Ready;
        match self.reset(None).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = HandleState::Faulted;
                Err(e)
            }
        }
    }

    /// Close the transport. The handle can be reconnected later.
    pub async fn close(&mut self) -> Result<(), WorldError> {
        self.transport.close().await?;
        self.state = HandleState::Disconnected;
        Ok(())
    }

    /// Execute one batch with reconnect-and-retry on connection loss.
    /// The batch is rebuilt from `entries` on every attempt because an
    /// executed batch cannot be replayed.
    async fn run_batch(
        &mut self,
        entries: &[(&'static str, String)],
    ) -> Result<IndexMap<String, CommandOutcome>, WorldError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut batch = CommandBatch::new();
            batch.begin();
            for (id, command) in entries {
                batch.add(*id, command.clone(), false)?;
            }
            match batch.execute(self.transport.as_mut()).await {
                Ok(outcomes) => return Ok(outcomes),
                Err(e) => {
                    let err = WorldError::from(e);
                    if !err.is_retryable() || attempt >= self.config.retry.max_attempts {
                        self.state = HandleState::Faulted;
                        return Err(err);
                    }
                    let delay = self.config.retry.base_delay * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        world = %self.id,
                        attempt,
                        ?delay,
                        error = %err,
                        "batch failed, reconnecting and retrying"
                    );
                    tokio::time::sleep(delay).await;
                    if let Err(reconnect_err) = self.transport.reconnect().await {
                        tracing::warn!(
                            world = %self.id,
                            error = %reconnect_err,
                            "reconnect attempt failed"
                        );
                    }
                }
            }
        }
    }
}

fn decoded<'a>(
    outcomes: &'a IndexMap<String, CommandOutcome>,
    id: &str,
) -> Result<&'a Value, WorldError> {
    let outcome = outcomes.get(id).ok_or_else(|| WorldError::Decode {
        command: id.to_string(),
        reason: "no reply in batch".to_string(),
    })?;
    outcome.decoded.value().ok_or_else(|| WorldError::Decode {
        command: id.to_string(),
        reason: outcome
            .failure_message()
            .unwrap_or("undecodable reply")
            .to_string(),
    })
}

fn decode_err(command: &str, reason: String) -> WorldError {
    WorldError::Decode {
        command: command.to_string(),
        reason,
    }
}

fn parse_eval_reply(raw: &str) -> EvalOutcome {
    if let Some(message) = raw.strip_prefix(forge_protocol::ERROR_PREFIX) {
        return EvalOutcome {
            score: 0.0,
            goal: None,
            text: String::new(),
            error: Some(message.trim().to_string()),
        };
    }
    match forge_protocol::decode(raw) {
        forge_protocol::Decoded::Value(value) => EvalOutcome {
            score: value.get("score").and_then(Value::as_f64).unwrap_or(0.0),
            goal: value
                .get("goal")
                .and_then(Value::as_str)
                .map(str::to_string),
            text: value
                .get("output")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            error: value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        // Plain text replies are kept verbatim with no score.
        forge_protocol::Decoded::Failure(_) => EvalOutcome {
            score: 0.0,
            goal: None,
            text: raw.to_string(),
            error: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_test_utils::SimTransport;
    use pretty_assertions::assert_eq;

    fn config_with(inventory: &[(&str, u64)]) -> WorldConfig {
        WorldConfig {
            starting_inventory: inventory.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            ..WorldConfig::default()
        }
    }

    async fn ready_handle(config: WorldConfig) -> WorldHandle {
        let mut handle = WorldHandle::new("w0", Box::new(SimTransport::new()), config);
        handle.connect().await.unwrap();
        handle.initialize().await.unwrap();
        handle
    }

    #[tokio::test]
    async fn initialize_restores_the_configured_baseline() {
        let mut handle = ready_handle(config_with(&[("coal", 10)])).await;
        let inventory = handle.inspect_inventory().await.unwrap();
        assert_eq!(inventory.get("coal"), Some(&10));
        assert_eq!(handle.state(), HandleState::Ready);
    }

    #[tokio::test]
    async fn operations_before_initialize_are_rejected() {
        let mut handle =
            WorldHandle::new("w0", Box::new(SimTransport::new()), WorldConfig::default());
        handle.connect().await.unwrap();
        let err = handle.snapshot().await.unwrap_err();
        assert!(matches!(err, WorldError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn snapshot_reset_round_trip_is_observably_identical() {
        let mut handle = ready_handle(config_with(&[("coal", 5)])).await;
        handle
            .evaluate("mine coal 7", Duration::from_secs(5))
            .await
            .unwrap();
        let captured = handle.snapshot().await.unwrap();
        assert_eq!(captured.inventory.get("coal"), Some(&12));

        // Wreck the world, then restore the capture.
        handle
            .evaluate("mine stone 99", Duration::from_secs(5))
            .await
            .unwrap();
        handle.reset(Some(&captured)).await.unwrap();
        let restored = handle.snapshot().await.unwrap();
        assert!(captured.observably_equal(&restored));
    }

    #[tokio::test]
    async fn evaluate_surfaces_score_goal_and_output() {
        let mut handle = ready_handle(WorldConfig::default()).await;
        let outcome = handle
            .evaluate("score 2.5\ngoal first-coal\nmine coal 3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.score, 2.5);
        assert_eq!(outcome.goal.as_deref(), Some("first-coal"));
        assert!(!outcome.is_error());
    }

    #[tokio::test]
    async fn semantic_errors_are_outcomes_not_faults() {
        let mut handle = ready_handle(WorldConfig::default()).await;
        let outcome = handle
            .evaluate("fail no ore nearby", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(outcome.is_error());
        assert_eq!(outcome.error.as_deref(), Some("no ore nearby"));
        // World stays usable.
        assert_eq!(handle.state(), HandleState::Ready);
        assert!(handle.health_check().await);
    }

    #[tokio::test(start_paused = true)]
    async fn evaluation_deadline_faults_the_handle() {
        let mut handle = ready_handle(WorldConfig::default()).await;
        let err = handle
            .evaluate("hang 60", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, WorldError::Timeout(_)));
        assert_eq!(handle.state(), HandleState::Faulted);

        // Recovery reopens the transport and restores the baseline.
        handle.recover().await.unwrap();
        assert_eq!(handle.state(), HandleState::Ready);
        assert!(handle.health_check().await);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_reopens_a_faulted_transport() {
        let mut handle = ready_handle(config_with(&[("coal", 5)])).await;
        let err = handle
            .evaluate("hang 60", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, WorldError::Timeout(_)));
        assert_eq!(handle.state(), HandleState::Faulted);

        // No separate recovery call needed; reset reconnects on its own.
        handle.reset(None).await.unwrap();
        assert_eq!(handle.state(), HandleState::Ready);
        let inventory = handle.inspect_inventory().await.unwrap();
        assert_eq!(inventory.get("coal"), Some(&5));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_connection_loss_is_retried() {
        let transport = SimTransport::new();
        let controls = transport.controls();
        let mut handle = WorldHandle::new("w0", Box::new(transport), WorldConfig::default());
        handle.connect().await.unwrap();
        handle.initialize().await.unwrap();

        controls.fail_next(1);
        let inventory = handle.inspect_inventory().await.unwrap();
        assert!(inventory.is_empty());
        assert_eq!(handle.state(), HandleState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fault_the_handle() {
        let transport = SimTransport::new();
        let controls = transport.controls();
        let mut handle = WorldHandle::new("w0", Box::new(transport), WorldConfig::default());
        handle.connect().await.unwrap();
        handle.initialize().await.unwrap();

        controls.fail_next(10);
        let err = handle.inspect_inventory().await.unwrap_err();
        assert!(err.is_retryable() || matches!(err, WorldError::Batch(_)));
        assert_eq!(handle.state(), HandleState::Faulted);
    }

    #[tokio::test]
    async fn advance_time_moves_the_clock() {
        let mut handle = ready_handle(WorldConfig::default()).await;
        let before = handle.snapshot().await.unwrap().elapsed_ticks;
        let after = handle.advance_time(120).await.unwrap();
        assert_eq!(after, before + 120);
    }

    #[test]
    fn eval_reply_parsing_handles_all_shapes() {
        let ok = parse_eval_reply(r#"{ score = 1.5, goal = "g", output = "done" }"#);
        assert_eq!(ok.score, 1.5);
        assert_eq!(ok.goal.as_deref(), Some("g"));
        assert_eq!(ok.text, "done");

        let err = parse_eval_reply("error: boom");
        assert_eq!(err.error.as_deref(), Some("boom"));

        let plain = parse_eval_reply("not a table at all !");
        assert_eq!(plain.text, "not a table at all !");
        assert!(!plain.is_error());
    }
}
