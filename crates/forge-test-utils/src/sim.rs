//! In-memory simulator
//!
//! [`SimTransport`] implements the wire [`Transport`] against a scripted
//! world held in process: an inventory, placed entities, research, a tick
//! clock, and cumulative production counters. It answers the same script
//! surface a real simulator advertises and runs candidate programs written
//! in a tiny line language, so world/pool/search tests are deterministic
//! and need no server.
//!
//! Candidate program statements, one per line (`--` starts a comment):
//!
//! ```text
//! noop
//! mine <item> <count>
//! craft <item> <count> from <item> <count>
//! score <number>
//! goal <name>
//! print <text>
//! fail <message>
//! hang <seconds>
//! ```

use forge_protocol::{BatchCommand, Key, ProtocolError, RawReply, Transport, Value, RAW_PREFIX};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

const ADVERTISED_SCRIPTS: &[&str] = &[
    "inventory.get",
    "inventory.set",
    "inventory.clear",
    "entities.get",
    "entities.load",
    "entities.clear",
    "research.get",
    "research.set",
    "clock.get",
    "clock.set",
    "clock.advance",
    "stats.get",
    "agent.home",
];

#[derive(Debug, Default)]
struct SimWorld {
    inventory: BTreeMap<String, u64>,
    entities: Vec<Value>,
    research: Value,
    ticks: u64,
    produced: BTreeMap<String, f64>,
    consumed: BTreeMap<String, f64>,
}

impl SimWorld {
    fn new() -> Self {
        Self {
            research: Value::Table(Vec::new()),
            ..Self::default()
        }
    }
}

/// Shared control surface for fault injection, usable after the transport
/// has been moved into a handle.
#[derive(Debug, Clone, Default)]
pub struct SimControls {
    fail_remaining: Arc<AtomicU32>,
}

impl SimControls {
    /// Make the next `n` round trips fail with a connection loss.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// An in-memory simulator speaking the full script surface.
pub struct SimTransport {
    world: SimWorld,
    open: bool,
    controls: SimControls,
    /// Background production applied per tick of `clock.advance`.
    drift: Vec<(String, f64)>,
}

impl SimTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            world: SimWorld::new(),
            open: true,
            controls: SimControls::default(),
            drift: Vec::new(),
        }
    }

    /// A simulator whose world produces `per_tick` of `item` for every
    /// tick the clock advances, with no program running. Models ambient
    /// machinery that a holdout must cancel out.
    #[must_use]
    pub fn with_drift(item: impl Into<String>, per_tick: f64) -> Self {
        let mut sim = Self::new();
        sim.drift.push((item.into(), per_tick));
        sim
    }

    #[must_use]
    pub fn controls(&self) -> SimControls {
        self.controls.clone()
    }

    async fn handle_command(&mut self, command: &str) -> String {
        let command = command.strip_prefix(RAW_PREFIX).unwrap_or(command).trim();
        tracing::trace!(command, "sim request");
        if let Some(code) = command.strip_prefix("run ") {
            return self.run_program(code).await;
        }
        if command == "run" {
            return self.run_program("").await;
        }

        let Some((name, args)) = split_invocation(command) else {
            return format!("error: unparseable command {command:?}");
        };
        match name {
            "catalog.list" => Value::Seq(
                ADVERTISED_SCRIPTS
                    .iter()
                    .map(|s| Value::Str((*s).to_string()))
                    .collect(),
            )
            .to_wire(),
            "catalog.reload" => "true".to_string(),
            "inventory.get" => counts_to_value(&self.world.inventory).to_wire(),
            "inventory.set" => match parse_counts(args) {
                Ok(counts) => {
                    self.world.inventory = counts;
                    "true".to_string()
                }
                Err(e) => format!("error: {e}"),
            },
            "inventory.clear" => {
                self.world.inventory.clear();
                "true".to_string()
            }
            "entities.get" => Value::Seq(self.world.entities.clone()).to_wire(),
            "entities.load" => match decode_argument(args) {
                Ok(Value::Seq(items)) => {
                    self.world.entities = items;
                    "true".to_string()
                }
                Ok(Value::Table(entries)) if entries.is_empty() => {
                    self.world.entities.clear();
                    "true".to_string()
                }
                Ok(other) => format!("error: entities.load expects a list, got {other:?}"),
                Err(e) => format!("error: {e}"),
            },
            "entities.clear" => {
                self.world.entities.clear();
                "true".to_string()
            }
            "research.get" => self.world.research.to_wire(),
            "research.set" => match decode_argument(args) {
                Ok(value) => {
                    self.world.research = value;
                    "true".to_string()
                }
                Err(e) => format!("error: {e}"),
            },
            "clock.get" => self.world.ticks.to_string(),
            "clock.set" => match parse_ticks(args) {
                Ok(ticks) => {
                    self.world.ticks = ticks;
                    self.world.ticks.to_string()
                }
                Err(e) => format!("error: {e}"),
            },
            "clock.advance" => match parse_ticks(args) {
                Ok(ticks) => {
                    self.world.ticks += ticks;
                    for (item, per_tick) in &self.drift {
                        *self.world.produced.entry(item.clone()).or_insert(0.0) +=
                            per_tick * ticks as f64;
                    }
                    self.world.ticks.to_string()
                }
                Err(e) => format!("error: {e}"),
            },
            "stats.get" => Value::Table(vec![
                (
                    Key::Str("produced".into()),
                    flows_to_value(&self.world.produced),
                ),
                (
                    Key::Str("consumed".into()),
                    flows_to_value(&self.world.consumed),
                ),
            ])
            .to_wire(),
            "agent.home" => "true".to_string(),
            other => format!("error: unknown command {other:?}"),
        }
    }

    async fn run_program(&mut self, code: &str) -> String {
        let mut score = 0.0f64;
        let mut goal: Option<String> = None;
        let mut outputs: Vec<String> = Vec::new();

        for line in code.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("--") {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                ["noop"] => {}
                ["mine", item, count] => match count.parse::<u64>() {
                    Ok(count) => {
                        *self.world.inventory.entry((*item).to_string()).or_insert(0) += count;
                        *self.world.produced.entry((*item).to_string()).or_insert(0.0) +=
                            count as f64;
                        outputs.push(format!("mined {count} {item}"));
                    }
                    Err(_) => return format!("error: bad count in {line:?}"),
                },
                ["craft", output, out_count, "from", input, in_count] => {
                    let (Ok(out_count), Ok(in_count)) =
                        (out_count.parse::<u64>(), in_count.parse::<u64>())
                    else {
                        return format!("error: bad count in {line:?}");
                    };
                    let held = self.world.inventory.get(*input).copied().unwrap_or(0);
                    if held < in_count {
                        return format!("error: not enough {input} ({held} < {in_count})");
                    }
                    *self.world.inventory.entry((*input).to_string()).or_insert(0) -= in_count;
                    *self.world.consumed.entry((*input).to_string()).or_insert(0.0) +=
                        in_count as f64;
                    *self.world.inventory.entry((*output).to_string()).or_insert(0) += out_count;
                    *self.world.produced.entry((*output).to_string()).or_insert(0.0) +=
                        out_count as f64;
                    outputs.push(format!("crafted {out_count} {output}"));
                }
                ["score", value] => match value.parse::<f64>() {
                    Ok(value) => score = value,
                    Err(_) => return format!("error: bad score in {line:?}"),
                },
                ["goal", name] => goal = Some((*name).to_string()),
                ["fail", ..] => {
                    let message = line.trim_start_matches("fail").trim();
                    return format!("error: {message}");
                }
                ["print", ..] => {
                    outputs.push(line.trim_start_matches("print").trim().to_string());
                }
                ["hang", seconds] => match seconds.parse::<f64>() {
                    Ok(seconds) => {
                        tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)).await;
                    }
                    Err(_) => return format!("error: bad duration in {line:?}"),
                },
                _ => return format!("error: unknown statement {line:?}"),
            }
        }

        Value::Table(vec![
            (Key::Str("score".into()), Value::Float(score)),
            (
                Key::Str("goal".into()),
                goal.map_or(Value::Nil, Value::Str),
            ),
            (
                Key::Str("output".into()),
                Value::Str(if outputs.is_empty() {
                    "ok".to_string()
                } else {
                    outputs.join("\n")
                }),
            ),
        ])
        .to_wire()
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for SimTransport {
    async fn send(&mut self, command: &str) -> Result<String, ProtocolError> {
        if self.controls.take_failure() {
            return Err(ProtocolError::ConnectionClosed);
        }
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        Ok(self.handle_command(command).await)
    }

    async fn send_batch(
        &mut self,
        commands: &[BatchCommand],
    ) -> Result<Vec<RawReply>, ProtocolError> {
        if self.controls.take_failure() {
            return Err(ProtocolError::ConnectionClosed);
        }
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        let started = Instant::now();
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            let body = self.handle_command(&command.body).await;
            replies.push(RawReply {
                id: command.id.clone(),
                body,
                elapsed: started.elapsed(),
            });
        }
        Ok(replies)
    }

    async fn reconnect(&mut self) -> Result<(), ProtocolError> {
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

fn split_invocation(command: &str) -> Option<(&str, &str)> {
    let open = command.find('(')?;
    let close = command.rfind(')')?;
    if close < open {
        return None;
    }
    Some((&command[..open], command[open + 1..close].trim()))
}

fn decode_argument(args: &str) -> Result<Value, String> {
    match forge_protocol::decode(args) {
        forge_protocol::Decoded::Value(v) => Ok(v),
        forge_protocol::Decoded::Failure(reason) => Err(format!("bad argument: {reason}")),
    }
}

fn parse_counts(args: &str) -> Result<BTreeMap<String, u64>, String> {
    match decode_argument(args)? {
        Value::Table(entries) => {
            let mut out = BTreeMap::new();
            for (key, value) in entries {
                let Key::Str(name) = key else {
                    return Err(format!("non-string item key {key}"));
                };
                let count = value
                    .as_i64()
                    .filter(|c| *c >= 0)
                    .ok_or_else(|| format!("bad count for {name:?}"))?;
                out.insert(name, count as u64);
            }
            Ok(out)
        }
        other => Err(format!("expected an item table, got {other:?}")),
    }
}

fn parse_ticks(args: &str) -> Result<u64, String> {
    match decode_argument(args)? {
        Value::Int(ticks) if ticks >= 0 => Ok(ticks as u64),
        other => Err(format!("expected a tick count, got {other:?}")),
    }
}

fn counts_to_value(counts: &BTreeMap<String, u64>) -> Value {
    Value::Table(
        counts
            .iter()
            .map(|(name, count)| (Key::Str(name.clone()), Value::Int(*count as i64)))
            .collect(),
    )
}

fn flows_to_value(flows: &BTreeMap<String, f64>) -> Value {
    Value::Table(
        flows
            .iter()
            .map(|(name, count)| (Key::Str(name.clone()), Value::Float(*count)))
            .collect(),
    )
}
