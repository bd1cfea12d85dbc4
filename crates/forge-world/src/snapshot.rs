//! World snapshots
//!
//! A snapshot captures everything a candidate program can observe: agent
//! inventory, placed entities with their internal buffers, research
//! progress, and the world clock. Snapshots are plain data - capture and
//! restore live on [`crate::handle::WorldHandle`], conversion to and from
//! the wire value shape lives here.

use forge_protocol::{Key, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Positions closer than this are observably the same place.
pub const POSITION_EPSILON: f64 = 1e-3;

/// Stable identity of one captured snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One placed entity with its internal item buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    pub x: f64,
    pub y: f64,
    /// Facing, in the simulator's quarter-turn encoding.
    pub direction: u8,
    /// Buffer name -> item -> count (fuel slots, input/output buffers).
    #[serde(default)]
    pub buffers: BTreeMap<String, BTreeMap<String, u64>>,
}

impl EntityRecord {
    /// Same entity at observably the same place, same buffers.
    #[must_use]
    pub fn observably_equal(&self, other: &Self) -> bool {
        self.name == other.name
            && self.direction == other.direction
            && (self.x - other.x).abs() <= POSITION_EPSILON
            && (self.y - other.y).abs() <= POSITION_EPSILON
            && self.buffers == other.buffers
    }
}

/// Technology progress at capture time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResearchState {
    pub researched: BTreeSet<String>,
    pub current: Option<String>,
    pub progress: f64,
}

/// Full observable world state at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub id: SnapshotId,
    pub inventory: BTreeMap<String, u64>,
    pub entities: Vec<EntityRecord>,
    pub research: ResearchState,
    pub elapsed_ticks: u64,
}

impl WorldSnapshot {
    /// An empty world: nothing held, nothing placed, clock at zero.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            id: SnapshotId::new(),
            inventory: BTreeMap::new(),
            entities: Vec::new(),
            research: ResearchState::default(),
            elapsed_ticks: 0,
        }
    }

    /// Whether two snapshots describe the same observable world.
    ///
    /// Identity and the clock are ignored: a restore reproduces what the
    /// agent can see, not when it was captured. Entity order is
    /// insignificant as long as each entity has an observable match.
    #[must_use]
    pub fn observably_equal(&self, other: &Self) -> bool {
        if self.inventory != other.inventory || self.research != other.research {
            return false;
        }
        if self.entities.len() != other.entities.len() {
            return false;
        }
        let mut unmatched: Vec<&EntityRecord> = other.entities.iter().collect();
        for entity in &self.entities {
            match unmatched.iter().position(|c| entity.observably_equal(c)) {
                Some(pos) => {
                    unmatched.swap_remove(pos);
                }
                None => return false,
            }
        }
        true
    }
}

/// Parse an inventory reply: a string-keyed table of item counts, or an
/// empty table for an empty inventory.
pub fn inventory_from_value(value: &Value) -> Result<BTreeMap<String, u64>, String> {
    match value {
        Value::Table(entries) => {
            let mut out = BTreeMap::new();
            for (key, count) in entries {
                let Key::Str(name) = key else {
                    return Err(format!("non-string inventory key {key}"));
                };
                let count = count
                    .as_i64()
                    .filter(|c| *c >= 0)
                    .ok_or_else(|| format!("bad count for item {name:?}: {count:?}"))?;
                out.insert(name.clone(), count as u64);
            }
            Ok(out)
        }
        other => Err(format!("inventory reply is not a table: {other:?}")),
    }
}

/// Render an inventory as the wire value `inventory.set` expects.
#[must_use]
pub fn inventory_to_value(inventory: &BTreeMap<String, u64>) -> Value {
    Value::Table(
        inventory
            .iter()
            .map(|(name, count)| (Key::Str(name.clone()), Value::Int(*count as i64)))
            .collect(),
    )
}

/// Parse an entity-list reply: a sequence of entity tables, or an empty
/// table when nothing is placed.
pub fn entities_from_value(value: &Value) -> Result<Vec<EntityRecord>, String> {
    let items: &[Value] = match value {
        Value::Seq(items) => items,
        Value::Table(entries) if entries.is_empty() => &[],
        other => return Err(format!("entity reply is not a sequence: {other:?}")),
    };
    items.iter().map(entity_from_value).collect()
}

fn entity_from_value(value: &Value) -> Result<EntityRecord, String> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("entity without a name: {value:?}"))?
        .to_string();
    let x = value
        .get("x")
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("entity {name:?} missing x"))?;
    let y = value
        .get("y")
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("entity {name:?} missing y"))?;
    let direction = value
        .get("direction")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let direction =
        u8::try_from(direction).map_err(|_| format!("entity {name:?} direction out of range"))?;
    let mut buffers = BTreeMap::new();
    if let Some(Value::Table(buffer_entries)) = value.get("buffers") {
        for (buffer_key, contents) in buffer_entries {
            let Key::Str(buffer_name) = buffer_key else {
                return Err(format!("entity {name:?} has non-string buffer key"));
            };
            buffers.insert(
                buffer_name.clone(),
                inventory_from_value(contents)
                    .map_err(|e| format!("entity {name:?} buffer {buffer_name:?}: {e}"))?,
            );
        }
    }
    Ok(EntityRecord {
        name,
        x,
        y,
        direction,
        buffers,
    })
}

/// Render an entity list as the wire value `entities.load` expects.
#[must_use]
pub fn entities_to_value(entities: &[EntityRecord]) -> Value {
    Value::Seq(
        entities
            .iter()
            .map(|e| {
                let mut fields = vec![
                    (Key::Str("name".into()), Value::Str(e.name.clone())),
                    (Key::Str("x".into()), Value::Float(e.x)),
                    (Key::Str("y".into()), Value::Float(e.y)),
                    (Key::Str("direction".into()), Value::Int(i64::from(e.direction))),
                ];
                if !e.buffers.is_empty() {
                    fields.push((
                        Key::Str("buffers".into()),
                        Value::Table(
                            e.buffers
                                .iter()
                                .map(|(b, contents)| {
                                    (Key::Str(b.clone()), inventory_to_value(contents))
                                })
                                .collect(),
                        ),
                    ));
                }
                Value::Table(fields)
            })
            .collect(),
    )
}

/// Parse a research reply.
pub fn research_from_value(value: &Value) -> Result<ResearchState, String> {
    let researched = match value.get("researched") {
        None | Some(Value::Nil) => BTreeSet::new(),
        Some(Value::Table(entries)) if entries.is_empty() => BTreeSet::new(),
        Some(Value::Seq(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("non-string technology name: {v:?}"))
            })
            .collect::<Result<_, _>>()?,
        Some(other) => return Err(format!("bad researched list: {other:?}")),
    };
    let current = match value.get("current") {
        None | Some(Value::Nil) => None,
        Some(Value::Str(name)) => Some(name.clone()),
        Some(other) => return Err(format!("bad current technology: {other:?}")),
    };
    let progress = match value.get("progress") {
        None | Some(Value::Nil) => 0.0,
        Some(v) => v
            .as_f64()
            .ok_or_else(|| format!("bad research progress: {v:?}"))?,
    };
    Ok(ResearchState {
        researched,
        current,
        progress,
    })
}

/// Render research state as the wire value `research.set` expects.
#[must_use]
pub fn research_to_value(research: &ResearchState) -> Value {
    let mut fields = vec![(
        Key::Str("researched".into()),
        Value::Seq(
            research
                .researched
                .iter()
                .map(|t| Value::Str(t.clone()))
                .collect(),
        ),
    )];
    fields.push((
        Key::Str("current".into()),
        match &research.current {
            Some(name) => Value::Str(name.clone()),
            None => Value::Nil,
        },
    ));
    fields.push((
        Key::Str("progress".into()),
        Value::Float(research.progress),
    ));
    Value::Table(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_protocol::decode;
    use pretty_assertions::assert_eq;

    fn snapshot_with(inventory: &[(&str, u64)]) -> WorldSnapshot {
        WorldSnapshot {
            inventory: inventory
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            ..WorldSnapshot::empty()
        }
    }

    #[test]
    fn observable_equality_ignores_id_and_clock() {
        let mut a = snapshot_with(&[("coal", 5)]);
        let mut b = snapshot_with(&[("coal", 5)]);
        a.elapsed_ticks = 100;
        b.elapsed_ticks = 9000;
        assert!(a.observably_equal(&b));
        b.inventory.insert("iron-ore".into(), 1);
        assert!(!a.observably_equal(&b));
    }

    #[test]
    fn observable_equality_ignores_entity_order() {
        let drill = EntityRecord {
            name: "burner-mining-drill".into(),
            x: 2.0,
            y: 3.0,
            direction: 0,
            buffers: BTreeMap::new(),
        };
        let furnace = EntityRecord {
            name: "stone-furnace".into(),
            x: 4.0,
            y: 3.0,
            direction: 2,
            buffers: BTreeMap::new(),
        };
        let mut a = WorldSnapshot::empty();
        a.entities = vec![drill.clone(), furnace.clone()];
        let mut b = WorldSnapshot::empty();
        b.entities = vec![furnace, drill];
        assert!(a.observably_equal(&b));
    }

    #[test]
    fn position_tolerance_applies() {
        let base = EntityRecord {
            name: "stone-furnace".into(),
            x: 4.0,
            y: 3.0,
            direction: 0,
            buffers: BTreeMap::new(),
        };
        let mut nudged = base.clone();
        nudged.x += POSITION_EPSILON / 2.0;
        assert!(base.observably_equal(&nudged));
        nudged.x = base.x + POSITION_EPSILON * 10.0;
        assert!(!base.observably_equal(&nudged));
    }

    #[test]
    fn inventory_round_trips_through_wire_values() {
        let inventory: BTreeMap<String, u64> =
            [("coal".to_string(), 50), ("stone".to_string(), 1)].into();
        let value = inventory_to_value(&inventory);
        assert_eq!(inventory_from_value(&value).unwrap(), inventory);
    }

    #[test]
    fn empty_inventory_reply_parses_to_empty_map() {
        let decoded = decode("{}");
        let value = decoded.value().unwrap();
        assert!(inventory_from_value(value).unwrap().is_empty());
    }

    #[test]
    fn entities_round_trip_through_wire_values() {
        let entities = vec![EntityRecord {
            name: "burner-mining-drill".into(),
            x: 2.5,
            y: -3.0,
            direction: 4,
            buffers: [("fuel".to_string(), [("coal".to_string(), 3u64)].into())].into(),
        }];
        let value = entities_to_value(&entities);
        assert_eq!(entities_from_value(&value).unwrap(), entities);
    }

    #[test]
    fn entity_list_survives_a_decode_round_trip() {
        let entities = vec![
            EntityRecord {
                name: "stone-furnace".into(),
                x: 0.0,
                y: 0.0,
                direction: 0,
                buffers: BTreeMap::new(),
            },
            EntityRecord {
                name: "transport-belt".into(),
                x: 1.0,
                y: 0.0,
                direction: 2,
                buffers: BTreeMap::new(),
            },
        ];
        let wire = entities_to_value(&entities).to_wire();
        let decoded = decode(&wire);
        let value = decoded.value().unwrap();
        assert_eq!(entities_from_value(value).unwrap(), entities);
    }

    #[test]
    fn research_round_trips_through_wire_values() {
        let research = ResearchState {
            researched: ["automation".to_string()].into(),
            current: Some("logistics".into()),
            progress: 0.25,
        };
        let value = research_to_value(&research);
        assert_eq!(research_from_value(&value).unwrap(), research);
    }

    #[test]
    fn negative_counts_are_rejected() {
        let value = Value::Table(vec![(Key::Str("coal".into()), Value::Int(-1))]);
        assert!(inventory_from_value(&value).is_err());
    }
}
