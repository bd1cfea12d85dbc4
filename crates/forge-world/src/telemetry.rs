//! Production telemetry and reward accounting
//!
//! The simulator tracks cumulative item flows per world. Reward for a
//! candidate program is computed from the change in those flows over the
//! evaluation window, corrected by a holdout world that experienced the
//! same window with no program running. Background drift thus cancels out
//! instead of being credited to the candidate.

use forge_protocol::{Key, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cumulative item flows since the telemetry epoch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProductionStats {
    pub produced: BTreeMap<String, f64>,
    pub consumed: BTreeMap<String, f64>,
}

impl ProductionStats {
    /// Flow change from `earlier` to `self`, clamped at zero per item.
    /// Counters are cumulative, so a negative change only happens across a
    /// telemetry reset and must not show up as negative flow.
    #[must_use]
    pub fn delta_since(&self, earlier: &Self) -> TelemetryDelta {
        TelemetryDelta {
            produced: map_delta(&self.produced, &earlier.produced),
            consumed: map_delta(&self.consumed, &earlier.consumed),
        }
    }

    /// Parse a stats reply: two string-keyed tables of flow counters.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        Ok(Self {
            produced: flow_map(value, "produced")?,
            consumed: flow_map(value, "consumed")?,
        })
    }

    /// Render as the wire value a stats reply carries.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Table(vec![
            (Key::Str("produced".into()), flow_value(&self.produced)),
            (Key::Str("consumed".into()), flow_value(&self.consumed)),
        ])
    }
}

fn map_delta(later: &BTreeMap<String, f64>, earlier: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for (item, count) in later {
        let before = earlier.get(item).copied().unwrap_or(0.0);
        let delta = (count - before).max(0.0);
        if delta > 0.0 {
            out.insert(item.clone(), delta);
        }
    }
    out
}

fn flow_map(value: &Value, field: &str) -> Result<BTreeMap<String, f64>, String> {
    match value.get(field) {
        None | Some(Value::Nil) => Ok(BTreeMap::new()),
        Some(Value::Table(entries)) => {
            let mut out = BTreeMap::new();
            for (key, count) in entries {
                let Key::Str(name) = key else {
                    return Err(format!("non-string item in {field}: {key}"));
                };
                let count = count
                    .as_f64()
                    .ok_or_else(|| format!("bad flow count for {name:?}: {count:?}"))?;
                out.insert(name.clone(), count);
            }
            Ok(out)
        }
        Some(other) => Err(format!("{field} is not a table: {other:?}")),
    }
}

fn flow_value(map: &BTreeMap<String, f64>) -> Value {
    Value::Table(
        map.iter()
            .map(|(name, count)| (Key::Str(name.clone()), Value::Float(*count)))
            .collect(),
    )
}

/// Flow change over one evaluation window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryDelta {
    pub produced: BTreeMap<String, f64>,
    pub consumed: BTreeMap<String, f64>,
}

impl TelemetryDelta {
    /// Subtract the holdout's delta per item, clamping at zero. What
    /// remains is the flow attributable to the candidate itself.
    #[must_use]
    pub fn net(&self, holdout: &Self) -> Self {
        Self {
            produced: map_delta(&self.produced, &holdout.produced),
            consumed: map_delta(&self.consumed, &holdout.consumed),
        }
    }

    /// Per-item credit: production that was not immediately consumed as an
    /// intermediate. An item produced 10 and consumed 4 credits 6.
    #[must_use]
    pub fn reconciled_credit(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for (item, produced) in &self.produced {
            let consumed = self.consumed.get(item).copied().unwrap_or(0.0);
            let credit = produced - produced.min(consumed);
            if credit > 0.0 {
                out.insert(item.clone(), credit);
            }
        }
        out
    }

    /// Scalar reward: weighted sum of reconciled credit.
    #[must_use]
    pub fn reward(&self, weights: &RewardWeights) -> f64 {
        self.reconciled_credit()
            .iter()
            .map(|(item, credit)| credit * weights.weight_for(item))
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.produced.is_empty() && self.consumed.is_empty()
    }
}

/// Per-item reward weights. Items without an explicit weight use the
/// default weight of 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    #[serde(default = "default_weight")]
    pub default: f64,
    #[serde(default)]
    pub per_item: BTreeMap<String, f64>,
}

fn default_weight() -> f64 {
    1.0
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            default: 1.0,
            per_item: BTreeMap::new(),
        }
    }
}

impl RewardWeights {
    #[inline]
    #[must_use]
    pub fn weight_for(&self, item: &str) -> f64 {
        self.per_item.get(item).copied().unwrap_or(self.default)
    }
}
