//! Pool configuration
//!
//! Loaded from TOML. Validation runs before any endpoint is contacted so a
//! misconfigured run fails in milliseconds, not after a partial connect.

use crate::error::PoolError;
use forge_world::{RewardWeights, WorldConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One simulator control endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub password: String,
}

/// Full pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Endpoints to claim, in order. Each group takes its actives and one
    /// holdout from this list.
    pub endpoints: Vec<Endpoint>,
    /// Number of independent groups.
    pub group_count: usize,
    /// Simulated ticks every evaluation window advances.
    #[serde(default = "default_holdout_window")]
    pub holdout_window_ticks: u64,
    /// Wall-clock deadline for one candidate evaluation, in seconds.
    #[serde(default = "default_eval_timeout")]
    pub eval_timeout_secs: u64,
    /// Baseline restored by every world reset.
    #[serde(default)]
    pub world: WorldConfig,
    /// Item weights for reward scoring.
    #[serde(default)]
    pub reward_weights: RewardWeights,
}

fn default_holdout_window() -> u64 {
    600
}

fn default_eval_timeout() -> u64 {
    60
}

impl PoolConfig {
    pub fn from_toml(text: &str) -> Result<Self, PoolError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PoolError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Structural checks. Every group needs at least one active world and
    /// exactly one holdout, so the pool must hold `2 * group_count`
    /// endpoints at minimum.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.group_count == 0 {
            return Err(PoolError::ConfigInvalid(
                "group_count must be at least 1".into(),
            ));
        }
        let required = self.group_count * 2;
        if self.endpoints.len() < required {
            return Err(PoolError::InsufficientWorlds {
                available: self.endpoints.len(),
                required,
            });
        }
        if self.eval_timeout_secs == 0 {
            return Err(PoolError::ConfigInvalid(
                "eval_timeout_secs must be positive".into(),
            ));
        }
        if self.holdout_window_ticks == 0 {
            return Err(PoolError::ConfigInvalid(
                "holdout_window_ticks must be positive".into(),
            ));
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn eval_timeout(&self) -> Duration {
        Duration::from_secs(self.eval_timeout_secs)
    }

    /// Worlds per group, actives plus the holdout.
    #[inline]
    #[must_use]
    pub fn worlds_per_group(&self) -> usize {
        self.endpoints.len() / self.group_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(n: usize) -> String {
        (0..n)
            .map(|i| {
                format!(
                    "[[endpoints]]\nhost = \"127.0.0.1\"\nport = {}\npassword = \"pw\"\n",
                    27000 + i
                )
            })
            .collect()
    }

    #[test]
    fn parses_a_minimal_config() {
        let text = format!("group_count = 2\n{}", endpoints(4));
        let config = PoolConfig::from_toml(&text).unwrap();
        assert_eq!(config.group_count, 2);
        assert_eq!(config.worlds_per_group(), 2);
        assert_eq!(config.holdout_window_ticks, 600);
        assert_eq!(config.eval_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn rejects_too_few_endpoints_before_connecting() {
        let text = format!("group_count = 4\n{}", endpoints(6));
        let err = PoolConfig::from_toml(&text).unwrap_err();
        assert!(matches!(
            err,
            PoolError::InsufficientWorlds {
                available: 6,
                required: 8
            }
        ));
    }

    #[test]
    fn rejects_zero_groups_and_zero_timeouts() {
        let text = format!("group_count = 0\n{}", endpoints(2));
        assert!(PoolConfig::from_toml(&text).is_err());

        let text = format!("group_count = 1\neval_timeout_secs = 0\n{}", endpoints(2));
        assert!(PoolConfig::from_toml(&text).is_err());
    }

    #[test]
    fn world_baseline_is_part_of_the_config() {
        let text = format!(
            "group_count = 1\n{}\n[world.starting_inventory]\ncoal = 50\n",
            endpoints(2)
        );
        let config = PoolConfig::from_toml(&text).unwrap();
        assert_eq!(config.world.starting_inventory.get("coal"), Some(&50));
    }

    #[test]
    fn loads_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.toml");
        std::fs::write(&path, format!("group_count = 1\n{}", endpoints(2))).unwrap();
        let config = PoolConfig::from_file(&path).unwrap();
        assert_eq!(config.endpoints.len(), 2);
    }
}
