//! Pool assembly
//!
//! Claims the configured endpoints, initializes one world handle per
//! endpoint, and partitions them into groups: each group gets an equal
//! share of worlds, the last of which becomes its holdout.

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::holdout::WorldGroup;
use forge_protocol::RconTransport;
use forge_world::{WorldError, WorldHandle};

/// A fully assembled pool of world groups.
pub struct WorldPool {
    groups: Vec<WorldGroup>,
}

/// Point-in-time pool health summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub groups: usize,
    pub active_worlds: usize,
    pub healthy_actives: usize,
}

impl WorldPool {
    /// Connect to every configured endpoint and assemble the groups.
    /// Endpoint-count validation happens before the first connection.
    pub async fn connect(config: &PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let mut handles = Vec::with_capacity(config.endpoints.len());
        for (i, endpoint) in config.endpoints.iter().enumerate() {
            let transport = RconTransport::connect(
                endpoint.host.clone(),
                endpoint.port,
                endpoint.password.clone(),
            )
            .await
            .map_err(WorldError::from)?;
            let mut handle = WorldHandle::new(
                format!("world-{i}"),
                Box::new(transport),
                config.world.clone(),
            );
            handle.initialize().await?;
            handles.push(handle);
        }
        Self::assemble(config, handles)
    }

    /// Partition already-initialized handles into groups. Exposed so tests
    /// can assemble a pool over in-memory transports.
    pub fn assemble(config: &PoolConfig, handles: Vec<WorldHandle>) -> Result<Self, PoolError> {
        let required = config.group_count * 2;
        if handles.len() < required {
            return Err(PoolError::InsufficientWorlds {
                available: handles.len(),
                required,
            });
        }
        let per_group = handles.len() / config.group_count;
        let leftover = handles.len() % config.group_count;
        if leftover != 0 {
            tracing::warn!(
                leftover,
                "endpoint count does not divide evenly into groups, extra worlds unused"
            );
        }

        let mut handles = handles.into_iter();
        let mut groups = Vec::with_capacity(config.group_count);
        for group_id in 0..config.group_count {
            let mut share: Vec<WorldHandle> =
                handles.by_ref().take(per_group).collect();
            // Last world of the share idles as the group's holdout.
            let holdout = share.pop().ok_or(PoolError::InsufficientWorlds {
                available: 0,
                required,
            })?;
            tracing::info!(
                group = group_id,
                actives = share.len(),
                holdout = %holdout.id(),
                "assembled world group"
            );
            groups.push(WorldGroup::new(
                group_id,
                share,
                holdout,
                config.holdout_window_ticks,
                config.eval_timeout(),
                config.reward_weights.clone(),
            ));
        }
        Ok(Self { groups })
    }

    #[inline]
    #[must_use]
    pub fn groups(&self) -> &[WorldGroup] {
        &self.groups
    }

    #[inline]
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Current health summary across all groups.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            groups: self.groups.len(),
            active_worlds: self.groups.iter().map(WorldGroup::active_count).sum(),
            healthy_actives: self.groups.iter().map(WorldGroup::healthy_actives).sum(),
        }
    }
}

impl std::fmt::Debug for WorldPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldPool")
            .field("groups", &self.groups.len())
            .finish_non_exhaustive()
    }
}
