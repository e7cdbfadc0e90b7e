//! Configuration management for meshlink.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
#[cfg(feature = "toml")]
use std::path::Path;
use tracing::warn;

/// Node-wide settings, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub table: TableConfig,
    pub indirect: IndirectConfig,
    pub link: LinkConfig,
}

/// Capacities and timers of the topology table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub max_children: usize,
    pub max_routers: usize,
    pub max_ip6_addresses_per_child: usize,
    /// How long a released router slot is held back before reuse
    pub router_reclaim_delay_ms: u64,
    /// Consecutive link failures after which a neighbor is invalidated
    pub link_failure_threshold: u8,
}

/// Buffered delivery limits for sleepy children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndirectConfig {
    /// Poll-triggered transmit attempts before a message is dropped
    pub retry_cap: u8,
    /// Messages allowed behind the in-flight one
    pub max_queued_per_child: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub noise_floor_dbm: i8,
}

impl Config {
    /// Load and validate a TOML config file.
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(CoreError::from)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            table: TableConfig {
                max_children: 10,
                max_routers: 32,
                max_ip6_addresses_per_child: 4,
                router_reclaim_delay_ms: 100_000,
                link_failure_threshold: 4,
            },
            indirect: IndirectConfig {
                retry_cap: 4,
                max_queued_per_child: 8,
            },
            link: LinkConfig {
                noise_floor_dbm: -100,
            },
        }
    }

    /// Reject settings the topology table cannot operate with.
    pub fn validate(&self) -> CoreResult<()> {
        match self.first_violation() {
            Some(reason) => {
                warn!(%reason, "configuration rejected");
                Err(CoreError::InvalidConfig(reason))
            }
            None => Ok(()),
        }
    }

    fn first_violation(&self) -> Option<String> {
        let table = &self.table;
        if table.max_children == 0 && table.max_routers == 0 {
            return Some("table must hold at least one child or router".to_string());
        }
        if table.max_routers > crate::types::Rloc16::MAX_ROUTER_ID as usize + 1 {
            return Some(format!(
                "max_routers {} exceeds router id space",
                table.max_routers
            ));
        }
        if table.max_ip6_addresses_per_child == 0 {
            return Some("max_ip6_addresses_per_child must be non-zero".to_string());
        }
        if self.indirect.retry_cap == 0 {
            return Some("retry_cap must be non-zero".to_string());
        }
        if table.link_failure_threshold == 0 {
            return Some("link_failure_threshold must be non-zero".to_string());
        }
        None
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
