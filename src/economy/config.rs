//! Economy Driver Configuration
//!
//! Driver-wide defaults, pooling limits, and housekeeping periods. Loaded
//! from YAML with camelCase keys; every field falls back to its default.

use crate::domain::ports::{PoolAttributes, SpaceReserve};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Limits
// =============================================================================

/// Default pooling ceiling
pub const DEFAULT_QTREES_PER_FLEXVOL: usize = 200;

/// Smallest configurable pooling ceiling
pub const MIN_QTREES_PER_FLEXVOL: usize = 50;

/// Largest configurable pooling ceiling
pub const MAX_QTREES_PER_FLEXVOL: usize = 300;

/// Longest storage prefix accepted in Flexvol names
pub const MAX_STORAGE_PREFIX_LENGTH: usize = 32;

/// Recognized attribute option keys
pub const OPTION_AGGREGATE: &str = "aggregate";
pub const OPTION_SPACE_RESERVE: &str = "spaceReserve";
pub const OPTION_SNAPSHOT_POLICY: &str = "snapshotPolicy";
pub const OPTION_SNAPSHOT_DIR: &str = "snapshotDir";
pub const OPTION_ENCRYPTION: &str = "encryption";

// =============================================================================
// Volume Defaults
// =============================================================================

/// Defaults applied when a request leaves an attribute unspecified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeDefaults {
    pub aggregate: String,
    pub space_reserve: SpaceReserve,
    pub snapshot_policy: String,
    pub snapshot_dir: bool,
    pub encryption: bool,
    /// Snapshot reserve percent for new Flexvols; unset leaves it to the
    /// array unless the snapshot policy is `none`
    pub snapshot_reserve: Option<u32>,
    pub unix_permissions: String,
    pub security_style: String,
    pub export_policy: String,
}

impl Default for VolumeDefaults {
    fn default() -> Self {
        Self {
            aggregate: "aggr1".to_string(),
            space_reserve: SpaceReserve::None,
            snapshot_policy: "none".to_string(),
            snapshot_dir: false,
            encryption: false,
            snapshot_reserve: None,
            unix_permissions: "0777".to_string(),
            security_style: "unix".to_string(),
            export_policy: "default".to_string(),
        }
    }
}

impl VolumeDefaults {
    /// Resolve request options against these defaults
    pub fn resolve(&self, options: &BTreeMap<String, String>) -> Result<PoolAttributes> {
        let aggregate = options
            .get(OPTION_AGGREGATE)
            .cloned()
            .unwrap_or_else(|| self.aggregate.clone());

        let space_reserve = match options.get(OPTION_SPACE_RESERVE) {
            Some(value) => value.parse()?,
            None => self.space_reserve,
        };

        let snapshot_policy = options
            .get(OPTION_SNAPSHOT_POLICY)
            .cloned()
            .unwrap_or_else(|| self.snapshot_policy.clone());

        let snapshot_dir = match options.get(OPTION_SNAPSHOT_DIR) {
            Some(value) => parse_bool(OPTION_SNAPSHOT_DIR, value)?,
            None => self.snapshot_dir,
        };

        let encryption = match options.get(OPTION_ENCRYPTION) {
            Some(value) => parse_bool(OPTION_ENCRYPTION, value)?,
            None => self.encryption,
        };

        if aggregate.is_empty() {
            return Err(Error::InvalidOption {
                key: OPTION_AGGREGATE.into(),
                value: aggregate,
            });
        }

        Ok(PoolAttributes {
            aggregate,
            space_reserve,
            snapshot_policy,
            snapshot_dir,
            encryption,
        })
    }

    /// Snapshot reserve to request for a new Flexvol with `attributes`
    pub fn snapshot_reserve_for(&self, attributes: &PoolAttributes) -> Option<u32> {
        match self.snapshot_reserve {
            Some(percent) => Some(percent),
            None if attributes.snapshot_policy == "none" => Some(0),
            None => None,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::InvalidOption {
            key: key.into(),
            value: value.into(),
        }),
    }
}

// =============================================================================
// Housekeeping & Quota
// =============================================================================

/// Periods of the background passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HousekeepingConfig {
    pub prune_flexvols_period_secs: u64,
    pub reap_qtrees_period_secs: u64,
    pub resize_quotas_period_secs: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            prune_flexvols_period_secs: 600,
            reap_qtrees_period_secs: 600,
            resize_quotas_period_secs: 60,
        }
    }
}

impl HousekeepingConfig {
    pub fn prune_period(&self) -> Duration {
        Duration::from_secs(self.prune_flexvols_period_secs)
    }

    pub fn reap_period(&self) -> Duration {
        Duration::from_secs(self.reap_qtrees_period_secs)
    }

    pub fn resize_period(&self) -> Duration {
        Duration::from_secs(self.resize_quotas_period_secs)
    }
}

/// Quota state transition polling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuotaConfig {
    pub poll_interval_millis: u64,
    pub transition_timeout_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            poll_interval_millis: 1000,
            transition_timeout_secs: 300,
        }
    }
}

impl QuotaConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_secs(self.transition_timeout_secs)
    }
}

// =============================================================================
// Economy Config
// =============================================================================

/// Configuration for the qtree economy driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EconomyConfig {
    /// Scope tag embedded in every owned Flexvol name
    pub storage_prefix: String,
    /// Pooling ceiling
    pub qtrees_per_flexvol: usize,
    /// Largest qtree a request may ask for
    pub limit_volume_size: Option<u64>,
    pub defaults: VolumeDefaults,
    pub housekeeping: HousekeepingConfig,
    pub quota: QuotaConfig,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            storage_prefix: "pool".to_string(),
            qtrees_per_flexvol: DEFAULT_QTREES_PER_FLEXVOL,
            limit_volume_size: None,
            defaults: VolumeDefaults::default(),
            housekeeping: HousekeepingConfig::default(),
            quota: QuotaConfig::default(),
        }
    }
}

impl EconomyConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Check limits and name constraints
    pub fn validate(&self) -> Result<()> {
        if !(MIN_QTREES_PER_FLEXVOL..=MAX_QTREES_PER_FLEXVOL).contains(&self.qtrees_per_flexvol) {
            return Err(Error::Configuration(format!(
                "qtreesPerFlexvol must be between {} and {}, got {}",
                MIN_QTREES_PER_FLEXVOL, MAX_QTREES_PER_FLEXVOL, self.qtrees_per_flexvol
            )));
        }

        if self.storage_prefix.len() > MAX_STORAGE_PREFIX_LENGTH
            || !self
                .storage_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Configuration(format!(
                "storagePrefix {:?} must be at most {} characters of [A-Za-z0-9_]",
                self.storage_prefix, MAX_STORAGE_PREFIX_LENGTH
            )));
        }

        if let Some(percent) = self.defaults.snapshot_reserve {
            if percent > 90 {
                return Err(Error::Configuration(format!(
                    "snapshotReserve must be at most 90 percent, got {}",
                    percent
                )));
            }
        }

        let periods = [
            self.housekeeping.prune_flexvols_period_secs,
            self.housekeeping.reap_qtrees_period_secs,
            self.housekeeping.resize_quotas_period_secs,
        ];
        if periods.contains(&0) {
            return Err(Error::Configuration(
                "housekeeping periods must be non-zero".into(),
            ));
        }

        if self.quota.poll_interval_millis == 0 {
            return Err(Error::Configuration(
                "quota pollIntervalMillis must be non-zero".into(),
            ));
        }

        Ok(())
    }
}
