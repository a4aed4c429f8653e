// UPGRADE MODE: CONFIGURATION
// Period lengths and finalize policy, fixed at construction
//
// SAFETY INVARIANTS:
// 1. max_period_secs > wait_period_secs
// 2. A validated config is never mutated by the state machine

use crate::errors::ConfigError;
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 7 days
pub const DEFAULT_WAIT_PERIOD_SECS: u64 = 7 * 24 * 60 * 60;

/// 14 days
pub const DEFAULT_MAX_PERIOD_SECS: u64 = 14 * 24 * 60 * 60;

/// Environment prefix for overrides, e.g. `BLEEP_UPGRADE_CFG_WAIT_PERIOD_SECS`.
/// Kept apart from the admin identities (`BLEEP_UPGRADE_MASTER`, `BLEEP_UPGRADE_CALLER`).
pub const ENV_PREFIX: &str = "BLEEP_UPGRADE_CFG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpgradeModeConfig {
    /// Seconds after activation before the finalize checkpoint can be reached
    pub wait_period_secs: u64,

    /// Seconds after activation before forced cancellation is permitted
    pub max_period_secs: u64,

    /// Whether `cancel` is accepted once the finalize checkpoint is reached
    pub allow_cancel_after_finalize: bool,

    /// Whether `force_cancel` is accepted once the finalize checkpoint is reached
    pub allow_force_cancel_after_finalize: bool,
}

impl Default for UpgradeModeConfig {
    fn default() -> Self {
        UpgradeModeConfig {
            wait_period_secs: DEFAULT_WAIT_PERIOD_SECS,
            max_period_secs: DEFAULT_MAX_PERIOD_SECS,
            allow_cancel_after_finalize: true,
            allow_force_cancel_after_finalize: true,
        }
    }
}

impl UpgradeModeConfig {
    /// Config with the given periods and the default finalize policy
    pub fn new(wait_period_secs: u64, max_period_secs: u64) -> Result<Self, ConfigError> {
        let config = UpgradeModeConfig {
            wait_period_secs,
            max_period_secs,
            ..UpgradeModeConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_cancel_after_finalize(mut self, allow: bool) -> Self {
        self.allow_cancel_after_finalize = allow;
        self
    }

    pub fn with_force_cancel_after_finalize(mut self, allow: bool) -> Self {
        self.allow_force_cancel_after_finalize = allow;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_period_secs <= self.wait_period_secs {
            return Err(ConfigError::InvalidPeriods {
                wait: self.wait_period_secs,
                max: self.max_period_secs,
            });
        }
        Ok(())
    }

    /// Load defaults, then `path` (format taken from its extension), then
    /// `BLEEP_UPGRADE_CFG_*` environment variables, and validate the result.
    /// Unknown keys from any layer are rejected.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        let defaults = UpgradeModeConfig::default();

        let mut builder = Config::builder()
            .set_default("wait_period_secs", defaults.wait_period_secs)?
            .set_default("max_period_secs", defaults.max_period_secs)?
            .set_default(
                "allow_cancel_after_finalize",
                defaults.allow_cancel_after_finalize,
            )?
            .set_default(
                "allow_force_cancel_after_finalize",
                defaults.allow_force_cancel_after_finalize,
            )?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let loaded: UpgradeModeConfig = builder
            .add_source(Environment::with_prefix(env_prefix).try_parsing(true))
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }
}
