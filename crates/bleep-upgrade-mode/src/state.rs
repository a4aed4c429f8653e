// UPGRADE MODE: LIFECYCLE STATE
// Explicit Idle / Active state with pure, guard-checked transitions
//
// SAFETY INVARIANTS:
// 1. finalize_active can only be true inside an Active window
// 2. activated_at exists if and only if the window is Active
// 3. version changes only on activation, by exactly +1
// 4. At most one window is open at any time
// 5. Rejected transitions leave the process untouched

use crate::clock::Timestamp;
use crate::errors::{ConfigError, UpgradeModeError};
use serde::{Deserialize, Serialize};

/// Whether an upgrade window is open.
///
/// `Idle` carries no timestamps, so a finalized or timed window without
/// an open upgrade cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpgradeStatus {
    Idle,
    Active {
        activated_at: Timestamp,
        finalize_active: bool,
    },
}

/// Outcome of a finalize checkpoint evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeCheck {
    /// No window is open
    Inactive,
    /// Window open, wait period not yet elapsed
    Waiting,
    /// Checkpoint reached by this call
    Reached,
    /// Checkpoint was reached by an earlier call
    AlreadyReached,
}

/// Version counter plus lifecycle status of the upgrade process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeProcess {
    version: u64,
    #[serde(flatten)]
    status: UpgradeStatus,
}

impl Default for UpgradeProcess {
    fn default() -> Self {
        UpgradeProcess::genesis()
    }
}

impl UpgradeProcess {
    /// Initial state: idle, version 0
    pub fn genesis() -> Self {
        UpgradeProcess {
            version: 0,
            status: UpgradeStatus::Idle,
        }
    }

    /// Rebuild a process from stored parts, rejecting combinations that no
    /// sequence of transitions could produce.
    pub fn from_parts(version: u64, status: UpgradeStatus) -> Result<Self, ConfigError> {
        let process = UpgradeProcess { version, status };
        process.check_consistency()?;
        Ok(process)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn status(&self) -> UpgradeStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, UpgradeStatus::Active { .. })
    }

    pub fn is_finalize_active(&self) -> bool {
        matches!(
            self.status,
            UpgradeStatus::Active {
                finalize_active: true,
                ..
            }
        )
    }

    pub fn activated_at(&self) -> Option<Timestamp> {
        match self.status {
            UpgradeStatus::Active { activated_at, .. } => Some(activated_at),
            UpgradeStatus::Idle => None,
        }
    }

    /// Seconds since activation, zero if the clock reads earlier than the
    /// activation timestamp. `None` while idle.
    pub fn elapsed(&self, now: Timestamp) -> Option<u64> {
        self.activated_at().map(|at| now.saturating_sub(at))
    }

    /// Open a new window at `now`, returning the new version.
    pub fn activate(&mut self, now: Timestamp) -> Result<u64, UpgradeModeError> {
        if self.is_active() {
            return Err(UpgradeModeError::AlreadyActive);
        }
        let next = self
            .version
            .checked_add(1)
            .ok_or(UpgradeModeError::VersionExhausted)?;

        self.version = next;
        self.status = UpgradeStatus::Active {
            activated_at: now,
            finalize_active: false,
        };
        Ok(next)
    }

    /// Advance to the finalize checkpoint once `wait_period` has elapsed.
    /// Never fails; the outcome says whether anything changed.
    pub fn check_finalize(&mut self, now: Timestamp, wait_period: u64) -> FinalizeCheck {
        match self.status {
            UpgradeStatus::Idle => FinalizeCheck::Inactive,
            UpgradeStatus::Active {
                finalize_active: true,
                ..
            } => FinalizeCheck::AlreadyReached,
            UpgradeStatus::Active {
                activated_at,
                finalize_active: false,
            } => {
                if now.saturating_sub(activated_at) >= wait_period {
                    self.status = UpgradeStatus::Active {
                        activated_at,
                        finalize_active: true,
                    };
                    FinalizeCheck::Reached
                } else {
                    FinalizeCheck::Waiting
                }
            }
        }
    }

    /// Close the open window without completing it.
    pub fn cancel(&mut self, allow_after_finalize: bool) -> Result<u64, UpgradeModeError> {
        if !self.is_active() {
            return Err(UpgradeModeError::NotActive);
        }
        if self.is_finalize_active() && !allow_after_finalize {
            return Err(UpgradeModeError::AlreadyFinalized);
        }
        Ok(self.close())
    }

    /// Complete a window that has reached the finalize checkpoint.
    pub fn finish(&mut self) -> Result<u64, UpgradeModeError> {
        if !self.is_finalize_active() {
            return Err(UpgradeModeError::FinalizeNotReached);
        }
        Ok(self.close())
    }

    /// Close the window once `max_period` has elapsed since activation.
    pub fn force_cancel(
        &mut self,
        now: Timestamp,
        max_period: u64,
        allow_after_finalize: bool,
    ) -> Result<u64, UpgradeModeError> {
        let elapsed = self.elapsed(now).ok_or(UpgradeModeError::NotActive)?;
        if self.is_finalize_active() && !allow_after_finalize {
            return Err(UpgradeModeError::AlreadyFinalized);
        }
        if elapsed < max_period {
            return Err(UpgradeModeError::DeadlineNotReached);
        }
        Ok(self.close())
    }

    /// JSON persistence format for hosts
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let process: UpgradeProcess =
            serde_json::from_str(json).map_err(|e| ConfigError::Serialization(e.to_string()))?;
        process.check_consistency()?;
        Ok(process)
    }

    pub(crate) fn check_consistency(&self) -> Result<(), ConfigError> {
        if self.is_active() && self.version == 0 {
            return Err(ConfigError::InconsistentSnapshot(
                "active window with version 0".to_string(),
            ));
        }
        Ok(())
    }

    fn close(&mut self) -> u64 {
        self.status = UpgradeStatus::Idle;
        self.version
    }
}
