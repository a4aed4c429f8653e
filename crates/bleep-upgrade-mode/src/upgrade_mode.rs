// UPGRADE MODE: GOVERNED STATE MACHINE
// Master-gated, time-bounded upgrade windows with a public finalize poke
//
// SAFETY INVARIANTS:
// 1. Every privileged operation passes the authority guard before touching state
// 2. All mutations are serialized behind a single lock
// 3. Clock readings are taken under the lock, in serialization order
// 4. Events are emitted under the lock, in transition order
// 5. A rejected call never mutates state or emits events
// 6. A resumed record keeps its pinned master; a different claimant is refused

use crate::authority::{AuthorityGuard, Identity};
use crate::clock::{Clock, Timestamp};
use crate::config::UpgradeModeConfig;
use crate::errors::{ConfigError, UpgradeModeError};
use crate::events::{EventSink, UpgradeEvent};
use crate::state::{FinalizeCheck, UpgradeProcess};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Privileged operations, used for log context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegedOperation {
    Activate,
    Cancel,
    Finish,
    ForceCancel,
}

impl fmt::Display for PrivilegedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrivilegedOperation::Activate => "activate",
            PrivilegedOperation::Cancel => "cancel",
            PrivilegedOperation::Finish => "finish",
            PrivilegedOperation::ForceCancel => "force_cancel",
        };
        f.write_str(name)
    }
}

/// Persisted form of an upgrade mode: the process state together with the
/// master it was created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeModeRecord {
    pub master: Identity,
    pub process: UpgradeProcess,
}

impl UpgradeModeRecord {
    pub fn genesis(master: Identity) -> Self {
        UpgradeModeRecord {
            master,
            process: UpgradeProcess::genesis(),
        }
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let record: UpgradeModeRecord =
            serde_json::from_str(json).map_err(|e| ConfigError::Serialization(e.to_string()))?;
        record.process.check_consistency()?;
        Ok(record)
    }
}

/// Host-facing upgrade mode component.
///
/// Share it as `Arc<UpgradeMode>`; every operation takes `&self`.
pub struct UpgradeMode {
    guard: AuthorityGuard,
    config: UpgradeModeConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    process: Mutex<UpgradeProcess>,
}

impl fmt::Debug for UpgradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeMode")
            .field("master", self.guard.master())
            .field("config", &self.config)
            .field("process", &*self.process.lock())
            .finish()
    }
}

impl UpgradeMode {
    /// Create an idle upgrade mode at version 0.
    pub fn new(
        config: UpgradeModeConfig,
        master: Identity,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        Self::restore(config, master, clock, events, UpgradeProcess::genesis())
    }

    /// Resume from a stored process snapshot.
    pub fn restore(
        config: UpgradeModeConfig,
        master: Identity,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        snapshot: UpgradeProcess,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        snapshot.check_consistency()?;

        info!(
            "Upgrade mode ready (master {}, version {}, wait {}s, max {}s)",
            master,
            snapshot.version(),
            config.wait_period_secs,
            config.max_period_secs
        );

        Ok(UpgradeMode {
            guard: AuthorityGuard::new(master),
            config,
            clock,
            events,
            process: Mutex::new(snapshot),
        })
    }

    /// Resume from a persisted record.
    ///
    /// SAFETY: The master is taken from the record. A `claimed_master` that
    /// differs from it is refused, so a stored window can only be driven by
    /// the identity that opened it.
    pub fn resume(
        config: UpgradeModeConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        record: UpgradeModeRecord,
        claimed_master: Option<&Identity>,
    ) -> Result<Self, ConfigError> {
        if let Some(claimed) = claimed_master {
            if claimed != &record.master {
                warn!(
                    "Refusing to resume upgrade mode: master {} does not match pinned {}",
                    claimed, record.master
                );
                return Err(ConfigError::MasterMismatch {
                    pinned: record.master.to_string(),
                    claimed: claimed.to_string(),
                });
            }
        }
        Self::restore(config, record.master, clock, events, record.process)
    }

    /// Open a new upgrade window and return its version.
    pub fn activate(&self, caller: &Identity) -> Result<u64, UpgradeModeError> {
        self.privileged(caller, PrivilegedOperation::Activate, |process, now| {
            let version = process.activate(now)?;
            Ok((version, UpgradeEvent::UpgradeModeActivated(version)))
        })
    }

    /// Advance to the finalize checkpoint if the wait period has elapsed.
    ///
    /// Callable by anyone. Returns whether the checkpoint is reached after
    /// the call; `false` is a normal outcome, not a failure.
    pub fn check_finalize(&self, caller: &Identity) -> bool {
        let mut process = self.process.lock();
        let now = self.clock.now();

        match process.check_finalize(now, self.config.wait_period_secs) {
            FinalizeCheck::Reached => {
                let version = process.version();
                info!(
                    "Finalize status reached for upgrade {} at {} (poked by {})",
                    version, now, caller
                );
                self.events
                    .emit(UpgradeEvent::UpgradeModeFinalizeStatusActivated(version));
                true
            }
            FinalizeCheck::AlreadyReached => true,
            FinalizeCheck::Waiting => {
                debug!(
                    "Finalize not yet available for upgrade {} ({}s of {}s elapsed)",
                    process.version(),
                    process.elapsed(now).unwrap_or(0),
                    self.config.wait_period_secs
                );
                false
            }
            FinalizeCheck::Inactive => false,
        }
    }

    /// Close the open window without completing it.
    pub fn cancel(&self, caller: &Identity) -> Result<u64, UpgradeModeError> {
        let allow = self.config.allow_cancel_after_finalize;
        self.privileged(caller, PrivilegedOperation::Cancel, |process, _| {
            let version = process.cancel(allow)?;
            Ok((version, UpgradeEvent::UpgradeCanceled(version)))
        })
    }

    /// Complete a window that has reached the finalize checkpoint.
    pub fn finish(&self, caller: &Identity) -> Result<u64, UpgradeModeError> {
        self.privileged(caller, PrivilegedOperation::Finish, |process, _| {
            let version = process.finish()?;
            Ok((version, UpgradeEvent::UpgradeCompleted(version)))
        })
    }

    /// Close a window that has stayed open for at least the max period.
    pub fn force_cancel(&self, caller: &Identity) -> Result<u64, UpgradeModeError> {
        let max_period = self.config.max_period_secs;
        let allow = self.config.allow_force_cancel_after_finalize;
        self.privileged(caller, PrivilegedOperation::ForceCancel, |process, now| {
            let version = process.force_cancel(now, max_period, allow)?;
            Ok((version, UpgradeEvent::UpgradeForciblyCanceled(version)))
        })
    }

    pub fn is_active(&self) -> bool {
        self.process.lock().is_active()
    }

    pub fn is_finalize_active(&self) -> bool {
        self.process.lock().is_finalize_active()
    }

    pub fn current_version(&self) -> u64 {
        self.process.lock().version()
    }

    pub fn wait_period(&self) -> u64 {
        self.config.wait_period_secs
    }

    pub fn max_period(&self) -> u64 {
        self.config.max_period_secs
    }

    pub fn activated_at(&self) -> Option<Timestamp> {
        self.process.lock().activated_at()
    }

    /// Earliest time at which `check_finalize` can succeed, while active
    pub fn finalize_available_at(&self) -> Option<Timestamp> {
        self.activated_at()
            .map(|at| at.saturating_add(self.config.wait_period_secs))
    }

    /// Earliest time at which `force_cancel` can succeed, while active
    pub fn force_cancel_available_at(&self) -> Option<Timestamp> {
        self.activated_at()
            .map(|at| at.saturating_add(self.config.max_period_secs))
    }

    pub fn master(&self) -> &Identity {
        self.guard.master()
    }

    pub fn config(&self) -> &UpgradeModeConfig {
        &self.config
    }

    /// Consistent copy of the current process state
    pub fn snapshot(&self) -> UpgradeProcess {
        *self.process.lock()
    }

    /// Snapshot together with the pinned master, for persistence
    pub fn record(&self) -> UpgradeModeRecord {
        UpgradeModeRecord {
            master: self.guard.master().clone(),
            process: self.snapshot(),
        }
    }

    /// Authority check, then one atomic transition under the lock.
    ///
    /// All privileged operations go through here so the guard cannot be skipped.
    fn privileged<F>(
        &self,
        caller: &Identity,
        operation: PrivilegedOperation,
        transition: F,
    ) -> Result<u64, UpgradeModeError>
    where
        F: FnOnce(&mut UpgradeProcess, Timestamp) -> Result<(u64, UpgradeEvent), UpgradeModeError>,
    {
        if let Err(e) = self.guard.require_master(caller) {
            warn!("{} rejected for caller {}: {}", operation, caller, e);
            return Err(e);
        }

        let mut process = self.process.lock();
        let now = self.clock.now();

        match transition(&mut *process, now) {
            Ok((version, event)) => {
                info!("{} succeeded for upgrade {} at {}", operation, version, now);
                self.events.emit(event);
                Ok(version)
            }
            Err(e) => {
                warn!(
                    "{} rejected at {} (version {}): {}",
                    operation,
                    now,
                    process.version(),
                    e
                );
                Err(e)
            }
        }
    }
}
