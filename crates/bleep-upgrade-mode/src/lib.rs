// UPGRADE MODE: STAGED, TIME-GATED PROTOCOL UPGRADES
pub mod authority;
pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod state;
pub mod upgrade_mode;

pub use authority::{AuthorityGuard, Identity};

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};

pub use self::config::{
    UpgradeModeConfig, DEFAULT_MAX_PERIOD_SECS, DEFAULT_WAIT_PERIOD_SECS, ENV_PREFIX,
};

pub use errors::{ConfigError, UpgradeModeError};

pub use events::{EventSink, LogEventSink, RecordingEventSink, UpgradeEvent};

pub use state::{FinalizeCheck, UpgradeProcess, UpgradeStatus};

pub use upgrade_mode::{PrivilegedOperation, UpgradeMode, UpgradeModeRecord};

use std::path::Path;
use std::sync::Arc;

/// Initialize an upgrade mode on the system clock, logging events
///
/// SAFETY: Loads and validates configuration before any state exists;
/// the returned component starts idle at version 0.
pub fn init_upgrade_mode(
    config_path: Option<&Path>,
    master: Identity,
) -> Result<UpgradeMode, ConfigError> {
    let config = UpgradeModeConfig::load(config_path)?;
    UpgradeMode::new(
        config,
        master,
        Arc::new(SystemClock::new()),
        Arc::new(LogEventSink),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_upgrade_mode_starts_idle() {
        let master = Identity::new(vec![0x42; 20]);
        let mode = init_upgrade_mode(None, master.clone()).unwrap();

        assert!(!mode.is_active());
        assert_eq!(mode.current_version(), 0);
        assert_eq!(mode.master(), &master);
        assert!(mode.max_period() > mode.wait_period());
        assert_eq!(mode.activate(&master), Ok(1));
        assert!(mode.activated_at().is_some());
    }
}
