use thiserror::Error;

/// Rejection reasons for upgrade mode operations.
///
/// SAFETY: Every variant is detected before any mutation, so a rejected
/// call leaves the state machine exactly as it was.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum UpgradeModeError {
    #[error("Caller is not the upgrade master")]
    Unauthorized,

    #[error("Upgrade mode already active")]
    AlreadyActive,

    #[error("Upgrade mode not active")]
    NotActive,

    #[error("Finalize status not reached")]
    FinalizeNotReached,

    #[error("Maximum upgrade period not reached")]
    DeadlineNotReached,

    #[error("Upgrade already finalized")]
    AlreadyFinalized,

    #[error("Upgrade version counter exhausted")]
    VersionExhausted,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Max period ({max}s) must exceed wait period ({wait}s)")]
    InvalidPeriods { wait: u64, max: u64 },

    #[error("Configuration source error: {0}")]
    Source(#[from] ::config::ConfigError),

    #[error("Inconsistent snapshot: {0}")]
    InconsistentSnapshot(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Master {claimed} does not match pinned master {pinned}")]
    MasterMismatch { pinned: String, claimed: String },
}
