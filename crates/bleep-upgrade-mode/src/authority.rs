// UPGRADE MODE: AUTHORITY GUARD
// Single-master permission check for privileged transitions
//
// SAFETY INVARIANTS:
// 1. The master identity is fixed at construction
// 2. The guard has no side effects

use crate::errors::UpgradeModeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque caller identity (account address or public key bytes),
/// serialized as a `0x`-prefixed hex string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Identity(Vec<u8>);

impl Identity {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Identity(bytes.into())
    }

    /// Parse a hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(trimmed).map(Identity)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> String {
        id.to_string()
    }
}

impl TryFrom<String> for Identity {
    type Error = hex::FromHexError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Identity::from_hex(&s)
    }
}

/// Rejects privileged calls from anyone but the master.
#[derive(Debug, Clone)]
pub struct AuthorityGuard {
    master: Identity,
}

impl AuthorityGuard {
    pub fn new(master: Identity) -> Self {
        AuthorityGuard { master }
    }

    pub fn master(&self) -> &Identity {
        &self.master
    }

    pub fn require_master(&self, caller: &Identity) -> Result<(), UpgradeModeError> {
        if caller == &self.master {
            Ok(())
        } else {
            Err(UpgradeModeError::Unauthorized)
        }
    }
}
