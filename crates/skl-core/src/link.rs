//! Link and security state.
//!
//! At most one token is linked at a time, and every key the host holds
//! for it lives in the mode variant it belongs to. Resetting drops the
//! whole structure, key material included.

use crate::errors::ValidationError;
use crate::keys::{EncryptionKey, PairingKey};
use crate::types::{ConfigState, KeyId, SmartKey};

/// Host-side security mode for the linked token. Each variant carries
/// exactly the key material valid for that mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityMode {
    Unconfigured,
    Convenience,
    Pairing {
        key: PairingKey,
    },
    /// Secure step one done: the token holds an encryption key but no
    /// pairing key yet. Not usable for authentication.
    SecurePrepared {
        encryption_key: EncryptionKey,
    },
    Secure {
        encryption_key: EncryptionKey,
        key: PairingKey,
    },
}

impl SecurityMode {
    pub fn config_state(&self) -> ConfigState {
        match self {
            SecurityMode::Unconfigured => ConfigState::Unconfigured,
            SecurityMode::Convenience => ConfigState::Convenience,
            SecurityMode::Pairing { .. } => ConfigState::Pairing,
            SecurityMode::SecurePrepared { .. } => ConfigState::SecurePrepared,
            SecurityMode::Secure { .. } => ConfigState::Secure,
        }
    }

    /// Modes whose host record carries key material. A token-side
    /// disagreement here is a security anomaly, not drift.
    pub fn carries_keys(&self) -> bool {
        matches!(
            self,
            SecurityMode::Pairing { .. }
                | SecurityMode::SecurePrepared { .. }
                | SecurityMode::Secure { .. }
        )
    }
}

/// The at-most-one-link invariant plus the linked token's mode.
pub struct LinkState {
    linked: Option<SmartKey>,
    mode: SecurityMode,
}

impl LinkState {
    pub fn new() -> Self {
        Self {
            linked: None,
            mode: SecurityMode::Unconfigured,
        }
    }

    /// Link a token. Fails without mutating state when one is linked.
    pub fn link(&mut self, key: SmartKey) -> Result<(), ValidationError> {
        if self.linked.is_some() {
            return Err(ValidationError::AlreadyLinked);
        }
        self.linked = Some(key);
        self.mode = SecurityMode::Unconfigured;
        Ok(())
    }

    /// Drop the link, its key material, and the configuration record.
    /// Always succeeds.
    pub fn reset(&mut self) {
        self.linked = None;
        self.mode = SecurityMode::Unconfigured;
    }

    pub fn linked(&self) -> Option<&SmartKey> {
        self.linked.as_ref()
    }

    pub fn require_linked(&self) -> Result<&SmartKey, ValidationError> {
        self.linked.as_ref().ok_or(ValidationError::NoKeyLinked)
    }

    pub fn is_linked_id(&self, id: &KeyId) -> bool {
        self.linked.as_ref().map(|k| &k.id == id).unwrap_or(false)
    }

    /// Replace the linked snapshot with a fresher observation of the same
    /// token.
    pub fn refresh(&mut self, snapshot: SmartKey) {
        if let Some(current) = &self.linked {
            if current.id == snapshot.id {
                self.linked = Some(snapshot);
            }
        }
    }

    pub fn mode(&self) -> &SecurityMode {
        &self.mode
    }

    /// Commit a new mode and mirror its configuration state into the
    /// linked snapshot.
    pub fn set_mode(&mut self, mode: SecurityMode) {
        if let Some(linked) = self.linked.as_mut() {
            linked.config = mode.config_state();
        }
        self.mode = mode;
    }

    /// Record a token-reported configuration state in the snapshot
    /// without touching the host-side mode or its key material.
    pub fn set_snapshot_config(&mut self, config: ConfigState) {
        if let Some(linked) = self.linked.as_mut() {
            linked.config = config;
        }
    }

    /// Record a token-reported battery level in the snapshot.
    pub fn set_snapshot_battery(&mut self, battery: u8) {
        if let Some(linked) = self.linked.as_mut() {
            linked.battery = battery;
        }
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Advertisement, CaseType, FirmwareVersion, HardwareRevision};
    use chrono::Utc;

    fn snapshot(id: &str) -> SmartKey {
        let adv = Advertisement {
            firmware: FirmwareVersion(6100),
            rssi: -50,
            battery: 77,
            case: CaseType::Tower,
            hardware: HardwareRevision::Hw1011_006,
            service: true,
            config: ConfigState::Unconfigured,
        };
        SmartKey::from_advertisement(KeyId::new(id), &adv, Utc::now())
    }

    #[test]
    fn second_link_leaves_the_first_untouched() {
        let mut link = LinkState::new();
        link.link(snapshot("first")).unwrap();
        let err = link.link(snapshot("second")).unwrap_err();
        assert_eq!(err, ValidationError::AlreadyLinked);
        assert_eq!(link.linked().unwrap().id, KeyId::new("first"));
    }

    #[test]
    fn reset_clears_link_and_mode_unconditionally() {
        let mut link = LinkState::new();
        link.link(snapshot("t")).unwrap();
        link.set_mode(SecurityMode::SecurePrepared {
            encryption_key: EncryptionKey::generate().unwrap(),
        });
        link.reset();
        assert!(link.linked().is_none());
        assert_eq!(link.mode(), &SecurityMode::Unconfigured);
    }

    #[test]
    fn set_mode_mirrors_config_into_the_snapshot() {
        let mut link = LinkState::new();
        link.link(snapshot("t")).unwrap();
        link.set_mode(SecurityMode::Convenience);
        assert_eq!(link.linked().unwrap().config, ConfigState::Convenience);
    }

    #[test]
    fn refresh_ignores_foreign_snapshots() {
        let mut link = LinkState::new();
        link.link(snapshot("t")).unwrap();
        let mut other = snapshot("other");
        other.battery = 1;
        link.refresh(other);
        assert_eq!(link.linked().unwrap().battery, 77);
    }

    #[test]
    fn key_bearing_modes_are_flagged() {
        assert!(!SecurityMode::Unconfigured.carries_keys());
        assert!(!SecurityMode::Convenience.carries_keys());
        assert!(SecurityMode::Pairing {
            key: PairingKey::new(1).unwrap()
        }
        .carries_keys());
    }
}
