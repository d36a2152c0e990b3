//! Core vocabulary for the SmartKey link stack.

use std::fmt;

use chrono::{DateTime, Utc};

/// Minimum firmware version this workspace can drive. Tokens below it are
/// discoverable but marked unsupported.
pub const MIN_FIRMWARE: FirmwareVersion = FirmwareVersion(6000);

/// Stable token identifier as reported by the radio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token firmware version. The numeric form `6100` displays as `6.1.0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion(pub u32);

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.0.to_string();
        let mut first = true;
        for c in digits.chars() {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{c}")?;
            first = false;
        }
        Ok(())
    }
}

/// Physical case variants a token ships in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseType {
    SmallRound,
    Tower,
    Pen,
    LargeRound,
    Maxi,
    Unknown,
}

/// Hardware revisions seen in the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareRevision {
    Hw1010_004,
    Hw1011_005,
    Hw1010_005,
    Hw1011_006,
    Unknown,
}

impl HardwareRevision {
    /// Display label, e.g. `1010-004`.
    pub fn label(&self) -> &'static str {
        match self {
            HardwareRevision::Hw1010_004 => "1010-004",
            HardwareRevision::Hw1011_005 => "1011-005",
            HardwareRevision::Hw1010_005 => "1010-005",
            HardwareRevision::Hw1011_006 => "1011-006",
            HardwareRevision::Unknown => "unknown",
        }
    }
}

/// Security configuration provisioned on the token side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigState {
    Unconfigured,
    Convenience,
    Pairing,
    /// Secure mode half-provisioned: the encryption key is set, the
    /// sealed pairing key write is still outstanding.
    SecurePrepared,
    Secure,
}

/// Advertisement attributes reported by the radio for one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub firmware: FirmwareVersion,
    pub rssi: i16,
    pub battery: u8,
    pub case: CaseType,
    pub hardware: HardwareRevision,
    /// True only within the first 30 seconds after the token's power-on
    /// reset; the only window in which destructive configuration works.
    pub service: bool,
    pub config: ConfigState,
}

/// Immutable snapshot of a discovered token. The registry replaces, never
/// mutates, an entry on each new observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartKey {
    pub id: KeyId,
    pub firmware: FirmwareVersion,
    pub rssi: i16,
    pub battery: u8,
    pub case: CaseType,
    pub hardware: HardwareRevision,
    pub service: bool,
    /// Firmware meets [`MIN_FIRMWARE`].
    pub supported: bool,
    pub config: ConfigState,
    /// `None` until first observed in this process lifetime.
    pub last_seen: Option<DateTime<Utc>>,
}

impl SmartKey {
    pub fn from_advertisement(id: KeyId, adv: &Advertisement, seen: DateTime<Utc>) -> Self {
        Self {
            id,
            firmware: adv.firmware,
            rssi: adv.rssi,
            battery: adv.battery.min(100),
            case: adv.case,
            hardware: adv.hardware,
            service: adv.service,
            supported: adv.firmware >= MIN_FIRMWARE,
            config: adv.config,
            last_seen: Some(seen),
        }
    }
}

/// Synchronous result vocabulary for manager operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    /// The operation needs a linked token and none is linked.
    NoKeyLinked,
    /// A token is already linked; reset the security settings first.
    AlreadyLinked,
    /// The linked token has never been located over the radio.
    NotLocated,
    NotConnected,
    NotReady,
    Ready,
    /// The linked token's firmware is below [`MIN_FIRMWARE`].
    FirmwareOutdated,
    OperationFailed,
    /// Another operation is still holding the radio channel.
    Busy,
}

/// Terminal authentication outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Successful,
    /// The pairing-mode challenge was answered wrongly or rejected.
    /// Non-destructive; the caller decides whether to reset.
    PairingFailed,
    Failed,
}

/// Why the connection to the linked token ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Unexpected link loss: distance, battery, packet loss.
    ConnectionLost,
    /// The token terminated the connection.
    TokenTerminated,
    HostRequested,
}

/// Button channel states delivered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    /// Authenticated press while connected in secure mode.
    SecurePressed,
    /// Authenticated release while connected in secure mode.
    SecureReleased,
    /// Plain press (pairing mode while connected, or any mode while
    /// advertising).
    Pressed,
    Released,
    /// An encrypted report failed authentication. The security settings
    /// have already been reset when this is delivered.
    Fault,
    /// The hardware has no button function.
    NotAvailable,
}

/// Radio availability as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adv(firmware: u32) -> Advertisement {
        Advertisement {
            firmware: FirmwareVersion(firmware),
            rssi: -61,
            battery: 88,
            case: CaseType::SmallRound,
            hardware: HardwareRevision::Hw1011_006,
            service: true,
            config: ConfigState::Unconfigured,
        }
    }

    #[test]
    fn firmware_version_displays_dotted() {
        assert_eq!(FirmwareVersion(6100).to_string(), "6.1.0.0");
        assert_eq!(FirmwareVersion(610).to_string(), "6.1.0");
    }

    #[test]
    fn supported_flag_follows_minimum_firmware() {
        let now = Utc::now();
        let ok = SmartKey::from_advertisement(KeyId::new("a"), &adv(6100), now);
        let old = SmartKey::from_advertisement(KeyId::new("b"), &adv(5120), now);
        assert!(ok.supported);
        assert!(!old.supported);
    }

    #[test]
    fn hardware_labels() {
        assert_eq!(HardwareRevision::Hw1010_004.label(), "1010-004");
        assert_eq!(HardwareRevision::Unknown.label(), "unknown");
    }

    #[test]
    fn battery_is_clamped_to_a_percentage() {
        let mut wild = adv(6100);
        wild.battery = 250;
        let key = SmartKey::from_advertisement(KeyId::new("b"), &wild, Utc::now());
        assert_eq!(key.battery, 100);
    }
}
