//! Key material value objects.
//!
//! Both are opaque: `Debug` never prints secret bytes, and the backing
//! material is wiped on drop.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use skl_crypto::cipher::{CryptoError, KEY_LEN};
use skl_crypto::kdf::{self, MATERIAL_LEN};
use skl_crypto::rand::random_array;

/// Largest pairing value the token accepts.
pub const PAIRING_KEY_MAX: u32 = 999_999;

/// Validated pairing secret.
///
/// Construction fails outside `0..=999_999`. Only the configuration and
/// authentication protocols touch the derived material.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PairingKey {
    value: u32,
    material: [u8; MATERIAL_LEN],
}

impl PairingKey {
    /// Build a pairing key from its numeric value, or `None` when the
    /// value is out of range.
    pub fn new(value: u32) -> Option<Self> {
        if value > PAIRING_KEY_MAX {
            return None;
        }
        Some(Self {
            value,
            material: kdf::pairing_material(value),
        })
    }

    /// Raw numeric value, written to the token in the clear in pairing
    /// mode.
    pub(crate) fn value(&self) -> u32 {
        self.value
    }

    /// Derived challenge-response material.
    pub(crate) fn material(&self) -> &[u8; MATERIAL_LEN] {
        &self.material
    }
}

impl fmt::Debug for PairingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PairingKey(..)")
    }
}

impl PartialEq for PairingKey {
    fn eq(&self, other: &Self) -> bool {
        kdf::tags_match(&self.material, &other.material)
    }
}

impl Eq for PairingKey {}

/// Random 128-bit encryption key provisioned on the token in secure mode.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    raw: [u8; KEY_LEN],
}

impl EncryptionKey {
    /// Draw a fresh key from the CSPRNG.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self {
            raw: random_array::<KEY_LEN>()?,
        })
    }

    /// Raw bytes, written to the token during secure step one.
    pub(crate) fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.raw
    }

    /// Hex form expected by the cipher.
    pub(crate) fn hex(&self) -> String {
        hex::encode(self.raw)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        kdf::tags_match(&self.raw, &other.raw)
    }
}

impl Eq for EncryptionKey {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_values_above_the_range() {
        assert!(PairingKey::new(1_000_000).is_none());
        assert!(PairingKey::new(u32::MAX).is_none());
    }

    #[test]
    fn accepts_the_range_bounds() {
        assert!(PairingKey::new(0).is_some());
        assert!(PairingKey::new(999_999).is_some());
    }

    #[test]
    fn debug_output_is_opaque() {
        let key = PairingKey::new(482_913).unwrap();
        assert_eq!(format!("{key:?}"), "PairingKey(..)");
        let enc = EncryptionKey::generate().unwrap();
        assert_eq!(format!("{enc:?}"), "EncryptionKey(..)");
    }

    #[test]
    fn material_round_trips_through_the_derivation() {
        let key = PairingKey::new(482_913).unwrap();
        assert_eq!(key.material(), &skl_crypto::kdf::pairing_material(482_913));
    }

    #[test]
    fn generated_encryption_keys_are_distinct() {
        let a = EncryptionKey::generate().unwrap();
        let b = EncryptionKey::generate().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.hex().len(), 32);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn construction_succeeds_exactly_inside_the_range(value in any::<u32>()) {
                prop_assert_eq!(PairingKey::new(value).is_some(), value <= PAIRING_KEY_MAX);
            }
        }
    }
}
