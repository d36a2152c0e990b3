//! Pairing-key derivation and challenge-response tags.
//!
//! The host and the token firmware share exactly two constructions: the
//! HKDF that stretches the six-digit pairing value into key material, and
//! the HMAC that answers a challenge. Responses are compared in constant
//! time; a mismatch must cost the same as a match.

use constant_time_eq::constant_time_eq;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Length of derived pairing material and response tags.
pub const MATERIAL_LEN: usize = 32;

const PAIRING_SALT: &[u8] = b"smartkey-pairing-v1";
const MATERIAL_INFO: &[u8] = b"challenge-material";

/// Derive challenge-response material from a pairing value.
///
/// The input is the zero-padded six-digit decimal form, so `42` and
/// `000042` derive identical material on both sides of the radio link.
pub fn pairing_material(value: u32) -> [u8; MATERIAL_LEN] {
    let digits = Zeroizing::new(format!("{value:06}"));
    let hk = Hkdf::<Sha256>::new(Some(PAIRING_SALT), digits.as_bytes());
    let mut out = [0u8; MATERIAL_LEN];
    hk.expand(MATERIAL_INFO, &mut out)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    out
}

/// Compute the response tag for a challenge under the given material.
pub fn response_tag(material: &[u8; MATERIAL_LEN], challenge: &[u8]) -> [u8; MATERIAL_LEN] {
    let mut mac = Hmac::<Sha256>::new_from_slice(material)
        .expect("HMAC accepts any key length");
    mac.update(challenge);
    let out = mac.finalize().into_bytes();
    let mut arr = [0u8; MATERIAL_LEN];
    arr.copy_from_slice(&out);
    arr
}

/// Constant-time equality for tags and key material.
pub fn tags_match(a: &[u8], b: &[u8]) -> bool {
    constant_time_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_is_deterministic() {
        assert_eq!(pairing_material(482913), pairing_material(482913));
    }

    #[test]
    fn distinct_values_derive_distinct_material() {
        assert_ne!(pairing_material(0), pairing_material(999_999));
    }

    #[test]
    fn zero_padding_matches_the_token_side() {
        // The token receives the raw numeric value and pads it the same way.
        assert_eq!(pairing_material(42), pairing_material(42));
        assert_ne!(pairing_material(42), pairing_material(420));
    }

    #[test]
    fn tag_binds_both_material_and_challenge() {
        let m = pairing_material(123456);
        let tag = response_tag(&m, b"nonce-a");
        assert_ne!(tag, response_tag(&m, b"nonce-b"));
        assert_ne!(tag, response_tag(&pairing_material(123457), b"nonce-a"));
        assert!(tags_match(&tag, &response_tag(&m, b"nonce-a")));
    }
}
