//! Property tests across the crypto surface.

use proptest::prelude::*;

use crate::cipher::{decrypt, encrypt};
use crate::kdf::{pairing_material, response_tag, tags_match};

proptest! {
    #[test]
    fn seal_open_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..256),
                            key in proptest::collection::vec(any::<u8>(), 16..=16)) {
        let hex_key = hex::encode(&key);
        let blob = encrypt(&payload, &hex_key).unwrap();
        prop_assert_eq!(decrypt(&blob, &hex_key).unwrap(), payload);
    }

    #[test]
    fn response_tags_verify_only_with_matching_material(a in 0u32..=999_999, b in 0u32..=999_999,
                                                        challenge in proptest::collection::vec(any::<u8>(), 16..=16)) {
        let tag = response_tag(&pairing_material(a), &challenge);
        let check = response_tag(&pairing_material(b), &challenge);
        prop_assert_eq!(tags_match(&tag, &check), a == b);
    }
}
