//! OS-backed random byte source.
//!
//! The secure-mode encryption key and every challenge nonce derive their
//! strength entirely from this source, so everything routes through
//! `getrandom`.

use getrandom::getrandom;

use crate::cipher::CryptoError;

/// Fill a vector with `len` cryptographically secure random bytes.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut out = vec![0u8; len];
    getrandom(&mut out).map_err(|_| CryptoError::Rng)?;
    Ok(out)
}

/// Fixed-size variant of [`random_bytes`].
pub fn random_array<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    getrandom(&mut out).map_err(|_| CryptoError::Rng)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_length_is_honored() {
        assert_eq!(random_bytes(0).unwrap().len(), 0);
        assert_eq!(random_bytes(37).unwrap().len(), 37);
    }

    #[test]
    fn consecutive_draws_differ() {
        let a = random_array::<16>().unwrap();
        let b = random_array::<16>().unwrap();
        assert_ne!(a, b);
    }
}
