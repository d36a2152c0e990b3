//! Symmetric cryptography for the SmartKey link stack.
//!
//! Everything the token protocol needs is symmetric: one fixed AES mode
//! for sealing key material and challenge responses, an OS-backed random
//! source, and the derivation that turns a six-digit pairing key into
//! challenge-response material shared with the token firmware.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod kdf;
pub mod rand;

pub use cipher::{decrypt, encrypt, CryptoError};

#[cfg(test)]
mod proptests;
