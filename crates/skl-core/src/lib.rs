//! SmartKey Link core - session logic for the SmartKey security token.
//!
//! This crate implements:
//! - Token discovery over a bounded search interval
//! - The at-most-one-link security state and its universal reset
//! - The connection state machine with timeout-bounded transitions
//! - Three-mode configuration provisioning (convenience, pairing, secure)
//! - Challenge-response authentication, including the secure-mode
//!   button-event channel
//! - The radio transport boundary and the ordered event channel

#![forbid(unsafe_code)]

// Core state machines
pub mod connection;
pub mod link;

// Protocol engines
mod auth;
mod config;

// Services
pub mod manager;
pub mod registry;
pub mod transport;

// Supporting modules
pub mod errors;
pub mod events;
pub mod harness;
pub mod keys;
pub mod types;
