//! Radio transport boundary.
//!
//! The radio stack (scanning, connection establishment, characteristic
//! I/O) lives behind this trait. Commands cross the boundary as typed
//! values; the over-the-air byte layout is owned by the implementation
//! and the token firmware. Unsolicited activity arrives as [`RadioEvent`]s
//! on a channel handed to the manager at construction.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::types::{Advertisement, ConfigState, KeyId};

/// Errors from the radio transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("command timed out")]
    Timeout,
    #[error("token unreachable")]
    Unreachable,
    #[error("no active connection")]
    NotConnected,
    #[error("radio unavailable")]
    Unavailable,
}

/// Options for a connection request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub power_saving: bool,
}

/// Typed commands sent to the connected token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ReadConfigState,
    ReadBatteryLevel,
    /// Token-side configuration reset; service mode only.
    ResetConfig,
    /// Provision convenience mode; service mode only.
    ActivateConvenience,
    /// Provision pairing mode with the raw pairing value; service mode
    /// only.
    WritePairingKey { value: u32 },
    /// Secure step one: the fresh encryption key.
    WriteEncryptionKey { key: Bytes },
    /// Secure step two: pairing material sealed under the encryption key.
    WriteSealedPairingKey { sealed: Bytes },
    /// Pairing-mode challenge; the token answers with a tag over it.
    PairingChallenge { challenge: Bytes },
    /// Secure-mode challenge nonce; the token answers with a sealed tag.
    SecureChallenge { nonce: Bytes },
}

/// Replies a token can produce for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Ack,
    Nack,
    ConfigState(ConfigState),
    BatteryLevel(u8),
    PairingResponse { tag: Bytes },
    /// The token refused the pairing challenge outright.
    PairingRejected,
    SecureResponse { sealed: Bytes },
}

/// Transport-side classification of a closed link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClosed {
    /// Link lost without either side asking for it.
    Lost,
    /// The token ended the connection.
    ByToken,
}

/// Button channel report as it leaves the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonReport {
    /// Plain press/release (pairing mode while connected, or any mode
    /// while advertising).
    Plain { pressed: bool },
    /// Encrypted secure-mode report; authenticated by the session layer.
    Sealed { payload: Bytes },
    /// The hardware carries no button.
    Unsupported,
}

/// Unsolicited events pushed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Availability { powered_on: bool },
    Advertisement { id: KeyId, adv: Advertisement },
    /// The token accepted a pending connection request.
    Connected { id: KeyId },
    /// The token refused a pending connection request.
    ConnectFailed { id: KeyId },
    Disconnected { id: KeyId, reason: LinkClosed },
    Button { id: KeyId, report: ButtonReport },
}

/// The consumed radio boundary.
///
/// `connect` submits the request; acceptance or refusal arrives later as a
/// [`RadioEvent`]. `send_command` resolves to the token's reply or a
/// transport error, never both.
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Begin advertising collection. Observations arrive as
    /// [`RadioEvent::Advertisement`]s until [`stop_scan`] is called; the
    /// caller owns the interval timing.
    ///
    /// [`stop_scan`]: RadioTransport::stop_scan
    async fn start_scan(&self) -> Result<(), RadioError>;

    async fn stop_scan(&self);

    async fn connect(&self, id: &KeyId, options: ConnectOptions) -> Result<(), RadioError>;

    async fn send_command(&self, command: Command) -> Result<CommandReply, RadioError>;

    async fn disconnect(&self, id: &KeyId);
}

/// How long a token may take to accept a connection request.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on a configuration or authentication exchange.
pub const PROTOCOL_TIMEOUT: Duration = Duration::from_secs(20);
