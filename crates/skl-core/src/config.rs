//! Configuration protocol flows.
//!
//! Each helper performs the radio I/O for one provisioning step and
//! nothing else; the manager owns preconditions (service mode,
//! connectedness, exclusivity), the 20-second bound, and the state
//! commits between steps.

use bytes::Bytes;
use tracing::debug;

use crate::errors::CoreError;
use crate::keys::{EncryptionKey, PairingKey};
use crate::transport::{Command, CommandReply, RadioTransport};

fn expect_ack(reply: CommandReply) -> Result<(), CoreError> {
    match reply {
        CommandReply::Ack => Ok(()),
        CommandReply::Nack => Err(CoreError::Refused),
        other => {
            debug!(?other, "unexpected reply to configuration command");
            Err(CoreError::Refused)
        }
    }
}

/// Single round trip provisioning convenience mode.
pub(crate) async fn activate_convenience(transport: &dyn RadioTransport) -> Result<(), CoreError> {
    let reply = transport.send_command(Command::ActivateConvenience).await?;
    expect_ack(reply)
}

/// Write the pairing key's raw numeric value in the clear.
pub(crate) async fn write_pairing_key(
    transport: &dyn RadioTransport,
    key: &PairingKey,
) -> Result<(), CoreError> {
    let reply = transport
        .send_command(Command::WritePairingKey { value: key.value() })
        .await?;
    expect_ack(reply)
}

/// Secure step one: generate and write a fresh encryption key.
///
/// A restarted secure attempt always lands here first; the previous
/// encryption key, if any, is overwritten on the token.
pub(crate) async fn write_encryption_key(
    transport: &dyn RadioTransport,
) -> Result<EncryptionKey, CoreError> {
    let encryption_key = EncryptionKey::generate()?;
    let reply = transport
        .send_command(Command::WriteEncryptionKey {
            key: Bytes::copy_from_slice(encryption_key.bytes()),
        })
        .await?;
    expect_ack(reply)?;
    Ok(encryption_key)
}

/// Secure step two: seal the pairing material under the encryption key
/// and write the ciphertext.
pub(crate) async fn write_sealed_pairing_key(
    transport: &dyn RadioTransport,
    encryption_key: &EncryptionKey,
    key: &PairingKey,
) -> Result<(), CoreError> {
    let sealed = skl_crypto::encrypt(key.material(), &encryption_key.hex())?;
    let reply = transport
        .send_command(Command::WriteSealedPairingKey {
            sealed: Bytes::from(sealed),
        })
        .await?;
    expect_ack(reply)
}

/// Token-side configuration reset command.
pub(crate) async fn reset_token_config(transport: &dyn RadioTransport) -> Result<(), CoreError> {
    let reply = transport.send_command(Command::ResetConfig).await?;
    expect_ack(reply)
}
