//! Challenge-response authentication flows.
//!
//! Pairing mode is a single clear-text tag exchange and a wrong answer is
//! the caller's problem. Secure mode wraps the tag in AES under the
//! token's encryption key, and any cryptographic defect in the answer is
//! destructive: the manager resets the security settings before the
//! failure is reported.

use bytes::Bytes;
use tracing::{debug, warn};

use skl_crypto::kdf::{self, MATERIAL_LEN};
use skl_crypto::rand::random_array;

use crate::errors::{CoreError, SecurityError};
use crate::keys::{EncryptionKey, PairingKey};
use crate::link::SecurityMode;
use crate::transport::{ButtonReport, Command, CommandReply, RadioTransport};
use crate::types::ButtonState;

/// Challenge length for both modes.
const CHALLENGE_LEN: usize = 16;

/// Cryptographic verdict of a completed challenge exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthVerdict {
    Successful,
    /// Wrong or rejected pairing-mode answer. Non-destructive.
    PairingFailed,
    /// Secure-mode defect; carries full-reset severity.
    Compromised(SecurityError),
}

/// Pairing-mode challenge: the token proves it stored the same pairing
/// key by answering with the HMAC tag over our challenge.
pub(crate) async fn run_pairing_challenge(
    transport: &dyn RadioTransport,
    key: &PairingKey,
) -> Result<AuthVerdict, CoreError> {
    let challenge = random_array::<CHALLENGE_LEN>()?;
    let expected = kdf::response_tag(key.material(), &challenge);

    let reply = transport
        .send_command(Command::PairingChallenge {
            challenge: Bytes::copy_from_slice(&challenge),
        })
        .await?;

    match reply {
        CommandReply::PairingResponse { tag } => {
            if kdf::tags_match(&expected, &tag) {
                Ok(AuthVerdict::Successful)
            } else {
                debug!("pairing challenge answered with a wrong tag");
                Ok(AuthVerdict::PairingFailed)
            }
        }
        CommandReply::PairingRejected => Ok(AuthVerdict::PairingFailed),
        other => {
            debug!(?other, "unexpected reply to pairing challenge");
            Ok(AuthVerdict::PairingFailed)
        }
    }
}

/// Secure-mode challenge: only a holder of both the pairing key and the
/// encryption key can produce the sealed tag we expect.
pub(crate) async fn run_secure_challenge(
    transport: &dyn RadioTransport,
    encryption_key: &EncryptionKey,
    key: &PairingKey,
) -> Result<AuthVerdict, CoreError> {
    let nonce = random_array::<CHALLENGE_LEN>()?;
    let expected = kdf::response_tag(key.material(), &nonce);

    let reply = transport
        .send_command(Command::SecureChallenge {
            nonce: Bytes::copy_from_slice(&nonce),
        })
        .await?;

    let sealed = match reply {
        CommandReply::SecureResponse { sealed } => sealed,
        other => {
            warn!(?other, "secure challenge answered with the wrong reply shape");
            return Ok(AuthVerdict::Compromised(SecurityError::MalformedResponse));
        }
    };

    match skl_crypto::decrypt(&sealed, &encryption_key.hex()) {
        Ok(tag) if tag.len() == MATERIAL_LEN => {
            if kdf::tags_match(&expected, &tag) {
                Ok(AuthVerdict::Successful)
            } else {
                warn!("secure challenge tag mismatch");
                Ok(AuthVerdict::Compromised(SecurityError::ResponseMismatch))
            }
        }
        Ok(_) => {
            warn!("secure challenge tag has the wrong length");
            Ok(AuthVerdict::Compromised(SecurityError::MalformedResponse))
        }
        Err(_) => {
            warn!("secure challenge response failed to decrypt");
            Ok(AuthVerdict::Compromised(SecurityError::DecryptFailed))
        }
    }
}

/// What to do with a button report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ButtonJudgement {
    Deliver(ButtonState),
    /// Invalid encrypted report; full-reset severity.
    SecurityFault,
}

/// Authenticate a button report against the current security mode.
pub(crate) fn judge_button(report: &ButtonReport, mode: &SecurityMode) -> ButtonJudgement {
    match report {
        ButtonReport::Unsupported => ButtonJudgement::Deliver(ButtonState::NotAvailable),
        ButtonReport::Plain { pressed: true } => ButtonJudgement::Deliver(ButtonState::Pressed),
        ButtonReport::Plain { pressed: false } => ButtonJudgement::Deliver(ButtonState::Released),
        ButtonReport::Sealed { payload } => match mode {
            SecurityMode::Secure { encryption_key, .. } => {
                match skl_crypto::decrypt(payload, &encryption_key.hex()) {
                    Ok(plain) if plain.as_slice() == [0x01] => {
                        ButtonJudgement::Deliver(ButtonState::SecurePressed)
                    }
                    Ok(plain) if plain.as_slice() == [0x00] => {
                        ButtonJudgement::Deliver(ButtonState::SecureReleased)
                    }
                    Ok(_) | Err(_) => {
                        warn!("encrypted button report failed authentication");
                        ButtonJudgement::SecurityFault
                    }
                }
            }
            // Encrypted button traffic without a secure configuration is
            // itself an anomaly.
            _ => ButtonJudgement::SecurityFault,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{MockRadio, SimulatedToken};
    use crate::transport::ConnectOptions;
    use crate::types::KeyId;

    async fn secure_session(
        value: u32,
        corrupt: bool,
    ) -> (std::sync::Arc<MockRadio>, EncryptionKey, PairingKey) {
        let token = SimulatedToken::in_service(KeyId::new("auth-test"));
        let (radio, _events) = MockRadio::new(token);
        radio
            .connect(&KeyId::new("auth-test"), ConnectOptions::default())
            .await
            .unwrap();

        let key = PairingKey::new(value).unwrap();
        let encryption_key = crate::config::write_encryption_key(radio.as_ref()).await.unwrap();
        crate::config::write_sealed_pairing_key(radio.as_ref(), &encryption_key, &key)
            .await
            .unwrap();
        radio.set_corrupt_auth_response(corrupt);
        (radio, encryption_key, key)
    }

    #[tokio::test]
    async fn secure_challenge_passes_with_the_right_keys() {
        let (radio, encryption_key, key) = secure_session(482_913, false).await;
        let verdict = run_secure_challenge(radio.as_ref(), &encryption_key, &key)
            .await
            .unwrap();
        assert_eq!(verdict, AuthVerdict::Successful);
    }

    #[tokio::test]
    async fn corrupted_secure_response_is_a_destructive_mismatch() {
        let (radio, encryption_key, key) = secure_session(482_913, true).await;
        let verdict = run_secure_challenge(radio.as_ref(), &encryption_key, &key)
            .await
            .unwrap();
        assert_eq!(
            verdict,
            AuthVerdict::Compromised(SecurityError::ResponseMismatch)
        );
    }

    #[tokio::test]
    async fn wrong_encryption_key_cannot_open_the_response() {
        let (radio, _encryption_key, key) = secure_session(482_913, false).await;
        let foreign = EncryptionKey::generate().unwrap();
        let verdict = run_secure_challenge(radio.as_ref(), &foreign, &key)
            .await
            .unwrap();
        assert_eq!(verdict, AuthVerdict::Compromised(SecurityError::DecryptFailed));
    }

    #[tokio::test]
    async fn pairing_challenge_round_trip() {
        let token = SimulatedToken::in_service(KeyId::new("p"));
        let (radio, _events) = MockRadio::new(token);
        radio
            .connect(&KeyId::new("p"), ConnectOptions::default())
            .await
            .unwrap();

        let key = PairingKey::new(31_415).unwrap();
        crate::config::write_pairing_key(radio.as_ref(), &key).await.unwrap();

        let verdict = run_pairing_challenge(radio.as_ref(), &key).await.unwrap();
        assert_eq!(verdict, AuthVerdict::Successful);

        // A host holding a different key sees a non-destructive failure.
        let other = PairingKey::new(31_416).unwrap();
        let verdict = run_pairing_challenge(radio.as_ref(), &other).await.unwrap();
        assert_eq!(verdict, AuthVerdict::PairingFailed);
    }

    #[tokio::test]
    async fn rejected_pairing_challenge_is_non_destructive() {
        let token = SimulatedToken::in_service(KeyId::new("p"));
        let (radio, _events) = MockRadio::new(token);
        radio
            .connect(&KeyId::new("p"), ConnectOptions::default())
            .await
            .unwrap();
        let key = PairingKey::new(1).unwrap();
        crate::config::write_pairing_key(radio.as_ref(), &key).await.unwrap();
        radio.set_reject_pairing(true);

        let verdict = run_pairing_challenge(radio.as_ref(), &key).await.unwrap();
        assert_eq!(verdict, AuthVerdict::PairingFailed);
    }

    #[test]
    fn button_judgement_covers_the_report_shapes() {
        let key = PairingKey::new(9).unwrap();
        let encryption_key = EncryptionKey::generate().unwrap();
        let mode = SecurityMode::Secure {
            encryption_key: encryption_key.clone(),
            key,
        };

        let pressed = skl_crypto::encrypt(&[0x01], &encryption_key.hex()).unwrap();
        assert_eq!(
            judge_button(&ButtonReport::Sealed { payload: pressed.into() }, &mode),
            ButtonJudgement::Deliver(ButtonState::SecurePressed)
        );

        let released = skl_crypto::encrypt(&[0x00], &encryption_key.hex()).unwrap();
        assert_eq!(
            judge_button(&ButtonReport::Sealed { payload: released.into() }, &mode),
            ButtonJudgement::Deliver(ButtonState::SecureReleased)
        );

        let garbage = Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            judge_button(&ButtonReport::Sealed { payload: garbage }, &mode),
            ButtonJudgement::SecurityFault
        );

        assert_eq!(
            judge_button(&ButtonReport::Unsupported, &mode),
            ButtonJudgement::Deliver(ButtonState::NotAvailable)
        );
        assert_eq!(
            judge_button(&ButtonReport::Plain { pressed: true }, &SecurityMode::Convenience),
            ButtonJudgement::Deliver(ButtonState::Pressed)
        );
    }
}
