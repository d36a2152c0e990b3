//! Test harness for the SmartKey session stack.
//!
//! [`SimulatedToken`] implements the token side of the protocol with the
//! same crypto the host uses, so the host's verification logic is
//! exercised against real material rather than canned replies.
//! [`MockRadio`] is a [`RadioTransport`] with scriptable faults: refuse
//! connects, swallow connect acks, corrupt challenge answers, drop the
//! second secure write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use skl_crypto::kdf::{self, MATERIAL_LEN};

use crate::errors::CoreError;
use crate::events::ManagerEvent;
use crate::keys::PairingKey;
use crate::manager::SmartKeyManager;
use crate::transport::{
    ButtonReport, Command, CommandReply, ConnectOptions, LinkClosed, RadioError, RadioEvent,
    RadioTransport,
};
use crate::types::{
    Advertisement, CaseType, ConfigState, FirmwareVersion, HardwareRevision, KeyId, SmartKey,
    StatusCode,
};

/// Scriptable token faults, all off by default.
#[derive(Debug, Clone)]
pub struct TokenBehavior {
    /// Refuse connection requests outright.
    pub refuse_connects: bool,
    /// Swallow connection requests: no accept, no refusal.
    pub ignore_connects: bool,
    /// Flip a byte in every challenge answer.
    pub corrupt_auth_response: bool,
    /// Refuse pairing challenges.
    pub reject_pairing: bool,
    /// Time out the second secure write.
    pub fail_second_secure_write: bool,
}

impl Default for TokenBehavior {
    fn default() -> Self {
        Self {
            refuse_connects: false,
            ignore_connects: false,
            corrupt_auth_response: false,
            reject_pairing: false,
            fail_second_secure_write: false,
        }
    }
}

/// Token-side protocol implementation.
pub struct SimulatedToken {
    pub id: KeyId,
    pub firmware: FirmwareVersion,
    pub rssi: i16,
    pub battery: u8,
    pub case: CaseType,
    pub hardware: HardwareRevision,
    pub service: bool,
    pub config: ConfigState,
    pub behavior: TokenBehavior,
    pairing_material: Option<[u8; MATERIAL_LEN]>,
    encryption_key_hex: Option<String>,
    commands: Vec<Command>,
}

impl SimulatedToken {
    /// A healthy token inside its 30-second service window.
    pub fn in_service(id: KeyId) -> Self {
        Self {
            id,
            firmware: FirmwareVersion(6100),
            rssi: -58,
            battery: 88,
            case: CaseType::SmallRound,
            hardware: HardwareRevision::Hw1011_006,
            service: true,
            config: ConfigState::Unconfigured,
            behavior: TokenBehavior::default(),
            pairing_material: None,
            encryption_key_hex: None,
            commands: Vec::new(),
        }
    }

    pub fn advertisement(&self) -> Advertisement {
        Advertisement {
            firmware: self.firmware,
            rssi: self.rssi,
            battery: self.battery,
            case: self.case,
            hardware: self.hardware,
            service: self.service,
            config: self.config,
        }
    }

    fn handle(&mut self, command: Command) -> Result<CommandReply, RadioError> {
        self.commands.push(command.clone());
        match command {
            Command::ReadConfigState => Ok(CommandReply::ConfigState(self.config)),
            Command::ReadBatteryLevel => Ok(CommandReply::BatteryLevel(self.battery)),
            Command::ResetConfig => {
                if !self.service {
                    return Ok(CommandReply::Nack);
                }
                self.config = ConfigState::Unconfigured;
                self.pairing_material = None;
                self.encryption_key_hex = None;
                Ok(CommandReply::Ack)
            }
            Command::ActivateConvenience => {
                if !self.service {
                    return Ok(CommandReply::Nack);
                }
                self.config = ConfigState::Convenience;
                self.pairing_material = None;
                self.encryption_key_hex = None;
                Ok(CommandReply::Ack)
            }
            Command::WritePairingKey { value } => {
                if !self.service {
                    return Ok(CommandReply::Nack);
                }
                self.pairing_material = Some(kdf::pairing_material(value));
                self.config = ConfigState::Pairing;
                Ok(CommandReply::Ack)
            }
            Command::WriteEncryptionKey { key } => {
                if !self.service {
                    return Ok(CommandReply::Nack);
                }
                self.encryption_key_hex = Some(hex::encode(&key));
                self.pairing_material = None;
                self.config = ConfigState::SecurePrepared;
                Ok(CommandReply::Ack)
            }
            Command::WriteSealedPairingKey { sealed } => {
                if self.behavior.fail_second_secure_write {
                    return Err(RadioError::Timeout);
                }
                if !self.service || self.config != ConfigState::SecurePrepared {
                    return Ok(CommandReply::Nack);
                }
                let hex_key = self.encryption_key_hex.clone().unwrap_or_default();
                match skl_crypto::decrypt(&sealed, &hex_key) {
                    Ok(material) if material.len() == MATERIAL_LEN => {
                        let mut arr = [0u8; MATERIAL_LEN];
                        arr.copy_from_slice(&material);
                        self.pairing_material = Some(arr);
                        self.config = ConfigState::Secure;
                        Ok(CommandReply::Ack)
                    }
                    _ => Ok(CommandReply::Nack),
                }
            }
            Command::PairingChallenge { challenge } => {
                if self.behavior.reject_pairing {
                    return Ok(CommandReply::PairingRejected);
                }
                match self.pairing_material {
                    Some(material) => {
                        let mut tag = kdf::response_tag(&material, &challenge);
                        if self.behavior.corrupt_auth_response {
                            tag[0] ^= 0xff;
                        }
                        Ok(CommandReply::PairingResponse {
                            tag: Bytes::copy_from_slice(&tag),
                        })
                    }
                    None => Ok(CommandReply::Nack),
                }
            }
            Command::SecureChallenge { nonce } => {
                match (&self.pairing_material, &self.encryption_key_hex) {
                    (Some(material), Some(hex_key)) => {
                        let mut tag = kdf::response_tag(material, &nonce);
                        if self.behavior.corrupt_auth_response {
                            tag[0] ^= 0xff;
                        }
                        let sealed = skl_crypto::encrypt(&tag, hex_key)
                            .expect("token holds a valid encryption key");
                        Ok(CommandReply::SecureResponse {
                            sealed: Bytes::from(sealed),
                        })
                    }
                    _ => Ok(CommandReply::Nack),
                }
            }
        }
    }
}

/// Scriptable in-memory radio.
pub struct MockRadio {
    token: Mutex<SimulatedToken>,
    events: mpsc::UnboundedSender<RadioEvent>,
    scanning: AtomicBool,
    connected: Mutex<Option<KeyId>>,
}

impl MockRadio {
    pub fn new(token: SimulatedToken) -> (Arc<Self>, mpsc::UnboundedReceiver<RadioEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let radio = Arc::new(Self {
            token: Mutex::new(token),
            events: tx,
            scanning: AtomicBool::new(false),
            connected: Mutex::new(None),
        });
        (radio, rx)
    }

    fn token_lock(&self) -> std::sync::MutexGuard<'_, SimulatedToken> {
        self.token.lock().expect("token lock")
    }

    pub fn token_id(&self) -> KeyId {
        self.token_lock().id.clone()
    }

    pub fn token_config(&self) -> ConfigState {
        self.token_lock().config
    }

    pub fn token_holds_material(&self, material: &[u8; MATERIAL_LEN]) -> bool {
        self.token_lock()
            .pairing_material
            .map(|m| kdf::tags_match(&m, material))
            .unwrap_or(false)
    }

    /// Commands the token has processed, in arrival order.
    pub fn commands(&self) -> Vec<Command> {
        self.token_lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.token_lock().commands.clear();
    }

    pub fn set_service(&self, service: bool) {
        self.token_lock().service = service;
    }

    pub fn set_refuse_connects(&self, v: bool) {
        self.token_lock().behavior.refuse_connects = v;
    }

    pub fn set_ignore_connects(&self, v: bool) {
        self.token_lock().behavior.ignore_connects = v;
    }

    pub fn set_corrupt_auth_response(&self, v: bool) {
        self.token_lock().behavior.corrupt_auth_response = v;
    }

    pub fn set_reject_pairing(&self, v: bool) {
        self.token_lock().behavior.reject_pairing = v;
    }

    pub fn set_fail_second_secure_write(&self, v: bool) {
        self.token_lock().behavior.fail_second_secure_write = v;
    }

    /// Push one advertisement if a scan is running.
    pub fn advertise(&self) {
        if !self.scanning.load(Ordering::SeqCst) {
            return;
        }
        let token = self.token_lock();
        let _ = self.events.send(RadioEvent::Advertisement {
            id: token.id.clone(),
            adv: token.advertisement(),
        });
    }

    pub fn push_plain_button(&self, pressed: bool) {
        let id = self.token_id();
        let _ = self.events.send(RadioEvent::Button {
            id,
            report: ButtonReport::Plain { pressed },
        });
    }

    /// Push a correctly sealed secure button report.
    pub fn push_secure_button(&self, pressed: bool) {
        let (id, hex_key) = {
            let token = self.token_lock();
            (token.id.clone(), token.encryption_key_hex.clone())
        };
        let hex_key = hex_key.expect("token is secure-configured");
        let state = if pressed { [0x01] } else { [0x00] };
        let payload = skl_crypto::encrypt(&state, &hex_key).expect("seal button state");
        let _ = self.events.send(RadioEvent::Button {
            id,
            report: ButtonReport::Sealed {
                payload: Bytes::from(payload),
            },
        });
    }

    /// Push an undecryptable secure button report.
    pub fn push_invalid_secure_button(&self) {
        let id = self.token_id();
        let _ = self.events.send(RadioEvent::Button {
            id,
            report: ButtonReport::Sealed {
                payload: Bytes::from_static(&[0xba, 0xad, 0xf0, 0x0d, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
            },
        });
    }

    /// Push a report from hardware without a button.
    pub fn push_unsupported_button(&self) {
        let id = self.token_id();
        let _ = self.events.send(RadioEvent::Button {
            id,
            report: ButtonReport::Unsupported,
        });
    }

    /// Simulate unexpected link loss.
    pub fn drop_link(&self) {
        let id = self.token_id();
        *self.connected.lock().expect("connected lock") = None;
        let _ = self.events.send(RadioEvent::Disconnected {
            id,
            reason: LinkClosed::Lost,
        });
    }

    /// Simulate the token ending the connection.
    pub fn token_terminates(&self) {
        let id = self.token_id();
        *self.connected.lock().expect("connected lock") = None;
        let _ = self.events.send(RadioEvent::Disconnected {
            id,
            reason: LinkClosed::ByToken,
        });
    }

    pub fn set_availability(&self, powered_on: bool) {
        let _ = self.events.send(RadioEvent::Availability { powered_on });
    }
}

#[async_trait]
impl RadioTransport for MockRadio {
    async fn start_scan(&self) -> Result<(), RadioError> {
        self.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) {
        self.scanning.store(false, Ordering::SeqCst);
    }

    async fn connect(&self, id: &KeyId, _options: ConnectOptions) -> Result<(), RadioError> {
        let behavior = self.token_lock().behavior.clone();
        if behavior.ignore_connects {
            return Ok(());
        }
        if behavior.refuse_connects {
            let _ = self.events.send(RadioEvent::ConnectFailed { id: id.clone() });
            return Ok(());
        }
        *self.connected.lock().expect("connected lock") = Some(id.clone());
        let _ = self.events.send(RadioEvent::Connected { id: id.clone() });
        Ok(())
    }

    async fn send_command(&self, command: Command) -> Result<CommandReply, RadioError> {
        if self.connected.lock().expect("connected lock").is_none() {
            return Err(RadioError::NotConnected);
        }
        self.token_lock().handle(command)
    }

    async fn disconnect(&self, _id: &KeyId) {
        *self.connected.lock().expect("connected lock") = None;
    }
}

/// Receive the next manager event, bounded so a missing event fails the
/// test instead of hanging it.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<ManagerEvent>) -> ManagerEvent {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for a manager event")
        .expect("event channel closed")
}

/// Skip events until one matches.
pub async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<ManagerEvent>,
    matches: impl Fn(&ManagerEvent) -> bool,
) -> ManagerEvent {
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

/// Run one search interval and return the discovered token.
pub async fn discover(
    manager: &SmartKeyManager,
    radio: &MockRadio,
    events: &mut mpsc::UnboundedReceiver<ManagerEvent>,
) -> SmartKey {
    assert!(
        manager
            .request_smart_keys(Duration::from_millis(200), false)
            .await
    );
    radio.advertise();
    let event = wait_for(events, |e| matches!(e, ManagerEvent::SearchFinished(_))).await;
    match event {
        ManagerEvent::SearchFinished(keys) => {
            keys.into_iter().next().expect("token advertised during the interval")
        }
        _ => unreachable!(),
    }
}

/// Full happy path: discover, link, connect, configure secure mode, and
/// pass the challenge.
pub async fn run_secure_session_flow(pairing_value: u32) -> Result<(), CoreError> {
    let token = SimulatedToken::in_service(KeyId::new("flow-token"));
    let (radio, radio_events) = MockRadio::new(token);
    let (manager, mut events) = SmartKeyManager::spawn(radio.clone(), radio_events);

    let found = discover(&manager, &radio, &mut events).await;
    assert_eq!(manager.link(&found).await, StatusCode::Success);

    assert_eq!(manager.connect(false).await, StatusCode::Success);
    wait_for(&mut events, |e| *e == ManagerEvent::ConnectFinished(true)).await;
    wait_for(&mut events, |e| *e == ManagerEvent::LinkedKeyReady).await;

    let key = PairingKey::new(pairing_value).expect("pairing value in range");
    assert_eq!(manager.configure_secure_mode(key).await, StatusCode::Success);
    wait_for(&mut events, |e| {
        *e == ManagerEvent::ConfigStateUpdated(ConfigState::SecurePrepared)
    })
    .await;
    wait_for(&mut events, |e| *e == ManagerEvent::ConfigurationFinished(true)).await;

    assert_eq!(
        manager.initiate_authentication_challenge().await,
        StatusCode::Success
    );
    let outcome = wait_for(&mut events, |e| {
        matches!(e, ManagerEvent::AuthenticationChanged(_))
    })
    .await;
    assert_eq!(
        outcome,
        ManagerEvent::AuthenticationChanged(crate::types::AuthOutcome::Successful)
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_token_answers_its_own_challenges() {
        let mut token = SimulatedToken::in_service(KeyId::new("self-test"));
        token
            .handle(Command::WritePairingKey { value: 123_456 })
            .unwrap();

        let challenge = Bytes::from_static(b"sixteen-byte-nnc");
        let reply = token
            .handle(Command::PairingChallenge {
                challenge: challenge.clone(),
            })
            .unwrap();

        let expected = kdf::response_tag(&kdf::pairing_material(123_456), &challenge);
        match reply {
            CommandReply::PairingResponse { tag } => assert!(kdf::tags_match(&expected, &tag)),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn commands_require_a_connection() {
        let token = SimulatedToken::in_service(KeyId::new("t"));
        let (radio, _events) = MockRadio::new(token);
        let err = radio.send_command(Command::ReadBatteryLevel).await.unwrap_err();
        assert_eq!(err, RadioError::NotConnected);
    }
}
