//! SmartKey session manager.
//!
//! The state machine lives in one owning tokio task; callers hold a
//! cloneable handle. Every operation returns an immediate status and, if
//! accepted, delivers its terminal outcome on the event channel. One
//! operation holds the radio channel at a time; a second request fails
//! fast with `Busy` instead of queueing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::auth::{self, AuthVerdict, ButtonJudgement};
use crate::config;
use crate::connection::{ConnectionMachine, ConnectionState};
use crate::errors::{CoreError, SecurityError, ValidationError};
use crate::events::{ManagerEvent, Notifier};
use crate::keys::{EncryptionKey, PairingKey};
use crate::link::{LinkState, SecurityMode};
use crate::registry::Registry;
use crate::transport::{
    Command, CommandReply, ConnectOptions, LinkClosed, RadioEvent, RadioTransport,
    CONNECT_TIMEOUT, PROTOCOL_TIMEOUT,
};
use crate::types::{
    AuthOutcome, ButtonState, ConfigState, DisconnectReason, RadioState, SmartKey, StatusCode,
};

/// Requests from the handle to the session task.
enum Api {
    StartSearch {
        duration: Duration,
        repeat: bool,
        reply: oneshot::Sender<bool>,
    },
    CancelSearch {
        reply: oneshot::Sender<()>,
    },
    Link {
        key: SmartKey,
        reply: oneshot::Sender<StatusCode>,
    },
    ResetSecurity {
        reply: oneshot::Sender<()>,
    },
    Connect {
        options: ConnectOptions,
        reply: oneshot::Sender<StatusCode>,
    },
    Reconnect {
        reply: oneshot::Sender<StatusCode>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    ConnectionStatus {
        reply: oneshot::Sender<StatusCode>,
    },
    ReadConfigState {
        reply: oneshot::Sender<StatusCode>,
    },
    ReadBatteryLevel {
        reply: oneshot::Sender<StatusCode>,
    },
    ConfigureConvenience {
        reply: oneshot::Sender<StatusCode>,
    },
    ConfigurePairing {
        key: PairingKey,
        reply: oneshot::Sender<StatusCode>,
    },
    ConfigureSecure {
        key: PairingKey,
        reply: oneshot::Sender<StatusCode>,
    },
    ResetConfig {
        reply: oneshot::Sender<StatusCode>,
    },
    InitiateAuthChallenge {
        reply: oneshot::Sender<StatusCode>,
    },
    LinkedKey {
        reply: oneshot::Sender<Option<SmartKey>>,
    },
}

/// Deferred outcomes posted back to the session task by its own timers
/// and I/O tasks. Everything carries the epoch it was started under;
/// outcomes from before a reset or disconnect are stale and dropped.
enum Internal {
    SearchElapsed {
        seq: u64,
    },
    ConnectTimedOut {
        epoch: u64,
    },
    ReadyChecked {
        epoch: u64,
        result: Result<ConfigState, CoreError>,
    },
    ConfigAdvanced {
        epoch: u64,
        encryption_key: EncryptionKey,
    },
    ConfigFinished {
        epoch: u64,
        result: Result<SecurityMode, CoreError>,
    },
    ResetConfigFinished {
        epoch: u64,
        result: Result<(), CoreError>,
    },
    AuthFinished {
        epoch: u64,
        result: Result<AuthVerdict, CoreError>,
    },
    ReadFinished {
        epoch: u64,
        result: Result<Reading, CoreError>,
    },
}

enum Reading {
    Config(ConfigState),
    Battery(u8),
}

/// The single outstanding operation, when there is one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Connect,
    ReadyCheck,
    Configure,
    ResetConfig,
    Read,
    Authenticate,
}

struct SearchPlan {
    duration: Duration,
    repeat: bool,
    seq: u64,
}

/// Cloneable handle to a running SmartKey session.
///
/// Dropping every handle ends the session task.
#[derive(Clone)]
pub struct SmartKeyManager {
    api: mpsc::UnboundedSender<Api>,
}

impl SmartKeyManager {
    /// Start a session over the given transport. Returns the handle and
    /// the ordered event channel.
    pub fn spawn(
        transport: Arc<dyn RadioTransport>,
        radio_events: mpsc::UnboundedReceiver<RadioEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<ManagerEvent>) {
        let (api_tx, api_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = Notifier::new();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            transport,
            events,
            internal_tx,
            registry: Registry::new(),
            link: LinkState::new(),
            connection: ConnectionMachine::new(),
            op: None,
            search: None,
            search_seq: 0,
            epoch: 0,
            last_options: ConnectOptions::default(),
        };
        tokio::spawn(actor.run(api_rx, radio_events, internal_rx));

        (Self { api: api_tx }, event_rx)
    }

    /// Search for nearby tokens for `duration`. Returns whether the
    /// request was accepted; results arrive as
    /// [`ManagerEvent::SearchFinished`].
    pub async fn request_smart_keys(&self, duration: Duration, repeat: bool) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.api.send(Api::StartSearch {
            duration,
            repeat,
            reply,
        });
        rx.await.unwrap_or(false)
    }

    /// Stop a pending search. Idempotent.
    pub async fn cancel_smart_key_request(&self) {
        let (reply, rx) = oneshot::channel();
        let _ = self.api.send(Api::CancelSearch { reply });
        let _ = rx.await;
    }

    /// Designate `key` as the linked token for all following operations.
    pub async fn link(&self, key: &SmartKey) -> StatusCode {
        self.status(|reply| Api::Link {
            key: key.clone(),
            reply,
        })
        .await
    }

    /// Clear the link, its key material, and the configuration record,
    /// disconnecting first if needed. Always succeeds.
    pub async fn reset_security_settings(&self) {
        let (reply, rx) = oneshot::channel();
        let _ = self.api.send(Api::ResetSecurity { reply });
        let _ = rx.await;
    }

    /// Request a connection to the linked token.
    pub async fn connect(&self, power_saving: bool) -> StatusCode {
        self.status(|reply| Api::Connect {
            options: ConnectOptions { power_saving },
            reply,
        })
        .await
    }

    /// Tear down and restart the connect sequence.
    pub async fn reconnect(&self) -> StatusCode {
        self.status(|reply| Api::Reconnect { reply }).await
    }

    /// Host-initiated disconnect.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        let _ = self.api.send(Api::Disconnect { reply });
        let _ = rx.await;
    }

    /// Pure read of the connection status vocabulary.
    pub async fn connection_status(&self) -> StatusCode {
        self.status(|reply| Api::ConnectionStatus { reply }).await
    }

    /// Ask the token for its configuration state; the value arrives as
    /// [`ManagerEvent::ConfigStateUpdated`].
    pub async fn read_config_state(&self) -> StatusCode {
        self.status(|reply| Api::ReadConfigState { reply }).await
    }

    /// Ask the token for its battery level; the value arrives as
    /// [`ManagerEvent::BatteryLevelUpdated`].
    pub async fn read_battery_level(&self) -> StatusCode {
        self.status(|reply| Api::ReadBatteryLevel { reply }).await
    }

    pub async fn configure_convenience_mode(&self) -> StatusCode {
        self.status(|reply| Api::ConfigureConvenience { reply }).await
    }

    pub async fn configure_pairing_mode(&self, key: PairingKey) -> StatusCode {
        self.status(|reply| Api::ConfigurePairing { key, reply }).await
    }

    pub async fn configure_secure_mode(&self, key: PairingKey) -> StatusCode {
        self.status(|reply| Api::ConfigureSecure { key, reply }).await
    }

    /// Token-side configuration reset; service mode only.
    pub async fn reset_config(&self) -> StatusCode {
        self.status(|reply| Api::ResetConfig { reply }).await
    }

    /// Run the challenge for the configured mode; the outcome arrives as
    /// [`ManagerEvent::AuthenticationChanged`].
    pub async fn initiate_authentication_challenge(&self) -> StatusCode {
        self.status(|reply| Api::InitiateAuthChallenge { reply }).await
    }

    /// Current snapshot of the linked token, if any.
    pub async fn linked_key(&self) -> Option<SmartKey> {
        let (reply, rx) = oneshot::channel();
        let _ = self.api.send(Api::LinkedKey { reply });
        rx.await.unwrap_or(None)
    }

    async fn status(&self, make: impl FnOnce(oneshot::Sender<StatusCode>) -> Api) -> StatusCode {
        let (reply, rx) = oneshot::channel();
        let _ = self.api.send(make(reply));
        rx.await.unwrap_or(StatusCode::OperationFailed)
    }
}

struct Actor {
    transport: Arc<dyn RadioTransport>,
    events: Notifier,
    internal_tx: mpsc::UnboundedSender<Internal>,
    registry: Registry,
    link: LinkState,
    connection: ConnectionMachine,
    op: Option<Op>,
    search: Option<SearchPlan>,
    search_seq: u64,
    /// Session epoch; bumped on every reset, disconnect, or teardown so
    /// in-flight outcomes from the previous life are dropped.
    epoch: u64,
    last_options: ConnectOptions,
}

impl Actor {
    async fn run(
        mut self,
        mut api_rx: mpsc::UnboundedReceiver<Api>,
        mut radio_rx: mpsc::UnboundedReceiver<RadioEvent>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut radio_open = true;
        loop {
            tokio::select! {
                request = api_rx.recv() => match request {
                    Some(request) => self.handle_api(request).await,
                    None => break,
                },
                event = radio_rx.recv(), if radio_open => match event {
                    Some(event) => self.handle_radio(event).await,
                    None => radio_open = false,
                },
                message = internal_rx.recv() => {
                    if let Some(message) = message {
                        self.handle_internal(message).await;
                    }
                }
            }
        }
        debug!("session handle dropped, manager task ends");
    }

    // ------------------------------------------------------------------
    // API requests
    // ------------------------------------------------------------------

    async fn handle_api(&mut self, request: Api) {
        match request {
            Api::StartSearch {
                duration,
                repeat,
                reply,
            } => {
                let _ = reply.send(self.start_search(duration, repeat).await);
            }
            Api::CancelSearch { reply } => {
                self.cancel_search().await;
                let _ = reply.send(());
            }
            Api::Link { key, reply } => {
                let status = match self.link.link(key) {
                    Ok(()) => StatusCode::Success,
                    Err(e) => CoreError::from(e).status(),
                };
                let _ = reply.send(status);
            }
            Api::ResetSecurity { reply } => {
                self.security_reset().await;
                let _ = reply.send(());
            }
            Api::Connect { options, reply } => {
                let _ = reply.send(self.connect(options).await);
            }
            Api::Reconnect { reply } => {
                let _ = reply.send(self.reconnect().await);
            }
            Api::Disconnect { reply } => {
                self.host_disconnect().await;
                let _ = reply.send(());
            }
            Api::ConnectionStatus { reply } => {
                let _ = reply.send(self.connection_status());
            }
            Api::ReadConfigState { reply } => {
                let _ = reply.send(self.start_read(Command::ReadConfigState));
            }
            Api::ReadBatteryLevel { reply } => {
                let _ = reply.send(self.start_read(Command::ReadBatteryLevel));
            }
            Api::ConfigureConvenience { reply } => {
                let _ = reply.send(self.start_configure(ConfigKind::Convenience));
            }
            Api::ConfigurePairing { key, reply } => {
                let _ = reply.send(self.start_configure(ConfigKind::Pairing(key)));
            }
            Api::ConfigureSecure { key, reply } => {
                let _ = reply.send(self.start_configure(ConfigKind::Secure(key)));
            }
            Api::ResetConfig { reply } => {
                let _ = reply.send(self.start_reset_config());
            }
            Api::InitiateAuthChallenge { reply } => {
                let _ = reply.send(self.start_authentication());
            }
            Api::LinkedKey { reply } => {
                let _ = reply.send(self.link.linked().cloned());
            }
        }
    }

    async fn start_search(&mut self, duration: Duration, repeat: bool) -> bool {
        // An active connection and an active scan are mutually exclusive
        // on this transport.
        if !self.connection.is_idle() || self.op.is_some() || self.search.is_some() {
            return false;
        }
        if self.transport.start_scan().await.is_err() {
            return false;
        }
        self.registry.begin_interval();
        self.search_seq += 1;
        let seq = self.search_seq;
        self.search = Some(SearchPlan {
            duration,
            repeat,
            seq,
        });
        self.spawn_search_timer(duration, seq);
        true
    }

    fn spawn_search_timer(&self, duration: Duration, seq: u64) {
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = internal.send(Internal::SearchElapsed { seq });
        });
    }

    async fn cancel_search(&mut self) {
        if self.search.take().is_some() {
            self.transport.stop_scan().await;
            self.registry.cancel_interval();
        }
    }

    async fn connect(&mut self, options: ConnectOptions) -> StatusCode {
        let linked = match self.link.require_linked() {
            Ok(linked) => linked.clone(),
            Err(e) => return CoreError::from(e).status(),
        };
        if !self.connection.is_idle() {
            return StatusCode::OperationFailed;
        }
        if self.op.is_some() || self.search.is_some() {
            return StatusCode::Busy;
        }
        if !linked.supported {
            return StatusCode::FirmwareOutdated;
        }
        if !self.registry.located(&linked.id) {
            return StatusCode::OperationFailed;
        }
        if self.transport.connect(&linked.id, options).await.is_err() {
            return StatusCode::OperationFailed;
        }
        if self.connection.begin_connect().is_err() {
            return StatusCode::OperationFailed;
        }
        self.op = Some(Op::Connect);
        self.last_options = options;
        self.spawn_connect_timer();
        StatusCode::Success
    }

    fn spawn_connect_timer(&self) {
        let internal = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(CONNECT_TIMEOUT).await;
            let _ = internal.send(Internal::ConnectTimedOut { epoch });
        });
    }

    async fn reconnect(&mut self) -> StatusCode {
        let linked = match self.link.require_linked() {
            Ok(linked) => linked.clone(),
            Err(e) => return CoreError::from(e).status(),
        };
        if self.op.is_some() {
            return StatusCode::Busy;
        }
        if !self.connection.can_reconnect() {
            return StatusCode::OperationFailed;
        }

        self.transport.disconnect(&linked.id).await;
        self.epoch += 1;
        self.connection.drop_to_idle();
        self.events
            .emit(ManagerEvent::Disconnected(DisconnectReason::HostRequested));

        let options = self.last_options;
        if self.transport.connect(&linked.id, options).await.is_err() {
            return StatusCode::OperationFailed;
        }
        if self.connection.begin_connect().is_err() {
            return StatusCode::OperationFailed;
        }
        self.op = Some(Op::Connect);
        self.spawn_connect_timer();
        StatusCode::Success
    }

    async fn host_disconnect(&mut self) {
        if self.connection.is_idle() {
            return;
        }
        if let Some(linked) = self.link.linked() {
            let id = linked.id.clone();
            self.transport.disconnect(&id).await;
        }
        self.epoch += 1;
        self.fail_outstanding_op();
        self.connection.drop_to_idle();
        self.events
            .emit(ManagerEvent::Disconnected(DisconnectReason::HostRequested));
    }

    fn connection_status(&self) -> StatusCode {
        let Some(linked) = self.link.linked() else {
            return StatusCode::NoKeyLinked;
        };
        match self.connection.state() {
            ConnectionState::Idle | ConnectionState::Connecting => {
                if self.registry.located(&linked.id) {
                    StatusCode::NotConnected
                } else {
                    StatusCode::NotLocated
                }
            }
            ConnectionState::ConnectedNotReady => StatusCode::NotReady,
            ConnectionState::Ready => StatusCode::Ready,
        }
    }

    /// Shared preconditions for everything that talks to the connected
    /// token in service mode.
    fn service_command_guard(&self) -> Result<(), CoreError> {
        let linked = self.link.require_linked()?;
        if self.op.is_some() {
            return Err(ValidationError::Busy.into());
        }
        if !self.connection.is_connected() {
            return Err(ValidationError::WrongState.into());
        }
        if !linked.service {
            return Err(ValidationError::WrongState.into());
        }
        Ok(())
    }

    fn start_configure(&mut self, kind: ConfigKind) -> StatusCode {
        if let Err(e) = self.service_command_guard() {
            return e.status();
        }
        self.op = Some(Op::Configure);
        let transport = Arc::clone(&self.transport);
        let internal = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = tokio::time::timeout(PROTOCOL_TIMEOUT, async {
                match kind {
                    ConfigKind::Convenience => {
                        config::activate_convenience(transport.as_ref()).await?;
                        Ok(SecurityMode::Convenience)
                    }
                    ConfigKind::Pairing(key) => {
                        config::write_pairing_key(transport.as_ref(), &key).await?;
                        Ok(SecurityMode::Pairing { key })
                    }
                    ConfigKind::Secure(key) => {
                        let encryption_key =
                            config::write_encryption_key(transport.as_ref()).await?;
                        let _ = internal.send(Internal::ConfigAdvanced {
                            epoch,
                            encryption_key: encryption_key.clone(),
                        });
                        config::write_sealed_pairing_key(transport.as_ref(), &encryption_key, &key)
                            .await?;
                        Ok(SecurityMode::Secure {
                            encryption_key,
                            key,
                        })
                    }
                }
            })
            .await
            .unwrap_or(Err(CoreError::Timeout));
            let _ = internal.send(Internal::ConfigFinished { epoch, result });
        });
        StatusCode::Success
    }

    fn start_reset_config(&mut self) -> StatusCode {
        if let Err(e) = self.service_command_guard() {
            return e.status();
        }
        self.op = Some(Op::ResetConfig);
        let transport = Arc::clone(&self.transport);
        let internal = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = tokio::time::timeout(
                PROTOCOL_TIMEOUT,
                config::reset_token_config(transport.as_ref()),
            )
            .await
            .unwrap_or(Err(CoreError::Timeout));
            let _ = internal.send(Internal::ResetConfigFinished { epoch, result });
        });
        StatusCode::Success
    }

    fn start_read(&mut self, command: Command) -> StatusCode {
        let guard = (|| {
            self.link.require_linked()?;
            if self.op.is_some() {
                return Err(ValidationError::Busy);
            }
            if !self.connection.is_connected() {
                return Err(ValidationError::WrongState);
            }
            Ok(())
        })();
        if let Err(e) = guard {
            return CoreError::from(e).status();
        }

        self.op = Some(Op::Read);
        let transport = Arc::clone(&self.transport);
        let internal = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = tokio::time::timeout(PROTOCOL_TIMEOUT, async {
                match transport.send_command(command).await? {
                    CommandReply::ConfigState(config) => Ok(Reading::Config(config)),
                    CommandReply::BatteryLevel(level) => Ok(Reading::Battery(level)),
                    _ => Err(CoreError::Refused),
                }
            })
            .await
            .unwrap_or(Err(CoreError::Timeout));
            let _ = internal.send(Internal::ReadFinished { epoch, result });
        });
        StatusCode::Success
    }

    fn start_authentication(&mut self) -> StatusCode {
        if self.link.linked().is_none() {
            return StatusCode::NoKeyLinked;
        }
        if self.op.is_some() {
            return StatusCode::Busy;
        }
        if self.connection.state() != ConnectionState::Ready {
            return StatusCode::OperationFailed;
        }
        let flow = match self.link.mode() {
            SecurityMode::Pairing { key } => AuthFlow::Pairing { key: key.clone() },
            SecurityMode::Secure {
                encryption_key,
                key,
            } => AuthFlow::Secure {
                encryption_key: encryption_key.clone(),
                key: key.clone(),
            },
            // Convenience authenticates by discovery alone; the other
            // modes have nothing to prove.
            _ => return StatusCode::OperationFailed,
        };

        self.op = Some(Op::Authenticate);
        let transport = Arc::clone(&self.transport);
        let internal = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = tokio::time::timeout(PROTOCOL_TIMEOUT, async {
                match flow {
                    AuthFlow::Pairing { key } => {
                        auth::run_pairing_challenge(transport.as_ref(), &key).await
                    }
                    AuthFlow::Secure {
                        encryption_key,
                        key,
                    } => {
                        auth::run_secure_challenge(transport.as_ref(), &encryption_key, &key).await
                    }
                }
            })
            .await
            .unwrap_or(Err(CoreError::Timeout));
            let _ = internal.send(Internal::AuthFinished { epoch, result });
        });
        StatusCode::Success
    }

    // ------------------------------------------------------------------
    // Radio events
    // ------------------------------------------------------------------

    async fn handle_radio(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Availability { powered_on } => {
                let state = if powered_on {
                    RadioState::PoweredOn
                } else {
                    RadioState::PoweredOff
                };
                self.events.emit(ManagerEvent::RadioStateChanged(state));
            }
            RadioEvent::Advertisement { id, adv } => {
                if self.search.is_some() {
                    let snapshot = self.registry.observe(id.clone(), &adv);
                    if self.link.is_linked_id(&id) {
                        self.link.refresh(snapshot);
                    }
                }
            }
            RadioEvent::Connected { id } => {
                if !self.link.is_linked_id(&id)
                    || self.connection.radio_accepted().is_err()
                {
                    return;
                }
                self.events.emit(ManagerEvent::ConnectFinished(true));
                self.start_ready_check();
            }
            RadioEvent::ConnectFailed { id } => {
                if !self.link.is_linked_id(&id)
                    || self.connection.state() != ConnectionState::Connecting
                {
                    return;
                }
                self.epoch += 1;
                self.op = None;
                self.connection.drop_to_idle();
                self.events.emit(ManagerEvent::ConnectFinished(false));
            }
            RadioEvent::Disconnected { id, reason } => {
                if !self.link.is_linked_id(&id) || self.connection.is_idle() {
                    return;
                }
                self.epoch += 1;
                self.fail_outstanding_op();
                self.connection.drop_to_idle();
                let reason = match reason {
                    LinkClosed::Lost => DisconnectReason::ConnectionLost,
                    LinkClosed::ByToken => DisconnectReason::TokenTerminated,
                };
                self.events.emit(ManagerEvent::Disconnected(reason));
            }
            RadioEvent::Button { id, report } => {
                if !self.link.is_linked_id(&id) {
                    return;
                }
                match auth::judge_button(&report, self.link.mode()) {
                    ButtonJudgement::Deliver(state) => {
                        self.events.emit(ManagerEvent::ButtonChanged(state));
                    }
                    ButtonJudgement::SecurityFault => {
                        warn!(
                            error = %CoreError::from(SecurityError::InvalidButtonEvent),
                            "resetting security settings"
                        );
                        self.security_reset().await;
                        self.events
                            .emit(ManagerEvent::ButtonChanged(ButtonState::Fault));
                    }
                }
            }
        }
    }

    /// Post-connect handshake: read the token's configuration state and
    /// reconcile it with the host record before announcing Ready.
    fn start_ready_check(&mut self) {
        self.op = Some(Op::ReadyCheck);
        let transport = Arc::clone(&self.transport);
        let internal = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = tokio::time::timeout(PROTOCOL_TIMEOUT, async {
                match transport.send_command(Command::ReadConfigState).await? {
                    CommandReply::ConfigState(config) => Ok(config),
                    _ => Err(CoreError::Refused),
                }
            })
            .await
            .unwrap_or(Err(CoreError::Timeout));
            let _ = internal.send(Internal::ReadyChecked { epoch, result });
        });
    }

    // ------------------------------------------------------------------
    // Internal outcomes
    // ------------------------------------------------------------------

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::SearchElapsed { seq } => self.finish_search_interval(seq).await,
            Internal::ConnectTimedOut { epoch } => {
                if epoch != self.epoch || self.connection.state() != ConnectionState::Connecting {
                    return;
                }
                debug!("no connection accept within the timeout");
                if let Some(linked) = self.link.linked() {
                    let id = linked.id.clone();
                    self.transport.disconnect(&id).await;
                }
                self.epoch += 1;
                self.op = None;
                self.connection.drop_to_idle();
                self.events.emit(ManagerEvent::ConnectFinished(false));
            }
            Internal::ReadyChecked { epoch, result } => {
                if epoch != self.epoch || self.op != Some(Op::ReadyCheck) {
                    return;
                }
                self.op = None;
                match result {
                    Ok(reported) => self.reconcile_ready(reported).await,
                    Err(e) => {
                        warn!(error = %e, "ready handshake failed");
                        self.unwind_lost_link().await;
                    }
                }
            }
            Internal::ConfigAdvanced {
                epoch,
                encryption_key,
            } => {
                if epoch != self.epoch {
                    return;
                }
                // Token-side fact from here on: the encryption key is
                // set, the pairing key is not.
                self.link
                    .set_mode(SecurityMode::SecurePrepared { encryption_key });
                self.events
                    .emit(ManagerEvent::ConfigStateUpdated(ConfigState::SecurePrepared));
            }
            Internal::ConfigFinished { epoch, result } => {
                if epoch != self.epoch || self.op != Some(Op::Configure) {
                    return;
                }
                self.op = None;
                match result {
                    Ok(mode) => {
                        self.link.set_mode(mode);
                        self.events.emit(ManagerEvent::ConfigurationFinished(true));
                    }
                    Err(e) => {
                        warn!(error = %e, "configuration attempt failed");
                        self.events.emit(ManagerEvent::ConfigurationFinished(false));
                    }
                }
            }
            Internal::ResetConfigFinished { epoch, result } => {
                if epoch != self.epoch || self.op != Some(Op::ResetConfig) {
                    return;
                }
                self.op = None;
                match result {
                    Ok(()) => {
                        self.link.set_mode(SecurityMode::Unconfigured);
                        self.events.emit(ManagerEvent::ConfigResetFinished(true));
                    }
                    Err(e) => {
                        warn!(error = %e, "token config reset failed");
                        self.events.emit(ManagerEvent::ConfigResetFinished(false));
                    }
                }
            }
            Internal::AuthFinished { epoch, result } => {
                if epoch != self.epoch || self.op != Some(Op::Authenticate) {
                    return;
                }
                self.op = None;
                match result {
                    Ok(AuthVerdict::Successful) => {
                        self.events
                            .emit(ManagerEvent::AuthenticationChanged(AuthOutcome::Successful));
                    }
                    Ok(AuthVerdict::PairingFailed) => {
                        self.events.emit(ManagerEvent::AuthenticationChanged(
                            AuthOutcome::PairingFailed,
                        ));
                    }
                    Ok(AuthVerdict::Compromised(cause)) => {
                        // The answering device matched the linked
                        // identifier but could not produce the right
                        // cryptographic response.
                        warn!(error = %CoreError::from(cause), "destructive authentication verdict");
                        let offender = self.link.linked().cloned();
                        self.security_reset().await;
                        if let Some(offender) = offender {
                            self.events.emit(ManagerEvent::ModifiedKeyDetected(offender));
                        }
                        self.events
                            .emit(ManagerEvent::AuthenticationChanged(AuthOutcome::Failed));
                    }
                    Err(e) => {
                        warn!(error = %e, "authentication exchange failed");
                        self.unwind_lost_link().await;
                    }
                }
            }
            Internal::ReadFinished { epoch, result } => {
                if epoch != self.epoch || self.op != Some(Op::Read) {
                    return;
                }
                self.op = None;
                match result {
                    Ok(Reading::Config(config)) => {
                        self.link.set_snapshot_config(config);
                        self.events.emit(ManagerEvent::ConfigStateUpdated(config));
                    }
                    Ok(Reading::Battery(level)) => {
                        self.link.set_snapshot_battery(level);
                        self.events.emit(ManagerEvent::BatteryLevelUpdated(level));
                    }
                    Err(e) => {
                        warn!(error = %e, "value read failed");
                        self.unwind_lost_link().await;
                    }
                }
            }
        }
    }

    async fn finish_search_interval(&mut self, seq: u64) {
        let Some(plan) = self.search.as_ref() else {
            return;
        };
        if plan.seq != seq {
            return;
        }
        let repeat = plan.repeat;
        let duration = plan.duration;

        self.transport.stop_scan().await;
        let linked_id = self.link.linked().map(|k| k.id.clone());
        let outcome = self.registry.finish_interval(linked_id.as_ref());

        self.events.emit(ManagerEvent::SearchFinished(outcome.keys));
        if let Some(refreshed) = outcome.linked {
            self.link.refresh(refreshed.clone());
            self.events.emit(ManagerEvent::LinkedKeyFound(refreshed));
            // Convenience mode authenticates by discovery alone.
            if matches!(self.link.mode(), SecurityMode::Convenience) {
                self.events
                    .emit(ManagerEvent::AuthenticationChanged(AuthOutcome::Successful));
            }
        }

        if repeat && self.transport.start_scan().await.is_ok() {
            self.registry.begin_interval();
            self.search_seq += 1;
            let seq = self.search_seq;
            self.search = Some(SearchPlan {
                duration,
                repeat,
                seq,
            });
            self.spawn_search_timer(duration, seq);
        } else {
            self.search = None;
        }
    }

    async fn reconcile_ready(&mut self, reported: ConfigState) {
        let expected = self.link.mode().config_state();
        if reported != expected && self.link.mode().carries_keys() {
            // A token answering under the linked identifier without the
            // configuration we provisioned is not our token.
            warn!(?reported, ?expected, "configuration mismatch on ready handshake");
            let offender = self.link.linked().cloned();
            self.security_reset().await;
            if let Some(offender) = offender {
                self.events.emit(ManagerEvent::ModifiedKeyDetected(offender));
            }
            return;
        }
        if reported != expected {
            // Keyless modes just adopt the token-side truth.
            match reported {
                ConfigState::Unconfigured => self.link.set_mode(SecurityMode::Unconfigured),
                ConfigState::Convenience => self.link.set_mode(SecurityMode::Convenience),
                _ => self.link.set_snapshot_config(reported),
            }
        }
        if self.connection.mark_ready().is_err() {
            return;
        }
        self.events.emit(ManagerEvent::LinkedKeyReady);
        if matches!(self.link.mode(), SecurityMode::Convenience) {
            self.events
                .emit(ManagerEvent::AuthenticationChanged(AuthOutcome::Successful));
        }
    }

    // ------------------------------------------------------------------
    // Teardown helpers
    // ------------------------------------------------------------------

    /// Emit the failure notification a torn-down operation still owes.
    fn fail_outstanding_op(&mut self) {
        match self.op.take() {
            Some(Op::Connect) => self.events.emit(ManagerEvent::ConnectFinished(false)),
            Some(Op::Configure) => self.events.emit(ManagerEvent::ConfigurationFinished(false)),
            Some(Op::ResetConfig) => self.events.emit(ManagerEvent::ConfigResetFinished(false)),
            Some(Op::ReadyCheck) | Some(Op::Read) | Some(Op::Authenticate) | None => {}
        }
    }

    /// Unwind after a command-level transport failure on a live link.
    async fn unwind_lost_link(&mut self) {
        self.epoch += 1;
        if let Some(linked) = self.link.linked() {
            let id = linked.id.clone();
            self.transport.disconnect(&id).await;
        }
        self.fail_outstanding_op();
        if self.connection.drop_to_idle() {
            self.events
                .emit(ManagerEvent::Disconnected(DisconnectReason::ConnectionLost));
        }
    }

    /// The universal recovery action: disconnect, drop the link and all
    /// key material, and tell the world.
    async fn security_reset(&mut self) {
        self.epoch += 1;
        if let Some(linked) = self.link.linked() {
            let id = linked.id.clone();
            if !self.connection.is_idle() {
                self.transport.disconnect(&id).await;
            }
        }
        self.fail_outstanding_op();
        if self.connection.drop_to_idle() {
            self.events
                .emit(ManagerEvent::Disconnected(DisconnectReason::HostRequested));
        }
        self.link.reset();
        self.events.emit(ManagerEvent::SecuritySettingsReset);
    }
}

enum ConfigKind {
    Convenience,
    Pairing(PairingKey),
    Secure(PairingKey),
}

enum AuthFlow {
    Pairing {
        key: PairingKey,
    },
    Secure {
        encryption_key: EncryptionKey,
        key: PairingKey,
    },
}
