//! Caller-facing event boundary.
//!
//! Every deferred outcome leaves the manager as one tagged event on one
//! ordered channel, so delivery order is a property of the channel rather
//! than of callback registration order.

use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{
    AuthOutcome, ButtonState, ConfigState, DisconnectReason, RadioState, SmartKey,
};

/// Events emitted by the manager, in completion order.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    /// Radio availability changed.
    RadioStateChanged(RadioState),
    /// A search interval completed; deduplicated unlinked tokens.
    SearchFinished(Vec<SmartKey>),
    /// The linked token was observed during the interval; refreshed
    /// record.
    LinkedKeyFound(SmartKey),
    /// Outcome of a connection request.
    ConnectFinished(bool),
    Disconnected(DisconnectReason),
    /// The linked token is connected and ready for communication.
    LinkedKeyReady,
    /// The security settings were cleared, by request or by an internal
    /// security failure.
    SecuritySettingsReset,
    /// Outcome of a token-side configuration reset.
    ConfigResetFinished(bool),
    /// Result of a configuration-state read, or the intermediate
    /// secure-prepared fact during secure provisioning.
    ConfigStateUpdated(ConfigState),
    BatteryLevelUpdated(u8),
    /// Terminal outcome of a configuration attempt.
    ConfigurationFinished(bool),
    AuthenticationChanged(AuthOutcome),
    /// A token answering as the linked one failed cryptographically. The
    /// security settings have already been reset.
    ModifiedKeyDetected(SmartKey),
    ButtonChanged(ButtonState),
}

/// Sender half owned by the manager task.
#[derive(Clone)]
pub(crate) struct Notifier {
    tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl Notifier {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ManagerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event. A dropped receiver is not an error; the session
    /// keeps running.
    pub(crate) fn emit(&self, event: ManagerEvent) {
        debug!(?event, "emit");
        let _ = self.tx.send(event);
    }
}
