//! Connection state machine for the linked token.
//!
//! Idle → Connecting → ConnectedNotReady → Ready, torn back down to Idle
//! on any disconnect. The machine validates transitions; the manager owns
//! the timers that bound them.

use crate::errors::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    /// Connection request submitted, waiting for the token to accept.
    Connecting,
    /// Radio-level link up, post-connect handshake outstanding.
    ConnectedNotReady,
    Ready,
}

pub struct ConnectionMachine {
    state: ConnectionState,
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == ConnectionState::Idle
    }

    /// Radio link is up, ready or not.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::ConnectedNotReady | ConnectionState::Ready
        )
    }

    pub fn begin_connect(&mut self) -> Result<(), ValidationError> {
        match self.state {
            ConnectionState::Idle => {
                self.state = ConnectionState::Connecting;
                Ok(())
            }
            _ => Err(ValidationError::WrongState),
        }
    }

    pub fn radio_accepted(&mut self) -> Result<(), ValidationError> {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::ConnectedNotReady;
                Ok(())
            }
            _ => Err(ValidationError::WrongState),
        }
    }

    pub fn mark_ready(&mut self) -> Result<(), ValidationError> {
        match self.state {
            ConnectionState::ConnectedNotReady => {
                self.state = ConnectionState::Ready;
                Ok(())
            }
            _ => Err(ValidationError::WrongState),
        }
    }

    /// Reconnecting only makes sense over an existing link.
    pub fn can_reconnect(&self) -> bool {
        self.is_connected()
    }

    /// Tear down to Idle. Returns whether there was anything to tear
    /// down.
    pub fn drop_to_idle(&mut self) -> bool {
        let was_active = self.state != ConnectionState::Idle;
        self.state = ConnectionState::Idle;
        was_active
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_happy_path() {
        let mut conn = ConnectionMachine::new();
        conn.begin_connect().unwrap();
        conn.radio_accepted().unwrap();
        conn.mark_ready().unwrap();
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[test]
    fn connect_is_only_valid_from_idle() {
        let mut conn = ConnectionMachine::new();
        conn.begin_connect().unwrap();
        assert_eq!(conn.begin_connect().unwrap_err(), ValidationError::WrongState);
    }

    #[test]
    fn ready_requires_the_radio_level_accept_first() {
        let mut conn = ConnectionMachine::new();
        conn.begin_connect().unwrap();
        assert!(conn.mark_ready().is_err());
    }

    #[test]
    fn drop_to_idle_reports_whether_anything_was_active() {
        let mut conn = ConnectionMachine::new();
        assert!(!conn.drop_to_idle());
        conn.begin_connect().unwrap();
        assert!(conn.drop_to_idle());
        assert!(conn.is_idle());
    }

    #[test]
    fn reconnect_needs_an_existing_link() {
        let mut conn = ConnectionMachine::new();
        assert!(!conn.can_reconnect());
        conn.begin_connect().unwrap();
        assert!(!conn.can_reconnect());
        conn.radio_accepted().unwrap();
        assert!(conn.can_reconnect());
    }
}
