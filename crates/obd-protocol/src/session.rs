//! Session Lifecycle State Machine
//!
//! Tracks Disconnected / Connecting / Connected and the session epoch. The
//! epoch moves on every connect and every disconnect, so a callback tagged
//! with an older epoch belongs to a superseded session and must be dropped.

use crate::error::ObdError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Session epoch counter value
pub type Epoch = u64;

/// Connection lifecycle with write gating
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    state: SessionState,
    epoch: Epoch,
}

impl SessionStateMachine {
    /// Create a machine in Disconnected at epoch 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current epoch
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Whether `epoch` still names the live session
    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.epoch == epoch
    }

    /// Disconnected -> Connecting; returns the epoch of the new attempt
    pub fn connect(&mut self) -> Result<Epoch, ObdError> {
        if self.state != SessionState::Disconnected {
            return Err(ObdError::AlreadyConnecting);
        }
        self.epoch += 1;
        self.state = SessionState::Connecting;
        info!("Session connecting (epoch {})", self.epoch);
        Ok(self.epoch)
    }

    /// Transport reported success: Connecting -> Connected.
    /// Returns false for a stale epoch or when no attempt is pending.
    pub fn on_connected(&mut self, epoch: Epoch) -> bool {
        if !self.is_current(epoch) || self.state != SessionState::Connecting {
            debug!("Ignoring connect success for epoch {} (current {})", epoch, self.epoch);
            return false;
        }
        self.state = SessionState::Connected;
        info!("Session connected (epoch {})", epoch);
        true
    }

    /// Transport reported a failure for `epoch`: Connecting/Connected -> Disconnected.
    /// Returns true exactly once per epoch; the caller then forces the transport closed.
    pub fn on_transport_error(&mut self, epoch: Epoch) -> bool {
        if !self.is_current(epoch) || self.state == SessionState::Disconnected {
            debug!("Ignoring transport error for epoch {} (current {})", epoch, self.epoch);
            return false;
        }
        self.force_disconnected();
        true
    }

    /// Explicit disconnect from Connecting or Connected.
    /// Returns false when already Disconnected.
    pub fn disconnect(&mut self) -> bool {
        if self.state == SessionState::Disconnected {
            return false;
        }
        self.force_disconnected();
        true
    }

    /// Writes are only permitted while Connected; returns the live epoch
    pub fn ensure_writable(&self) -> Result<Epoch, ObdError> {
        match self.state {
            SessionState::Connected => Ok(self.epoch),
            _ => Err(ObdError::NotConnected),
        }
    }

    fn force_disconnected(&mut self) {
        self.epoch += 1;
        self.state = SessionState::Disconnected;
        info!("Session disconnected (epoch now {})", self.epoch);
    }
}
