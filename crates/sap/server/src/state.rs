//! Session connection state

use std::sync::Arc;

use parking_lot::RwLock;

/// State of a SAP session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, derive_more::Display)]
pub enum ConnectionState {
    /// No session
    #[default]
    Disconnected,
    /// Waiting for the modem to accept the session
    Connecting,
    /// Client was told a call is ongoing, waiting for it to end
    ConnectingCallOngoing,
    /// Session established and idle
    Connected,
    /// A request is in flight with the modem
    ConnectedBusy,
    /// Waiting for the modem to confirm a disconnect
    Disconnecting,
}

impl ConnectionState {
    /// Whether the client may exchange SIM traffic
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::ConnectedBusy)
    }
}

/// State cell written by the worker and read by the control surface
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedState(Arc<RwLock<ConnectionState>>);

impl SharedState {
    pub(crate) fn get(&self) -> ConnectionState {
        *self.0.read()
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        *self.0.write() = state;
    }
}
