//! Host environment of a SAP session
//!
//! The server does not own user interface, telephony or power management.
//! It reports to, and queries, a [`SessionHost`] instead.

use crate::machine::DisconnectAction;
use crate::state::ConnectionState;

/// Callbacks into the environment hosting a SAP session
///
/// Every method has a no-op default. Calls are made from the session worker
/// thread and must not block.
pub trait SessionHost: Send + Sync {
    /// The session moved from `from` to `to`
    fn state_changed(&self, _from: ConnectionState, _to: ConnectionState) {}

    /// The SIM is now in use by the remote client
    fn profile_connected(&self) {}

    /// Offer the user a way to end the session with `action`
    fn show_disconnect_notification(&self, _action: DisconnectAction) {}

    /// Withdraw the disconnect offer
    fn clear_notification(&self) {}

    /// Data moved on the session; keep the device awake
    fn activity(&self) {}

    /// Whether a voice call currently holds the SIM
    fn is_call_ongoing(&self) -> bool {
        false
    }

    /// The session has been torn down
    fn session_closed(&self) {}
}

/// Host that ignores every callback
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHost;

impl SessionHost for NoopHost {}
