//! Session host for the standalone daemon

use nexum_sap_server::{ConnectionState, DisconnectAction, SessionHost};
use tracing::info;

/// Host that logs session events
///
/// There is no telephony stack to ask, so call state is whatever was last
/// configured.
#[derive(Debug, Default)]
pub(crate) struct LoggingHost {
    call_ongoing: bool,
}

impl LoggingHost {
    pub(crate) const fn new(call_ongoing: bool) -> Self {
        Self { call_ongoing }
    }
}

impl SessionHost for LoggingHost {
    fn state_changed(&self, from: ConnectionState, to: ConnectionState) {
        info!(%from, %to, "SAP state changed");
    }

    fn profile_connected(&self) {
        info!("SIM is now in use by the SAP client");
    }

    fn show_disconnect_notification(&self, action: DisconnectAction) {
        info!(%action, "Disconnect available");
    }

    fn is_call_ongoing(&self) -> bool {
        self.call_ongoing
    }

    fn session_closed(&self) {
        info!("SAP session closed");
    }
}
