//! Configuration options for a SAP session

use std::time::Duration;

use nexum_sap_core::modem::DEFAULT_MAX_RECORD_LEN;

/// Delay before an unanswered immediate disconnect is forced
pub const DEFAULT_IMMEDIATE_DISCONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Delay before the client stream is closed after a disconnect
pub const DEFAULT_CLIENT_CLOSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Time the client reader waits for the modem to confirm a disconnect
pub const DEFAULT_DEINIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection attempts made before the modem link gives up
pub const DEFAULT_MODEM_CONNECT_ATTEMPTS: u32 = 10;

/// Pause between modem connection attempts
pub const DEFAULT_MODEM_CONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Time after which failed modem connection attempts are logged as warnings
pub const DEFAULT_MODEM_CONNECT_WARN_AFTER: Duration = Duration::from_secs(2);

/// Configuration options for a SAP session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Escalation delay after DISCONNECT_IND(immediate)
    pub immediate_disconnect_timeout: Duration,

    /// Delay before closing the client stream once the session is over
    pub client_close_timeout: Duration,

    /// Bound on the wait for the modem's DISCONNECT_RESP at teardown
    pub deinit_timeout: Duration,

    /// Modem connection attempts
    pub modem_connect_attempts: u32,

    /// Pause between modem connection attempts
    pub modem_connect_backoff: Duration,

    /// Connection failures are only warned about after this long
    pub modem_connect_warn_after: Duration,

    /// Largest accepted modem record body
    pub max_record_len: usize,

    /// Smallest MaxMsgSize accepted from a client
    pub min_msg_size: u16,

    /// Largest MaxMsgSize accepted from a client
    pub max_msg_size: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            immediate_disconnect_timeout: DEFAULT_IMMEDIATE_DISCONNECT_TIMEOUT,
            client_close_timeout: DEFAULT_CLIENT_CLOSE_TIMEOUT,
            deinit_timeout: DEFAULT_DEINIT_TIMEOUT,
            modem_connect_attempts: DEFAULT_MODEM_CONNECT_ATTEMPTS,
            modem_connect_backoff: DEFAULT_MODEM_CONNECT_BACKOFF,
            modem_connect_warn_after: DEFAULT_MODEM_CONNECT_WARN_AFTER,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            min_msg_size: 0,
            max_msg_size: u16::MAX,
        }
    }
}

impl ServerConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the immediate disconnect escalation delay
    pub const fn with_immediate_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.immediate_disconnect_timeout = timeout;
        self
    }

    /// Set the client close delay
    pub const fn with_client_close_timeout(mut self, timeout: Duration) -> Self {
        self.client_close_timeout = timeout;
        self
    }

    /// Set the teardown wait for the modem's disconnect confirmation
    pub const fn with_deinit_timeout(mut self, timeout: Duration) -> Self {
        self.deinit_timeout = timeout;
        self
    }

    /// Set how often and how fast the modem link retries its connection
    pub const fn with_modem_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.modem_connect_attempts = attempts;
        self.modem_connect_backoff = backoff;
        self
    }

    /// Set when failed modem connection attempts start being warned about
    pub const fn with_modem_connect_warn_after(mut self, after: Duration) -> Self {
        self.modem_connect_warn_after = after;
        self
    }

    /// Set the largest accepted modem record body
    pub const fn with_max_record_len(mut self, len: usize) -> Self {
        self.max_record_len = len;
        self
    }

    /// Set the accepted MaxMsgSize range
    pub const fn with_msg_size_range(mut self, min: u16, max: u16) -> Self {
        self.min_msg_size = min;
        self.max_msg_size = max;
        self
    }
}
