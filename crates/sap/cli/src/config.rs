//! Daemon configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `SAPD_` environment variables. Command-line flags are applied on top by
//! the caller.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use nexum_sap_server::ServerConfig;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct Config {
    /// Address SAP clients connect to
    pub(crate) listen: SocketAddr,
    /// Modem endpoint, `unix:PATH` or `tcp:HOST:PORT`
    pub(crate) modem: String,
    pub(crate) immediate_disconnect_timeout_ms: u64,
    pub(crate) client_close_timeout_ms: u64,
    pub(crate) deinit_timeout_ms: u64,
    pub(crate) modem_connect_attempts: u32,
    pub(crate) modem_connect_backoff_ms: u64,
    pub(crate) modem_connect_warn_after_ms: u64,
    pub(crate) max_record_len: usize,
    pub(crate) min_msg_size: u16,
    pub(crate) max_msg_size: u16,
    /// Report a voice call as ongoing to every session
    pub(crate) call_ongoing: bool,
    /// Test mode announced on the first modem connection of each session
    pub(crate) test_mode: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 4000)),
            modem: "unix:/run/sap/modem.sock".to_string(),
            immediate_disconnect_timeout_ms: millis(server.immediate_disconnect_timeout),
            client_close_timeout_ms: millis(server.client_close_timeout),
            deinit_timeout_ms: millis(server.deinit_timeout),
            modem_connect_attempts: server.modem_connect_attempts,
            modem_connect_backoff_ms: millis(server.modem_connect_backoff),
            modem_connect_warn_after_ms: millis(server.modem_connect_warn_after),
            max_record_len: server.max_record_len,
            min_msg_size: server.min_msg_size,
            max_msg_size: server.max_msg_size,
            call_ongoing: false,
            test_mode: None,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Session configuration for the server crate
    pub(crate) fn server_config(&self) -> ServerConfig {
        ServerConfig::new()
            .with_immediate_disconnect_timeout(Duration::from_millis(
                self.immediate_disconnect_timeout_ms,
            ))
            .with_client_close_timeout(Duration::from_millis(self.client_close_timeout_ms))
            .with_deinit_timeout(Duration::from_millis(self.deinit_timeout_ms))
            .with_modem_retry(
                self.modem_connect_attempts,
                Duration::from_millis(self.modem_connect_backoff_ms),
            )
            .with_modem_connect_warn_after(Duration::from_millis(
                self.modem_connect_warn_after_ms,
            ))
            .with_max_record_len(self.max_record_len)
            .with_msg_size_range(self.min_msg_size, self.max_msg_size)
    }
}

pub(crate) fn load_config(file: Option<&Path>) -> eyre::Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(file) = file {
        figment = figment.merge(Toml::file(file));
    }
    Ok(figment.merge(Env::prefixed("SAPD_")).extract()?)
}
