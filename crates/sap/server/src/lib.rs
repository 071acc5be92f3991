//! Bluetooth SIM Access Profile server
//!
//! A [`SapServer`] bridges one SAP client, usually an RFCOMM socket, to a
//! modem that speaks length-prefixed protobuf records. The session runs on
//! three kinds of threads:
//!
//! - a reader for the client stream
//! - a reader for the modem stream, started on the first `CONNECT_REQ`
//! - the worker, which owns the [`Machine`] and performs every write
//!
//! Timers and host callbacks are pluggable through [`Scheduler`] and
//! [`SessionHost`].
//!
//! ```no_run
//! use std::net::TcpListener;
//!
//! use nexum_sap_server::{ModemEndpoint, SapServer};
//!
//! # fn main() -> nexum_sap_server::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:4000")?;
//! let (client, _) = listener.accept()?;
//! let modem = ModemEndpoint::Unix("/run/rild/sap_uim_socket1".into());
//!
//! let server = SapServer::builder(Box::new(client), modem).start()?;
//! server.join()?;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod host;
pub mod machine;
pub mod state;
pub mod stream;
pub mod timer;

mod error;
mod modem_link;
mod rfcomm;
mod server;
mod worker;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use host::{NoopHost, SessionHost};
pub use machine::{Context, DisconnectAction, Effect, Event, Machine};
pub use server::{SapServer, SapServerBuilder};
pub use state::ConnectionState;
pub use stream::{DuplexStream, ModemConnector, ModemEndpoint};
pub use timer::{Scheduler, ThreadScheduler, TimerHandle, TimerTask};

/// Prelude module containing commonly used types
pub mod prelude {
    pub use crate::{
        ConnectionState, DisconnectAction, ModemEndpoint, SapServer, ServerConfig, ServerError,
        SessionHost,
    };
}
