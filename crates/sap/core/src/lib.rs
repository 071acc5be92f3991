//! Message codec for the Bluetooth SIM Access Profile
//!
//! This crate holds everything that is pure data on the path between a SAP
//! client and the modem:
//!
//! - [`ProtocolMessage`], the in-memory form of every SAP message
//! - the SAP TLV codec ([`codec::read_request`], [`ProtocolMessage::encode`])
//! - the modem record codec and the translation between modem records and SAP
//!   messages ([`modem`])
//! - [`PendingRequests`], which correlates modem responses with requests
//!
//! No threads are started here; the server crate drives these types.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::Bytes;

pub mod codec;
pub mod message;
pub mod modem;
mod pending;
mod util;

mod error;
pub use error::{Error, Result};

pub use codec::{read_frame, read_request};
pub use message::{
    ConnectionStatus, DisconnectionType, MessageKind, ParameterId, ProtocolMessage, ResultCode,
    StatusChange, TestMode, TransportProtocol,
};
pub use modem::Inbound;
pub use pending::PendingRequests;

/// Prelude module containing commonly used types
pub mod prelude {
    pub use crate::{
        ConnectionStatus, DisconnectionType, Error, MessageKind, PendingRequests,
        ProtocolMessage, Result, ResultCode, StatusChange, TestMode, TransportProtocol,
    };
}
