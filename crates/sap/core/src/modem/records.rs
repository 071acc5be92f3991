//! Protobuf records exchanged with the modem
//!
//! Every record on the modem link is a [`RecordHeader`] whose `payload`
//! carries one of the kind-specific messages below. Requests with no
//! arguments (ATR, reset, disconnect, card reader status) send an empty
//! payload.

use bytes::Bytes;

/// Direction of a record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Direction {
    /// Not set
    Unknown = 0,
    /// Engine to modem
    Request = 1,
    /// Modem answer to a request
    Response = 2,
    /// Modem initiated
    Unsolicited = 3,
}

/// Operation a record refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RecordId {
    /// Not set
    Unknown = 0,
    /// Open the SIM access session
    Connect = 1,
    /// Close the SIM access session
    Disconnect = 2,
    /// APDU exchange
    Apdu = 3,
    /// Read the ATR
    TransferAtr = 4,
    /// Power the SIM on or off
    Power = 5,
    /// Reset the SIM
    ResetSim = 6,
    /// SIM status indication
    Status = 7,
    /// Read the card reader status
    TransferCardReaderStatus = 8,
    /// Error report
    ErrorResp = 9,
    /// Select the transport protocol
    SetTransferProtocol = 10,
    /// Toggle SIM-access test mode
    SimAccessTest = 11,
}

/// Status reported in the header of a response
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ModemError {
    /// Request succeeded
    Success = 0,
    /// Radio is off or unavailable
    RadioNotAvailable = 1,
    /// Unspecified failure
    GenericFailure = 2,
    /// Modem does not implement the request
    RequestNotSupported = 3,
    /// Request was cancelled
    Cancelled = 4,
    /// Request carried an invalid argument
    InvalidParameter = 5,
    /// Not meaningful for this record
    Unused = 6,
}

/// Outcome carried inside a response payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ModemResponse {
    /// Operation succeeded
    Success = 0,
    /// Unspecified failure
    GenericFailure = 1,
    /// SIM is not ready
    SimNotReady = 2,
    /// SIM was already powered off
    SimAlreadyPoweredOff = 3,
    /// No SIM present
    SimAbsent = 4,
    /// SIM was already powered on
    SimAlreadyPoweredOn = 5,
    /// Requested data is not available
    SimDataNotAvailable = 6,
}

/// Outcome of a connect request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ConnectResponse {
    /// Session established
    Success = 0,
    /// Session could not be established
    ConnectFailure = 1,
    /// Requested maximum message size is too large
    MsgSizeTooLarge = 2,
    /// Requested maximum message size is too small
    MsgSizeTooSmall = 3,
    /// Session accepted, but a call is ongoing
    ConnectOkCallOngoing = 4,
}

/// Format of a command APDU
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ApduType {
    /// GSM 11.11 APDU
    Apdu = 0,
    /// ISO 7816 APDU
    Apdu7816 = 1,
}

/// Envelope of every record on the modem link
#[derive(Clone, PartialEq, prost::Message)]
pub struct RecordHeader {
    /// Correlation token, required on requests and responses
    #[prost(fixed32, optional, tag = "1")]
    pub token: Option<u32>,
    /// Record direction
    #[prost(enumeration = "Direction", tag = "2")]
    pub direction: i32,
    /// Operation
    #[prost(enumeration = "RecordId", tag = "3")]
    pub id: i32,
    /// Status, required on responses
    #[prost(enumeration = "ModemError", optional, tag = "4")]
    pub error: Option<i32>,
    /// Kind-specific payload
    #[prost(bytes = "bytes", tag = "5")]
    pub payload: Bytes,
}

/// Connect request payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectReq {
    /// Maximum SAP message size negotiated by the client
    #[prost(int32, tag = "1")]
    pub max_message_size: i32,
}

/// Connect response payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectRsp {
    /// Outcome
    #[prost(enumeration = "ConnectResponse", tag = "1")]
    pub response: i32,
    /// Size the modem can support, if it differs
    #[prost(int32, optional, tag = "2")]
    pub max_message_size: Option<i32>,
}

/// Unsolicited disconnect payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct DisconnectInd {
    /// SAP disconnection type
    #[prost(int32, optional, tag = "1")]
    pub disconnect_type: Option<i32>,
}

/// APDU request payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct ApduReq {
    /// Command format
    #[prost(enumeration = "ApduType", tag = "1")]
    pub apdu_type: i32,
    /// Command bytes
    #[prost(bytes = "bytes", tag = "2")]
    pub command: Bytes,
}

/// APDU response payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct ApduRsp {
    /// Command format that was used
    #[prost(enumeration = "ApduType", tag = "1")]
    pub apdu_type: i32,
    /// Outcome
    #[prost(enumeration = "ModemResponse", tag = "2")]
    pub response: i32,
    /// Response bytes
    #[prost(bytes = "bytes", optional, tag = "3")]
    pub apdu_response: Option<Bytes>,
}

/// ATR response payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct TransferAtrRsp {
    /// Outcome
    #[prost(enumeration = "ModemResponse", tag = "1")]
    pub response: i32,
    /// Answer to reset
    #[prost(bytes = "bytes", optional, tag = "2")]
    pub atr: Option<Bytes>,
}

/// Power request payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct PowerReq {
    /// `true` to power on
    #[prost(bool, tag = "1")]
    pub state: bool,
}

/// Payload of responses that only carry an outcome
#[derive(Clone, PartialEq, prost::Message)]
pub struct OutcomeRsp {
    /// Outcome
    #[prost(enumeration = "ModemResponse", tag = "1")]
    pub response: i32,
}

/// SIM status indication payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct StatusInd {
    /// SAP status change
    #[prost(int32, optional, tag = "1")]
    pub status_change: Option<i32>,
}

/// Card reader status response payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct CardReaderStatusRsp {
    /// Outcome
    #[prost(enumeration = "ModemResponse", tag = "1")]
    pub response: i32,
    /// Card reader status bit field
    #[prost(int32, optional, tag = "2")]
    pub card_reader_status: Option<i32>,
}

/// Transport protocol request payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct SetTransferProtocolReq {
    /// SAP transport protocol
    #[prost(int32, tag = "1")]
    pub protocol: i32,
}

/// Test mode request payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct SimAccessTestReq {
    /// `true` to enable test mode
    #[prost(bool, tag = "1")]
    pub enabled: bool,
}
