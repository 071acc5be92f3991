//! SAP message model
//!
//! A [`ProtocolMessage`] is the single in-memory form of every SAP message,
//! whether it arrived from the client, was synthesized by the engine or was
//! translated from a modem record. Every parameter is optional; which ones are
//! populated depends on the [`MessageKind`].

use bytes::Bytes;

use crate::error::{Error, Result};

/// Kind of a SAP message
///
/// The first twenty-one kinds travel on the SAP link with the id returned by
/// [`MessageKind::wire_id`]. The remaining kinds only exist between the modem
/// link and the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum MessageKind {
    /// Client asks to open a session
    #[display("CONNECT_REQ")]
    ConnectReq,
    /// Server answer to [`MessageKind::ConnectReq`]
    #[display("CONNECT_RESP")]
    ConnectResp,
    /// Client asks to close the session
    #[display("DISCONNECT_REQ")]
    DisconnectReq,
    /// Server answer to [`MessageKind::DisconnectReq`]
    #[display("DISCONNECT_RESP")]
    DisconnectResp,
    /// Server initiated disconnect
    #[display("DISCONNECT_IND")]
    DisconnectInd,
    /// Command APDU for the SIM
    #[display("TRANSFER_APDU_REQ")]
    TransferApduReq,
    /// Response APDU from the SIM
    #[display("TRANSFER_APDU_RESP")]
    TransferApduResp,
    /// Client asks for the ATR
    #[display("TRANSFER_ATR_REQ")]
    TransferAtrReq,
    /// ATR of the SIM
    #[display("TRANSFER_ATR_RESP")]
    TransferAtrResp,
    /// Client asks to power the SIM off
    #[display("POWER_SIM_OFF_REQ")]
    PowerSimOffReq,
    /// Result of powering the SIM off
    #[display("POWER_SIM_OFF_RESP")]
    PowerSimOffResp,
    /// Client asks to power the SIM on
    #[display("POWER_SIM_ON_REQ")]
    PowerSimOnReq,
    /// Result of powering the SIM on
    #[display("POWER_SIM_ON_RESP")]
    PowerSimOnResp,
    /// Client asks to reset the SIM
    #[display("RESET_SIM_REQ")]
    ResetSimReq,
    /// Result of the SIM reset
    #[display("RESET_SIM_RESP")]
    ResetSimResp,
    /// Client asks for the card reader status
    #[display("TRANSFER_CARD_READER_STATUS_REQ")]
    TransferCardReaderStatusReq,
    /// Card reader status
    #[display("TRANSFER_CARD_READER_STATUS_RESP")]
    TransferCardReaderStatusResp,
    /// SIM status change
    #[display("STATUS_IND")]
    StatusInd,
    /// Request could not be handled
    #[display("ERROR_RESP")]
    ErrorResp,
    /// Client asks for a transport protocol
    #[display("SET_TRANSPORT_PROTOCOL_REQ")]
    SetTransportProtocolReq,
    /// Result of the transport protocol change
    #[display("SET_TRANSPORT_PROTOCOL_RESP")]
    SetTransportProtocolResp,

    /// Modem reported a disconnect on its own
    #[display("MODEM_DISCONNECT_IND")]
    ModemDisconnectInd,
    /// Modem record the engine has no use for
    #[display("MODEM_UNKNOWN")]
    ModemUnknown,
    /// Switch the modem SIM-access test mode
    #[display("SIM_ACCESS_TEST_REQ")]
    SimAccessTestReq,
    /// Answer to [`MessageKind::SimAccessTestReq`]
    #[display("SIM_ACCESS_TEST_RESP")]
    SimAccessTestResp,
}

impl MessageKind {
    /// SAP message id, `None` for kinds internal to the modem link
    pub const fn wire_id(self) -> Option<u8> {
        let id = match self {
            Self::ConnectReq => 0x00,
            Self::ConnectResp => 0x01,
            Self::DisconnectReq => 0x02,
            Self::DisconnectResp => 0x03,
            Self::DisconnectInd => 0x04,
            Self::TransferApduReq => 0x05,
            Self::TransferApduResp => 0x06,
            Self::TransferAtrReq => 0x07,
            Self::TransferAtrResp => 0x08,
            Self::PowerSimOffReq => 0x09,
            Self::PowerSimOffResp => 0x0A,
            Self::PowerSimOnReq => 0x0B,
            Self::PowerSimOnResp => 0x0C,
            Self::ResetSimReq => 0x0D,
            Self::ResetSimResp => 0x0E,
            Self::TransferCardReaderStatusReq => 0x0F,
            Self::TransferCardReaderStatusResp => 0x10,
            Self::StatusInd => 0x11,
            Self::ErrorResp => 0x12,
            Self::SetTransportProtocolReq => 0x13,
            Self::SetTransportProtocolResp => 0x14,
            Self::ModemDisconnectInd
            | Self::ModemUnknown
            | Self::SimAccessTestReq
            | Self::SimAccessTestResp => return None,
        };
        Some(id)
    }

    /// Kind for a SAP message id
    pub const fn from_wire(id: u8) -> Option<Self> {
        let kind = match id {
            0x00 => Self::ConnectReq,
            0x01 => Self::ConnectResp,
            0x02 => Self::DisconnectReq,
            0x03 => Self::DisconnectResp,
            0x04 => Self::DisconnectInd,
            0x05 => Self::TransferApduReq,
            0x06 => Self::TransferApduResp,
            0x07 => Self::TransferAtrReq,
            0x08 => Self::TransferAtrResp,
            0x09 => Self::PowerSimOffReq,
            0x0A => Self::PowerSimOffResp,
            0x0B => Self::PowerSimOnReq,
            0x0C => Self::PowerSimOnResp,
            0x0D => Self::ResetSimReq,
            0x0E => Self::ResetSimResp,
            0x0F => Self::TransferCardReaderStatusReq,
            0x10 => Self::TransferCardReaderStatusResp,
            0x11 => Self::StatusInd,
            0x12 => Self::ErrorResp,
            0x13 => Self::SetTransportProtocolReq,
            0x14 => Self::SetTransportProtocolResp,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether this kind only exists between the modem link and the engine
    pub const fn is_internal(self) -> bool {
        self.wire_id().is_none()
    }
}

/// Parameter identifier of the SAP TLV encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[repr(u8)]
pub enum ParameterId {
    /// Maximum message size, big-endian `u16`
    MaxMsgSize = 0x00,
    /// Connection status of a CONNECT_RESP
    ConnectionStatus = 0x01,
    /// Result code of a response
    ResultCode = 0x02,
    /// Disconnection type of a DISCONNECT_IND
    DisconnectionType = 0x03,
    /// Command APDU
    CommandApdu = 0x04,
    /// Response APDU
    ResponseApdu = 0x05,
    /// Answer to reset
    Atr = 0x06,
    /// Card reader status bit field
    CardReaderStatus = 0x07,
    /// Status change of a STATUS_IND
    StatusChange = 0x08,
    /// Transport protocol
    TransportProtocol = 0x09,
    /// Command APDU in ISO 7816 format
    CommandApdu7816 = 0x10,
}

impl ParameterId {
    /// Parameter for an id byte
    pub const fn from_wire(id: u8) -> Option<Self> {
        let param = match id {
            0x00 => Self::MaxMsgSize,
            0x01 => Self::ConnectionStatus,
            0x02 => Self::ResultCode,
            0x03 => Self::DisconnectionType,
            0x04 => Self::CommandApdu,
            0x05 => Self::ResponseApdu,
            0x06 => Self::Atr,
            0x07 => Self::CardReaderStatus,
            0x08 => Self::StatusChange,
            0x09 => Self::TransportProtocol,
            0x10 => Self::CommandApdu7816,
            _ => return None,
        };
        Some(param)
    }

    /// Required value length, `None` for variable-length parameters
    pub const fn fixed_len(self) -> Option<usize> {
        match self {
            Self::MaxMsgSize => Some(2),
            Self::ConnectionStatus
            | Self::ResultCode
            | Self::DisconnectionType
            | Self::CardReaderStatus
            | Self::StatusChange
            | Self::TransportProtocol => Some(1),
            Self::CommandApdu | Self::ResponseApdu | Self::Atr | Self::CommandApdu7816 => None,
        }
    }
}

/// Declares a one-byte parameter vocabulary with checked conversion from the wire
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident => $param:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl $name {
            /// Parameter that carries this value on the wire
            pub const PARAMETER: ParameterId = ParameterId::$param;
        }

        impl TryFrom<u8> for $name {
            type Error = Error;

            fn try_from(value: u8) -> Result<Self> {
                match value {
                    $( $value => Ok(Self::$variant), )+
                    _ => Err(Error::InvalidParameterValue {
                        param: ParameterId::$param,
                        value,
                    }),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> Self {
                value as Self
            }
        }
    };
}

wire_enum! {
    /// Outcome of a request
    ResultCode => ResultCode {
        /// Request processed correctly
        Ok = 0x00,
        /// Error, no reason defined
        NoReason = 0x01,
        /// Error, card not accessible
        CardNotAccessible = 0x02,
        /// Error, card already powered off
        CardPoweredOff = 0x03,
        /// Error, card removed
        CardRemoved = 0x04,
        /// Error, card already powered on
        CardPoweredOn = 0x05,
        /// Error, data not available
        DataNotAvailable = 0x06,
        /// Error, not supported
        NotSupported = 0x07,
    }
}

wire_enum! {
    /// Outcome of a connection attempt
    ConnectionStatus => ConnectionStatus {
        /// Server can fulfil the requirements
        Ok = 0x00,
        /// Server unable to establish the connection
        ErrorConnection = 0x01,
        /// Server does not support the requested maximum message size
        MaxMsgSizeUnsupported = 0x02,
        /// Requested maximum message size is too small
        MaxMsgSizeTooSmall = 0x03,
        /// Connection accepted, but a call is ongoing
        OkOngoingCall = 0x04,
    }
}

wire_enum! {
    /// How the server wants the client to leave
    DisconnectionType => DisconnectionType {
        /// Client should finish its work and send DISCONNECT_REQ
        Graceful = 0x00,
        /// Connection is closed without further exchange
        Immediate = 0x01,
    }
}

wire_enum! {
    /// SIM status reported by STATUS_IND
    StatusChange => StatusChange {
        /// Unknown error
        UnknownError = 0x00,
        /// Card was reset
        CardReset = 0x01,
        /// Card is not accessible
        CardNotAccessible = 0x02,
        /// Card was removed
        CardRemoved = 0x03,
        /// Card was inserted
        CardInserted = 0x04,
        /// Card recovered
        CardRecovered = 0x05,
    }
}

wire_enum! {
    /// Transport protocol between modem and SIM
    TransportProtocol => TransportProtocol {
        /// T=0
        T0 = 0x00,
        /// T=1
        T1 = 0x01,
    }
}

/// SIM-access test mode of the modem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum TestMode {
    /// Normal operation
    Disabled,
    /// Modem runs SIM access in test mode
    Enabled,
}

/// A SAP message with all of its optional parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub(crate) kind: MessageKind,
    /// MaxMsgSize parameter
    pub max_msg_size: Option<u16>,
    /// ConnectionStatus parameter
    pub connection_status: Option<ConnectionStatus>,
    /// ResultCode parameter
    pub result_code: Option<ResultCode>,
    /// DisconnectionType parameter
    pub disconnection_type: Option<DisconnectionType>,
    /// CardReaderStatus parameter
    pub card_reader_status: Option<u8>,
    /// StatusChange parameter
    pub status_change: Option<StatusChange>,
    /// TransportProtocol parameter
    pub transport_protocol: Option<TransportProtocol>,
    /// Test mode, only carried towards the modem
    pub test_mode: Option<TestMode>,
    /// CommandAPDU parameter
    pub apdu: Option<Bytes>,
    /// CommandAPDU7816 parameter
    pub apdu_7816: Option<Bytes>,
    /// ResponseAPDU parameter
    pub apdu_response: Option<Bytes>,
    /// ATR parameter
    pub atr: Option<Bytes>,
    send_to_modem: bool,
    clear_pending: bool,
}

impl ProtocolMessage {
    /// Message of the given kind with no parameters
    pub const fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            max_msg_size: None,
            connection_status: None,
            result_code: None,
            disconnection_type: None,
            card_reader_status: None,
            status_change: None,
            transport_protocol: None,
            test_mode: None,
            apdu: None,
            apdu_7816: None,
            apdu_response: None,
            atr: None,
            send_to_modem: false,
            clear_pending: false,
        }
    }

    /// CONNECT_REQ announcing the client's maximum message size
    pub const fn connect_req(max_msg_size: u16) -> Self {
        Self::new(MessageKind::ConnectReq).with_max_msg_size(max_msg_size)
    }

    /// CONNECT_RESP with the given status
    pub const fn connect_resp(status: ConnectionStatus) -> Self {
        Self::new(MessageKind::ConnectResp).with_connection_status(status)
    }

    /// DISCONNECT_IND of the given type
    pub const fn disconnect_ind(kind: DisconnectionType) -> Self {
        Self::new(MessageKind::DisconnectInd).with_disconnection_type(kind)
    }

    /// ERROR_RESP
    pub const fn error_resp() -> Self {
        Self::new(MessageKind::ErrorResp)
    }

    /// Kind of this message
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Whether the engine should forward this request to the modem
    pub const fn routes_to_modem(&self) -> bool {
        self.send_to_modem
    }

    /// Whether sending this request drops every outstanding modem request
    pub const fn clears_pending(&self) -> bool {
        self.clear_pending
    }

    /// Mark the request as superseding all outstanding modem requests
    pub const fn set_clear_pending(&mut self, clear: bool) {
        self.clear_pending = clear;
    }

    /// Set MaxMsgSize
    pub const fn with_max_msg_size(mut self, size: u16) -> Self {
        self.max_msg_size = Some(size);
        self
    }

    /// Set ConnectionStatus
    pub const fn with_connection_status(mut self, status: ConnectionStatus) -> Self {
        self.connection_status = Some(status);
        self
    }

    /// Set ResultCode
    pub const fn with_result_code(mut self, code: ResultCode) -> Self {
        self.result_code = Some(code);
        self
    }

    /// Set DisconnectionType
    pub const fn with_disconnection_type(mut self, kind: DisconnectionType) -> Self {
        self.disconnection_type = Some(kind);
        self
    }

    /// Set CardReaderStatus
    pub const fn with_card_reader_status(mut self, status: u8) -> Self {
        self.card_reader_status = Some(status);
        self
    }

    /// Set StatusChange
    pub const fn with_status_change(mut self, status: StatusChange) -> Self {
        self.status_change = Some(status);
        self
    }

    /// Set TransportProtocol
    pub const fn with_transport_protocol(mut self, protocol: TransportProtocol) -> Self {
        self.transport_protocol = Some(protocol);
        self
    }

    /// Set the modem test mode
    pub const fn with_test_mode(mut self, mode: TestMode) -> Self {
        self.test_mode = Some(mode);
        self
    }

    /// Set CommandAPDU
    pub fn with_apdu(mut self, apdu: impl Into<Bytes>) -> Self {
        self.apdu = Some(apdu.into());
        self
    }

    /// Set CommandAPDU7816
    pub fn with_apdu_7816(mut self, apdu: impl Into<Bytes>) -> Self {
        self.apdu_7816 = Some(apdu.into());
        self
    }

    /// Set ResponseAPDU
    pub fn with_apdu_response(mut self, apdu: impl Into<Bytes>) -> Self {
        self.apdu_response = Some(apdu.into());
        self
    }

    /// Set ATR
    pub fn with_atr(mut self, atr: impl Into<Bytes>) -> Self {
        self.atr = Some(atr.into());
        self
    }

    /// Check that a client request carries what its kind requires
    ///
    /// On success the route-to-modem flag is set for every request the modem
    /// answers. CONNECT_REQ and DISCONNECT_REQ are left to the engine.
    pub fn validate_request(mut self) -> Result<Self> {
        match self.kind {
            MessageKind::ConnectReq => {
                self.require(self.max_msg_size.is_some(), ParameterId::MaxMsgSize)?;
            }
            MessageKind::TransferApduReq => {
                self.require(
                    self.apdu.is_some() || self.apdu_7816.is_some(),
                    ParameterId::CommandApdu,
                )?;
                self.send_to_modem = true;
            }
            MessageKind::SetTransportProtocolReq => {
                self.require(
                    self.transport_protocol.is_some(),
                    ParameterId::TransportProtocol,
                )?;
                self.send_to_modem = true;
            }
            MessageKind::TransferAtrReq
            | MessageKind::PowerSimOffReq
            | MessageKind::PowerSimOnReq
            | MessageKind::ResetSimReq
            | MessageKind::TransferCardReaderStatusReq => self.send_to_modem = true,
            MessageKind::DisconnectReq => {}
            other => return Err(Error::UnsupportedRequest(other)),
        }
        Ok(self)
    }

    const fn require(&self, present: bool, param: ParameterId) -> Result<()> {
        if present {
            Ok(())
        } else {
            Err(Error::MissingParameter {
                kind: self.kind,
                param,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_ids_round_trip() {
        for id in 0x00..=0x14u8 {
            let kind = MessageKind::from_wire(id).unwrap();
            assert_eq!(kind.wire_id(), Some(id));
            assert!(!kind.is_internal());
        }
        assert_eq!(MessageKind::from_wire(0x15), None);
        assert_eq!(MessageKind::SimAccessTestReq.wire_id(), None);
        assert!(MessageKind::ModemDisconnectInd.is_internal());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(MessageKind::ConnectReq.to_string(), "CONNECT_REQ");
        assert_eq!(
            MessageKind::TransferCardReaderStatusResp.to_string(),
            "TRANSFER_CARD_READER_STATUS_RESP"
        );
    }

    #[test]
    fn test_vocabulary_bounds() {
        assert_eq!(ResultCode::try_from(0x07).unwrap(), ResultCode::NotSupported);
        assert!(matches!(
            ResultCode::try_from(0x08),
            Err(Error::InvalidParameterValue {
                param: ParameterId::ResultCode,
                value: 0x08
            })
        ));
        assert_eq!(
            ConnectionStatus::try_from(0x04).unwrap(),
            ConnectionStatus::OkOngoingCall
        );
        assert!(TransportProtocol::try_from(0x02).is_err());
        assert_eq!(u8::from(StatusChange::CardRecovered), 0x05);
    }

    #[test]
    fn test_validate_connect_requires_size() {
        let err = ProtocolMessage::new(MessageKind::ConnectReq)
            .validate_request()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingParameter {
                kind: MessageKind::ConnectReq,
                param: ParameterId::MaxMsgSize
            }
        ));

        let msg = ProtocolMessage::connect_req(512).validate_request().unwrap();
        assert!(!msg.routes_to_modem());
    }

    #[test]
    fn test_validate_apdu_accepts_either_form() {
        let plain = ProtocolMessage::new(MessageKind::TransferApduReq)
            .with_apdu(vec![0x00, 0xA4, 0x00, 0x00])
            .validate_request()
            .unwrap();
        assert!(plain.routes_to_modem());

        let iso = ProtocolMessage::new(MessageKind::TransferApduReq)
            .with_apdu_7816(vec![0x00, 0xB0, 0x00, 0x00])
            .validate_request()
            .unwrap();
        assert!(iso.routes_to_modem());

        assert!(
            ProtocolMessage::new(MessageKind::TransferApduReq)
                .validate_request()
                .is_err()
        );
    }

    #[test]
    fn test_validate_routing_flags() {
        for kind in [
            MessageKind::TransferAtrReq,
            MessageKind::PowerSimOffReq,
            MessageKind::PowerSimOnReq,
            MessageKind::ResetSimReq,
            MessageKind::TransferCardReaderStatusReq,
        ] {
            let msg = ProtocolMessage::new(kind).validate_request().unwrap();
            assert!(msg.routes_to_modem(), "{kind} should route to the modem");
        }

        let disconnect = ProtocolMessage::new(MessageKind::DisconnectReq)
            .validate_request()
            .unwrap();
        assert!(!disconnect.routes_to_modem());
    }

    #[test]
    fn test_validate_rejects_responses() {
        assert!(matches!(
            ProtocolMessage::error_resp().validate_request(),
            Err(Error::UnsupportedRequest(MessageKind::ErrorResp))
        ));
        assert!(matches!(
            ProtocolMessage::connect_resp(ConnectionStatus::Ok).validate_request(),
            Err(Error::UnsupportedRequest(MessageKind::ConnectResp))
        ));
    }
}
