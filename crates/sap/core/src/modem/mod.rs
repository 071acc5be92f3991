//! Modem link records and their translation to SAP messages
//!
//! Records are framed with a 4-byte big-endian length followed by a
//! protobuf-encoded [`RecordHeader`]. Requests are correlated with their
//! responses through the token in the header and a shared
//! [`PendingRequests`] table.

pub mod records;

use std::io::Read;

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::message::{
    ConnectionStatus, DisconnectionType, MessageKind, ParameterId, ProtocolMessage, ResultCode,
    StatusChange, TestMode,
};
use crate::pending::PendingRequests;
use crate::util::read_exact_or_eof;

pub use records::{
    ApduReq, ApduRsp, ApduType, CardReaderStatusRsp, ConnectReq, ConnectResponse, ConnectRsp,
    Direction, DisconnectInd, ModemError, ModemResponse, OutcomeRsp, PowerReq, RecordHeader,
    RecordId, SetTransferProtocolReq, SimAccessTestReq, StatusInd, TransferAtrRsp,
};

/// Length of the record length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound for a record body
///
/// Large enough for a maximum-size APDU plus header overhead.
pub const DEFAULT_MAX_RECORD_LEN: usize = 0x1_0000 + 256;

/// A record from the modem, translated for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Answer to a pending request
    Response(ProtocolMessage),
    /// Modem initiated message
    Unsolicited(ProtocolMessage),
    /// Response whose token is not pending, dropped
    Uncorrelated {
        /// Token carried by the response
        token: u32,
    },
}

/// SAP result code for a header status
pub const fn result_from_error(error: ModemError) -> ResultCode {
    match error {
        ModemError::Success => ResultCode::Ok,
        ModemError::RadioNotAvailable => ResultCode::CardNotAccessible,
        ModemError::RequestNotSupported => ResultCode::NotSupported,
        ModemError::Cancelled
        | ModemError::GenericFailure
        | ModemError::InvalidParameter
        | ModemError::Unused => ResultCode::NoReason,
    }
}

/// SAP result code for the outcome of a `request`
pub const fn result_from_response(request: MessageKind, response: ModemResponse) -> ResultCode {
    match response {
        ModemResponse::Success => ResultCode::Ok,
        ModemResponse::GenericFailure => match request {
            MessageKind::SetTransportProtocolReq => ResultCode::NotSupported,
            _ => ResultCode::NoReason,
        },
        ModemResponse::SimNotReady => ResultCode::CardRemoved,
        ModemResponse::SimAlreadyPoweredOff => ResultCode::CardPoweredOff,
        ModemResponse::SimAbsent => ResultCode::CardNotAccessible,
        ModemResponse::SimAlreadyPoweredOn => ResultCode::CardPoweredOn,
        ModemResponse::SimDataNotAvailable => ResultCode::DataNotAvailable,
    }
}

/// SAP connection status for a connect outcome
pub const fn connection_status(response: ConnectResponse) -> ConnectionStatus {
    match response {
        ConnectResponse::Success => ConnectionStatus::Ok,
        ConnectResponse::ConnectOkCallOngoing => ConnectionStatus::OkOngoingCall,
        ConnectResponse::MsgSizeTooLarge => ConnectionStatus::MaxMsgSizeUnsupported,
        ConnectResponse::MsgSizeTooSmall => ConnectionStatus::MaxMsgSizeTooSmall,
        ConnectResponse::ConnectFailure => ConnectionStatus::ErrorConnection,
    }
}

fn decode_payload<M: Message + Default>(payload: &[u8]) -> Result<M> {
    M::decode(payload).map_err(Error::Payload)
}

fn modem_response(raw: i32) -> ModemResponse {
    ModemResponse::try_from(raw).unwrap_or(ModemResponse::GenericFailure)
}

/// Build the framed modem record for a request and register its token
///
/// When the request is marked to clear the pending table, every outstanding
/// request is forgotten before the new token is registered. Returns the token
/// so the caller can unregister it if the write fails.
pub fn encode_request(msg: &ProtocolMessage, pending: &PendingRequests) -> Result<(u32, Bytes)> {
    let kind = msg.kind();
    let missing = |param| Error::MissingParameter { kind, param };

    let (id, payload) = match kind {
        MessageKind::ConnectReq => {
            let size = msg.max_msg_size.ok_or_else(|| missing(ParameterId::MaxMsgSize))?;
            let req = ConnectReq {
                max_message_size: i32::from(size),
            };
            (RecordId::Connect, req.encode_to_vec())
        }
        MessageKind::DisconnectReq => (RecordId::Disconnect, Vec::new()),
        MessageKind::TransferApduReq => {
            let (apdu_type, command) = match (&msg.apdu, &msg.apdu_7816) {
                (Some(apdu), _) => (ApduType::Apdu, apdu.clone()),
                (None, Some(apdu)) => (ApduType::Apdu7816, apdu.clone()),
                (None, None) => return Err(missing(ParameterId::CommandApdu)),
            };
            let req = ApduReq {
                apdu_type: apdu_type.into(),
                command,
            };
            (RecordId::Apdu, req.encode_to_vec())
        }
        MessageKind::TransferAtrReq => (RecordId::TransferAtr, Vec::new()),
        MessageKind::PowerSimOffReq | MessageKind::PowerSimOnReq => {
            let req = PowerReq {
                state: kind == MessageKind::PowerSimOnReq,
            };
            (RecordId::Power, req.encode_to_vec())
        }
        MessageKind::ResetSimReq => (RecordId::ResetSim, Vec::new()),
        MessageKind::TransferCardReaderStatusReq => {
            (RecordId::TransferCardReaderStatus, Vec::new())
        }
        MessageKind::SetTransportProtocolReq => {
            let protocol = msg
                .transport_protocol
                .ok_or_else(|| missing(ParameterId::TransportProtocol))?;
            let req = SetTransferProtocolReq {
                protocol: i32::from(u8::from(protocol)),
            };
            (RecordId::SetTransferProtocol, req.encode_to_vec())
        }
        MessageKind::SimAccessTestReq => {
            let mode = msg.test_mode.ok_or(Error::MissingField("test_mode"))?;
            let req = SimAccessTestReq {
                enabled: mode == TestMode::Enabled,
            };
            (RecordId::SimAccessTest, req.encode_to_vec())
        }
        other => return Err(Error::UnsupportedRequest(other)),
    };

    let token = pending.next_token();
    let header = RecordHeader {
        token: Some(token),
        direction: Direction::Request.into(),
        id: id.into(),
        error: None,
        payload: payload.into(),
    };
    let frame = frame_record(&header);

    if msg.clears_pending() {
        let dropped = pending.clear_all();
        debug!(dropped, "Cleared pending modem requests");
    }
    pending.insert(token, kind);
    trace!(token, %kind, frame = %hex::encode(&frame), "Encoded modem request");
    Ok((token, frame))
}

/// Prefix an encoded header with its length
pub fn frame_record(header: &RecordHeader) -> Bytes {
    let body = header.encode_to_vec();
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_LEN + body.len());
    frame.put_u32(body.len() as u32);
    frame.put_slice(&body);
    frame.freeze()
}

/// Read one length-prefixed record
///
/// Returns `Ok(None)` when the stream ends cleanly before a record starts.
pub fn read_record<R: Read>(reader: &mut R, limit: usize) -> Result<Option<RecordHeader>> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    if !read_exact_or_eof(reader, &mut prefix)? {
        return Ok(None);
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > limit {
        return Err(Error::RecordTooLarge { len, limit });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    trace!(len, record = %hex::encode(&body), "Read modem record");
    Ok(Some(RecordHeader::decode(body.as_slice())?))
}

/// Translate a record read from the modem
pub fn decode_inbound(header: &RecordHeader, pending: &PendingRequests) -> Result<Inbound> {
    match Direction::try_from(header.direction) {
        Ok(Direction::Response) => {
            let token = header.token.ok_or(Error::MissingField("token"))?;
            Ok(decode_response(header, pending)?
                .map_or(Inbound::Uncorrelated { token }, Inbound::Response))
        }
        Ok(Direction::Unsolicited) => decode_unsolicited(header).map(Inbound::Unsolicited),
        _ => Err(Error::UnexpectedDirection(header.direction)),
    }
}

/// Translate a response, consuming its pending entry
///
/// Returns `Ok(None)` when the token is not pending.
pub fn decode_response(
    header: &RecordHeader,
    pending: &PendingRequests,
) -> Result<Option<ProtocolMessage>> {
    let token = header.token.ok_or(Error::MissingField("token"))?;
    let raw_error = header.error.ok_or(Error::MissingField("error"))?;
    let Some(request) = pending.take(token) else {
        debug!(token, "Dropping response for unknown token");
        return Ok(None);
    };
    let error = ModemError::try_from(raw_error).unwrap_or(ModemError::GenericFailure);
    let payload = header.payload.as_ref();

    let kind = match request {
        MessageKind::ConnectReq => MessageKind::ConnectResp,
        MessageKind::DisconnectReq => MessageKind::DisconnectResp,
        MessageKind::TransferApduReq => MessageKind::TransferApduResp,
        MessageKind::TransferAtrReq => MessageKind::TransferAtrResp,
        MessageKind::PowerSimOffReq => MessageKind::PowerSimOffResp,
        MessageKind::PowerSimOnReq => MessageKind::PowerSimOnResp,
        MessageKind::ResetSimReq => MessageKind::ResetSimResp,
        MessageKind::TransferCardReaderStatusReq => MessageKind::TransferCardReaderStatusResp,
        MessageKind::SetTransportProtocolReq => MessageKind::SetTransportProtocolResp,
        MessageKind::SimAccessTestReq => MessageKind::SimAccessTestResp,
        other => return Err(Error::UnsupportedRequest(other)),
    };
    let mut msg = ProtocolMessage::new(kind);

    match request {
        MessageKind::ConnectReq => {
            if error == ModemError::Success {
                let rsp: ConnectRsp = decode_payload(payload)?;
                let response = ConnectResponse::try_from(rsp.response)
                    .unwrap_or(ConnectResponse::ConnectFailure);
                msg.connection_status = Some(connection_status(response));
                msg.max_msg_size = rsp.max_message_size.and_then(|s| u16::try_from(s).ok());
            } else {
                msg.connection_status = Some(ConnectionStatus::ErrorConnection);
            }
            return Ok(Some(msg));
        }
        MessageKind::DisconnectReq => return Ok(Some(msg)),
        _ => {}
    }

    msg.result_code = Some(result_from_error(error));
    if error != ModemError::Success {
        return Ok(Some(msg));
    }

    let code = match request {
        MessageKind::TransferApduReq => {
            let rsp: ApduRsp = decode_payload(payload)?;
            let code = result_from_response(request, modem_response(rsp.response));
            if code == ResultCode::Ok {
                msg.apdu_response = rsp.apdu_response;
            }
            code
        }
        MessageKind::TransferAtrReq => {
            let rsp: TransferAtrRsp = decode_payload(payload)?;
            let code = result_from_response(request, modem_response(rsp.response));
            if code == ResultCode::Ok {
                msg.atr = rsp.atr;
            }
            code
        }
        MessageKind::TransferCardReaderStatusReq => {
            let rsp: CardReaderStatusRsp = decode_payload(payload)?;
            let code = result_from_response(request, modem_response(rsp.response));
            match rsp.card_reader_status.and_then(|s| u8::try_from(s).ok()) {
                Some(status) if code == ResultCode::Ok => {
                    msg.card_reader_status = Some(status);
                    code
                }
                None if code == ResultCode::Ok => ResultCode::DataNotAvailable,
                _ => code,
            }
        }
        _ => {
            let rsp: OutcomeRsp = decode_payload(payload)?;
            result_from_response(request, modem_response(rsp.response))
        }
    };
    msg.result_code = Some(code);
    Ok(Some(msg))
}

/// Translate a modem initiated record
///
/// Records the engine has no use for become [`MessageKind::ModemUnknown`].
pub fn decode_unsolicited(header: &RecordHeader) -> Result<ProtocolMessage> {
    let payload = header.payload.as_ref();
    let msg = match RecordId::try_from(header.id) {
        Ok(RecordId::Status) => {
            let ind: StatusInd = decode_payload(payload)?;
            match ind
                .status_change
                .and_then(|s| u8::try_from(s).ok())
                .and_then(|s| StatusChange::try_from(s).ok())
            {
                Some(status) => {
                    ProtocolMessage::new(MessageKind::StatusInd).with_status_change(status)
                }
                None => ProtocolMessage::new(MessageKind::ModemUnknown),
            }
        }
        Ok(RecordId::Disconnect) => {
            let ind: DisconnectInd = decode_payload(payload)?;
            match ind
                .disconnect_type
                .and_then(|t| u8::try_from(t).ok())
                .and_then(|t| DisconnectionType::try_from(t).ok())
            {
                Some(kind) => ProtocolMessage::new(MessageKind::ModemDisconnectInd)
                    .with_disconnection_type(kind),
                None => ProtocolMessage::new(MessageKind::ModemUnknown),
            }
        }
        _ => ProtocolMessage::new(MessageKind::ModemUnknown),
    };
    Ok(msg)
}
