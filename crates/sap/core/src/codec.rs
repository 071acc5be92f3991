//! SAP TLV wire codec
//!
//! ```text
//! message   = id:u8 param_count:u8 reserved:u16 parameter*
//! parameter = id:u8 reserved:u8 length:u16(BE) value[length] pad[to 4 bytes]
//! ```

use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::message::{MessageKind, ParameterId, ProtocolMessage};
use crate::util::{padding, read_exact_or_eof, skip};

/// Length of the message header
pub const HEADER_LEN: usize = 4;

/// Length of a parameter header
pub const PARAMETER_HEADER_LEN: usize = 4;

struct ParameterWriter {
    buf: BytesMut,
    count: u8,
}

impl ParameterWriter {
    fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            count: 0,
        }
    }

    fn put(&mut self, param: ParameterId, value: &[u8]) -> Result<()> {
        let len = u16::try_from(value.len()).map_err(|_| Error::ParameterTooLong {
            param,
            len: value.len(),
        })?;
        self.buf.put_u8(param as u8);
        self.buf.put_u8(0);
        self.buf.put_u16(len);
        self.buf.put_slice(value);
        self.buf.put_bytes(0, padding(value.len()));
        self.count += 1;
        Ok(())
    }

    fn put_opt(&mut self, param: ParameterId, value: Option<&[u8]>) -> Result<()> {
        match value {
            Some(value) => self.put(param, value),
            None => Ok(()),
        }
    }
}

impl ProtocolMessage {
    /// Encode into a SAP frame
    pub fn encode(&self) -> Result<Bytes> {
        let id = self.kind.wire_id().ok_or(Error::NotEncodable(self.kind))?;

        let mut params = ParameterWriter::new();
        if let Some(status) = self.connection_status {
            params.put(ParameterId::ConnectionStatus, &[status.into()])?;
        }
        if let Some(size) = self.max_msg_size {
            params.put(ParameterId::MaxMsgSize, &size.to_be_bytes())?;
        }
        if let Some(code) = self.result_code {
            params.put(ParameterId::ResultCode, &[code.into()])?;
        }
        if let Some(kind) = self.disconnection_type {
            params.put(ParameterId::DisconnectionType, &[kind.into()])?;
        }
        if let Some(status) = self.card_reader_status {
            params.put(ParameterId::CardReaderStatus, &[status])?;
        }
        if let Some(status) = self.status_change {
            params.put(ParameterId::StatusChange, &[status.into()])?;
        }
        if let Some(protocol) = self.transport_protocol {
            params.put(ParameterId::TransportProtocol, &[protocol.into()])?;
        }
        params.put_opt(ParameterId::CommandApdu, self.apdu.as_deref())?;
        params.put_opt(ParameterId::CommandApdu7816, self.apdu_7816.as_deref())?;
        params.put_opt(ParameterId::ResponseApdu, self.apdu_response.as_deref())?;
        params.put_opt(ParameterId::Atr, self.atr.as_deref())?;

        let mut frame = BytesMut::with_capacity(HEADER_LEN + params.buf.len());
        frame.put_u8(id);
        frame.put_u8(params.count);
        frame.put_u16(0);
        frame.put_slice(&params.buf);
        Ok(frame.freeze())
    }

    /// Encode and write to `writer`, flushing afterwards
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let frame = self.encode()?;
        trace!(kind = %self.kind, frame = %hex::encode(&frame), "Writing SAP frame");
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    /// Decode a complete frame held in memory
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let mut reader = frame;
        read_frame(&mut reader)?
            .ok_or_else(|| Error::Io(std::io::ErrorKind::UnexpectedEof.into()))
    }

    fn apply_parameter(&mut self, param: ParameterId, value: Vec<u8>) -> Result<()> {
        if let Some(expected) = param.fixed_len()
            && value.len() != expected
        {
            return Err(Error::InvalidParameterLength {
                param,
                expected,
                actual: value.len(),
            });
        }

        match param {
            ParameterId::MaxMsgSize => {
                self.max_msg_size = Some(u16::from_be_bytes([value[0], value[1]]));
            }
            ParameterId::ConnectionStatus => {
                self.connection_status = Some(value[0].try_into()?);
            }
            ParameterId::ResultCode => self.result_code = Some(value[0].try_into()?),
            ParameterId::DisconnectionType => {
                self.disconnection_type = Some(value[0].try_into()?);
            }
            ParameterId::CardReaderStatus => self.card_reader_status = Some(value[0]),
            ParameterId::StatusChange => self.status_change = Some(value[0].try_into()?),
            ParameterId::TransportProtocol => {
                self.transport_protocol = Some(value[0].try_into()?);
            }
            ParameterId::CommandApdu => self.apdu = Some(value.into()),
            ParameterId::CommandApdu7816 => self.apdu_7816 = Some(value.into()),
            ParameterId::ResponseApdu => self.apdu_response = Some(value.into()),
            ParameterId::Atr => self.atr = Some(value.into()),
        }
        Ok(())
    }
}

/// Read one SAP frame of any known kind
///
/// Returns `Ok(None)` when the stream ends cleanly before the first byte.
/// Semantic errors are only reported once the whole frame has been consumed.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<ProtocolMessage>> {
    let mut id = [0u8; 1];
    if !read_exact_or_eof(reader, &mut id)? {
        return Ok(None);
    }
    let mut header = [0u8; HEADER_LEN - 1];
    reader.read_exact(&mut header)?;
    let count = header[0];

    // Placeholder kind until the id has been validated
    let mut msg = ProtocolMessage::new(MessageKind::ErrorResp);
    let mut failure = None;

    for _ in 0..count {
        let mut param_header = [0u8; PARAMETER_HEADER_LEN];
        reader.read_exact(&mut param_header)?;
        let len = usize::from(u16::from_be_bytes([param_header[2], param_header[3]]));
        let mut value = vec![0u8; len];
        reader.read_exact(&mut value)?;
        skip(reader, padding(len))?;

        let Some(param) = ParameterId::from_wire(param_header[0]) else {
            trace!(id = param_header[0], len, "Skipping unknown parameter");
            continue;
        };
        if let Err(e) = msg.apply_parameter(param, value) {
            warn!(error = %e, "Rejecting SAP parameter");
            failure.get_or_insert(e);
        }
    }

    msg.kind = MessageKind::from_wire(id[0]).ok_or(Error::UnknownMessageId(id[0]))?;
    match failure {
        Some(e) => Err(e),
        None => Ok(Some(msg)),
    }
}

/// Read one client request and validate it
///
/// Only request kinds are accepted. The returned message has its
/// route-to-modem flag set where the modem is expected to answer.
pub fn read_request<R: Read>(reader: &mut R) -> Result<Option<ProtocolMessage>> {
    read_frame(reader)?
        .map(ProtocolMessage::validate_request)
        .transpose()
}
