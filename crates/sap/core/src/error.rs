//! Error type for SAP message and modem record handling
//!
//! Errors fall into two groups. Framing errors mean the byte stream can no
//! longer be trusted and the owning reader should stop. Semantic errors are
//! raised after a frame has been consumed completely, so the stream is still
//! aligned on the next message.

use crate::message::{MessageKind, ParameterId};

/// Codec error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    //
    // Framing errors
    //
    /// Underlying stream failed or ended mid-frame
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A modem record announced a length above the accepted maximum
    #[error("Record of {len} bytes exceeds limit of {limit} bytes")]
    RecordTooLarge {
        /// Announced length
        len: usize,
        /// Accepted maximum
        limit: usize,
    },

    /// A modem record could not be decoded
    #[error("Malformed modem record: {0}")]
    Record(#[from] prost::DecodeError),

    //
    // Semantic errors
    //
    /// A modem record payload could not be decoded
    #[error("Malformed modem payload: {0}")]
    Payload(prost::DecodeError),

    /// Message id byte does not name a SAP message
    #[error("Unknown message id 0x{0:02X}")]
    UnknownMessageId(u8),

    /// A fixed-length parameter arrived with the wrong length
    #[error("Parameter {param} has length {actual}, expected {expected}")]
    InvalidParameterLength {
        /// Offending parameter
        param: ParameterId,
        /// Length required by the parameter
        expected: usize,
        /// Length found on the wire
        actual: usize,
    },

    /// A parameter value is outside its vocabulary
    #[error("Invalid value 0x{value:02X} for parameter {param}")]
    InvalidParameterValue {
        /// Offending parameter
        param: ParameterId,
        /// Value found on the wire
        value: u8,
    },

    /// A parameter required by the message kind is absent
    #[error("{kind} is missing required parameter {param}")]
    MissingParameter {
        /// Message being validated
        kind: MessageKind,
        /// Parameter that was required
        param: ParameterId,
    },

    /// A variable-length parameter does not fit the 16-bit length field
    #[error("Parameter {param} of {len} bytes is too long to encode")]
    ParameterTooLong {
        /// Offending parameter
        param: ParameterId,
        /// Length of the value
        len: usize,
    },

    /// The message kind is not accepted in this direction
    #[error("Unsupported request {0}")]
    UnsupportedRequest(MessageKind),

    /// The message kind has no SAP wire id
    #[error("{0} cannot be encoded on the SAP link")]
    NotEncodable(MessageKind),

    /// A modem record lacks a required field
    #[error("Modem record is missing field {0}")]
    MissingField(&'static str),

    /// A modem record used an unknown or unexpected direction
    #[error("Unexpected modem record direction {0}")]
    UnexpectedDirection(i32),
}

impl Error {
    /// Whether the stream that produced this error is no longer aligned
    pub const fn is_framing(&self) -> bool {
        matches!(self, Self::Io(_) | Self::RecordTooLarge { .. } | Self::Record(_))
    }
}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_classification() {
        let eof = Error::Io(std::io::ErrorKind::UnexpectedEof.into());
        assert!(eof.is_framing());
        assert!(Error::RecordTooLarge { len: 10, limit: 4 }.is_framing());

        assert!(!Error::UnknownMessageId(0x7F).is_framing());
        assert!(
            !Error::MissingParameter {
                kind: MessageKind::ConnectReq,
                param: ParameterId::MaxMsgSize,
            }
            .is_framing()
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidParameterLength {
            param: ParameterId::ResultCode,
            expected: 1,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "Parameter ResultCode has length 2, expected 1"
        );
        assert_eq!(
            Error::UnknownMessageId(0x42).to_string(),
            "Unknown message id 0x42"
        );
    }
}
