use thiserror::Error;

use crate::protocol::message::MessageType;

/// Framing and protocol faults. None of these are fatal to the link: the
/// offending bytes or message are dropped and processing continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("too much data without a start of frame")]
    SofExpected,
    #[error("end of frame expected")]
    EofExpected,
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("invalid message length {0}")]
    InvalidLength(u8),
    #[error("no message available")]
    NoMessageAvailable,
    #[error("null message")]
    NullMessage,
    #[error("invalid message type {0}")]
    InvalidMessageType(u8),
    #[error("response not expected for msg_id {0}")]
    ResponseNotExpected(u8),
    #[error("msg_id {0} already in use")]
    IdInUse(u8),
}

/// Reasons a request could not be put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// Backpressure: every request id is pending. Retry on a later tick.
    #[error("pending request capacity exhausted")]
    CapacityExhausted,
    #[error("link is not connected, cannot send {0:?}")]
    LinkDown(MessageType),
    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),
}

/// Payload records that fail validation on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload too short: {actual} bytes, need {expected}")]
    TooShort { expected: usize, actual: usize },
    #[error("too many files: {0}")]
    TooManyFiles(u8),
    #[error("payload length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("unknown status code {0}")]
    UnknownStatus(u8),
    #[error("unknown playback command {0}")]
    UnknownCommand(u8),
}
