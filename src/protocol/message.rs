use std::fmt;

use serde::Serialize;
use tracing::{error, trace};

use crate::protocol::constants::{HEADER_SIZE, MAX_DATA_SIZE, MSG_TYPE_MASK, RESPONSE_FLAG};
use crate::protocol::error::{PayloadError, ProtocolError, SendError};

/// Message types, in wire order. Any value `>= COUNT` is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 0,
    InfoStatus = 1,
    PlaybackCommand = 2,
    FileHeader = 3,
    FileChunk = 4,
}

impl MessageType {
    pub const COUNT: u8 = 5;
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Handshake),
            1 => Ok(MessageType::InfoStatus),
            2 => Ok(MessageType::PlaybackCommand),
            3 => Ok(MessageType::FileHeader),
            4 => Ok(MessageType::FileChunk),
            other => Err(ProtocolError::InvalidMessageType(other)),
        }
    }
}

/// Status byte carried by control responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Error = 1,
}

impl TryFrom<u8> for Status {
    type Error = PayloadError;

    fn try_from(value: u8) -> Result<Self, PayloadError> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Error),
            other => Err(PayloadError::UnknownStatus(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PlaybackCommand {
    Play = 0,
    Pause = 1,
    Next = 2,
    Previous = 3,
}

impl TryFrom<u8> for PlaybackCommand {
    type Error = PayloadError;

    fn try_from(value: u8) -> Result<Self, PayloadError> {
        match value {
            0 => Ok(PlaybackCommand::Play),
            1 => Ok(PlaybackCommand::Pause),
            2 => Ok(PlaybackCommand::Next),
            3 => Ok(PlaybackCommand::Previous),
            other => Err(PayloadError::UnknownCommand(other)),
        }
    }
}

impl fmt::Display for PlaybackCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackCommand::Play => "play",
            PlaybackCommand::Pause => "pause",
            PlaybackCommand::Next => "next",
            PlaybackCommand::Previous => "previous",
        };
        f.write_str(name)
    }
}

/// Logical message header. On the wire it is three bytes:
/// `length | msg_id | type_and_dir`, where `length` counts header and data
/// and bit 7 of the last byte marks a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub data_length: u8,
    pub msg_id: u8,
    pub msg_type: MessageType,
    pub is_response: bool,
}

impl MessageHeader {
    pub const SIZE: usize = HEADER_SIZE;

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            error!("Message header too short: {} bytes", buf.len());
            return Err(ProtocolError::NullMessage);
        }

        let length = buf[0];
        if (length as usize) < Self::SIZE {
            return Err(ProtocolError::InvalidLength(length));
        }

        let type_and_dir = buf[2];
        let msg_type = MessageType::try_from(type_and_dir & MSG_TYPE_MASK)?;

        Ok(Self {
            data_length: length - Self::SIZE as u8,
            msg_id: buf[1],
            msg_type,
            is_response: type_and_dir & RESPONSE_FLAG != 0,
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut type_and_dir = self.msg_type as u8;
        if self.is_response {
            type_and_dir |= RESPONSE_FLAG;
        }
        [self.data_length + Self::SIZE as u8, self.msg_id, type_and_dir]
    }
}

/// A request or response as carried inside a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(
        msg_type: MessageType,
        msg_id: u8,
        is_response: bool,
        data: Vec<u8>,
    ) -> Result<Self, SendError> {
        if data.len() > MAX_DATA_SIZE {
            return Err(SendError::PayloadTooLarge(data.len()));
        }

        Ok(Self {
            header: MessageHeader {
                data_length: data.len() as u8,
                msg_id,
                msg_type,
                is_response,
            },
            data,
        })
    }

    pub fn request(msg_type: MessageType, msg_id: u8, data: Vec<u8>) -> Result<Self, SendError> {
        Self::new(msg_type, msg_id, false, data)
    }

    /// Response echoing this message's id and type
    pub fn respond(&self, data: Vec<u8>) -> Result<Self, SendError> {
        Self::new(self.header.msg_type, self.header.msg_id, true, data)
    }

    pub fn msg_id(&self) -> u8 {
        self.header.msg_id
    }

    pub fn msg_type(&self) -> MessageType {
        self.header.msg_type
    }

    pub fn is_response(&self) -> bool {
        self.header.is_response
    }

    /// Leading status byte of a control response
    pub fn status(&self) -> Option<Status> {
        self.data.first().and_then(|b| Status::try_from(*b).ok())
    }

    /// Serialized header followed by data, i.e. the checksummed part of a frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.data.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decodes the bytes popped from a completed frame.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        trace!("Decoding message from {} bytes", buf.len());

        let header = MessageHeader::decode(buf)?;
        let expected = HEADER_SIZE + header.data_length as usize;
        if buf.len() != expected {
            error!("Message length mismatch: header says {}, got {}", expected, buf.len());
            return Err(ProtocolError::NullMessage);
        }

        Ok(Self {
            header,
            data: buf[HEADER_SIZE..].to_vec(),
        })
    }
}
