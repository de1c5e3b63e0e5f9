//! Incremental frame codec.
//!
//! Wire layout: `SOF | length | msg_id | type_and_dir | data | checksum | EOF`.
//! `length` counts header and data and is the only framing mechanism;
//! sentinel values inside `data` are not escaped.

use tracing::{debug, trace, warn};

use crate::protocol::constants::{
    END_OF_FRAME, HEADER_SIZE, LENGTH_PEEK, MAX_UNFRAMED_DATA, START_OF_FRAME, TRAILER_SIZE,
};
use crate::protocol::error::ProtocolError;
use crate::protocol::message::Message;
use crate::utils::buffer::ByteBuffer;
use crate::utils::checksum::{verify_xor_checksum, xor_checksum};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    ScanningForSof,
    Sof,
    AccumulatingBody,
    AwaitingTerminators,
    FrameReady,
    SofExpectedError,
    ChecksumError,
    EofExpectedError,
    /// Carries the declared length byte that was rejected.
    InvalidLengthError(u8),
}

impl BufferState {
    pub fn error(self) -> Option<ProtocolError> {
        match self {
            BufferState::SofExpectedError => Some(ProtocolError::SofExpected),
            BufferState::ChecksumError => Some(ProtocolError::ChecksumMismatch),
            BufferState::EofExpectedError => Some(ProtocolError::EofExpected),
            BufferState::InvalidLengthError(length) => Some(ProtocolError::InvalidLength(length)),
            _ => None,
        }
    }

    pub fn is_error(self) -> bool {
        self.error().is_some()
    }
}

/// Owned receive-side state machine. One instance per link.
#[derive(Debug)]
pub struct FrameCodec {
    buffer: ByteBuffer,
    state: BufferState,
    unframed: usize,
    max_unframed: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_unframed(MAX_UNFRAMED_DATA)
    }

    pub fn with_max_unframed(max_unframed: usize) -> Self {
        Self {
            buffer: ByteBuffer::new(1024),
            state: BufferState::ScanningForSof,
            unframed: 0,
            max_unframed,
        }
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn push(&mut self, byte: u8) {
        self.buffer.push(byte);
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes);
    }

    /// Drops everything buffered, including a partially received frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = BufferState::ScanningForSof;
        self.unframed = 0;
    }

    /// Advances the state machine as far as the buffered bytes allow.
    ///
    /// Has no effect while a frame is ready and not yet popped. An error
    /// state is reported once; the following call drops the failed
    /// candidate's SOF and resumes scanning on the next byte.
    pub fn process(&mut self) -> BufferState {
        if self.state.is_error() {
            self.recover();
        }

        if self.state == BufferState::ScanningForSof {
            self.scan_for_sof();
        }

        if self.state == BufferState::Sof && self.buffer.len() >= LENGTH_PEEK {
            let length = self.declared_length();
            if length < HEADER_SIZE {
                warn!("Invalid message length {} after SOF", length);
                self.state = BufferState::InvalidLengthError(length as u8);
            } else {
                self.state = BufferState::AccumulatingBody;
            }
        }

        if self.state == BufferState::AccumulatingBody
            && self.buffer.len() >= self.declared_length() + TRAILER_SIZE
        {
            self.state = BufferState::AwaitingTerminators;
        }

        if self.state == BufferState::AwaitingTerminators {
            self.state = self.validate_terminators();
        }

        self.state
    }

    /// Takes the header + data bytes of the completed frame and moves the
    /// read cursor past its checksum and EOF.
    pub fn pop(&mut self) -> Result<Vec<u8>, ProtocolError> {
        if self.state != BufferState::FrameReady {
            return Err(ProtocolError::NoMessageAvailable);
        }

        let length = self.declared_length();
        let raw = self.buffer.as_slice()[..length].to_vec();
        self.buffer.consume(length + TRAILER_SIZE);
        self.state = BufferState::ScanningForSof;

        trace!("Popped frame: {}", hex::encode(&raw));
        Ok(raw)
    }

    /// Driving loop step: the next popped frame or framing error, or `None`
    /// once more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Result<Vec<u8>, ProtocolError>> {
        match self.process() {
            BufferState::FrameReady => Some(self.pop()),
            state => state.error().map(Err),
        }
    }

    fn declared_length(&self) -> usize {
        self.buffer.at(0).map_or(0, usize::from)
    }

    fn scan_for_sof(&mut self) {
        while let Some(byte) = self.buffer.at(0) {
            self.buffer.consume(1);
            if byte == START_OF_FRAME {
                self.unframed = 0;
                self.state = BufferState::Sof;
                return;
            }

            self.unframed += 1;
            if self.unframed > self.max_unframed {
                warn!("{} bytes received without a start of frame", self.unframed);
                self.state = BufferState::SofExpectedError;
                return;
            }
        }
    }

    fn validate_terminators(&self) -> BufferState {
        let length = self.declared_length();
        let body = &self.buffer.as_slice()[..length];

        if self.buffer.at(length + 1) != Some(END_OF_FRAME) {
            debug!("EOF expected at offset {}", length + 1);
            return BufferState::EofExpectedError;
        }

        let transmitted = self.buffer.at(length).unwrap_or(0);
        if !verify_xor_checksum(body, transmitted) {
            debug!(
                "Checksum mismatch: transmitted={:#04x}, computed={:#04x}",
                transmitted,
                xor_checksum(body)
            );
            return BufferState::ChecksumError;
        }

        BufferState::FrameReady
    }

    fn recover(&mut self) {
        // The SOF of the failed candidate is already consumed; whatever
        // followed it is rescanned as ordinary input.
        self.unframed = 0;
        self.state = BufferState::ScanningForSof;
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes a message into a complete frame.
pub fn encode_frame(message: &Message) -> Vec<u8> {
    let body = message.encode();
    let mut frame = Vec::with_capacity(body.len() + 3);
    frame.push(START_OF_FRAME);
    frame.extend_from_slice(&body);
    frame.push(xor_checksum(&body));
    frame.push(END_OF_FRAME);
    frame
}
