//! Protocol constants for the host <-> device serial link

/// Start of frame sentinel
pub const START_OF_FRAME: u8 = 0xFA;

/// End of frame sentinel
pub const END_OF_FRAME: u8 = 0xCC;

/// Serialized message header: length, msg_id, type_and_dir
pub const HEADER_SIZE: usize = 3;

/// Checksum byte + EOF byte trailing every frame
pub const TRAILER_SIZE: usize = 2;

/// The length field is one byte and counts header + data
pub const MAX_MESSAGE_SIZE: usize = u8::MAX as usize;
pub const MAX_DATA_SIZE: usize = MAX_MESSAGE_SIZE - HEADER_SIZE;

/// Non-SOF bytes tolerated before the scanner reports `SofExpected`
pub const MAX_UNFRAMED_DATA: usize = 256;

/// Bytes buffered after SOF before the declared length is trusted
pub const LENGTH_PEEK: usize = 2;

/// Bit 7 of the type byte marks a response
pub const RESPONSE_FLAG: u8 = 0x80;
pub const MSG_TYPE_MASK: u8 = 0x7F;

/// Pending request table
pub const DEFAULT_MAX_PENDING: usize = 32;
pub const MAX_PENDING_LIMIT: usize = 256;

/// File transfer chunking. A chunk request carries a 4 byte index in front.
pub const CHUNK_INDEX_SIZE: usize = 4;
pub const DEFAULT_CHUNK_SIZE: usize = 200;
pub const MAX_CHUNK_SIZE: usize = MAX_DATA_SIZE - CHUNK_INDEX_SIZE;

/// File names on the device are fixed 8 byte fields
pub const FILE_NAME_SIZE: usize = 8;

/// Hard cap on file records in a status response
pub const MAX_STATUS_FILES: usize = 32;
