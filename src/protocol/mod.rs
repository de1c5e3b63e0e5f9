pub mod constants;
pub mod error;
pub mod frame;
pub mod message;
pub mod payload;

pub use constants::*;
pub use error::{PayloadError, ProtocolError, SendError};
pub use frame::{encode_frame, BufferState, FrameCodec};
pub use message::{Message, MessageHeader, MessageType, PlaybackCommand, Status};
pub use payload::{
    chunk_count, decode_name, encode_name, ChunkRequest, ChunkResponse, DeviceReport, DeviceStatus,
    FileDescriptor, FileHeader,
};
