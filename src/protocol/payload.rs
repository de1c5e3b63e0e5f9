//! Field-by-field codecs for message payloads. All integers are little-endian.

use serde::Serialize;

use crate::protocol::constants::{FILE_NAME_SIZE, MAX_STATUS_FILES};
use crate::protocol::error::PayloadError;
use crate::protocol::message::Status;

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_name(buf: &[u8], offset: usize) -> [u8; FILE_NAME_SIZE] {
    let mut name = [0u8; FILE_NAME_SIZE];
    name.copy_from_slice(&buf[offset..offset + FILE_NAME_SIZE]);
    name
}

fn ensure_exact(buf: &[u8], expected: usize) -> Result<(), PayloadError> {
    if buf.len() < expected {
        return Err(PayloadError::TooShort {
            expected,
            actual: buf.len(),
        });
    }
    if buf.len() != expected {
        return Err(PayloadError::LengthMismatch {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Truncates or NUL-pads a display name to the device's 8 byte field.
pub fn encode_name(name: &str) -> [u8; FILE_NAME_SIZE] {
    let mut out = [0u8; FILE_NAME_SIZE];
    let bytes = name.as_bytes();
    let n = bytes.len().min(FILE_NAME_SIZE);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

pub fn decode_name(name: &[u8; FILE_NAME_SIZE]) -> String {
    let end = name.iter().position(|b| *b == 0).unwrap_or(FILE_NAME_SIZE);
    String::from_utf8_lossy(&name[..end]).into_owned()
}

fn serialize_name<S: serde::Serializer>(
    name: &[u8; FILE_NAME_SIZE],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&decode_name(name))
}

/// `ceil(total_size / chunk_size)`
pub fn chunk_count(total_size: u32, chunk_size: usize) -> u32 {
    let chunk_size = chunk_size.max(1) as u64;
    (u64::from(total_size)).div_ceil(chunk_size) as u32
}

/// FILEHEADER request payload (20 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub sample_rate: u32,
    pub total_size: u32,
    pub chunk_count: u32,
    pub name: [u8; FILE_NAME_SIZE],
}

impl FileHeader {
    pub const SIZE: usize = 4 + 4 + 4 + FILE_NAME_SIZE;

    pub fn new(sample_rate: u32, total_size: u32, chunk_size: usize, name: &str) -> Self {
        Self {
            sample_rate,
            total_size,
            chunk_count: chunk_count(total_size, chunk_size),
            name: encode_name(name),
        }
    }

    pub fn name(&self) -> String {
        decode_name(&self.name)
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.sample_rate.to_le_bytes());
        buf[4..8].copy_from_slice(&self.total_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.chunk_count.to_le_bytes());
        buf[12..20].copy_from_slice(&self.name);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, PayloadError> {
        ensure_exact(buf, Self::SIZE)?;
        Ok(Self {
            sample_rate: read_u32(buf, 0),
            total_size: read_u32(buf, 4),
            chunk_count: read_u32(buf, 8),
            name: read_name(buf, 12),
        })
    }
}

/// FILECHUNK request payload: chunk index followed by file bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub chunk_index: u32,
    pub data: Vec<u8>,
}

impl ChunkRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&self.chunk_index.to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, PayloadError> {
        if buf.len() < 4 {
            return Err(PayloadError::TooShort {
                expected: 4,
                actual: buf.len(),
            });
        }
        Ok(Self {
            chunk_index: read_u32(buf, 0),
            data: buf[4..].to_vec(),
        })
    }
}

/// FILECHUNK response payload (5 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkResponse {
    pub status: Status,
    pub chunk_id: u32,
}

impl ChunkResponse {
    pub const SIZE: usize = 1 + 4;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.status as u8;
        buf[1..5].copy_from_slice(&self.chunk_id.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, PayloadError> {
        ensure_exact(buf, Self::SIZE)?;
        Ok(Self {
            status: Status::try_from(buf[0])?,
            chunk_id: read_u32(buf, 1),
        })
    }
}

/// Fixed leading record of an INFO_STATUS response (10 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub total_space: u32,
    pub available_space: u32,
    pub storage_connected: bool,
    pub file_count: u8,
}

impl DeviceStatus {
    pub const SIZE: usize = 4 + 4 + 1 + 1;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.total_space.to_le_bytes());
        buf[4..8].copy_from_slice(&self.available_space.to_le_bytes());
        buf[8] = u8::from(self.storage_connected);
        buf[9] = self.file_count;
        buf
    }

    /// Reads the fixed record from the front of `buf`; trailing bytes are
    /// left to the caller.
    pub fn decode(buf: &[u8]) -> Result<Self, PayloadError> {
        if buf.len() < Self::SIZE {
            return Err(PayloadError::TooShort {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        Ok(Self {
            total_space: read_u32(buf, 0),
            available_space: read_u32(buf, 4),
            storage_connected: buf[8] != 0,
            file_count: buf[9],
        })
    }
}

/// One stored file as listed in a status response (16 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    pub size: u32,
    pub chunk_count: u32,
    #[serde(serialize_with = "serialize_name")]
    pub name: [u8; FILE_NAME_SIZE],
}

impl FileDescriptor {
    pub const SIZE: usize = 4 + 4 + FILE_NAME_SIZE;

    pub fn name(&self) -> String {
        decode_name(&self.name)
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.chunk_count.to_le_bytes());
        buf[8..16].copy_from_slice(&self.name);
        buf
    }

    fn decode_at(buf: &[u8], offset: usize) -> Self {
        Self {
            size: read_u32(buf, offset),
            chunk_count: read_u32(buf, offset + 4),
            name: read_name(buf, offset + 8),
        }
    }
}

/// A fully validated status response. Replaced wholesale on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceReport {
    pub status: DeviceStatus,
    pub files: Vec<FileDescriptor>,
}

impl DeviceReport {
    /// Decodes an INFO_STATUS payload. Every length check happens before
    /// any descriptor is read, so a malformed payload is rejected whole.
    pub fn decode(buf: &[u8]) -> Result<Self, PayloadError> {
        let status = DeviceStatus::decode(buf)?;

        if usize::from(status.file_count) > MAX_STATUS_FILES {
            return Err(PayloadError::TooManyFiles(status.file_count));
        }

        let expected = DeviceStatus::SIZE + usize::from(status.file_count) * FileDescriptor::SIZE;
        if buf.len() != expected {
            return Err(PayloadError::LengthMismatch {
                expected,
                actual: buf.len(),
            });
        }

        let files = (0..usize::from(status.file_count))
            .map(|i| FileDescriptor::decode_at(buf, DeviceStatus::SIZE + i * FileDescriptor::SIZE))
            .collect();

        Ok(Self { status, files })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut status = self.status;
        status.file_count = self.files.len() as u8;

        let capacity = DeviceStatus::SIZE + self.files.len() * FileDescriptor::SIZE;
        let mut buf = Vec::with_capacity(capacity);
        buf.extend_from_slice(&status.encode());
        for file in &self.files {
            buf.extend_from_slice(&file.encode());
        }
        buf
    }
}
