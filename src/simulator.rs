//! Device-side responder for bench testing without hardware.

use tracing::{debug, info, trace, warn};

use crate::protocol::{
    encode_frame, ChunkRequest, ChunkResponse, DeviceReport, DeviceStatus, FileDescriptor,
    FileHeader, FrameCodec, Message, MessageType, PlaybackCommand, Status, MAX_DATA_SIZE,
};

/// Descriptors that fit in one INFO_STATUS response
pub const MAX_REPORTED_FILES: usize = (MAX_DATA_SIZE - DeviceStatus::SIZE) / FileDescriptor::SIZE;

#[derive(Debug)]
struct Upload {
    header: FileHeader,
    next_chunk: u32,
    received: u32,
}

#[derive(Debug)]
pub struct DeviceSimulator {
    codec: FrameCodec,
    total_space: u32,
    storage_connected: bool,
    files: Vec<FileDescriptor>,
    upload: Option<Upload>,
    last_command: Option<PlaybackCommand>,
    reject_headers: bool,
    reject_chunk: Option<u32>,
    muted: bool,
}

impl Default for DeviceSimulator {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024)
    }
}

impl DeviceSimulator {
    pub fn new(total_space: u32) -> Self {
        Self {
            codec: FrameCodec::new(),
            total_space,
            storage_connected: true,
            files: Vec::new(),
            upload: None,
            last_command: None,
            reject_headers: false,
            reject_chunk: None,
            muted: false,
        }
    }

    pub fn reject_headers(mut self) -> Self {
        self.reject_headers = true;
        self
    }

    pub fn reject_chunk(mut self, chunk_index: u32) -> Self {
        self.reject_chunk = Some(chunk_index);
        self
    }

    pub fn without_storage(mut self) -> Self {
        self.storage_connected = false;
        self
    }

    /// A muted device swallows every request, as if unplugged.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    pub fn last_command(&self) -> Option<PlaybackCommand> {
        self.last_command
    }

    pub fn upload_in_progress(&self) -> bool {
        self.upload.is_some()
    }

    fn available_space(&self) -> u32 {
        let used: u32 = self.files.iter().map(|f| f.size).fold(0, u32::saturating_add);
        self.total_space.saturating_sub(used)
    }

    pub fn report(&self) -> DeviceReport {
        let skip = self.files.len().saturating_sub(MAX_REPORTED_FILES);
        let files: Vec<FileDescriptor> = self.files[skip..].to_vec();
        DeviceReport {
            status: DeviceStatus {
                total_space: self.total_space,
                available_space: self.available_space(),
                storage_connected: self.storage_connected,
                file_count: files.len() as u8,
            },
            files,
        }
    }

    /// Feeds raw link bytes in; returns the framed responses to write back.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<u8> {
        self.codec.extend(bytes);

        let mut out = Vec::new();
        while let Some(frame) = self.codec.next_frame() {
            let raw = match frame {
                Ok(raw) => raw,
                Err(e) => {
                    debug!("Simulator framing error: {}", e);
                    continue;
                }
            };
            let message = match Message::decode(&raw) {
                Ok(message) => message,
                Err(e) => {
                    debug!("Simulator dropped malformed message: {}", e);
                    continue;
                }
            };
            if message.is_response() || self.muted {
                continue;
            }
            if let Some(response) = self.respond(&message) {
                out.extend_from_slice(&encode_frame(&response));
            }
        }
        out
    }

    /// Answers one host request.
    pub fn respond(&mut self, request: &Message) -> Option<Message> {
        trace!(
            "Simulator handling {:?} msg_id={}",
            request.msg_type(),
            request.msg_id()
        );

        let data = match request.msg_type() {
            MessageType::Handshake => vec![Status::Ok as u8],
            MessageType::InfoStatus => self.report().encode(),
            MessageType::PlaybackCommand => vec![self.on_playback_command(&request.data) as u8],
            MessageType::FileHeader => vec![self.on_file_header(&request.data) as u8],
            MessageType::FileChunk => self.on_file_chunk(&request.data).encode().to_vec(),
        };

        match request.respond(data) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!("Simulator could not build response: {}", e);
                None
            }
        }
    }

    fn on_playback_command(&mut self, data: &[u8]) -> Status {
        match data.first().map(|b| PlaybackCommand::try_from(*b)) {
            Some(Ok(command)) => {
                info!("Simulator playback: {}", command);
                self.last_command = Some(command);
                Status::Ok
            }
            _ => Status::Error,
        }
    }

    fn on_file_header(&mut self, data: &[u8]) -> Status {
        let header = match FileHeader::decode(data) {
            Ok(header) => header,
            Err(e) => {
                warn!("Simulator rejected file header: {}", e);
                return Status::Error;
            }
        };

        if self.reject_headers
            || !self.storage_connected
            || header.total_size > self.available_space()
        {
            info!("Simulator refusing upload of '{}'", header.name());
            return Status::Error;
        }

        info!(
            "Simulator accepting '{}' ({} bytes, {} chunks)",
            header.name(),
            header.total_size,
            header.chunk_count
        );
        let upload = Upload {
            header,
            next_chunk: 0,
            received: 0,
        };
        if upload.header.chunk_count == 0 {
            self.store(upload);
        } else {
            self.upload = Some(upload);
        }
        Status::Ok
    }

    fn on_file_chunk(&mut self, data: &[u8]) -> ChunkResponse {
        let chunk = match ChunkRequest::decode(data) {
            Ok(chunk) => chunk,
            Err(_) => {
                return ChunkResponse {
                    status: Status::Error,
                    chunk_id: 0,
                }
            }
        };
        let rejected = ChunkResponse {
            status: Status::Error,
            chunk_id: chunk.chunk_index,
        };

        if self.reject_chunk == Some(chunk.chunk_index) {
            info!("Simulator rejecting chunk {}", chunk.chunk_index);
            self.upload = None;
            return rejected;
        }

        let Some(upload) = self.upload.as_mut() else {
            debug!("Chunk {} without an open upload", chunk.chunk_index);
            return rejected;
        };
        if chunk.chunk_index != upload.next_chunk {
            warn!(
                "Simulator expected chunk {}, got {}",
                upload.next_chunk, chunk.chunk_index
            );
            return rejected;
        }

        upload.next_chunk += 1;
        upload.received = upload.received.saturating_add(chunk.data.len() as u32);

        if upload.next_chunk == upload.header.chunk_count {
            if let Some(done) = self.upload.take() {
                self.store(done);
            }
        }

        ChunkResponse {
            status: Status::Ok,
            chunk_id: chunk.chunk_index,
        }
    }

    fn store(&mut self, upload: Upload) {
        let header = upload.header;
        if upload.received != header.total_size {
            warn!(
                "Upload '{}' announced {} bytes, received {}",
                header.name(),
                header.total_size,
                upload.received
            );
        }
        self.files.retain(|f| f.name != header.name);
        self.files.push(FileDescriptor {
            size: upload.received,
            chunk_count: header.chunk_count,
            name: header.name,
        });
        info!("Simulator stored '{}'", header.name());
    }
}
