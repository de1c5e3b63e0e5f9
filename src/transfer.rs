//! Chunked file upload: one header message, then `chunk_count` chunk
//! messages gated by the device accepting the header.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::broker::{Channel, MessageBroker};
use crate::protocol::{
    ChunkRequest, ChunkResponse, FileHeader, MessageType, SendError, Status, MAX_CHUNK_SIZE,
};

/// Anything a transfer can read chunks from.
pub trait TransferSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> TransferSource for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Started, header not yet on the wire
    Idle,
    HeaderSent,
    Accepted,
    Streaming,
    Completed,
    Rejected,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFailure {
    #[error("device rejected the file header")]
    HeaderRejected,
    #[error("device rejected chunk {chunk_id}")]
    ChunkRejected { chunk_id: u32 },
    #[error("chunk response for {got} while {expected} was pending")]
    ChunkMismatch { expected: u32, got: u32 },
    #[error("malformed chunk response")]
    MalformedResponse,
    #[error("timed out waiting for the device")]
    Timeout,
    #[error("link to the device was lost")]
    LinkLost,
    #[error("file of {0} bytes is too large to transfer")]
    TooLarge(u64),
    #[error("reading the source file failed: {0}")]
    Io(String),
    #[error("chunk size {0} is outside 1..={}", MAX_CHUNK_SIZE)]
    InvalidChunkSize(usize),
    #[error("chunk could not be sent: {0}")]
    Unsendable(SendError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    HeaderResponse(bool),
    ChunkProgress {
        success: bool,
        chunk_id: u32,
        chunk_count: u32,
    },
    Completed {
        name: String,
    },
    Failed(TransferFailure),
}

pub struct FileTransfer {
    source: Option<Box<dyn TransferSource>>,
    cleanup: Option<PathBuf>,
    header: FileHeader,
    chunk_size: usize,
    next_chunk_index: u32,
    acknowledged: u32,
    state: TransferState,
    header_request: Option<(u8, Instant)>,
    in_flight: BTreeMap<u8, (u32, Instant)>,
    timeout: Duration,
}

impl std::fmt::Debug for FileTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTransfer")
            .field("name", &self.header.name())
            .field("state", &self.state)
            .field("next_chunk_index", &self.next_chunk_index)
            .field("chunk_count", &self.header.chunk_count)
            .finish()
    }
}

impl FileTransfer {
    pub fn new(
        source: Box<dyn TransferSource>,
        total_size: u64,
        sample_rate: u32,
        name: &str,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<Self, TransferFailure> {
        if !(1..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(TransferFailure::InvalidChunkSize(chunk_size));
        }
        let total =
            u32::try_from(total_size).map_err(|_| TransferFailure::TooLarge(total_size))?;
        let header = FileHeader::new(sample_rate, total, chunk_size, name);

        info!(
            "Starting transfer of '{}': {} bytes in {} chunks of {}",
            header.name(),
            total,
            header.chunk_count,
            chunk_size
        );

        Ok(Self {
            source: Some(source),
            cleanup: None,
            header,
            chunk_size,
            next_chunk_index: 0,
            acknowledged: 0,
            state: TransferState::Idle,
            header_request: None,
            in_flight: BTreeMap::new(),
            timeout,
        })
    }

    /// Opens `path` for transfer. With `delete_when_done` the file is treated
    /// as a temporary and removed once the transfer finishes either way.
    pub fn open(
        path: &Path,
        sample_rate: u32,
        name: &str,
        chunk_size: usize,
        timeout: Duration,
        delete_when_done: bool,
    ) -> io::Result<Self> {
        let file = File::open(path)?;
        let total_size = file.metadata()?.len();
        let mut transfer =
            Self::new(Box::new(file), total_size, sample_rate, name, chunk_size, timeout)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        if delete_when_done {
            transfer.cleanup = Some(path.to_path_buf());
        }
        Ok(transfer)
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn chunk_count(&self) -> u32 {
        self.header.chunk_count
    }

    pub fn next_chunk_index(&self) -> u32 {
        self.next_chunk_index
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            TransferState::Completed | TransferState::Rejected | TransferState::Aborted
        )
    }

    /// Driver tick: sends the header, or one chunk once the header is
    /// accepted and the broker has room.
    pub fn tick<C: Channel>(
        &mut self,
        broker: &mut MessageBroker,
        channel: &mut C,
        now: Instant,
    ) -> Vec<TransferEvent> {
        match self.state {
            TransferState::Idle => {
                self.send_header(broker, channel, now);
                Vec::new()
            }
            TransferState::Accepted | TransferState::Streaming => {
                self.send_next_chunk(broker, channel, now)
            }
            _ => Vec::new(),
        }
    }

    fn send_header<C: Channel>(
        &mut self,
        broker: &mut MessageBroker,
        channel: &mut C,
        now: Instant,
    ) {
        if !broker.can_send(MessageType::FileHeader) {
            return;
        }
        let payload = self.header.encode().to_vec();
        match broker.try_send(channel, MessageType::FileHeader, payload, now) {
            Ok(msg_id) => {
                debug!("File header sent as msg_id={}", msg_id);
                self.header_request = Some((msg_id, now));
                self.state = TransferState::HeaderSent;
            }
            Err(e) => debug!("File header deferred: {}", e),
        }
    }

    fn send_next_chunk<C: Channel>(
        &mut self,
        broker: &mut MessageBroker,
        channel: &mut C,
        now: Instant,
    ) -> Vec<TransferEvent> {
        if self.next_chunk_index >= self.header.chunk_count
            || !broker.can_send(MessageType::FileChunk)
        {
            return Vec::new();
        }

        let chunk_index = self.next_chunk_index;
        let data = match self.read_chunk(chunk_index) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to read chunk {}: {}", chunk_index, e);
                return self.abort(broker, TransferFailure::Io(e.to_string()));
            }
        };

        let request = ChunkRequest { chunk_index, data };
        match broker.try_send(channel, MessageType::FileChunk, request.encode(), now) {
            Ok(msg_id) => {
                debug!(
                    "Sent chunk {}/{} as msg_id={}",
                    chunk_index + 1,
                    self.header.chunk_count,
                    msg_id
                );
                let _ = self.in_flight.insert(msg_id, (chunk_index, now));
                self.next_chunk_index += 1;
                self.state = TransferState::Streaming;
                Vec::new()
            }
            Err(e @ (SendError::CapacityExhausted | SendError::LinkDown(_))) => {
                debug!("Chunk {} deferred: {}", chunk_index, e);
                Vec::new()
            }
            Err(e) => {
                error!("Chunk {} can never be sent: {}", chunk_index, e);
                self.abort(broker, TransferFailure::Unsendable(e))
            }
        }
    }

    fn read_chunk(&mut self, chunk_index: u32) -> io::Result<Vec<u8>> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "source already closed"))?;

        let offset = u64::from(chunk_index) * self.chunk_size as u64;
        let expected = (u64::from(self.header.total_size) - offset).min(self.chunk_size as u64);

        let _ = source.seek(SeekFrom::Start(offset))?;
        let mut data = Vec::with_capacity(expected as usize);
        let _ = source.take(expected).read_to_end(&mut data)?;
        if data.len() as u64 != expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes at offset {}, read {}", expected, offset, data.len()),
            ));
        }
        Ok(data)
    }

    pub fn on_header_response(
        &mut self,
        broker: &mut MessageBroker,
        msg_id: u8,
        status: Option<Status>,
    ) -> Vec<TransferEvent> {
        match self.header_request {
            Some((id, _)) if id == msg_id => self.header_request = None,
            _ => {
                debug!("File header response msg_id={} is not ours", msg_id);
                return Vec::new();
            }
        }

        if status != Some(Status::Ok) {
            warn!("Device rejected file header for '{}'", self.header.name());
            let mut events = vec![TransferEvent::HeaderResponse(false)];
            events.extend(self.finish_with(
                broker,
                TransferState::Rejected,
                TransferFailure::HeaderRejected,
            ));
            return events;
        }

        info!("Device accepted file header for '{}'", self.header.name());
        self.state = TransferState::Accepted;
        let mut events = vec![TransferEvent::HeaderResponse(true)];
        if self.header.chunk_count == 0 {
            events.extend(self.complete());
        }
        events
    }

    pub fn on_chunk_response(
        &mut self,
        broker: &mut MessageBroker,
        msg_id: u8,
        payload: &[u8],
    ) -> Vec<TransferEvent> {
        let Some((expected, _)) = self.in_flight.remove(&msg_id) else {
            debug!("Chunk response msg_id={} is not ours", msg_id);
            return Vec::new();
        };
        let chunk_count = self.header.chunk_count;

        let response = match ChunkResponse::decode(payload) {
            Ok(response) => response,
            Err(e) => {
                warn!("Malformed response for chunk {}: {}", expected, e);
                let mut events = vec![TransferEvent::ChunkProgress {
                    success: false,
                    chunk_id: expected,
                    chunk_count,
                }];
                events.extend(self.abort(broker, TransferFailure::MalformedResponse));
                return events;
            }
        };

        if response.chunk_id != expected {
            warn!(
                "Response for chunk {} arrived under msg_id of chunk {}",
                response.chunk_id, expected
            );
            let mut events = vec![TransferEvent::ChunkProgress {
                success: false,
                chunk_id: response.chunk_id,
                chunk_count,
            }];
            events.extend(self.abort(
                broker,
                TransferFailure::ChunkMismatch {
                    expected,
                    got: response.chunk_id,
                },
            ));
            return events;
        }

        let success = response.status == Status::Ok;
        let mut events = vec![TransferEvent::ChunkProgress {
            success,
            chunk_id: response.chunk_id,
            chunk_count,
        }];

        if !success {
            warn!("Device rejected chunk {}", response.chunk_id);
            events.extend(self.abort(
                broker,
                TransferFailure::ChunkRejected {
                    chunk_id: response.chunk_id,
                },
            ));
            return events;
        }

        self.acknowledged += 1;
        if self.acknowledged == chunk_count {
            events.extend(self.complete());
        }
        events
    }

    /// Aborts when the oldest unanswered request outlived the timeout.
    pub fn check_timeout(
        &mut self,
        broker: &mut MessageBroker,
        now: Instant,
    ) -> Vec<TransferEvent> {
        let oldest = self
            .header_request
            .iter()
            .map(|(_, sent_at)| *sent_at)
            .chain(self.in_flight.values().map(|(_, sent_at)| *sent_at))
            .min();

        match oldest {
            Some(sent_at) if now.saturating_duration_since(sent_at) >= self.timeout => {
                warn!("Transfer of '{}' timed out", self.header.name());
                self.abort(broker, TransferFailure::Timeout)
            }
            _ => Vec::new(),
        }
    }

    /// Gives up: releases every id this session holds and discards the source.
    pub fn abort(
        &mut self,
        broker: &mut MessageBroker,
        failure: TransferFailure,
    ) -> Vec<TransferEvent> {
        if self.is_finished() {
            return Vec::new();
        }
        self.finish_with(broker, TransferState::Aborted, failure)
    }

    fn finish_with(
        &mut self,
        broker: &mut MessageBroker,
        state: TransferState,
        failure: TransferFailure,
    ) -> Vec<TransferEvent> {
        if let Some((msg_id, _)) = self.header_request.take() {
            let _ = broker.release(msg_id);
        }
        for msg_id in std::mem::take(&mut self.in_flight).into_keys() {
            let _ = broker.release(msg_id);
        }
        self.state = state;
        self.close_source();
        vec![TransferEvent::Failed(failure)]
    }

    fn complete(&mut self) -> Vec<TransferEvent> {
        info!(
            "Transfer of '{}' completed ({} chunks)",
            self.header.name(),
            self.header.chunk_count
        );
        self.state = TransferState::Completed;
        self.close_source();
        vec![TransferEvent::Completed {
            name: self.header.name(),
        }]
    }

    fn close_source(&mut self) {
        self.source = None;
        if let Some(path) = self.cleanup.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed temporary file {:?}", path),
                Err(e) => warn!("Could not remove temporary file {:?}: {}", path, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameCodec, Message};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::io::{Cursor, Write};

    const TIMEOUT: Duration = Duration::from_secs(3);

    struct Harness {
        broker: MessageBroker,
        channel: Vec<u8>,
        codec: FrameCodec,
        now: Instant,
    }

    impl Harness {
        fn new() -> Self {
            let mut broker = MessageBroker::new(32);
            broker.set_link_up(true);
            Self {
                broker,
                channel: Vec::new(),
                codec: FrameCodec::new(),
                now: Instant::now(),
            }
        }

        fn tick(&mut self, transfer: &mut FileTransfer) -> Vec<TransferEvent> {
            transfer.tick(&mut self.broker, &mut self.channel, self.now)
        }

        /// Requests written since the last call
        fn sent(&mut self) -> Vec<Message> {
            self.codec.extend(&std::mem::take(&mut self.channel));
            let mut out = Vec::new();
            while let Some(raw) = self.codec.next_frame() {
                out.push(Message::decode(&raw.unwrap()).unwrap());
            }
            out
        }

        fn accept_header(&mut self, transfer: &mut FileTransfer) {
            assert!(self.tick(transfer).is_empty());
            let header = self.sent().remove(0);
            let id = header.msg_id();
            let _ = self.broker.release(id);
            let events = transfer.on_header_response(&mut self.broker, id, Some(Status::Ok));
            assert_eq!(events, vec![TransferEvent::HeaderResponse(true)]);
        }
    }

    fn cursor_transfer(size: usize, chunk_size: usize) -> FileTransfer {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let source = Box::new(Cursor::new(data));
        FileTransfer::new(source, size as u64, 8000, "tone", chunk_size, TIMEOUT).unwrap()
    }

    fn ok_chunk(chunk_id: u32) -> Vec<u8> {
        ChunkResponse {
            status: Status::Ok,
            chunk_id,
        }
        .encode()
        .to_vec()
    }

    #[rstest]
    #[case(1024, 200, 6)]
    #[case(1000, 200, 5)]
    #[case(1, 248, 1)]
    #[case(600, 248, 3)]
    fn test_chunk_count(#[case] size: usize, #[case] chunk_size: usize, #[case] expected: u32) {
        assert_eq!(cursor_transfer(size, chunk_size).chunk_count(), expected);
    }

    #[test]
    fn test_header_sent_on_first_tick_only() {
        let mut h = Harness::new();
        let mut transfer = cursor_transfer(1024, 200);
        assert_eq!(transfer.state(), TransferState::Idle);
        assert!(h.sent().is_empty());

        h.tick(&mut transfer);
        assert_eq!(transfer.state(), TransferState::HeaderSent);
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), MessageType::FileHeader);
        let header = FileHeader::decode(&sent[0].data).unwrap();
        assert_eq!(header.chunk_count, 6);
        assert_eq!(header.total_size, 1024);
        assert_eq!(header.sample_rate, 8000);

        // nothing else goes out until the header is accepted
        for _ in 0..3 {
            h.tick(&mut transfer);
        }
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_chunk_sequence_covers_file_exactly() {
        let mut h = Harness::new();
        let mut transfer = cursor_transfer(1024, 200);
        h.accept_header(&mut transfer);

        for _ in 0..10 {
            h.tick(&mut transfer);
        }
        let chunks: Vec<ChunkRequest> = h
            .sent()
            .iter()
            .map(|m| {
                assert_eq!(m.msg_type(), MessageType::FileChunk);
                ChunkRequest::decode(&m.data).unwrap()
            })
            .collect();

        assert_eq!(chunks.len(), 6);
        assert_eq!(transfer.next_chunk_index(), 6);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
        }
        let sizes: Vec<usize> = chunks.iter().map(|c| c.data.len()).collect();
        assert_eq!(sizes, vec![200, 200, 200, 200, 200, 24]);
        let rebuilt: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        let original: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_completes_on_last_acceptance() {
        let mut h = Harness::new();
        let mut transfer = cursor_transfer(450, 200);
        h.accept_header(&mut transfer);
        for _ in 0..3 {
            h.tick(&mut transfer);
        }
        let ids: Vec<u8> = h.sent().iter().map(Message::msg_id).collect();
        assert_eq!(ids.len(), 3);

        let mut events = Vec::new();
        for (chunk_id, id) in ids.into_iter().enumerate() {
            let _ = h.broker.release(id);
            let response = ok_chunk(chunk_id as u32);
            events.extend(transfer.on_chunk_response(&mut h.broker, id, &response));
        }

        assert_eq!(
            events,
            vec![
                TransferEvent::ChunkProgress { success: true, chunk_id: 0, chunk_count: 3 },
                TransferEvent::ChunkProgress { success: true, chunk_id: 1, chunk_count: 3 },
                TransferEvent::ChunkProgress { success: true, chunk_id: 2, chunk_count: 3 },
                TransferEvent::Completed { name: "tone".to_string() },
            ]
        );
        assert_eq!(transfer.state(), TransferState::Completed);
        assert!(h.broker.pending().is_empty());
    }

    #[test]
    fn test_rejected_header_discards_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("converted.pcm");
        std::fs::File::create(&path).unwrap().write_all(&[0x80; 300]).unwrap();

        let mut h = Harness::new();
        let mut transfer = FileTransfer::open(&path, 8000, "conv", 200, TIMEOUT, true).unwrap();
        h.tick(&mut transfer);
        let id = h.sent()[0].msg_id();
        let _ = h.broker.release(id);

        let events = transfer.on_header_response(&mut h.broker, id, Some(Status::Error));
        assert_eq!(
            events,
            vec![
                TransferEvent::HeaderResponse(false),
                TransferEvent::Failed(TransferFailure::HeaderRejected),
            ]
        );
        assert_eq!(transfer.state(), TransferState::Rejected);
        assert!(!path.exists());
    }

    #[test]
    fn test_user_file_kept_after_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.pcm");
        std::fs::write(&path, [1u8; 10]).unwrap();

        let mut h = Harness::new();
        let mut transfer = FileTransfer::open(&path, 8000, "keep", 200, TIMEOUT, false).unwrap();
        h.accept_header(&mut transfer);
        h.tick(&mut transfer);
        let id = h.sent()[0].msg_id();
        let events = transfer.on_chunk_response(&mut h.broker, id, &ok_chunk(0));
        assert_eq!(events.last(), Some(&TransferEvent::Completed { name: "keep".to_string() }));
        assert!(path.exists());
    }

    #[test]
    fn test_chunk_rejection_aborts_and_releases_ids() {
        let mut h = Harness::new();
        let mut transfer = cursor_transfer(1000, 200);
        h.accept_header(&mut transfer);
        for _ in 0..3 {
            h.tick(&mut transfer);
        }
        let ids: Vec<u8> = h.sent().iter().map(Message::msg_id).collect();
        assert_eq!(h.broker.pending().len(), 3);

        let _ = h.broker.release(ids[0]);
        let rejected = ChunkResponse {
            status: Status::Error,
            chunk_id: 0,
        }
        .encode();
        let events = transfer.on_chunk_response(&mut h.broker, ids[0], &rejected);
        assert_eq!(
            events,
            vec![
                TransferEvent::ChunkProgress { success: false, chunk_id: 0, chunk_count: 5 },
                TransferEvent::Failed(TransferFailure::ChunkRejected { chunk_id: 0 }),
            ]
        );
        assert_eq!(transfer.state(), TransferState::Aborted);
        assert!(h.broker.pending().is_empty());

        // aborted sessions stay quiet
        assert!(h.tick(&mut transfer).is_empty());
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_mismatched_chunk_id_aborts() {
        let mut h = Harness::new();
        let mut transfer = cursor_transfer(400, 200);
        h.accept_header(&mut transfer);
        h.tick(&mut transfer);
        let id = h.sent()[0].msg_id();

        let events = transfer.on_chunk_response(&mut h.broker, id, &ok_chunk(7));
        assert_eq!(
            events.last(),
            Some(&TransferEvent::Failed(TransferFailure::ChunkMismatch { expected: 0, got: 7 }))
        );
    }

    #[test]
    fn test_timeout_aborts() {
        let mut h = Harness::new();
        let mut transfer = cursor_transfer(400, 200);
        h.tick(&mut transfer);
        assert_eq!(h.broker.pending().len(), 1);

        assert!(transfer.check_timeout(&mut h.broker, h.now + TIMEOUT / 2).is_empty());
        let events = transfer.check_timeout(&mut h.broker, h.now + TIMEOUT);
        assert_eq!(events, vec![TransferEvent::Failed(TransferFailure::Timeout)]);
        assert_eq!(transfer.state(), TransferState::Aborted);
        assert!(h.broker.pending().is_empty());
    }

    #[test]
    fn test_backpressure_defers_chunks() {
        let mut h = Harness::new();
        h.broker = MessageBroker::new(2);
        h.broker.set_link_up(true);
        let mut transfer = cursor_transfer(1000, 200);
        h.accept_header(&mut transfer);

        for _ in 0..5 {
            h.tick(&mut transfer);
        }
        let sent = h.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(transfer.next_chunk_index(), 2);

        let _ = h.broker.release(sent[0].msg_id());
        let _ = transfer.on_chunk_response(&mut h.broker, sent[0].msg_id(), &ok_chunk(0));
        h.tick(&mut transfer);
        assert_eq!(h.sent().len(), 1);
        assert_eq!(transfer.next_chunk_index(), 3);
    }

    #[test]
    fn test_empty_file_completes_after_header() {
        let mut h = Harness::new();
        let mut transfer = cursor_transfer(0, 200);
        h.tick(&mut transfer);
        let id = h.sent()[0].msg_id();
        let events = transfer.on_header_response(&mut h.broker, id, Some(Status::Ok));
        assert_eq!(
            events,
            vec![
                TransferEvent::HeaderResponse(true),
                TransferEvent::Completed { name: "tone".to_string() },
            ]
        );
    }

    #[test]
    fn test_truncated_source_aborts() {
        let mut h = Harness::new();
        // header claims more bytes than the source holds
        let source = Box::new(Cursor::new(vec![0u8; 250]));
        let mut transfer = FileTransfer::new(source, 300, 8000, "short", 200, TIMEOUT).unwrap();
        h.accept_header(&mut transfer);
        assert!(h.tick(&mut transfer).is_empty());
        let events = h.tick(&mut transfer);
        assert!(matches!(events.as_slice(), [TransferEvent::Failed(TransferFailure::Io(_))]));
    }

    #[test]
    fn test_oversized_file_refused() {
        let result = FileTransfer::new(
            Box::new(Cursor::new(Vec::new())),
            u64::from(u32::MAX) + 1,
            8000,
            "huge",
            200,
            TIMEOUT,
        );
        assert_eq!(result.err(), Some(TransferFailure::TooLarge(u64::from(u32::MAX) + 1)));
    }

    #[rstest]
    #[case(0)]
    #[case(MAX_CHUNK_SIZE + 1)]
    #[case(300)]
    fn test_chunk_size_outside_frame_refused(#[case] chunk_size: usize) {
        let source = Box::new(Cursor::new(vec![0u8; 1000]));
        let result = FileTransfer::new(source, 1000, 8000, "wide", chunk_size, TIMEOUT);
        assert_eq!(result.err(), Some(TransferFailure::InvalidChunkSize(chunk_size)));
    }

    #[test]
    fn test_largest_chunk_fits_a_frame() {
        let mut h = Harness::new();
        let mut transfer = cursor_transfer(600, MAX_CHUNK_SIZE);
        h.accept_header(&mut transfer);
        assert!(h.tick(&mut transfer).is_empty());

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data.len(), MAX_CHUNK_SIZE + 4);
        assert_eq!(transfer.state(), TransferState::Streaming);
    }

    #[test]
    fn test_link_down_defers_chunks() {
        let mut h = Harness::new();
        let mut transfer = cursor_transfer(1000, 200);
        h.accept_header(&mut transfer);

        h.broker.set_link_up(false);
        assert!(h.tick(&mut transfer).is_empty());
        assert!(h.sent().is_empty());
        assert_eq!(transfer.state(), TransferState::Accepted);

        h.broker.set_link_up(true);
        h.tick(&mut transfer);
        assert_eq!(h.sent().len(), 1);
        assert_eq!(transfer.next_chunk_index(), 1);
    }
}
