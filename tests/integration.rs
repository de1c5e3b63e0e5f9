//! Integration tests: a link talking to a simulated device through
//! in-memory byte buffers, with time advanced by hand.

use std::io::Write;
use std::time::{Duration, Instant};

use audiolink::config::LinkConfig;
use audiolink::link::{Link, LinkEvent};
use audiolink::protocol::{
    encode_frame, Message, MessageType, PlaybackCommand, ProtocolError, MAX_CHUNK_SIZE,
};
use audiolink::simulator::DeviceSimulator;
use audiolink::transfer::{FileTransfer, TransferFailure};
use pretty_assertions::assert_eq;

const STEP: Duration = Duration::from_millis(150);

struct Bench {
    link: Link<Vec<u8>>,
    device: DeviceSimulator,
    now: Instant,
}

impl Bench {
    fn new(device: DeviceSimulator) -> Self {
        Self {
            link: Link::new(Vec::new(), LinkConfig::default()),
            device,
            now: Instant::now(),
        }
    }

    /// Shuttles bytes both ways until the line goes quiet.
    fn exchange(&mut self) {
        loop {
            let out = self.link.take_output();
            if out.is_empty() {
                break;
            }
            let back = self.device.feed(&out);
            self.link.bytes_available(&back, self.now);
        }
    }

    fn events(&mut self) -> Vec<LinkEvent> {
        std::iter::from_fn(|| self.link.poll_event()).collect()
    }

    fn step(&mut self, dt: Duration) -> Vec<LinkEvent> {
        self.now += dt;
        self.link.tick(self.now);
        self.exchange();
        self.events()
    }

    fn run_for(&mut self, steps: usize) -> Vec<LinkEvent> {
        (0..steps).flat_map(|_| self.step(STEP)).collect()
    }

    fn connect(&mut self) {
        assert_eq!(self.step(Duration::ZERO), vec![LinkEvent::ConnectionChanged(true)]);
    }
}

fn audio_file(size: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let data: Vec<u8> = (0..size).map(|i| (i * 7 % 256) as u8).collect();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    file
}

fn transfer_for(file: &tempfile::NamedTempFile, name: &str) -> FileTransfer {
    FileTransfer::open(file.path(), 16_000, name, 200, Duration::from_secs(3), false).unwrap()
}

#[test]
fn test_file_upload_end_to_end() {
    let mut bench = Bench::new(DeviceSimulator::default());
    bench.connect();

    let file = audio_file(1024);
    bench.link.send_file(transfer_for(&file, "tone")).unwrap();
    let events = bench.run_for(20);

    let mut expected = vec![LinkEvent::FileHeaderResponse(true)];
    expected.extend((0..6).map(|chunk_id| LinkEvent::FileChunkProgress {
        success: true,
        chunk_id,
        chunk_count: 6,
    }));
    expected.push(LinkEvent::TransferCompleted {
        name: "tone".to_string(),
    });

    assert_eq!(events[..expected.len()], expected[..]);
    // completion triggers a fresh listing
    let LinkEvent::StatusResponse(Some(report)) = &events[expected.len()] else {
        panic!("expected a status refresh, got {:?}", events.get(expected.len()));
    };
    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].name(), "tone");
    assert_eq!(report.files[0].size, 1024);
    assert_eq!(report.files[0].chunk_count, 6);
    assert_eq!(events.len(), expected.len() + 1);

    assert_eq!(bench.link.transfer_state(), None);
    assert!(bench.link.broker().pending().is_empty());
    assert!(file.path().exists());
}

#[test]
fn test_rejected_header_fails_transfer() {
    let mut bench = Bench::new(DeviceSimulator::default().reject_headers());
    bench.connect();

    let file = audio_file(500);
    bench.link.send_file(transfer_for(&file, "nope")).unwrap();
    let events = bench.run_for(5);

    assert_eq!(
        events,
        vec![
            LinkEvent::FileHeaderResponse(false),
            LinkEvent::TransferFailed(TransferFailure::HeaderRejected),
        ]
    );
    assert!(bench.device.files().is_empty());
}

#[test]
fn test_rejected_chunk_aborts_without_retry() {
    let mut bench = Bench::new(DeviceSimulator::default().reject_chunk(2));
    bench.connect();

    let file = audio_file(1000);
    bench.link.send_file(transfer_for(&file, "part")).unwrap();
    let events = bench.run_for(15);

    assert_eq!(
        events,
        vec![
            LinkEvent::FileHeaderResponse(true),
            LinkEvent::FileChunkProgress { success: true, chunk_id: 0, chunk_count: 5 },
            LinkEvent::FileChunkProgress { success: true, chunk_id: 1, chunk_count: 5 },
            LinkEvent::FileChunkProgress { success: false, chunk_id: 2, chunk_count: 5 },
            LinkEvent::TransferFailed(TransferFailure::ChunkRejected { chunk_id: 2 }),
        ]
    );
    assert!(bench.device.files().is_empty());
    assert!(bench.link.broker().pending().is_empty());
}

#[test]
fn test_chunk_size_beyond_frame_is_refused_up_front() {
    let mut bench = Bench::new(DeviceSimulator::default());
    bench.connect();

    let file = audio_file(1000);
    let err = FileTransfer::open(file.path(), 16_000, "wide", 300, Duration::from_secs(3), false)
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);

    // the link is untouched and the largest valid chunk size goes through
    assert_eq!(bench.link.transfer_state(), None);
    let transfer = FileTransfer::open(
        file.path(),
        16_000,
        "wide",
        MAX_CHUNK_SIZE,
        Duration::from_secs(3),
        false,
    )
    .unwrap();
    bench.link.send_file(transfer).unwrap();
    let events = bench.run_for(15);
    assert!(events.contains(&LinkEvent::TransferCompleted {
        name: "wide".to_string()
    }));
    assert_eq!(bench.device.files()[0].chunk_count, 5);
}

#[test]
fn test_silent_device_tears_down_and_reconnects() {
    let mut bench = Bench::new(DeviceSimulator::default());
    bench.connect();

    let file = audio_file(1000);
    bench.link.send_file(transfer_for(&file, "lost")).unwrap();
    bench.device.set_muted(true);

    // unanswered keepalive at 1.5s, detected missing at 3s
    let events = bench.run_for(20);
    assert_eq!(
        events,
        vec![
            LinkEvent::ConnectionChanged(false),
            LinkEvent::TransferFailed(TransferFailure::LinkLost),
        ]
    );
    assert!(!bench.link.is_connected());
    assert_eq!(bench.link.transfer_state(), None);

    bench.device.set_muted(false);
    let events = bench.run_for(10);
    assert_eq!(events, vec![LinkEvent::ConnectionChanged(true)]);
}

#[test]
fn test_playback_command_reaches_device() {
    let mut bench = Bench::new(DeviceSimulator::default());
    bench.connect();

    bench
        .link
        .send_playback_command(PlaybackCommand::Previous, bench.now)
        .unwrap();
    bench.exchange();

    assert_eq!(
        bench.events(),
        vec![LinkEvent::CommandResponse {
            command: PlaybackCommand::Previous,
            success: true
        }]
    );
    assert_eq!(bench.device.last_command(), Some(PlaybackCommand::Previous));
}

#[test]
fn test_line_noise_before_response() {
    let mut bench = Bench::new(DeviceSimulator::default());
    bench.connect();

    let id = bench.link.query_status(bench.now).unwrap();
    let request = bench.link.take_output();
    let response = bench.device.feed(&request);

    let mut line = vec![0x11; 300];
    line.extend_from_slice(&response);
    bench.link.bytes_available(&line, bench.now);

    let events = bench.events();
    assert_eq!(events[0], LinkEvent::ProtocolError(ProtocolError::SofExpected));
    assert!(matches!(events[1], LinkEvent::StatusResponse(Some(_))));
    assert!(!bench.link.broker().pending().is_pending(id));
}

#[test]
fn test_stale_response_after_disconnect_is_unexpected() {
    let mut bench = Bench::new(DeviceSimulator::default());
    bench.connect();

    let id = bench.link.query_status(bench.now).unwrap();
    let request = bench.link.take_output();
    let late = bench.device.feed(&request);

    bench.link.disconnect();
    assert_eq!(
        bench.events(),
        vec![LinkEvent::ConnectionChanged(false), LinkEvent::StatusResponse(None)]
    );

    bench.link.bytes_available(&late, bench.now);
    assert_eq!(
        bench.events(),
        vec![LinkEvent::ProtocolError(ProtocolError::ResponseNotExpected(id))]
    );
}

#[test]
fn test_loopback_link_answers_itself() {
    let config = LinkConfig {
        loopback: true,
        ..LinkConfig::default()
    };
    let mut link = Link::new(Vec::new(), config);
    let now = Instant::now();

    let wire = |link: &mut Link<Vec<u8>>| loop {
        let out = link.take_output();
        if out.is_empty() {
            break;
        }
        link.bytes_available(&out, now);
    };

    link.tick(now);
    wire(&mut link);
    assert!(link.is_connected());

    link.query_status(now).unwrap();
    wire(&mut link);

    let events: Vec<LinkEvent> = std::iter::from_fn(|| link.poll_event()).collect();
    assert_eq!(events[0], LinkEvent::ConnectionChanged(true));
    let LinkEvent::StatusResponse(Some(report)) = &events[1] else {
        panic!("expected status, got {:?}", events);
    };
    assert!(report.files.is_empty());
    assert!(link.broker().pending().is_empty());
}

#[test]
fn test_device_request_ignored_without_loopback() {
    let mut bench = Bench::new(DeviceSimulator::default());
    bench.connect();

    let request = Message::request(MessageType::Handshake, 3, vec![]).unwrap();
    bench.link.bytes_available(&encode_frame(&request), bench.now);
    assert!(bench.link.take_output().is_empty());
    assert!(bench.events().is_empty());
}
