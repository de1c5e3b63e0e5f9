//! The link scheduler: one instance per device connection.
//!
//! [`Link`] owns the codec, the broker and every request-side session. It
//! is fed received bytes and periodic ticks, writes frames to its
//! [`Channel`] and reports what happened through [`Link::poll_event`].
//! Nothing in here blocks or reads a clock; callers pass `now`.

use std::collections::VecDeque;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::broker::{Channel, Inbound, MessageBroker};
use crate::command::PlaybackCommands;
use crate::config::LinkConfig;
use crate::liveness::{LinkState, LivenessMonitor};
use crate::protocol::{
    DeviceReport, FrameCodec, Message, MessageType, PlaybackCommand, ProtocolError, SendError,
};
use crate::simulator::DeviceSimulator;
use crate::status::{DeviceStatusQuery, QueryError};
use crate::transfer::{FileTransfer, TransferEvent, TransferFailure, TransferState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectionChanged(bool),
    /// `None` when the query failed, timed out or was torn down.
    StatusResponse(Option<DeviceReport>),
    CommandResponse {
        command: PlaybackCommand,
        success: bool,
    },
    FileHeaderResponse(bool),
    FileChunkProgress {
        success: bool,
        chunk_id: u32,
        chunk_count: u32,
    },
    TransferCompleted {
        name: String,
    },
    TransferFailed(TransferFailure),
    ProtocolError(ProtocolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("a file transfer is already running")]
    TransferBusy,
    #[error("link is not connected")]
    NotConnected,
}

pub struct Link<C: Channel> {
    channel: C,
    codec: FrameCodec,
    broker: MessageBroker,
    liveness: LivenessMonitor,
    status: DeviceStatusQuery,
    commands: PlaybackCommands,
    transfer: Option<FileTransfer>,
    responder: Option<DeviceSimulator>,
    config: LinkConfig,
    last_file_send: Option<Instant>,
    events: VecDeque<LinkEvent>,
}

impl<C: Channel> Link<C> {
    pub fn new(channel: C, config: LinkConfig) -> Self {
        let responder = config.loopback.then(DeviceSimulator::default);
        if responder.is_some() {
            info!("Link running in loopback mode");
        }

        Self {
            channel,
            codec: FrameCodec::with_max_unframed(config.max_unframed),
            broker: MessageBroker::new(config.max_pending),
            liveness: LivenessMonitor::new(config.keepalive_interval(), config.deadline()),
            status: DeviceStatusQuery::new(config.request_timeout()),
            commands: PlaybackCommands::new(config.request_timeout()),
            transfer: None,
            responder,
            config,
            last_file_send: None,
            events: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn broker(&self) -> &MessageBroker {
        &self.broker
    }

    pub fn state(&self) -> LinkState {
        self.liveness.state()
    }

    pub fn is_connected(&self) -> bool {
        self.liveness.is_connected()
    }

    pub fn last_report(&self) -> Option<&DeviceReport> {
        self.status.last_report()
    }

    pub fn transfer_state(&self) -> Option<TransferState> {
        self.transfer.as_ref().map(FileTransfer::state)
    }

    pub fn poll_event(&mut self) -> Option<LinkEvent> {
        self.events.pop_front()
    }

    /// Consumes bytes read from the device.
    pub fn bytes_available(&mut self, bytes: &[u8], now: Instant) {
        self.codec.extend(bytes);

        while let Some(frame) = self.codec.next_frame() {
            let inbound = frame.and_then(|raw| self.broker.on_frame_received(&raw));
            match inbound {
                Ok(Inbound::Response { request, message }) => {
                    if request.msg_type != message.msg_type() {
                        warn!(
                            "msg_id={} answered with {:?}, request was {:?}",
                            message.msg_id(),
                            message.msg_type(),
                            request.msg_type
                        );
                    }
                    self.dispatch_response(request.msg_type, message, now);
                }
                Ok(Inbound::RequestQueued(msg_type)) => {
                    debug!("Device-initiated {:?} request queued", msg_type);
                }
                Err(e) => {
                    debug!("Protocol error: {}", e);
                    self.events.push_back(LinkEvent::ProtocolError(e));
                }
            }
        }

        self.serve_requests();
    }

    /// Periodic driver step: keepalive, deadline, timeouts, file pacing.
    pub fn tick(&mut self, now: Instant) {
        if self.liveness.keepalive_due(now) {
            self.keepalive(now);
        }

        if let Some(false) = self.liveness.check_deadline(now) {
            self.on_connection_changed(false);
        }

        if let Some(msg_id) = self.status.check_timeout(now) {
            let _ = self.broker.release(msg_id);
            self.events.push_back(LinkEvent::StatusResponse(None));
        }

        for (msg_id, command) in self.commands.expire(now) {
            let _ = self.broker.release(msg_id);
            self.events.push_back(LinkEvent::CommandResponse {
                command,
                success: false,
            });
        }

        if let Some(transfer) = self.transfer.as_mut() {
            let events = transfer.check_timeout(&mut self.broker, now);
            self.on_transfer_events(events, now);
        }

        let interval = self.config.file_send_interval();
        let due = self
            .last_file_send
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if due {
            if let Some(transfer) = self.transfer.as_mut() {
                self.last_file_send = Some(now);
                let events = transfer.tick(&mut self.broker, &mut self.channel, now);
                self.on_transfer_events(events, now);
            }
        }

        if !self.broker.pending().is_empty() {
            self.liveness.request_sent(now);
        }
    }

    pub fn query_status(&mut self, now: Instant) -> Result<u8, QueryError> {
        let msg_id = self.status.request(&mut self.broker, &mut self.channel, now)?;
        self.liveness.request_sent(now);
        Ok(msg_id)
    }

    pub fn send_playback_command(
        &mut self,
        command: PlaybackCommand,
        now: Instant,
    ) -> Result<u8, SendError> {
        let msg_id = self
            .commands
            .send(&mut self.broker, &mut self.channel, command, now)?;
        self.liveness.request_sent(now);
        Ok(msg_id)
    }

    /// Hands a prepared transfer to the link. The header goes out on the next tick.
    pub fn send_file(&mut self, transfer: FileTransfer) -> Result<(), LinkError> {
        if self.transfer.is_some() {
            return Err(LinkError::TransferBusy);
        }
        if !self.liveness.is_connected() {
            return Err(LinkError::NotConnected);
        }

        self.transfer = Some(transfer);
        self.last_file_send = None;
        Ok(())
    }

    /// Local teardown; the next answered keepalive reconnects.
    pub fn disconnect(&mut self) {
        if let Some(connected) = self.liveness.mark_disconnected() {
            self.events.push_back(LinkEvent::ConnectionChanged(connected));
        }
        self.teardown();
    }

    fn keepalive(&mut self, now: Instant) {
        let tick = self.liveness.on_keepalive_tick(now);
        if let Some(stale_id) = tick.stale_id {
            let _ = self.broker.release(stale_id);
        }
        if let Some(connected) = tick.transition {
            self.on_connection_changed(connected);
        }

        if !self.broker.can_send(MessageType::Handshake) {
            debug!("Keepalive skipped, no free msg_id");
            return;
        }
        match self
            .broker
            .try_send(&mut self.channel, MessageType::Handshake, Vec::new(), now)
        {
            Ok(msg_id) => self.liveness.keepalive_sent(msg_id, now),
            Err(e) => debug!("Keepalive not sent: {}", e),
        }
    }

    fn dispatch_response(&mut self, msg_type: MessageType, message: Message, now: Instant) {
        let msg_id = message.msg_id();

        if msg_type == MessageType::Handshake {
            if let Some(connected) = self.liveness.on_handshake_response(msg_id, now) {
                self.on_connection_changed(connected);
            }
            return;
        }
        self.liveness.on_response(now);

        match msg_type {
            MessageType::InfoStatus => {
                let report = self.status.on_response(msg_id, &message.data);
                self.events.push_back(LinkEvent::StatusResponse(report));
            }
            MessageType::PlaybackCommand => {
                let outcome = self.commands.on_response(msg_id, message.status());
                if let Some((command, success)) = outcome {
                    self.events.push_back(LinkEvent::CommandResponse { command, success });
                }
            }
            MessageType::FileHeader => {
                if let Some(transfer) = self.transfer.as_mut() {
                    let events =
                        transfer.on_header_response(&mut self.broker, msg_id, message.status());
                    self.on_transfer_events(events, now);
                }
            }
            MessageType::FileChunk => {
                if let Some(transfer) = self.transfer.as_mut() {
                    let events =
                        transfer.on_chunk_response(&mut self.broker, msg_id, &message.data);
                    self.on_transfer_events(events, now);
                }
            }
            MessageType::Handshake => {}
        }
    }

    fn on_transfer_events(&mut self, events: Vec<TransferEvent>, now: Instant) {
        let mut completed = false;
        for event in events {
            let event = match event {
                TransferEvent::HeaderResponse(accepted) => LinkEvent::FileHeaderResponse(accepted),
                TransferEvent::ChunkProgress {
                    success,
                    chunk_id,
                    chunk_count,
                } => LinkEvent::FileChunkProgress {
                    success,
                    chunk_id,
                    chunk_count,
                },
                TransferEvent::Completed { name } => {
                    completed = true;
                    LinkEvent::TransferCompleted { name }
                }
                TransferEvent::Failed(failure) => LinkEvent::TransferFailed(failure),
            };
            self.events.push_back(event);
        }

        if self.transfer.as_ref().is_some_and(FileTransfer::is_finished) {
            self.transfer = None;
        }

        // refresh the file listing
        if completed {
            if let Err(e) = self.query_status(now) {
                debug!("Status refresh after transfer deferred: {}", e);
            }
        }
    }

    fn on_connection_changed(&mut self, connected: bool) {
        self.broker.set_link_up(connected);
        self.events.push_back(LinkEvent::ConnectionChanged(connected));
        if !connected {
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        self.broker.set_link_up(false);
        self.broker.clear();
        self.codec.clear();

        if self.status.cancel().is_some() {
            self.events.push_back(LinkEvent::StatusResponse(None));
        }
        for (_, command) in self.commands.cancel_all() {
            self.events.push_back(LinkEvent::CommandResponse {
                command,
                success: false,
            });
        }
        if let Some(mut transfer) = self.transfer.take() {
            for event in transfer.abort(&mut self.broker, TransferFailure::LinkLost) {
                if let TransferEvent::Failed(failure) = event {
                    self.events.push_back(LinkEvent::TransferFailed(failure));
                }
            }
        }
    }

    fn serve_requests(&mut self) {
        while let Some(request) = self.broker.take_request() {
            let Some(responder) = self.responder.as_mut() else {
                debug!(
                    "Ignoring device {:?} request msg_id={}",
                    request.msg_type(),
                    request.msg_id()
                );
                continue;
            };
            if let Some(response) = responder.respond(&request) {
                self.broker.send_response(&mut self.channel, &response);
            }
        }
    }
}

impl Link<Vec<u8>> {
    /// Drains the bytes queued for the device.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.channel)
    }
}
