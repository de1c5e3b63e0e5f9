use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::protocol::constants::MAX_PENDING_LIMIT;
use crate::protocol::{encode_frame, Message, MessageType, ProtocolError, SendError};

/// Outbound byte sink. The core never configures the underlying device.
pub trait Channel {
    fn write(&mut self, bytes: &[u8]);
}

impl Channel for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub msg_type: MessageType,
    pub sent_at: Instant,
}

/// Fixed-capacity set of request ids awaiting a response.
#[derive(Debug)]
pub struct PendingTable {
    slots: Vec<Option<PendingRequest>>,
    in_use: usize,
}

impl PendingTable {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_PENDING_LIMIT);
        Self {
            slots: vec![None; capacity],
            in_use: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.in_use
    }

    pub fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    pub fn is_full(&self) -> bool {
        self.in_use == self.slots.len()
    }

    pub fn is_pending(&self, msg_id: u8) -> bool {
        self.get(msg_id).is_some()
    }

    pub fn get(&self, msg_id: u8) -> Option<&PendingRequest> {
        self.slots.get(usize::from(msg_id)).and_then(Option::as_ref)
    }

    /// Marks the lowest free id as in use.
    pub fn allocate(&mut self, msg_type: MessageType, now: Instant) -> Option<u8> {
        let index = self.slots.iter().position(Option::is_none)?;
        self.slots[index] = Some(PendingRequest {
            msg_type,
            sent_at: now,
        });
        self.in_use += 1;
        Some(index as u8)
    }

    pub fn release(&mut self, msg_id: u8) -> Option<PendingRequest> {
        let released = self.slots.get_mut(usize::from(msg_id))?.take();
        if released.is_some() {
            self.in_use -= 1;
        }
        released
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.in_use = 0;
    }
}

/// Result of dispatching one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A response matched to the request that was pending under its id.
    Response {
        request: PendingRequest,
        message: Message,
    },
    /// A device-initiated request, queued for request-side handling.
    RequestQueued(MessageType),
}

/// Owns request ids, writes requests to the channel and matches responses.
#[derive(Debug)]
pub struct MessageBroker {
    pending: PendingTable,
    link_up: bool,
    requests: VecDeque<Message>,
}

impl MessageBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: PendingTable::new(capacity),
            link_up: false,
            requests: VecDeque::new(),
        }
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    pub fn set_link_up(&mut self, up: bool) {
        self.link_up = up;
    }

    /// Handshakes may go out at any time; everything else needs a live link.
    pub fn can_send(&self, msg_type: MessageType) -> bool {
        !self.pending.is_full() && (self.link_up || msg_type == MessageType::Handshake)
    }

    /// Assigns an id, records it pending and writes the framed request.
    pub fn try_send<C: Channel>(
        &mut self,
        channel: &mut C,
        msg_type: MessageType,
        payload: Vec<u8>,
        now: Instant,
    ) -> Result<u8, SendError> {
        if self.pending.is_full() {
            return Err(SendError::CapacityExhausted);
        }
        if !self.link_up && msg_type != MessageType::Handshake {
            return Err(SendError::LinkDown(msg_type));
        }

        // id 0 stands in until allocation so an oversized payload never
        // occupies a slot
        let mut message = Message::request(msg_type, 0, payload)?;
        let msg_id = self
            .pending
            .allocate(msg_type, now)
            .ok_or(SendError::CapacityExhausted)?;
        message.header.msg_id = msg_id;

        debug!(
            "Sending {:?} request msg_id={} ({} data bytes, {} pending)",
            msg_type,
            msg_id,
            message.data.len(),
            self.pending.len()
        );
        let frame = encode_frame(&message);
        trace!("Frame out: {}", hex::encode(&frame));
        channel.write(&frame);

        Ok(msg_id)
    }

    /// Writes a response to a device-initiated request.
    pub fn send_response<C: Channel>(&mut self, channel: &mut C, response: &Message) {
        debug!(
            "Sending {:?} response msg_id={}",
            response.msg_type(),
            response.msg_id()
        );
        channel.write(&encode_frame(response));
    }

    /// Validates and dispatches the raw bytes popped from the codec.
    pub fn on_frame_received(&mut self, raw: &[u8]) -> Result<Inbound, ProtocolError> {
        let message = Message::decode(raw)?;
        trace!(
            "Message in: response={} type={:?} msg_id={}",
            message.is_response(),
            message.msg_type(),
            message.msg_id()
        );

        if message.is_response() {
            let msg_id = message.msg_id();
            let Some(request) = self.pending.release(msg_id) else {
                warn!("Response not expected for msg_id {}", msg_id);
                return Err(ProtocolError::ResponseNotExpected(msg_id));
            };
            return Ok(Inbound::Response { request, message });
        }

        if self.requests.iter().any(|r| r.msg_id() == message.msg_id()) {
            warn!("Device request msg_id {} already queued", message.msg_id());
            return Err(ProtocolError::IdInUse(message.msg_id()));
        }

        let msg_type = message.msg_type();
        self.requests.push_back(message);
        Ok(Inbound::RequestQueued(msg_type))
    }

    pub fn take_request(&mut self) -> Option<Message> {
        self.requests.pop_front()
    }

    /// The owner of `msg_id` stopped waiting for it.
    pub fn release(&mut self, msg_id: u8) -> Option<PendingRequest> {
        self.pending.release(msg_id)
    }

    /// Link teardown: every pending id and queued request is dropped.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            debug!("Clearing {} pending requests", self.pending.len());
        }
        self.pending.clear();
        self.requests.clear();
    }
}
