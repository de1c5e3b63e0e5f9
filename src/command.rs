use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::broker::{Channel, MessageBroker};
use crate::protocol::{MessageType, PlaybackCommand, SendError, Status};

/// Playback commands awaiting their status response, keyed by msg_id.
#[derive(Debug)]
pub struct PlaybackCommands {
    outstanding: BTreeMap<u8, (PlaybackCommand, Instant)>,
    timeout: Duration,
}

impl PlaybackCommands {
    pub fn new(timeout: Duration) -> Self {
        Self {
            outstanding: BTreeMap::new(),
            timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn send<C: Channel>(
        &mut self,
        broker: &mut MessageBroker,
        channel: &mut C,
        command: PlaybackCommand,
        now: Instant,
    ) -> Result<u8, SendError> {
        let payload = vec![command as u8];
        let msg_id = broker.try_send(channel, MessageType::PlaybackCommand, payload, now)?;
        debug!("Playback command {} sent as msg_id={}", command, msg_id);
        let _ = self.outstanding.insert(msg_id, (command, now));
        Ok(msg_id)
    }

    /// Matches a response; `Some((command, success))` if it answered one of ours.
    pub fn on_response(
        &mut self,
        msg_id: u8,
        status: Option<Status>,
    ) -> Option<(PlaybackCommand, bool)> {
        let (command, _) = self.outstanding.remove(&msg_id)?;
        Some((command, status == Some(Status::Ok)))
    }

    /// Commands that outlived the timeout, already forgotten here; the
    /// caller releases their ids.
    pub fn expire(&mut self, now: Instant) -> Vec<(u8, PlaybackCommand)> {
        let expired: Vec<u8> = self
            .outstanding
            .iter()
            .filter(|(_, (_, sent_at))| now.saturating_duration_since(*sent_at) >= self.timeout)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| {
                let (command, _) = self.outstanding.remove(&id)?;
                warn!("Playback command {} (msg_id={}) timed out", command, id);
                Some((id, command))
            })
            .collect()
    }

    pub fn cancel_all(&mut self) -> Vec<(u8, PlaybackCommand)> {
        std::mem::take(&mut self.outstanding)
            .into_iter()
            .map(|(id, (command, _))| (id, command))
            .collect()
    }
}
