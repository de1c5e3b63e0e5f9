use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::broker::{Channel, MessageBroker};
use crate::protocol::{DeviceReport, MessageType, SendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("a status query is already outstanding")]
    AlreadyOutstanding,
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Single outstanding INFO_STATUS exchange.
#[derive(Debug)]
pub struct DeviceStatusQuery {
    outstanding: Option<(u8, Instant)>,
    last_report: Option<DeviceReport>,
    timeout: Duration,
}

impl DeviceStatusQuery {
    pub fn new(timeout: Duration) -> Self {
        Self {
            outstanding: None,
            last_report: None,
            timeout,
        }
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn last_report(&self) -> Option<&DeviceReport> {
        self.last_report.as_ref()
    }

    /// Sends a bodyless status request. Never queues behind a running query.
    pub fn request<C: Channel>(
        &mut self,
        broker: &mut MessageBroker,
        channel: &mut C,
        now: Instant,
    ) -> Result<u8, QueryError> {
        if self.outstanding.is_some() {
            return Err(QueryError::AlreadyOutstanding);
        }

        let msg_id = broker.try_send(channel, MessageType::InfoStatus, Vec::new(), now)?;
        self.outstanding = Some((msg_id, now));
        Ok(msg_id)
    }

    /// Decodes the response payload. `None` means the response was invalid
    /// and the previous report stays untouched.
    pub fn on_response(&mut self, msg_id: u8, payload: &[u8]) -> Option<DeviceReport> {
        match self.outstanding {
            Some((id, _)) if id == msg_id => self.outstanding = None,
            _ => debug!("Status response msg_id={} was not the outstanding query", msg_id),
        }

        match DeviceReport::decode(payload) {
            Ok(report) => {
                info!(
                    "Device status: storage={} files={} available={}/{}",
                    report.status.storage_connected,
                    report.files.len(),
                    report.status.available_space,
                    report.status.total_space
                );
                self.last_report = Some(report.clone());
                Some(report)
            }
            Err(e) => {
                warn!("Rejected status response: {}", e);
                None
            }
        }
    }

    /// Gives up on a query that outlived its timeout; returns the id the
    /// caller must release.
    pub fn check_timeout(&mut self, now: Instant) -> Option<u8> {
        let (msg_id, sent_at) = self.outstanding?;
        if now.saturating_duration_since(sent_at) < self.timeout {
            return None;
        }
        warn!("Status query msg_id={} timed out", msg_id);
        self.outstanding = None;
        Some(msg_id)
    }

    /// Drops the outstanding query, if any, during link teardown.
    pub fn cancel(&mut self) -> Option<u8> {
        self.outstanding.take().map(|(msg_id, _)| msg_id)
    }
}
