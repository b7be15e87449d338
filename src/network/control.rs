//! Remote control of the sensor
//!
//! Commands are fire-and-forget: serialized, handed to the publisher, and
//! forgotten. A command that cannot be queued right now is dropped and the
//! caller told why; it is never resent, because a stale start/stop replayed
//! after a reconnect would flip the sensor's state unexpectedly.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::ControlError;
use crate::network::transport::Publisher;
use crate::protocol::{CommandName, ControlCommand, StatusMessage};

/// Most recent status report from the sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastKnownStatus {
    pub status: StatusMessage,
    pub received_at: DateTime<Utc>,
}

/// Control channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControlStats {
    pub commands_sent: u64,
    pub commands_dropped: u64,
    pub status_pending: bool,
}

/// Outbound command path plus the last status reply
pub struct ControlChannel {
    publisher: Arc<dyn Publisher>,
    topic: String,
    last_status: RwLock<Option<LastKnownStatus>>,
    status_pending: AtomicBool,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl ControlChannel {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            last_status: RwLock::new(None),
            status_pending: AtomicBool::new(false),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_connected(&self) -> bool {
        self.publisher.is_connected()
    }

    /// Publish one command without blocking
    pub fn send(&self, command: ControlCommand) -> Result<(), ControlError> {
        if !self.publisher.is_connected() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Not connected, dropping command {}", command.name);
            return Err(ControlError::NotConnected);
        }

        let payload = serde_json::to_vec(&command)
            .map_err(|e| ControlError::Serialize(e.to_string()))?;

        match self.publisher.try_publish(&self.topic, Bytes::from(payload)) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                if command.name == CommandName::GetStatus {
                    self.status_pending.store(true, Ordering::SeqCst);
                }
                tracing::info!("Sent command {}", command.name);
                Ok(())
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dropping command {}: {}", command.name, e);
                Err(e)
            }
        }
    }

    /// Send `name` stamped with the current time
    pub fn send_now(&self, name: CommandName) -> Result<(), ControlError> {
        self.send(ControlCommand::now(name))
    }

    /// Record a status reply; called from the ingest path
    pub fn observe_status(&self, status: StatusMessage) {
        tracing::info!(
            "Sensor status: {}, publishing: {:?}, features: {:?}",
            status.status.as_deref().unwrap_or(status.raw.as_str()),
            status.publishing,
            status.feature_extraction
        );
        *self.last_status.write() = Some(LastKnownStatus {
            status,
            received_at: Utc::now(),
        });
        self.status_pending.store(false, Ordering::SeqCst);
    }

    pub fn last_known_status(&self) -> Option<LastKnownStatus> {
        self.last_status.read().clone()
    }

    /// Whether a `getStatus` is still waiting for its reply
    pub fn status_pending(&self) -> bool {
        self.status_pending.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ControlStats {
        ControlStats {
            commands_sent: self.sent.load(Ordering::Relaxed),
            commands_dropped: self.dropped.load(Ordering::Relaxed),
            status_pending: self.status_pending(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::{ChannelPublisher, InboundMessage};
    use crossbeam_channel::{bounded, Receiver};

    fn channel(capacity: usize) -> (ControlChannel, Arc<ChannelPublisher>, Receiver<InboundMessage>) {
        let (tx, rx) = bounded(capacity);
        let publisher = Arc::new(ChannelPublisher::new(tx));
        let control = ControlChannel::new(publisher.clone(), "esp32/audio/control");
        (control, publisher, rx)
    }

    #[test]
    fn test_send_publishes_json() {
        let (control, _publisher, rx) = channel(4);
        control
            .send(ControlCommand::new(CommandName::StartPublishing, 1234))
            .unwrap();

        let message = rx.try_recv().unwrap();
        assert_eq!(message.topic, "esp32/audio/control");
        let json: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(json, serde_json::json!({"command": "startPublishing", "timestamp": 1234}));
        assert_eq!(control.stats().commands_sent, 1);
    }

    #[test]
    fn test_not_connected_is_reported_not_retried() {
        let (control, publisher, rx) = channel(4);
        publisher.set_connected(false);

        let err = control.send_now(CommandName::StopPublishing).unwrap_err();
        assert_eq!(err, ControlError::NotConnected);

        publisher.set_connected(true);
        assert!(rx.try_recv().is_err());
        assert_eq!(control.stats().commands_dropped, 1);
    }

    #[test]
    fn test_full_queue_drops_command() {
        let (control, _publisher, _rx) = channel(1);
        control.send_now(CommandName::EnableFeatures).unwrap();
        assert_eq!(
            control.send_now(CommandName::DisableFeatures).unwrap_err(),
            ControlError::Busy
        );
        assert_eq!(control.stats().commands_dropped, 1);
    }

    #[test]
    fn test_status_query_cleared_by_reply() {
        let (control, _publisher, _rx) = channel(4);
        assert!(control.last_known_status().is_none());

        control.send_now(CommandName::GetStatus).unwrap();
        assert!(control.status_pending());

        control.observe_status(StatusMessage {
            status: Some("online".into()),
            publishing: Some(true),
            ..Default::default()
        });
        assert!(!control.status_pending());
        let last = control.last_known_status().unwrap();
        assert_eq!(last.status.publishing, Some(true));
    }
}
