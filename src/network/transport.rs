//! Transport seam
//!
//! The pipeline never talks to a broker directly. Inbound messages arrive as
//! [`InboundMessage`] values on a channel; outbound commands go through a
//! [`Publisher`], which must never block the caller.

use bytes::Bytes;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ControlError;

/// One message received from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Non-blocking outbound publish
pub trait Publisher: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Queue `payload` on `topic`
    ///
    /// Fails with [`ControlError::NotConnected`] when the session is down
    /// and [`ControlError::Busy`] when the outbound queue is full. Never
    /// retries.
    fn try_publish(&self, topic: &str, payload: Bytes) -> Result<(), ControlError>;
}

/// In-process publisher backed by a bounded channel
///
/// Used to loop commands back into a local consumer and in tests.
pub struct ChannelPublisher {
    tx: Sender<InboundMessage>,
    connected: Arc<AtomicBool>,
}

impl ChannelPublisher {
    pub fn new(tx: Sender<InboundMessage>) -> Self {
        Self {
            tx,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Publisher for ChannelPublisher {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn try_publish(&self, topic: &str, payload: Bytes) -> Result<(), ControlError> {
        if !self.is_connected() {
            return Err(ControlError::NotConnected);
        }
        match self.tx.try_send(InboundMessage::new(topic, payload)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ControlError::Busy),
            Err(TrySendError::Disconnected(_)) => Err(ControlError::NotConnected),
        }
    }
}
