//! Transport and remote control

pub mod control;
pub mod mqtt;
pub mod transport;

pub use control::{ControlChannel, ControlStats, LastKnownStatus};
pub use mqtt::{MqttPublisher, MqttTransport};
pub use transport::{ChannelPublisher, InboundMessage, Publisher};
