//! Wire protocol: message types and the packet decoder

pub mod decoder;
pub mod types;

pub use decoder::{decode, PacketDecoder, PayloadFormat, TopicKind, Topics};
pub use types::{
    ControlCommand, CommandName, FeatureBatch, FeatureKind, Message, RemoteStats, SampleBatch,
    StatusMessage,
};
