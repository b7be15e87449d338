//! Error types for the sensor audio receiver

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio output subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Packet decoding errors
///
/// All of these are recovered locally: the packet is counted and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Truncated payload: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),
}

/// Recording sink errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Recording already active: {0}")]
    AlreadyRecording(String),

    #[error("Unsupported sample width: {0} bytes")]
    UnsupportedWidth(u16),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Control channel errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Transport busy, command dropped")]
    Busy,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Serialization failed: {0}")]
    Serialize(String),
}

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
