//! # Sensor Audio Receiver
//!
//! Receives the audio stream a remote sensor publishes over MQTT, rebuilds a
//! gap-aware sample stream and fans it out to live playback and WAV capture.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── SENSOR ────────────────────────────┐
//! │  esp32/audio/raw | mfcc | mel | features | status              │
//! └───────────────────────────────┬────────────────────────────────┘
//!                                 │ MQTT
//!                                 ▼
//! ┌──────────────────────────── RECEIVER ──────────────────────────┐
//! │  network::mqtt ──► crossbeam channel ──► ingest thread          │
//! │                                            │                    │
//! │                                            ▼                    │
//! │                             protocol::decoder (pure)            │
//! │                                            │                    │
//! │                                            ▼                    │
//! │                          pipeline::sequence (gap check)         │
//! │                 ┌──────────────────┼──────────────────┐         │
//! │                 ▼                  ▼                  ▼         │
//! │        audio::buffer       audio::recorder    pipeline::stats   │
//! │        (JitterBuffer)       (WAV file)        (snapshot)        │
//! │                 │                                               │
//! │                 ▼                                               │
//! │        audio::playback (cpal callback, audio::resample)         │
//! │                                                                 │
//! │  network::control ──► esp32/audio/control (fire and forget)     │
//! │  ui (axum) ──► stats / status / toggles                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod protocol;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate the sensor captures at
    pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

    /// Mono stream
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// 16-bit linear PCM
    pub const SAMPLE_WIDTH_BYTES: u16 = 2;

    /// Jitter buffer target latency in milliseconds
    pub const DEFAULT_JITTER_BUFFER_MS: u32 = 500;

    /// Frames requested per playback callback
    pub const DEFAULT_PLAYBACK_FRAME_SIZE: u32 = 512;

    /// Size of the binary packet header
    pub const PACKET_HEADER_LEN: usize = 8;

    /// Sequence numbers wrap at this modulus
    pub const SEQUENCE_MODULUS: u32 = 65536;

    /// Upper bound on a single reported gap
    pub const DEFAULT_MAX_REPORTED_GAP: u32 = 65535;

    /// Idle time after which the next packet starts a new session
    pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 5000;

    /// Default MQTT broker
    pub const DEFAULT_MQTT_HOST: &str = "broker.emqx.io";

    /// Default MQTT port
    pub const DEFAULT_MQTT_PORT: u16 = 1883;

    /// Topic prefix the sensor publishes under
    pub const DEFAULT_TOPIC_PREFIX: &str = "esp32/audio";

    /// Inbound message queue depth between transport and ingest
    pub const INBOUND_QUEUE_CAPACITY: usize = 4096;

    /// Default HTTP port for the status/control API
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
}
