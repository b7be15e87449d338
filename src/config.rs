//! Application configuration
//!
//! Loaded from TOML. Every section has defaults so a missing file or a
//! partial file both work.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::PayloadFormat;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub audio: AudioConfig,
    pub recording: RecordingConfig,
    pub session: SessionConfig,
    pub ui: UiConfig,
}

/// MQTT transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Generated per run when unset
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub topic_prefix: String,
    /// Depth of the queue between the transport and the ingest thread
    pub inbound_capacity: usize,
    /// Depth of the client's outbound request queue
    pub outbound_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_MQTT_HOST.to_string(),
            port: DEFAULT_MQTT_PORT,
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: 60,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            inbound_capacity: INBOUND_QUEUE_CAPACITY,
            outbound_capacity: 64,
        }
    }
}

/// Stream format and playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Output device channel count; the stream itself is always mono
    pub channels: u16,
    pub sample_width_bytes: u16,
    pub jitter_buffer_ms: u32,
    pub playback_frame_size: u32,
    /// Output device name; default device when unset
    pub output_device: Option<String>,
    pub payload_format: PayloadFormat,
    /// Start playback as soon as the receiver starts
    pub autoplay: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            sample_width_bytes: SAMPLE_WIDTH_BYTES,
            jitter_buffer_ms: DEFAULT_JITTER_BUFFER_MS,
            playback_frame_size: DEFAULT_PLAYBACK_FRAME_SIZE,
            output_device: None,
            payload_format: PayloadFormat::Auto,
            autoplay: true,
        }
    }
}

impl AudioConfig {
    /// Jitter buffer capacity in mono samples
    pub fn jitter_capacity(&self) -> usize {
        (self.sample_rate as u64 * self.jitter_buffer_ms as u64 / 1000) as usize
    }
}

/// WAV capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub directory: PathBuf,
    pub file_prefix: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            file_prefix: "sensor_audio".to_string(),
        }
    }
}

/// Sequence tracking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_timeout_ms: u64,
    pub max_reported_gap: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_reported_gap: DEFAULT_MAX_REPORTED_GAP,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// HTTP status/control API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the platform config directory, falling back to defaults
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/sensor-audio-receiver/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "sensor-audio-receiver")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be non-zero".into()));
        }
        if self.audio.channels == 0 {
            return Err(Error::Config("audio.channels must be non-zero".into()));
        }
        if self.audio.sample_width_bytes != SAMPLE_WIDTH_BYTES {
            return Err(Error::Config(format!(
                "audio.sample_width_bytes must be {}, got {}",
                SAMPLE_WIDTH_BYTES, self.audio.sample_width_bytes
            )));
        }
        if self.audio.jitter_capacity() == 0 {
            return Err(Error::Config("audio.jitter_buffer_ms too small".into()));
        }
        if self.audio.playback_frame_size == 0 {
            return Err(Error::Config("audio.playback_frame_size must be non-zero".into()));
        }
        if self.mqtt.inbound_capacity == 0 || self.mqtt.outbound_capacity == 0 {
            return Err(Error::Config("mqtt queue capacities must be non-zero".into()));
        }
        if self.mqtt.topic_prefix.is_empty() {
            return Err(Error::Config("mqtt.topic_prefix must not be empty".into()));
        }
        if self.session.max_reported_gap == 0 {
            return Err(Error::Config("session.max_reported_gap must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_jitter_capacity() {
        let config = AppConfig::default();
        assert_eq!(config.audio.jitter_capacity(), 8000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stereo_output_keeps_mono_jitter_capacity() {
        let mut config = AppConfig::default();
        config.audio.channels = 2;
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.jitter_capacity(), 8000);
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [mqtt]
            host = "test.mosquitto.org"

            [session]
            idle_timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(config.mqtt.host, "test.mosquitto.org");
        assert_eq!(config.mqtt.port, DEFAULT_MQTT_PORT);
        assert_eq!(config.session.idle_timeout(), Duration::from_millis(2500));
        assert_eq!(config.audio.sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_rejects_wide_samples() {
        let mut config = AppConfig::default();
        config.audio.sample_width_bytes = 3;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_toml_roundtrip_keeps_format() {
        let mut config = AppConfig::default();
        config.audio.payload_format = PayloadFormat::Binary;
        let text = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.audio.payload_format, PayloadFormat::Binary);
    }
}
