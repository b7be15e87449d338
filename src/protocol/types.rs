//! Message types exchanged with the sensor

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::PACKET_HEADER_LEN;
use crate::error::ControlError;

/// A batch of 16-bit PCM samples from the raw audio topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBatch {
    /// Sensor clock in milliseconds (wraps with the sensor's `millis()`)
    pub source_timestamp_ms: u32,
    /// Producer-assigned sequence number; `None` when the payload carried
    /// none and the tracker has to assign one
    pub sequence: Option<u16>,
    pub samples: Vec<i16>,
}

impl SampleBatch {
    pub fn new(source_timestamp_ms: u32, sequence: Option<u16>, samples: Vec<i16>) -> Self {
        Self {
            source_timestamp_ms,
            sequence,
            samples,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Encode with the compact binary framing
    ///
    /// Sample counts above `u16::MAX` are truncated to fit the header.
    pub fn to_binary(&self) -> Bytes {
        let count = self.samples.len().min(u16::MAX as usize);
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_LEN + count * 2);
        buf.put_u32_le(self.source_timestamp_ms);
        buf.put_u16_le(self.sequence.unwrap_or(0));
        buf.put_u16_le(count as u16);
        for &sample in &self.samples[..count] {
            buf.put_i16_le(sample);
        }
        buf.freeze()
    }

    /// Encode the way the sensor's JSON publisher does
    pub fn to_json(&self) -> Bytes {
        let mut value = serde_json::json!({
            "timestamp": self.source_timestamp_ms,
            "length": self.samples.len(),
            "audio": self.samples,
        });
        if let Some(seq) = self.sequence {
            value["sequence"] = seq.into();
        }
        Bytes::from(value.to_string())
    }
}

/// Which feature topic a batch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Mfcc,
    Mel,
    /// Spectral centroid, spectral bandwidth, zero-crossing rate, RMS energy
    Scalar,
}

/// Feature values published alongside the audio
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureBatch {
    pub source_timestamp_ms: u32,
    pub kind: FeatureKind,
    pub values: Vec<f32>,
}

/// Publish counters the sensor reports in its status message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteStats {
    pub audio_packets: u64,
    pub mfcc_packets: u64,
    pub mel_packets: u64,
    pub feature_packets: u64,
    pub reconnects: u64,
    pub errors: u64,
}

/// Status report from the sensor
///
/// The topic is free-form; fields are filled in when the payload is the
/// sensor's JSON status object and left empty otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatusMessage {
    pub device: Option<String>,
    pub status: Option<String>,
    pub publishing: Option<bool>,
    pub feature_extraction: Option<bool>,
    pub timestamp: Option<u64>,
    pub stats: Option<RemoteStats>,
    #[serde(skip_deserializing)]
    pub raw: String,
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Samples(SampleBatch),
    Features(FeatureBatch),
    Status(StatusMessage),
    /// Known prefix, unhandled suffix: passed through untouched
    Ignored { topic: String },
}

/// Commands understood by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandName {
    StartPublishing,
    StopPublishing,
    EnableFeatures,
    DisableFeatures,
    GetStatus,
}

impl CommandName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::StartPublishing => "startPublishing",
            CommandName::StopPublishing => "stopPublishing",
            CommandName::EnableFeatures => "enableFeatures",
            CommandName::DisableFeatures => "disableFeatures",
            CommandName::GetStatus => "getStatus",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startPublishing" => Ok(CommandName::StartPublishing),
            "stopPublishing" => Ok(CommandName::StopPublishing),
            "enableFeatures" => Ok(CommandName::EnableFeatures),
            "disableFeatures" => Ok(CommandName::DisableFeatures),
            "getStatus" => Ok(CommandName::GetStatus),
            other => Err(ControlError::UnknownCommand(other.to_string())),
        }
    }
}

/// Outbound control message: `{"command": "...", "timestamp": ms}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    #[serde(rename = "command")]
    pub name: CommandName,
    #[serde(rename = "timestamp")]
    pub issued_at_ms: u64,
}

impl ControlCommand {
    pub fn new(name: CommandName, issued_at_ms: u64) -> Self {
        Self { name, issued_at_ms }
    }

    /// Stamp with the current wall clock
    pub fn now(name: CommandName) -> Self {
        let ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self::new(name, ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_json_shape() {
        let cmd = ControlCommand::new(CommandName::EnableFeatures, 1_700_000_000_123);
        let json = serde_json::to_value(cmd).unwrap();
        assert_eq!(json["command"], "enableFeatures");
        assert_eq!(json["timestamp"], 1_700_000_000_123u64);
    }

    #[test]
    fn test_command_name_parse() {
        for name in [
            CommandName::StartPublishing,
            CommandName::StopPublishing,
            CommandName::EnableFeatures,
            CommandName::DisableFeatures,
            CommandName::GetStatus,
        ] {
            assert_eq!(name.as_str().parse::<CommandName>().unwrap(), name);
        }
        assert!(matches!(
            "reboot".parse::<CommandName>(),
            Err(ControlError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_binary_layout() {
        let batch = SampleBatch::new(0x0102_0304, Some(7), vec![-1, 2]);
        let bytes = batch.to_binary();
        assert_eq!(
            &bytes[..],
            &[0x04, 0x03, 0x02, 0x01, 7, 0, 2, 0, 0xFF, 0xFF, 2, 0]
        );
    }
}
