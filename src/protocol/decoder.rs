//! Packet decoder
//!
//! Turns a raw transport payload into a typed [`Message`]. Decoding is a pure
//! transform: no I/O, no shared state, safe to call from any thread.
//!
//! Two framings are accepted on every data topic:
//!
//! ```text
//! JSON:   {"timestamp": 1234, "sequence": 7, "length": 3, "audio": [1, -2, 3]}
//!
//! Binary: ┌──────────────┬─────────────┬─────────────┬──────────────────────┐
//!         │ timestamp u32│ sequence u16│ count u16   │ count × i16 (or f32) │
//!         └──────────────┴─────────────┴─────────────┴──────────────────────┘
//!         all little-endian, header is 8 bytes
//! ```

use bytes::Buf;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_TOPIC_PREFIX, PACKET_HEADER_LEN};
use crate::error::DecodeError;
use crate::protocol::types::{FeatureBatch, FeatureKind, Message, SampleBatch, StatusMessage};

/// How data payloads are framed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// JSON when the payload starts with `{`, binary otherwise
    #[default]
    Auto,
    Json,
    Binary,
}

/// Topic suffixes under the sensor's prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Raw,
    Mfcc,
    Mel,
    Features,
    Status,
    Control,
    /// Under the prefix but not handled by the receiver
    Other,
}

impl TopicKind {
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            TopicKind::Raw => Some("raw"),
            TopicKind::Mfcc => Some("mfcc"),
            TopicKind::Mel => Some("mel"),
            TopicKind::Features => Some("features"),
            TopicKind::Status => Some("status"),
            TopicKind::Control => Some("control"),
            TopicKind::Other => None,
        }
    }

    /// Topics the receiver subscribes to
    pub const INBOUND: [TopicKind; 5] = [
        TopicKind::Raw,
        TopicKind::Mfcc,
        TopicKind::Mel,
        TopicKind::Features,
        TopicKind::Status,
    ];
}

/// Topic naming under a common prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full topic name for a kind; `None` for [`TopicKind::Other`]
    pub fn topic(&self, kind: TopicKind) -> Option<String> {
        kind.suffix().map(|suffix| format!("{}/{}", self.prefix, suffix))
    }

    pub fn control(&self) -> String {
        format!("{}/control", self.prefix)
    }

    /// Inbound topic names
    pub fn inbound(&self) -> Vec<String> {
        TopicKind::INBOUND
            .iter()
            .filter_map(|kind| self.topic(*kind))
            .collect()
    }

    pub fn classify(&self, topic: &str) -> Result<TopicKind, DecodeError> {
        let suffix = topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| DecodeError::UnknownTopic(topic.to_string()))?;

        Ok(match suffix {
            "raw" => TopicKind::Raw,
            "mfcc" => TopicKind::Mfcc,
            "mel" => TopicKind::Mel,
            "features" => TopicKind::Features,
            "status" => TopicKind::Status,
            "control" => TopicKind::Control,
            _ => TopicKind::Other,
        })
    }
}

/// Stateless decoder configured with topic naming and payload framing
#[derive(Debug, Clone, Default)]
pub struct PacketDecoder {
    topics: Topics,
    format: PayloadFormat,
}

impl PacketDecoder {
    pub fn new(topics: Topics, format: PayloadFormat) -> Self {
        Self { topics, format }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// Decode one transport message
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<Message, DecodeError> {
        match self.topics.classify(topic)? {
            TopicKind::Raw => self.decode_framed(payload, decode_audio_json, decode_audio_binary),
            TopicKind::Mfcc => self.decode_framed(
                payload,
                |p| decode_feature_json(p, FeatureKind::Mfcc),
                |p| decode_feature_binary(p, FeatureKind::Mfcc),
            ),
            TopicKind::Mel => self.decode_framed(
                payload,
                |p| decode_feature_json(p, FeatureKind::Mel),
                |p| decode_feature_binary(p, FeatureKind::Mel),
            ),
            TopicKind::Features => self.decode_framed(
                payload,
                |p| decode_feature_json(p, FeatureKind::Scalar),
                |p| decode_feature_binary(p, FeatureKind::Scalar),
            ),
            TopicKind::Status => decode_status(payload).map(Message::Status),
            TopicKind::Control | TopicKind::Other => Ok(Message::Ignored {
                topic: topic.to_string(),
            }),
        }
    }

    fn decode_framed<J, B>(&self, payload: &[u8], json: J, binary: B) -> Result<Message, DecodeError>
    where
        J: Fn(&[u8]) -> Result<Message, DecodeError>,
        B: Fn(&[u8]) -> Result<Message, DecodeError>,
    {
        match self.format {
            PayloadFormat::Json => json(payload),
            PayloadFormat::Binary => binary(payload),
            PayloadFormat::Auto if looks_like_json(payload) => match json(payload) {
                Ok(message) => Ok(message),
                // A binary header can start with 0x7B ('{') by accident
                Err(json_err) => binary(payload).map_err(|_| json_err),
            },
            PayloadFormat::Auto => binary(payload),
        }
    }
}

/// Decode with the default topic prefix and automatic framing
pub fn decode(topic: &str, payload: &[u8]) -> Result<Message, DecodeError> {
    PacketDecoder::default().decode(topic, payload)
}

fn looks_like_json(payload: &[u8]) -> bool {
    payload
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}

fn malformed(e: impl std::fmt::Display) -> DecodeError {
    DecodeError::Malformed(e.to_string())
}

#[derive(Debug, Deserialize)]
struct JsonAudio {
    timestamp: u32,
    sequence: Option<u16>,
    length: Option<u32>,
    audio: Vec<i16>,
}

fn decode_audio_json(payload: &[u8]) -> Result<Message, DecodeError> {
    if !looks_like_json(payload) {
        return Err(malformed("expected a JSON object"));
    }
    let parsed: JsonAudio = serde_json::from_slice(payload).map_err(malformed)?;
    if let Some(length) = parsed.length {
        if length as usize != parsed.audio.len() {
            return Err(malformed(format!(
                "length {} does not match {} samples",
                length,
                parsed.audio.len()
            )));
        }
    }
    Ok(Message::Samples(SampleBatch::new(
        parsed.timestamp,
        parsed.sequence,
        parsed.audio,
    )))
}

struct Header {
    timestamp: u32,
    sequence: u16,
    count: u16,
}

fn read_header(payload: &[u8]) -> Result<Header, DecodeError> {
    if payload.len() < PACKET_HEADER_LEN {
        return Err(DecodeError::Truncated {
            expected: PACKET_HEADER_LEN,
            actual: payload.len(),
        });
    }
    let mut buf = &payload[..PACKET_HEADER_LEN];
    Ok(Header {
        timestamp: buf.get_u32_le(),
        sequence: buf.get_u16_le(),
        count: buf.get_u16_le(),
    })
}

/// Body of `count` values of `width` bytes following the header
fn read_body(payload: &[u8], count: u16, width: usize) -> Result<&[u8], DecodeError> {
    let expected = PACKET_HEADER_LEN + count as usize * width;
    if payload.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: payload.len(),
        });
    }
    Ok(&payload[PACKET_HEADER_LEN..expected])
}

fn decode_audio_binary(payload: &[u8]) -> Result<Message, DecodeError> {
    let header = read_header(payload)?;
    let body = read_body(payload, header.count, 2)?;
    let samples = body
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    Ok(Message::Samples(SampleBatch::new(
        header.timestamp,
        Some(header.sequence),
        samples,
    )))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonFeatures {
    timestamp: u32,
    mfcc: Option<Vec<f32>>,
    mel: Option<Vec<f32>>,
    spectral_centroid: Option<f32>,
    spectral_bandwidth: Option<f32>,
    zero_crossing_rate: Option<f32>,
    rms_energy: Option<f32>,
}

fn decode_feature_json(payload: &[u8], kind: FeatureKind) -> Result<Message, DecodeError> {
    if !looks_like_json(payload) {
        return Err(malformed("expected a JSON object"));
    }
    let parsed: JsonFeatures = serde_json::from_slice(payload).map_err(malformed)?;
    let values = match kind {
        FeatureKind::Mfcc => parsed.mfcc.ok_or_else(|| malformed("missing key: mfcc"))?,
        FeatureKind::Mel => parsed.mel.ok_or_else(|| malformed("missing key: mel"))?,
        FeatureKind::Scalar => {
            match (
                parsed.spectral_centroid,
                parsed.spectral_bandwidth,
                parsed.zero_crossing_rate,
                parsed.rms_energy,
            ) {
                (Some(centroid), Some(bandwidth), Some(zcr), Some(rms)) => {
                    vec![centroid, bandwidth, zcr, rms]
                }
                _ => return Err(malformed("missing scalar feature keys")),
            }
        }
    };
    Ok(Message::Features(FeatureBatch {
        source_timestamp_ms: parsed.timestamp,
        kind,
        values,
    }))
}

fn decode_feature_binary(payload: &[u8], kind: FeatureKind) -> Result<Message, DecodeError> {
    let header = read_header(payload)?;
    let body = read_body(payload, header.count, 4)?;
    let values = body
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Message::Features(FeatureBatch {
        source_timestamp_ms: header.timestamp,
        kind,
        values,
    }))
}

/// Fields are taken one by one; a field of the wrong type is left empty
/// without discarding the others.
fn decode_status(payload: &[u8]) -> Result<StatusMessage, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(malformed)?;
    let mut status = StatusMessage::default();
    if looks_like_json(payload) {
        if let Ok(serde_json::Value::Object(fields)) = serde_json::from_str(text) {
            status.device = status_field(&fields, "device");
            status.status = status_field(&fields, "status");
            status.publishing = status_field(&fields, "publishing");
            status.feature_extraction = status_field(&fields, "featureExtraction");
            status.timestamp = status_field(&fields, "timestamp");
            status.stats = status_field(&fields, "stats");
        }
    }
    status.raw = text.to_string();
    Ok(status)
}

fn status_field<T: DeserializeOwned>(
    fields: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<T> {
    fields
        .get(key)
        .and_then(|value| T::deserialize(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RAW: &str = "esp32/audio/raw";

    fn samples_of(message: Message) -> SampleBatch {
        match message {
            Message::Samples(batch) => batch,
            other => panic!("expected samples, got {:?}", other),
        }
    }

    #[test]
    fn test_json_audio() {
        let payload = br#"{"timestamp": 1500, "sequence": 9, "length": 3, "audio": [0, -32768, 32767]}"#;
        let batch = samples_of(decode(RAW, payload).unwrap());
        assert_eq!(batch.source_timestamp_ms, 1500);
        assert_eq!(batch.sequence, Some(9));
        assert_eq!(batch.samples, vec![0, -32768, 32767]);
    }

    #[test]
    fn test_json_audio_without_sequence() {
        let batch = samples_of(decode(RAW, br#"{"timestamp": 1, "audio": [5]}"#).unwrap());
        assert_eq!(batch.sequence, None);
        assert_eq!(batch.sample_count(), 1);
    }

    #[test]
    fn test_json_rejects_out_of_range_sample() {
        let err = decode(RAW, br#"{"timestamp": 1, "audio": [40000]}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_json_rejects_missing_keys_and_negative_timestamp() {
        let decoder = PacketDecoder::new(Topics::default(), PayloadFormat::Json);
        for payload in [
            &br#"{"audio": [1, 2]}"#[..],
            br#"{"timestamp": 3}"#,
            br#"{"timestamp": -1, "audio": []}"#,
            br#"{"timestamp": 1, "audio": [1.5]}"#,
            br#"[1, 2, 3]"#,
            b"not json",
        ] {
            assert!(
                matches!(decoder.decode(RAW, payload), Err(DecodeError::Malformed(_))),
                "accepted {:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn test_json_length_mismatch() {
        let err = decode(RAW, br#"{"timestamp": 1, "length": 4, "audio": [1]}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_binary_audio() {
        let payload = SampleBatch::new(42, Some(65535), vec![1, -1, 300]).to_binary();
        let batch = samples_of(decode(RAW, &payload).unwrap());
        assert_eq!(batch.source_timestamp_ms, 42);
        assert_eq!(batch.sequence, Some(65535));
        assert_eq!(batch.samples, vec![1, -1, 300]);
    }

    #[test]
    fn test_binary_truncated_body() {
        let payload = SampleBatch::new(1, Some(1), vec![1, 2, 3, 4]).to_binary();
        let err = decode(RAW, &payload[..payload.len() - 1]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn test_binary_header_starting_with_brace() {
        // timestamp low byte 0x7B looks like '{'
        let payload = SampleBatch::new(0x7B, Some(2), vec![10, 20]).to_binary();
        let batch = samples_of(decode(RAW, &payload).unwrap());
        assert_eq!(batch.samples, vec![10, 20]);
    }

    #[test]
    fn test_feature_json() {
        let mfcc = decode("esp32/audio/mfcc", br#"{"timestamp": 5, "mfcc": [1.0, 2.5]}"#).unwrap();
        assert_eq!(
            mfcc,
            Message::Features(FeatureBatch {
                source_timestamp_ms: 5,
                kind: FeatureKind::Mfcc,
                values: vec![1.0, 2.5]
            })
        );

        let scalar = decode(
            "esp32/audio/features",
            br#"{"timestamp": 6, "spectralCentroid": 1200.0, "spectralBandwidth": 300.0,
                 "zeroCrossingRate": 0.1, "rmsEnergy": 0.25}"#,
        )
        .unwrap();
        match scalar {
            Message::Features(batch) => {
                assert_eq!(batch.kind, FeatureKind::Scalar);
                assert_eq!(batch.values, vec![1200.0, 300.0, 0.1, 0.25]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_feature_binary() {
        let mut payload = vec![9, 0, 0, 0, 0, 0, 2, 0];
        payload.extend_from_slice(&0.5f32.to_le_bytes());
        payload.extend_from_slice(&(-2.0f32).to_le_bytes());
        let message = decode("esp32/audio/mel", &payload).unwrap();
        assert_eq!(
            message,
            Message::Features(FeatureBatch {
                source_timestamp_ms: 9,
                kind: FeatureKind::Mel,
                values: vec![0.5, -2.0]
            })
        );

        let err = decode("esp32/audio/mel", &payload[..12]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { expected: 16, .. }));
    }

    #[test]
    fn test_status_json_and_text() {
        let message = decode(
            "esp32/audio/status",
            br#"{"device": "ESP32_Audio", "status": "online", "publishing": true,
                 "featureExtraction": false, "timestamp": 99, "stats": {"audioPackets": 12}}"#,
        )
        .unwrap();
        match message {
            Message::Status(status) => {
                assert_eq!(status.status.as_deref(), Some("online"));
                assert_eq!(status.publishing, Some(true));
                assert_eq!(status.feature_extraction, Some(false));
                assert_eq!(status.stats.unwrap().audio_packets, 12);
            }
            other => panic!("unexpected {:?}", other),
        }

        match decode("esp32/audio/status", b"rebooting").unwrap() {
            Message::Status(status) => {
                assert_eq!(status.raw, "rebooting");
                assert!(status.status.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_status_keeps_fields_around_a_mistyped_one() {
        let payload = br#"{"device":"ESP32-S3","status":"online","stats":"n/a","timestamp":-1}"#;
        match decode("esp32/audio/status", payload).unwrap() {
            Message::Status(status) => {
                assert_eq!(status.device.as_deref(), Some("ESP32-S3"));
                assert_eq!(status.status.as_deref(), Some("online"));
                assert!(status.stats.is_none());
                assert!(status.timestamp.is_none());
                assert_eq!(status.raw.len(), payload.len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_topic_routing() {
        assert!(matches!(
            decode("other/device/raw", b"{}"),
            Err(DecodeError::UnknownTopic(_))
        ));
        assert_eq!(
            decode("esp32/audio/spectrogram", b"\x00\x01").unwrap(),
            Message::Ignored {
                topic: "esp32/audio/spectrogram".into()
            }
        );
        assert!(matches!(
            decode("esp32/audio/control", br#"{"command": "getStatus"}"#).unwrap(),
            Message::Ignored { .. }
        ));
    }

    #[test]
    fn test_custom_prefix() {
        let topics = Topics::new("lab/mic1/");
        assert_eq!(topics.control(), "lab/mic1/control");
        assert_eq!(topics.classify("lab/mic1/raw").unwrap(), TopicKind::Raw);
        assert_eq!(topics.inbound().len(), 5);
    }

    proptest! {
        #[test]
        fn prop_short_binary_is_truncated(bytes in proptest::collection::vec(any::<u8>(), 0..8)) {
            let decoder = PacketDecoder::new(Topics::default(), PayloadFormat::Binary);
            let result = decoder.decode(RAW, &bytes);
            prop_assert!(
                matches!(result, Err(DecodeError::Truncated { expected: 8, .. })),
                "unexpected result: {:?}", result
            );
        }

        #[test]
        fn prop_arbitrary_payload_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(RAW, &bytes);
            let _ = decode("esp32/audio/mfcc", &bytes);
            let _ = decode("esp32/audio/status", &bytes);
        }

        #[test]
        fn prop_json_preserves_samples(
            samples in proptest::collection::vec(any::<i16>(), 0..300),
            timestamp in any::<u32>(),
            sequence in any::<u16>(),
        ) {
            let batch = SampleBatch::new(timestamp, Some(sequence), samples);
            let decoded = samples_of(decode(RAW, &batch.to_json()).unwrap());
            prop_assert_eq!(decoded, batch);
        }
    }
}
