//! End-to-end ingest scenarios

use crossbeam_channel::bounded;
use std::sync::Arc;

use sensor_audio_receiver::audio::playback::PlaybackSink;
use sensor_audio_receiver::config::AppConfig;
use sensor_audio_receiver::network::control::ControlChannel;
use sensor_audio_receiver::network::transport::{ChannelPublisher, InboundMessage};
use sensor_audio_receiver::pipeline::{spawn_ingest, IngestOutcome, Observation, Pipeline};
use sensor_audio_receiver::protocol::{CommandName, SampleBatch};

const RAW: &str = "esp32/audio/raw";

fn packet(sequence: u16, samples: Vec<i16>) -> bytes::Bytes {
    SampleBatch::new(sequence as u32 * 8, Some(sequence), samples).to_binary()
}

fn ramp(sequence: u16, len: usize) -> Vec<i16> {
    (0..len).map(|i| (sequence as i16).wrapping_mul(100).wrapping_add(i as i16)).collect()
}

#[test]
fn hundred_packets_in_order() {
    let pipeline = Pipeline::new(&AppConfig::default());
    for seq in 0..100u16 {
        pipeline.ingest(RAW, &packet(seq, vec![0; 128]));
    }

    let stats = pipeline.stats();
    assert_eq!(stats.packets_total, 100);
    assert_eq!(stats.samples_received, 12800);
    assert_eq!(stats.gaps_detected, 0);
    assert_eq!(stats.missing_packets, 0);

    // 500 ms at 16 kHz holds 8000 samples; the oldest 4800 were dropped
    let jitter = pipeline.jitter_buffer().stats();
    assert_eq!(jitter.level, 8000);
    assert_eq!(jitter.dropped_samples, 4800);
}

#[test]
fn single_lost_packet_is_reported_once() {
    let pipeline = Pipeline::new(&AppConfig::default());
    for seq in (0..100u16).filter(|s| *s != 50) {
        let outcome = pipeline.ingest(RAW, &packet(seq, vec![0; 128]));
        if seq == 51 {
            match outcome {
                IngestOutcome::Samples { report, .. } => {
                    assert_eq!(report.kind, Observation::Gap);
                    assert_eq!(report.missing_count, 1);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    let stats = pipeline.stats();
    assert_eq!(stats.packets_total, 99);
    assert_eq!(stats.gaps_detected, 1);
    assert_eq!(stats.missing_packets, 1);
    assert_eq!(stats.missing_samples_estimate, 128);
}

#[test]
fn sequence_wrap_is_continuous() {
    let pipeline = Pipeline::new(&AppConfig::default());
    for seq in [65534u16, 65535, 0, 1] {
        pipeline.ingest(RAW, &packet(seq, vec![0; 16]));
    }
    let stats = pipeline.stats();
    assert_eq!(stats.gaps_detected, 0);
    assert_eq!(stats.sessions, 1);
    assert_eq!(pipeline.sequence_state().last_sequence, Some(1));
}

#[test]
fn recording_captures_every_sample_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.wav");
    let pipeline = Pipeline::new(&AppConfig::default());

    pipeline.start_recording(Some(&path)).unwrap();
    let mut expected = Vec::new();
    for seq in 0..10u16 {
        let samples = ramp(seq, 48);
        expected.extend_from_slice(&samples);
        pipeline.ingest(RAW, &packet(seq, samples));
    }
    let session = pipeline.stop_recording().unwrap().unwrap();

    assert_eq!(session.frames_written, 480);
    assert_eq!(pipeline.stats().bytes_written, 960);

    let mut reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 16000);
    assert_eq!(spec.bits_per_sample, 16);
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples, expected);
}

#[test]
fn close_finalizes_active_recording() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("close.wav");
    let pipeline = Pipeline::new(&AppConfig::default());

    pipeline.start_recording(Some(&path)).unwrap();
    pipeline.ingest(RAW, &packet(0, vec![7; 100]));
    let session = pipeline.close().unwrap();

    assert_eq!(session.frames_written, 100);
    assert!(!pipeline.is_recording());
    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.duration(), 100);
}

#[test]
fn json_and_binary_batches_share_one_stream() {
    let pipeline = Pipeline::new(&AppConfig::default());
    pipeline.ingest(RAW, &packet(0, vec![1; 4]));
    pipeline.ingest(
        RAW,
        br#"{"timestamp": 8, "sequence": 1, "length": 4, "audio": [2, 2, 2, 2]}"#,
    );
    pipeline.ingest(RAW, br#"{"timestamp": 16, "audio": [3, 3, 3, 3]}"#);
    pipeline.ingest(RAW, &packet(3, vec![4; 4]));

    let stats = pipeline.stats();
    assert_eq!(stats.packets_total, 4);
    assert_eq!(stats.gaps_detected, 0);
    assert_eq!(stats.samples_received, 16);
}

#[test]
fn playback_pulls_what_ingest_pushed() {
    let pipeline = Pipeline::new(&AppConfig::default());
    let sink = PlaybackSink::new(pipeline.jitter_buffer().clone());
    pipeline.ingest(RAW, &packet(0, vec![16384, -16384]));

    // Stopped sink plays silence without draining
    assert_eq!(sink.pull_frames(2), vec![0.0, 0.0]);
    assert_eq!(pipeline.jitter_buffer().len(), 2);

    sink.start();
    assert_eq!(sink.pull_frames(4), vec![0.5, -0.5, 0.0, 0.0]);
    assert_eq!(pipeline.jitter_buffer().stats().underruns, 1);
}

#[test]
fn malformed_packets_do_not_disturb_the_stream() {
    let pipeline = Pipeline::new(&AppConfig::default());
    pipeline.ingest(RAW, &packet(0, vec![0; 8]));
    let outcome = pipeline.ingest(RAW, b"{not json");
    assert!(matches!(outcome, IngestOutcome::Rejected(_)));
    assert!(matches!(
        pipeline.ingest("other/device/raw", &packet(1, vec![0; 8])),
        IngestOutcome::Rejected(_)
    ));
    pipeline.ingest(RAW, &packet(1, vec![0; 8]));

    let stats = pipeline.stats();
    assert_eq!(stats.decode_errors, 2);
    assert_eq!(stats.packets_total, 2);
    assert_eq!(stats.gaps_detected, 0);
}

#[test]
fn status_query_round_trip() {
    let (tx, rx) = bounded(8);
    let control = Arc::new(ControlChannel::new(
        Arc::new(ChannelPublisher::new(tx)),
        "esp32/audio/control",
    ));
    let pipeline = Pipeline::new(&AppConfig::default()).with_control(control.clone());

    control.send_now(CommandName::GetStatus).unwrap();
    assert!(control.status_pending());

    // Our own command echoed back by the broker is ignored
    let echoed = rx.try_recv().unwrap();
    assert_eq!(pipeline.ingest(&echoed.topic, &echoed.payload), IngestOutcome::Ignored);
    assert!(control.status_pending());

    let reply = br#"{"device": "ESP32-S3", "status": "online", "publishing": true, "featureExtraction": false}"#;
    assert_eq!(pipeline.ingest("esp32/audio/status", reply), IngestOutcome::Status);
    assert!(!control.status_pending());

    let last = control.last_known_status().unwrap();
    assert_eq!(last.status.device.as_deref(), Some("ESP32-S3"));
    assert_eq!(last.status.feature_extraction, Some(false));
}

#[test]
fn ingest_thread_feeds_pipeline() {
    let pipeline = Arc::new(Pipeline::new(&AppConfig::default()));
    let (tx, rx) = bounded::<InboundMessage>(64);
    let mut handle = spawn_ingest(pipeline.clone(), rx).unwrap();

    for seq in 0..50u16 {
        tx.send(InboundMessage::new(RAW, packet(seq, vec![0; 32]))).unwrap();
    }
    drop(tx);

    assert_eq!(handle.stop(), 50);
    let stats = pipeline.stats();
    assert_eq!(stats.packets_total, 50);
    assert_eq!(stats.samples_received, 1600);
}

#[test]
fn stereo_output_config_still_records_mono() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stereo_out.wav");
    let mut config = AppConfig::default();
    config.audio.channels = 2;
    let pipeline = Pipeline::new(&config);

    pipeline.start_recording(Some(&path)).unwrap();
    pipeline.ingest(RAW, &packet(0, ramp(0, 101)));
    let session = pipeline.stop_recording().unwrap().unwrap();

    assert_eq!(session.channels, 1);
    assert_eq!(session.frames_written, 101);
    assert_eq!(pipeline.jitter_buffer().capacity(), 8000);

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.duration(), 101);
}
