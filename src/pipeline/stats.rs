//! Running counters for the ingest path
//!
//! One writer (the ingest thread) records events; any thread may take a
//! snapshot. Counters are plain atomics guarded by a sequence lock so a
//! snapshot never mixes values from before and after the same event, and
//! recording never allocates or blocks.

use serde::Serialize;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use crate::protocol::FeatureKind;

/// Something the ingest path observed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatsEvent {
    PacketReceived,
    /// Samples in an accepted batch
    Samples(u64),
    /// A sequence gap; `samples` estimates the audio lost
    GapDetected { missing_packets: u32, samples: u64 },
    Regression,
    NewSession,
    /// Bytes appended to the recording
    BytesWritten(u64),
    DecodeFailed,
    FeatureReceived(FeatureKind),
    StatusReceived,
    RecordingFailed,
    /// RMS of the last sample batch, normalized to [0, 1]
    BatchRms(f32),
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsView {
    pub packets_total: u64,
    pub samples_received: u64,
    pub gaps_detected: u64,
    pub missing_packets: u64,
    pub missing_samples_estimate: u64,
    pub regressions: u64,
    pub sessions: u64,
    pub bytes_written: u64,
    pub decode_errors: u64,
    pub mfcc_batches: u64,
    pub mel_batches: u64,
    pub scalar_batches: u64,
    pub status_messages: u64,
    pub recording_failures: u64,
    pub last_rms: f32,
    /// Packets per second since the first packet
    pub packet_rate: f64,
    pub elapsed_secs: f64,
}

#[derive(Default)]
struct Counters {
    packets_total: AtomicU64,
    samples_received: AtomicU64,
    gaps_detected: AtomicU64,
    missing_packets: AtomicU64,
    missing_samples: AtomicU64,
    regressions: AtomicU64,
    sessions: AtomicU64,
    bytes_written: AtomicU64,
    decode_errors: AtomicU64,
    mfcc_batches: AtomicU64,
    mel_batches: AtomicU64,
    scalar_batches: AtomicU64,
    status_messages: AtomicU64,
    recording_failures: AtomicU64,
    last_rms_bits: AtomicU32,
    /// Microseconds after `origin` when the first packet arrived, plus one;
    /// zero until then
    first_packet_us: AtomicU64,
}

/// Append-only counters with consistent snapshots
pub struct StatsCollector {
    /// Odd while an update is in progress
    seq: AtomicU64,
    counters: Counters,
    origin: Instant,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn bump(counter: &AtomicU64, by: u64) {
    counter.store(counter.load(Ordering::Relaxed) + by, Ordering::Relaxed);
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            counters: Counters::default(),
            origin: Instant::now(),
        }
    }

    /// Record one event; single writer only
    pub fn record(&self, event: StatsEvent) {
        let c = &self.counters;
        let s = self.seq.load(Ordering::Relaxed);
        self.seq.store(s + 1, Ordering::Relaxed);
        fence(Ordering::Release);

        match event {
            StatsEvent::PacketReceived => {
                if c.first_packet_us.load(Ordering::Relaxed) == 0 {
                    let us = self.origin.elapsed().as_micros() as u64 + 1;
                    c.first_packet_us.store(us, Ordering::Relaxed);
                }
                bump(&c.packets_total, 1);
            }
            StatsEvent::Samples(n) => bump(&c.samples_received, n),
            StatsEvent::GapDetected {
                missing_packets,
                samples,
            } => {
                bump(&c.gaps_detected, 1);
                bump(&c.missing_packets, missing_packets as u64);
                bump(&c.missing_samples, samples);
            }
            StatsEvent::Regression => bump(&c.regressions, 1),
            StatsEvent::NewSession => bump(&c.sessions, 1),
            StatsEvent::BytesWritten(n) => bump(&c.bytes_written, n),
            StatsEvent::DecodeFailed => bump(&c.decode_errors, 1),
            StatsEvent::FeatureReceived(FeatureKind::Mfcc) => bump(&c.mfcc_batches, 1),
            StatsEvent::FeatureReceived(FeatureKind::Mel) => bump(&c.mel_batches, 1),
            StatsEvent::FeatureReceived(FeatureKind::Scalar) => bump(&c.scalar_batches, 1),
            StatsEvent::StatusReceived => bump(&c.status_messages, 1),
            StatsEvent::RecordingFailed => bump(&c.recording_failures, 1),
            StatsEvent::BatchRms(rms) => c.last_rms_bits.store(rms.to_bits(), Ordering::Relaxed),
        }

        self.seq.store(s + 2, Ordering::Release);
    }

    fn read(&self) -> StatsView {
        let c = &self.counters;
        let first_us = c.first_packet_us.load(Ordering::Relaxed);
        let packets_total = c.packets_total.load(Ordering::Relaxed);
        let elapsed_secs = if first_us == 0 {
            0.0
        } else {
            let now_us = self.origin.elapsed().as_micros() as u64 + 1;
            now_us.saturating_sub(first_us) as f64 / 1_000_000.0
        };

        StatsView {
            packets_total,
            samples_received: c.samples_received.load(Ordering::Relaxed),
            gaps_detected: c.gaps_detected.load(Ordering::Relaxed),
            missing_packets: c.missing_packets.load(Ordering::Relaxed),
            missing_samples_estimate: c.missing_samples.load(Ordering::Relaxed),
            regressions: c.regressions.load(Ordering::Relaxed),
            sessions: c.sessions.load(Ordering::Relaxed),
            bytes_written: c.bytes_written.load(Ordering::Relaxed),
            decode_errors: c.decode_errors.load(Ordering::Relaxed),
            mfcc_batches: c.mfcc_batches.load(Ordering::Relaxed),
            mel_batches: c.mel_batches.load(Ordering::Relaxed),
            scalar_batches: c.scalar_batches.load(Ordering::Relaxed),
            status_messages: c.status_messages.load(Ordering::Relaxed),
            recording_failures: c.recording_failures.load(Ordering::Relaxed),
            last_rms: f32::from_bits(c.last_rms_bits.load(Ordering::Relaxed)),
            packet_rate: if elapsed_secs > 0.0 {
                packets_total as f64 / elapsed_secs
            } else {
                0.0
            },
            elapsed_secs,
        }
    }

    /// Consistent point-in-time copy
    pub fn snapshot(&self) -> StatsView {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let view = self.read();
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return view;
            }
        }
    }
}

/// RMS of 16-bit samples, normalized to [0, 1]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / 32768.0;
            x * x
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}
