//! Lock-free jitter buffer for playback samples
//!
//! A bounded single-producer single-consumer queue of normalized `f32`
//! samples. The ingest thread pushes decoded batches, the playback callback
//! pulls fixed-size frames. Neither side ever blocks:
//!
//! - overrun: the oldest samples are evicted so live playback stays fresh
//! - underrun: the missing tail of a frame is filled with silence

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Convert a 16-bit PCM sample to [-1, 1)
#[inline]
pub fn normalize(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Bounded sample queue shared between ingest and playback
pub struct JitterBuffer {
    queue: ArrayQueue<f32>,
    /// Samples evicted on overrun
    dropped_samples: AtomicU64,
    /// Pull calls that had to pad with silence
    underruns: AtomicU64,
    /// Silent samples emitted on underrun
    silence_samples: AtomicU64,
    pushed_samples: AtomicU64,
}

impl JitterBuffer {
    /// Create a buffer holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "JitterBuffer capacity must be non-zero");
        Self {
            queue: ArrayQueue::new(capacity),
            dropped_samples: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            silence_samples: AtomicU64::new(0),
            pushed_samples: AtomicU64::new(0),
        }
    }

    /// Capacity for `latency_ms` of audio at `sample_rate`
    pub fn with_latency(sample_rate: u32, latency_ms: u32) -> Self {
        let capacity = (sample_rate as u64 * latency_ms as u64 / 1000).max(1) as usize;
        Self::new(capacity)
    }

    /// Append samples, evicting the oldest on overrun
    ///
    /// Returns the number of samples evicted.
    pub fn push(&self, samples: &[f32]) -> usize {
        let mut dropped = 0;
        for &sample in samples {
            if self.queue.force_push(sample).is_some() {
                dropped += 1;
            }
        }
        self.pushed_samples
            .fetch_add(samples.len() as u64, Ordering::Relaxed);
        if dropped > 0 {
            self.dropped_samples
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        dropped
    }

    /// Normalize and append 16-bit PCM
    pub fn push_pcm(&self, samples: &[i16]) -> usize {
        let mut dropped = 0;
        for &sample in samples {
            if self.queue.force_push(normalize(sample)).is_some() {
                dropped += 1;
            }
        }
        self.pushed_samples
            .fetch_add(samples.len() as u64, Ordering::Relaxed);
        if dropped > 0 {
            self.dropped_samples
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        dropped
    }

    /// Fill `out` from the head of the queue, padding with silence
    ///
    /// Allocation-free; this is what the playback callback calls. Returns
    /// how many samples came from the queue.
    pub fn pull_into(&self, out: &mut [f32]) -> usize {
        let mut filled = 0;
        while filled < out.len() {
            match self.queue.pop() {
                Some(sample) => {
                    out[filled] = sample;
                    filled += 1;
                }
                None => break,
            }
        }
        if filled < out.len() {
            out[filled..].fill(0.0);
            self.underruns.fetch_add(1, Ordering::Relaxed);
            self.silence_samples
                .fetch_add((out.len() - filled) as u64, Ordering::Relaxed);
        }
        filled
    }

    /// Remove exactly `frame_count` samples, padding with silence
    pub fn pull(&self, frame_count: usize) -> Vec<f32> {
        let mut out = vec![0.0; frame_count];
        self.pull_into(&mut out);
        out
    }

    /// Drop everything currently queued
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Occupancy as a fraction of capacity
    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            level: self.len(),
            capacity: self.capacity(),
            pushed_samples: self.pushed_samples.load(Ordering::Relaxed),
            dropped_samples: self.dropped_samples.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            silence_samples: self.silence_samples.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe handle to a jitter buffer
pub type SharedJitterBuffer = Arc<JitterBuffer>;

/// Jitter buffer statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct JitterBufferStats {
    pub level: usize,
    pub capacity: usize,
    pub pushed_samples: u64,
    pub dropped_samples: u64,
    pub underruns: u64,
    pub silence_samples: u64,
}
