//! Sample-rate conversion between the sensor stream and the output device

use rubato::{FftFixedIn, Resampler};

use crate::audio::playback::PlaybackSink;
use crate::error::AudioError;

/// Input frames per resampler chunk (10 ms at 16 kHz)
const CHUNK_FRAMES: usize = 160;

/// Mono rate converter pulling from a [`PlaybackSink`]
///
/// Input is pulled in fixed chunks; converted frames are staged and handed
/// out across device callbacks of any size.
pub struct RateConverter {
    resampler: FftFixedIn<f32>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    staged: usize,
    cursor: usize,
    from: u32,
    to: u32,
}

impl RateConverter {
    pub fn new(from: u32, to: u32) -> Result<Self, AudioError> {
        if from == 0 || to == 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "cannot resample {} Hz -> {} Hz",
                from, to
            )));
        }
        let resampler = FftFixedIn::<f32>::new(from as usize, to as usize, CHUNK_FRAMES, 1, 1)
            .map_err(|e| {
                AudioError::UnsupportedFormat(format!("resampler {} Hz -> {} Hz: {}", from, to, e))
            })?;

        let input = vec![vec![0.0; resampler.input_frames_max()]];
        let output = vec![vec![0.0; resampler.output_frames_max()]];

        Ok(Self {
            resampler,
            input,
            output,
            staged: 0,
            cursor: 0,
            from,
            to,
        })
    }

    pub fn rates(&self) -> (u32, u32) {
        (self.from, self.to)
    }

    /// Fill `out` with converted frames, pulling input from `sink` as needed
    pub fn fill(&mut self, sink: &PlaybackSink, out: &mut [f32]) {
        let mut written = 0;
        while written < out.len() {
            if self.cursor >= self.staged {
                let needed = self.resampler.input_frames_next();
                sink.on_frame_request(&mut self.input[0][..needed]);

                let wave_in = [&self.input[0][..needed]];
                self.staged = match self.resampler.process_into_buffer(
                    &wave_in[..],
                    self.output.as_mut_slice(),
                    None,
                ) {
                    Ok((_, produced)) => produced,
                    Err(e) => {
                        tracing::warn!("Resampling failed: {}", e);
                        0
                    }
                };
                self.cursor = 0;

                if self.staged == 0 {
                    out[written..].fill(0.0);
                    return;
                }
            }

            let n = (self.staged - self.cursor).min(out.len() - written);
            out[written..written + n]
                .copy_from_slice(&self.output[0][self.cursor..self.cursor + n]);
            self.cursor += n;
            written += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::JitterBuffer;
    use std::sync::Arc;

    fn sine_sink(len: usize) -> PlaybackSink {
        let buffer = Arc::new(JitterBuffer::new(len));
        let tone: Vec<f32> = (0..len)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 16000.0).sin() * 0.5)
            .collect();
        buffer.push(&tone);
        let sink = PlaybackSink::new(buffer);
        sink.start();
        sink
    }

    #[test]
    fn test_upsample_pulls_a_third() {
        let sink = sine_sink(4000);
        let mut converter = RateConverter::new(16000, 48000).unwrap();
        assert_eq!(converter.rates(), (16000, 48000));

        let mut out = vec![0.0f32; 4800];
        for frame in out.chunks_mut(441) {
            converter.fill(&sink, frame);
        }

        // 4800 output frames need about 1600 input frames, plus one chunk of lookahead
        let pulled = sink.frames_requested();
        assert!((1600..=1600 + 2 * CHUNK_FRAMES as u64).contains(&pulled), "pulled {}", pulled);
        assert!(out.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn test_stopped_sink_converts_to_silence() {
        let sink = sine_sink(1000);
        sink.stop();
        let mut converter = RateConverter::new(16000, 44100).unwrap();
        let mut out = vec![1.0f32; 1024];
        converter.fill(&sink, &mut out);
        assert!(out.iter().all(|s| s.abs() < 1e-6));
        assert_eq!(sink.buffer().len(), 1000);
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(matches!(
            RateConverter::new(0, 48000),
            Err(AudioError::UnsupportedFormat(_))
        ));
    }
}
