//! Live playback from the jitter buffer
//!
//! [`PlaybackSink`] is the pull side of the pipeline: the output device asks
//! for a frame, the sink fills it from the jitter buffer. [`DeviceFeed`]
//! adapts the mono stream to the device's rate, channels and sample type.
//! [`AudioPlayback`] drives a feed from a cpal output stream running on its
//! own thread.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::SharedJitterBuffer;
use crate::audio::device::{get_default_output_device, get_device_by_name, AudioDevice};
use crate::audio::resample::RateConverter;
use crate::error::AudioError;

/// Pull-side adapter between the output device and the jitter buffer
///
/// Cheap to clone; clones share the same enabled flag and counters.
#[derive(Clone)]
pub struct PlaybackSink {
    buffer: SharedJitterBuffer,
    enabled: Arc<AtomicBool>,
    frames_requested: Arc<AtomicU64>,
}

impl PlaybackSink {
    pub fn new(buffer: SharedJitterBuffer) -> Self {
        Self {
            buffer,
            enabled: Arc::new(AtomicBool::new(false)),
            frames_requested: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Idempotent
    pub fn start(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Idempotent
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Fill `out` for the device; real-time safe
    ///
    /// While stopped the frame is silent and the buffer is left untouched.
    #[inline]
    pub fn on_frame_request(&self, out: &mut [f32]) {
        if !self.enabled.load(Ordering::Relaxed) {
            out.fill(0.0);
            return;
        }
        self.frames_requested
            .fetch_add(out.len() as u64, Ordering::Relaxed);
        self.buffer.pull_into(out);
    }

    /// Owned variant of [`on_frame_request`](Self::on_frame_request)
    pub fn pull_frames(&self, frame_count: usize) -> Vec<f32> {
        let mut out = vec![0.0; frame_count];
        self.on_frame_request(&mut out);
        out
    }

    pub fn frames_requested(&self) -> u64 {
        self.frames_requested.load(Ordering::Relaxed)
    }

    pub fn buffer(&self) -> &SharedJitterBuffer {
        &self.buffer
    }
}

/// Frames staged per pass when spreading mono across device channels
const SCRATCH_FRAMES: usize = 1024;

/// Adapts a mono [`PlaybackSink`] to whatever the device asks for
///
/// Converts the rate when the device runs at a different rate than the
/// stream, spreads mono across every channel and converts to the device's
/// sample type.
pub struct DeviceFeed {
    sink: PlaybackSink,
    converter: Option<RateConverter>,
    scratch: Vec<f32>,
}

impl DeviceFeed {
    pub fn new(sink: PlaybackSink, stream_rate: u32, device_rate: u32) -> Result<Self, AudioError> {
        let converter = if stream_rate != device_rate {
            Some(RateConverter::new(stream_rate, device_rate)?)
        } else {
            None
        };
        Ok(Self {
            sink,
            converter,
            scratch: vec![0.0; SCRATCH_FRAMES],
        })
    }

    pub fn is_resampling(&self) -> bool {
        self.converter.is_some()
    }

    /// Fill an interleaved device buffer; real-time safe
    pub fn write<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = channels.max(1);
        for chunk in data.chunks_mut(SCRATCH_FRAMES * channels) {
            let frames = chunk.len() / channels;
            let mono = &mut self.scratch[..frames];
            match &mut self.converter {
                Some(converter) => converter.fill(&self.sink, mono),
                None => self.sink.on_frame_request(mono),
            }
            for (frame, sample) in chunk.chunks_mut(channels).zip(mono.iter()) {
                frame.fill(T::from_sample(*sample));
            }
        }
    }
}

fn build_stream<T>(
    device: &AudioDevice,
    config: &StreamConfig,
    mut feed: DeviceFeed,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device
        .inner()
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| feed.write(data, channels),
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

/// Open an output stream, preferring the requested config
///
/// Falls back to the device's default config when the requested one is not
/// available, resampling and converting the sample format as needed.
fn open_stream(
    device: &AudioDevice,
    requested: &StreamConfig,
    sink: &PlaybackSink,
    error_tx: Sender<AudioError>,
) -> Result<(cpal::Stream, StreamConfig), AudioError> {
    let stream_rate = requested.sample_rate.0;

    if device.supports(stream_rate, requested.channels) {
        let feed = DeviceFeed::new(sink.clone(), stream_rate, stream_rate)?;
        match build_stream::<f32>(device, requested, feed, error_tx.clone()) {
            Ok(stream) => return Ok((stream, requested.clone())),
            Err(e) => tracing::warn!("{} rejected the requested config: {}", device.name, e),
        }
    }

    let supported = device.default_output_config()?;
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    tracing::info!(
        "Using default output config of {}: {} Hz, {} ch, {:?}",
        device.name,
        config.sample_rate.0,
        config.channels,
        supported.sample_format()
    );

    let feed = DeviceFeed::new(sink.clone(), stream_rate, config.sample_rate.0)?;
    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(device, &config, feed, error_tx)?,
        SampleFormat::I16 => build_stream::<i16>(device, &config, feed, error_tx)?,
        SampleFormat::U16 => build_stream::<u16>(device, &config, feed, error_tx)?,
        format => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} output on {}",
                format, device.name
            )))
        }
    };
    Ok((stream, config))
}

/// cpal output stream fed by a [`PlaybackSink`]
pub struct AudioPlayback {
    sink: PlaybackSink,
    device_name: Option<String>,
    config: StreamConfig,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
}

impl AudioPlayback {
    /// `device_name` of `None` selects the default output device
    pub fn new(
        sink: PlaybackSink,
        device_name: Option<String>,
        sample_rate: u32,
        channels: u16,
        frame_size: u32,
    ) -> Self {
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(frame_size),
        };

        Self {
            sink,
            device_name,
            config,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
        }
    }

    fn open_device(&self) -> Result<AudioDevice, AudioError> {
        match &self.device_name {
            Some(name) => get_device_by_name(name),
            None => get_default_output_device(),
        }
    }

    /// Open the device and start pulling; no-op when already running
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = self.open_device()?;
        let device_name = device.name.clone();
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<StreamConfig, AudioError>>(1);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let sink = self.sink.clone();
        let requested = self.config.clone();

        running.store(true, Ordering::SeqCst);
        sink.start();

        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                let (stream, config) = match open_stream(&device, &requested, &sink, error_tx) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
                let _ = ready_tx.send(Ok(config));

                // The stream is not Send, so it lives on this thread
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
                sink.stop();
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let ready = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|_| Err(AudioError::StreamError("output device timed out".into())));
        let config = match ready {
            Ok(config) => config,
            Err(e) => {
                self.stop();
                return Err(e);
            }
        };

        tracing::info!(
            "Playback started on {} ({} Hz, {} ch)",
            device_name,
            config.sample_rate.0,
            config.channels
        );
        Ok(())
    }

    /// Stop pulling and close the device; no-op when not running
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.sink.stop();

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Playback stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn sink(&self) -> &PlaybackSink {
        &self.sink
    }

    /// Check for errors reported by the stream callback
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}
