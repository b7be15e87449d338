//! The ingest path
//!
//! [`Pipeline::ingest`] handles one transport message end to end. It is
//! driven by a single ingest thread ([`spawn_ingest`]); the only structure
//! it shares with playback is the lock-free jitter buffer.

use bytes::{BufMut, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::{JitterBuffer, SharedJitterBuffer};
use crate::audio::recorder::{timestamped_path, RecordingSession, RecordingSink, WavFormat};
use crate::config::AppConfig;
use crate::constants::DEFAULT_CHANNELS;
use crate::error::{DecodeError, RecordingError};
use crate::network::control::ControlChannel;
use crate::network::transport::InboundMessage;
use crate::pipeline::sequence::{GapReport, Observation, SequenceState, SequenceTracker};
use crate::pipeline::stats::{rms, StatsCollector, StatsEvent, StatsView};
use crate::protocol::{FeatureBatch, FeatureKind, Message, PacketDecoder, SampleBatch, Topics};

/// How long the ingest thread waits for a message before rechecking its
/// running flag
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Samples { report: GapReport, sample_count: usize },
    Features(FeatureKind),
    Status,
    Ignored,
    Rejected(DecodeError),
    /// The pipeline is shutting down
    Closed,
}

/// State only the ingest thread touches
struct IngestState {
    tracker: SequenceTracker,
    pcm_bytes: BytesMut,
}

/// Decoder, tracker and fan-out targets for one stream
pub struct Pipeline {
    decoder: PacketDecoder,
    jitter: SharedJitterBuffer,
    recorder: RecordingSink,
    stats: StatsCollector,
    control: Option<Arc<ControlChannel>>,
    latest_features: RwLock<HashMap<FeatureKind, FeatureBatch>>,
    ingest: Mutex<IngestState>,
    recording_dir: PathBuf,
    recording_prefix: String,
    accepting: AtomicBool,
}

impl Pipeline {
    pub fn new(config: &AppConfig) -> Self {
        let audio = &config.audio;
        let tracker = SequenceTracker::new(
            config.session.max_reported_gap,
            Some(config.session.idle_timeout()),
        );

        Self {
            decoder: PacketDecoder::new(
                Topics::new(config.mqtt.topic_prefix.clone()),
                audio.payload_format,
            ),
            jitter: Arc::new(JitterBuffer::new(audio.jitter_capacity().max(1))),
            // The sensor stream is mono whatever the output device is
            recorder: RecordingSink::new(WavFormat::new(
                DEFAULT_CHANNELS,
                audio.sample_rate,
                audio.sample_width_bytes,
            )),
            stats: StatsCollector::new(),
            control: None,
            latest_features: RwLock::new(HashMap::new()),
            ingest: Mutex::new(IngestState {
                tracker,
                pcm_bytes: BytesMut::with_capacity(1024),
            }),
            recording_dir: config.recording.directory.clone(),
            recording_prefix: config.recording.file_prefix.clone(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Route status replies to `control`
    pub fn with_control(mut self, control: Arc<ControlChannel>) -> Self {
        self.control = Some(control);
        self
    }

    /// Decode and route one message
    pub fn ingest(&self, topic: &str, payload: &[u8]) -> IngestOutcome {
        if !self.accepting.load(Ordering::Acquire) {
            return IngestOutcome::Closed;
        }
        // Serializes writers of the stats collector
        let mut state = self.ingest.lock();

        let message = match self.decoder.decode(topic, payload) {
            Ok(message) => message,
            Err(e) => {
                self.stats.record(StatsEvent::DecodeFailed);
                tracing::warn!("Dropping packet on {}: {}", topic, e);
                return IngestOutcome::Rejected(e);
            }
        };

        match message {
            Message::Samples(batch) => self.ingest_samples(&mut state, batch),
            Message::Features(batch) => {
                let kind = batch.kind;
                self.stats.record(StatsEvent::FeatureReceived(kind));
                self.latest_features.write().insert(kind, batch);
                IngestOutcome::Features(kind)
            }
            Message::Status(status) => {
                self.stats.record(StatsEvent::StatusReceived);
                match &self.control {
                    Some(control) => control.observe_status(status),
                    None => tracing::info!("Sensor status: {}", status.raw),
                }
                IngestOutcome::Status
            }
            Message::Ignored { topic } => {
                tracing::debug!("Ignoring message on {}", topic);
                IngestOutcome::Ignored
            }
        }
    }

    fn ingest_samples(&self, state: &mut IngestState, batch: SampleBatch) -> IngestOutcome {
        let sample_count = batch.sample_count();

        let sequence = batch.sequence.unwrap_or_else(|| state.tracker.assign());
        let report = state.tracker.observe_at(sequence, Instant::now());

        self.stats.record(StatsEvent::PacketReceived);
        self.stats.record(StatsEvent::Samples(sample_count as u64));
        match report.kind {
            Observation::Gap => {
                self.stats.record(StatsEvent::GapDetected {
                    missing_packets: report.missing_count,
                    samples: report.missing_count as u64 * sample_count as u64,
                });
                tracing::warn!(
                    "Sequence gap before {}: {} packet(s) missing",
                    sequence,
                    report.missing_count
                );
            }
            Observation::Regression => {
                self.stats.record(StatsEvent::Regression);
                tracing::debug!("Sequence regression at {}", sequence);
            }
            Observation::First | Observation::NewSession => {
                self.stats.record(StatsEvent::NewSession);
                tracing::info!("New stream session starting at sequence {}", sequence);
            }
            Observation::InOrder => {}
        }

        self.jitter.push_pcm(&batch.samples);

        if self.recorder.is_active() {
            let pcm_bytes = &mut state.pcm_bytes;
            pcm_bytes.clear();
            for &sample in &batch.samples {
                pcm_bytes.put_i16_le(sample);
            }
            match self.recorder.write(&pcm_bytes[..]) {
                Ok(frames) => {
                    let bytes = frames * self.recorder.format().frame_bytes();
                    self.stats.record(StatsEvent::BytesWritten(bytes as u64));
                }
                Err(e) => {
                    self.stats.record(StatsEvent::RecordingFailed);
                    tracing::warn!("Recording stopped: {}", e);
                }
            }
        }

        self.stats.record(StatsEvent::BatchRms(rms(&batch.samples)));

        IngestOutcome::Samples {
            report,
            sample_count,
        }
    }

    /// Start recording to `path`, or to a timestamped file in the
    /// configured directory
    pub fn start_recording(&self, path: Option<&Path>) -> Result<PathBuf, RecordingError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => timestamped_path(&self.recording_dir, &self.recording_prefix),
        };
        self.recorder.start(&path)?;
        Ok(path)
    }

    pub fn stop_recording(&self) -> Result<Option<RecordingSession>, RecordingError> {
        self.recorder.stop()
    }

    pub fn recording(&self) -> Option<RecordingSession> {
        self.recorder.session()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_active()
    }

    /// Start a fresh sequence session on the next packet
    ///
    /// Audio still queued for playback belongs to the old session and is
    /// discarded; returns how many samples were dropped.
    pub fn reset_session(&self) -> usize {
        let mut state = self.ingest.lock();
        state.tracker.reset_session();
        let discarded = self.jitter.len();
        self.jitter.clear();
        tracing::info!("Sequence session reset, {} queued samples discarded", discarded);
        discarded
    }

    /// Stop accepting messages and finalize any recording
    ///
    /// Playback is owned elsewhere and should be stopped after this.
    pub fn close(&self) -> Option<RecordingSession> {
        self.accepting.store(false, Ordering::Release);
        match self.recorder.stop() {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Failed to finalize recording: {}", e);
                None
            }
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn jitter_buffer(&self) -> &SharedJitterBuffer {
        &self.jitter
    }

    pub fn control(&self) -> Option<&Arc<ControlChannel>> {
        self.control.as_ref()
    }

    pub fn stats(&self) -> StatsView {
        self.stats.snapshot()
    }

    pub fn sequence_state(&self) -> SequenceState {
        self.ingest.lock().tracker.state()
    }

    /// Latest feature batch of each kind
    pub fn latest_features(&self) -> Vec<FeatureBatch> {
        self.latest_features.read().values().cloned().collect()
    }
}

/// Handle to a running ingest thread
pub struct IngestHandle {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl IngestHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop and join; returns the number of messages handled
    ///
    /// Messages already queued are drained first. Stop the transport before
    /// calling this so the queue stops growing.
    pub fn stop(&mut self) -> u64 {
        self.running.store(false, Ordering::SeqCst);
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drain `rx` into `pipeline` on a dedicated thread
pub fn spawn_ingest(
    pipeline: Arc<Pipeline>,
    rx: Receiver<InboundMessage>,
) -> std::io::Result<IngestHandle> {
    let running = Arc::new(AtomicBool::new(true));
    let thread_running = running.clone();

    let handle = thread::Builder::new()
        .name("ingest".to_string())
        .spawn(move || {
            let mut handled = 0u64;
            loop {
                if !thread_running.load(Ordering::Relaxed) {
                    // Drain what the transport already handed over
                    while let Ok(message) = rx.try_recv() {
                        if pipeline.ingest(&message.topic, &message.payload) == IngestOutcome::Closed {
                            break;
                        }
                        handled += 1;
                    }
                    break;
                }
                match rx.recv_timeout(RECV_TIMEOUT) {
                    Ok(message) => {
                        let outcome = pipeline.ingest(&message.topic, &message.payload);
                        if outcome == IngestOutcome::Closed {
                            break;
                        }
                        handled += 1;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            thread_running.store(false, Ordering::SeqCst);
            tracing::info!("Ingest stopped after {} messages", handled);
            handled
        })?;

    Ok(IngestHandle {
        running,
        handle: Some(handle),
    })
}
