//! WAV capture of the decoded stream
//!
//! The recording sink owns at most one open file. `write` is called from the
//! ingest thread only; `start`/`stop` may come from anywhere (HTTP handlers,
//! shutdown) and are serialized against `write` by the session lock, so a
//! write is either fully in the file or not at all.

use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::constants::SAMPLE_WIDTH_BYTES;
use crate::error::RecordingError;

/// Fixed format of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub sample_width_bytes: u16,
}

impl WavFormat {
    pub fn new(channels: u16, sample_rate: u32, sample_width_bytes: u16) -> Self {
        Self {
            channels,
            sample_rate,
            sample_width_bytes,
        }
    }

    /// Bytes per interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.sample_width_bytes as usize
    }

    fn to_spec(self) -> Result<hound::WavSpec, RecordingError> {
        if self.sample_width_bytes != SAMPLE_WIDTH_BYTES {
            return Err(RecordingError::UnsupportedWidth(self.sample_width_bytes));
        }
        Ok(hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        })
    }
}

/// Description of the file being (or just) written
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RecordingSession {
    pub path: PathBuf,
    pub channels: u16,
    pub sample_width_bytes: u16,
    pub sample_rate: u32,
    pub frames_written: u64,
}

impl RecordingSession {
    pub fn duration_secs(&self) -> f64 {
        self.frames_written as f64 / self.sample_rate as f64
    }

    pub fn bytes_written(&self) -> u64 {
        self.frames_written * self.channels as u64 * self.sample_width_bytes as u64
    }
}

struct ActiveRecording {
    writer: hound::WavWriter<BufWriter<File>>,
    session: RecordingSession,
}

/// Scoped WAV writer fed with raw little-endian 16-bit frames
pub struct RecordingSink {
    format: WavFormat,
    active: AtomicBool,
    current: Mutex<Option<ActiveRecording>>,
}

impl RecordingSink {
    pub fn new(format: WavFormat) -> Self {
        Self {
            format,
            active: AtomicBool::new(false),
            current: Mutex::new(None),
        }
    }

    pub fn format(&self) -> WavFormat {
        self.format
    }

    /// Create (or truncate) `path` and write the WAV header
    pub fn start(&self, path: impl AsRef<Path>) -> Result<(), RecordingError> {
        let path = path.as_ref();
        let mut current = self.current.lock();
        if let Some(active) = current.as_ref() {
            return Err(RecordingError::AlreadyRecording(
                active.session.path.display().to_string(),
            ));
        }

        let spec = self.format.to_spec()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = hound::WavWriter::create(path, spec)?;
        // Header with zero sizes is on disk before the first frame
        writer.flush()?;

        *current = Some(ActiveRecording {
            writer,
            session: RecordingSession {
                path: path.to_path_buf(),
                channels: self.format.channels,
                sample_width_bytes: self.format.sample_width_bytes,
                sample_rate: self.format.sample_rate,
                frames_written: 0,
            },
        });
        self.active.store(true, Ordering::SeqCst);

        tracing::info!("Recording to {}", path.display());
        Ok(())
    }

    /// Append whole frames from `raw`; returns frames written
    ///
    /// A no-op returning 0 while inactive. On a write failure the session is
    /// closed and the error returned; later writes are no-ops.
    pub fn write(&self, raw: &[u8]) -> Result<usize, RecordingError> {
        if !self.active.load(Ordering::Acquire) {
            return Ok(0);
        }

        let mut current = self.current.lock();
        let Some(active) = current.as_mut() else {
            return Ok(0);
        };

        let frame_bytes = self.format.frame_bytes();
        let frames = raw.len() / frame_bytes;
        let whole = &raw[..frames * frame_bytes];
        if whole.len() != raw.len() {
            tracing::debug!(
                "Dropping {} trailing bytes of a partial frame",
                raw.len() - whole.len()
            );
        }

        let result = whole
            .chunks_exact(2)
            .try_for_each(|c| active.writer.write_sample(i16::from_le_bytes([c[0], c[1]])));

        match result {
            Ok(()) => {
                active.session.frames_written += frames as u64;
                Ok(frames)
            }
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                if let Some(failed) = current.take() {
                    tracing::error!(
                        "Recording to {} failed after {} frames: {}",
                        failed.session.path.display(),
                        failed.session.frames_written,
                        e
                    );
                    // Best effort: patch the header for what made it to disk
                    let _ = failed.writer.finalize();
                }
                Err(e.into())
            }
        }
    }

    /// Finalize the file; `None` when nothing was recording
    pub fn stop(&self) -> Result<Option<RecordingSession>, RecordingError> {
        self.active.store(false, Ordering::SeqCst);
        let Some(active) = self.current.lock().take() else {
            return Ok(None);
        };

        active.writer.finalize()?;
        tracing::info!(
            "Recording saved to {} ({} frames, {:.1}s)",
            active.session.path.display(),
            active.session.frames_written,
            active.session.duration_secs()
        );
        Ok(Some(active.session))
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Snapshot of the open session
    pub fn session(&self) -> Option<RecordingSession> {
        self.current.lock().as_ref().map(|a| a.session.clone())
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Failed to finalize recording on shutdown: {}", e);
        }
    }
}

/// `<dir>/<prefix>_<YYYYmmdd_HHMMSS>.wav`
pub fn timestamped_path(dir: impl AsRef<Path>, prefix: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.as_ref().join(format!("{}_{}.wav", prefix, stamp))
}
