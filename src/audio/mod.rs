//! Audio subsystem: jitter buffer, playback, rate conversion and WAV capture

pub mod buffer;
pub mod device;
pub mod playback;
pub mod recorder;
pub mod resample;

pub use buffer::{JitterBuffer, JitterBufferStats, SharedJitterBuffer};
pub use device::{list_output_devices, get_device_by_name, AudioDevice, OutputDeviceInfo};
pub use playback::{AudioPlayback, DeviceFeed, PlaybackSink};
pub use recorder::{timestamped_path, RecordingSession, RecordingSink, WavFormat};
