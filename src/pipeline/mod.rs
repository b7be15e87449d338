//! Ingest pipeline
//!
//! Decoded batches flow through the sequence tracker and fan out to the
//! jitter buffer, the recording sink and the stats collector.

pub mod ingest;
pub mod sequence;
pub mod stats;

pub use ingest::{spawn_ingest, IngestHandle, IngestOutcome, Pipeline};
pub use sequence::{GapReport, Observation, SequenceState, SequenceTracker};
pub use stats::{StatsCollector, StatsEvent, StatsView};
