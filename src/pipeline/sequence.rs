//! Sequence tracking
//!
//! Validates the producer's 16-bit packet counter in arrival order. Packets
//! are never reordered here; the tracker only classifies each arrival and
//! reports how many packets went missing.

use std::time::{Duration, Instant};

use crate::constants::{DEFAULT_MAX_REPORTED_GAP, SEQUENCE_MODULUS};

const HALF_MODULUS: u16 = (SEQUENCE_MODULUS / 2) as u16;

/// How an arriving sequence number relates to the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First packet of a session
    First,
    InOrder,
    /// One or more packets were skipped
    Gap,
    /// At or behind the previous number by less than half the modulus:
    /// a duplicate, a late arrival or a producer restart. Never counted as
    /// a gap.
    Regression,
    /// First packet after the idle timeout expired
    NewSession,
}

/// Result of observing one sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapReport {
    /// Missing packets between the previous and this sequence number
    pub missing_count: u32,
    pub kind: Observation,
}

impl GapReport {
    fn clean(kind: Observation) -> Self {
        Self {
            missing_count: 0,
            kind,
        }
    }

    pub fn is_gap(&self) -> bool {
        self.kind == Observation::Gap
    }
}

/// Counters kept for the life of the connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceState {
    pub last_sequence: Option<u16>,
    pub gaps_detected: u64,
    pub packets_total: u64,
    pub missing_total: u64,
    pub regressions: u64,
    pub sessions: u64,
}

/// Tracks the producer's sequence numbers
#[derive(Debug)]
pub struct SequenceTracker {
    state: SequenceState,
    max_reported_gap: u32,
    idle_timeout: Option<Duration>,
    last_seen: Option<Instant>,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REPORTED_GAP, None)
    }
}

impl SequenceTracker {
    /// `idle_timeout` of `None` disables session detection
    pub fn new(max_reported_gap: u32, idle_timeout: Option<Duration>) -> Self {
        Self {
            state: SequenceState::default(),
            max_reported_gap: max_reported_gap.max(1),
            idle_timeout,
            last_seen: None,
        }
    }

    /// Observe a sequence number without session timing
    pub fn observe(&mut self, sequence: u16) -> GapReport {
        self.state.packets_total += 1;

        let last = match self.state.last_sequence.replace(sequence) {
            Some(last) => last,
            None => {
                self.state.sessions += 1;
                return GapReport::clean(Observation::First);
            }
        };

        let distance = sequence.wrapping_sub(last);
        if distance == 1 {
            return GapReport::clean(Observation::InOrder);
        }
        if distance == 0 || distance > HALF_MODULUS {
            self.state.regressions += 1;
            return GapReport::clean(Observation::Regression);
        }

        let missing = (distance as u32 - 1).min(self.max_reported_gap);
        self.state.gaps_detected += 1;
        self.state.missing_total += missing as u64;
        GapReport {
            missing_count: missing,
            kind: Observation::Gap,
        }
    }

    /// Observe with an arrival time; a silence longer than the idle timeout
    /// starts a new session
    pub fn observe_at(&mut self, sequence: u16, now: Instant) -> GapReport {
        let expired = match (self.idle_timeout, self.last_seen) {
            (Some(timeout), Some(seen)) => now.saturating_duration_since(seen) > timeout,
            _ => false,
        };
        self.last_seen = Some(now);

        if expired {
            self.state.last_sequence = None;
            self.observe(sequence);
            return GapReport::clean(Observation::NewSession);
        }
        self.observe(sequence)
    }

    /// Next expected number, for batches that arrive without one
    pub fn assign(&self) -> u16 {
        self.state
            .last_sequence
            .map(|last| last.wrapping_add(1))
            .unwrap_or(0)
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// Forget the previous sequence number; counters are kept
    pub fn reset_session(&mut self) {
        self.state.last_sequence = None;
        self.last_seen = None;
    }
}
