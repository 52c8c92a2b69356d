//! Per-book sequence gate
//!
//! Classifies each incoming sequence number against the last one accepted:
//! - 0 → unsequenced, always passes
//! - first sequenced event → accepted with no gap check
//! - `last + 1` → in order
//! - `<= last` → duplicate, dropped
//! - `> last + 1` → gap, recap needed

use tracing::{debug, warn};

use crate::events::GapInfo;

/// Result of checking one sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceCheck {
    InOrder,
    /// Sequence 0; not subject to gap detection.
    Unsequenced,
    /// Already seen; `last` is the latest accepted sequence.
    Duplicate { last: u64 },
    Gap(GapInfo),
}

/// Tracks the last accepted sequence number of one book.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    /// Last accepted sequence number.
    last_sequence: Option<u64>,
    /// Total sequenced events accepted.
    events_accepted: u64,
    /// Total duplicates dropped.
    events_dropped: u64,
    /// Total gaps detected.
    gaps_detected: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `seq` without recording it.
    pub fn check(&self, seq: u64, timestamp: i64) -> SequenceCheck {
        if seq == 0 {
            return SequenceCheck::Unsequenced;
        }
        match self.last_sequence {
            None => SequenceCheck::InOrder,
            Some(last) if seq <= last => SequenceCheck::Duplicate { last },
            Some(last) if seq > last + 1 => SequenceCheck::Gap(GapInfo {
                begin: last + 1,
                end: seq - 1,
                detected_at: timestamp,
            }),
            Some(_) => SequenceCheck::InOrder,
        }
    }

    /// Classify `seq` and update the counters. In-order sequences are accepted.
    pub fn observe(&mut self, seq: u64, timestamp: i64) -> SequenceCheck {
        let check = self.check(seq, timestamp);
        match &check {
            SequenceCheck::InOrder => self.accept(seq),
            SequenceCheck::Unsequenced => {}
            SequenceCheck::Duplicate { last } => {
                self.events_dropped += 1;
                debug!(sequence = seq, last_sequence = last, "Dropping duplicate event");
            }
            SequenceCheck::Gap(gap) => {
                self.gaps_detected += 1;
                warn!(
                    from = gap.begin,
                    to = gap.end,
                    gap_size = gap.gap_size(),
                    "Sequence gap detected, recap needed"
                );
            }
        }
        check
    }

    /// Record `seq` as the latest accepted sequence.
    pub fn accept(&mut self, seq: u64) {
        if seq != 0 {
            self.last_sequence = Some(seq);
            self.events_accepted += 1;
        }
    }

    /// Restart tracking from `seq`, e.g. after a recap. 0 forgets everything.
    pub fn reset(&mut self, seq: u64) {
        self.last_sequence = (seq != 0).then_some(seq);
    }

    /// Last accepted sequence number, if any.
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn events_accepted(&self) -> u64 {
        self.events_accepted
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped
    }

    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected
    }
}
