//! Per-session last-processed sequence bookkeeping.
//!
//! Committed sequence numbers for a session form a contiguous, strictly
//! increasing prefix starting at 1. The tracker never errors; a session it
//! has not seen is simply at sequence 0.

use dashmap::DashMap;
use helm_core::SessionId;

/// Result of checking an incoming sequence number against the tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Exactly `last + 1`: process it.
    InOrder,
    /// At or below the last processed sequence: already applied.
    Duplicate { last: u64 },
    /// Beyond `last + 1`: an earlier command has not arrived yet.
    Gap { expected: u64 },
}

/// Sharded map of `session -> last processed sequence`. Each session's
/// entry is written only by that session's consume loop; the map itself is
/// shared across all loops.
#[derive(Default)]
pub struct SequenceTracker {
    last: DashMap<SessionId, u64>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last processed sequence for `session`, 0 if unknown.
    pub fn get_last(&self, session: &SessionId) -> u64 {
        self.last.get(session).map_or(0, |v| *v)
    }

    /// Classify `seq` relative to the session's expected next sequence.
    pub fn validate(&self, session: &SessionId, seq: u64) -> SequenceCheck {
        let last = self.get_last(session);
        if seq == last + 1 {
            SequenceCheck::InOrder
        } else if seq <= last {
            SequenceCheck::Duplicate { last }
        } else {
            SequenceCheck::Gap { expected: last + 1 }
        }
    }

    /// Record `seq` as processed. Monotonic: a replayed lower-or-equal
    /// sequence leaves the tracker untouched.
    pub fn advance(&self, session: &SessionId, seq: u64) {
        self.last
            .entry(session.clone())
            .and_modify(|last| {
                if seq > *last {
                    *last = seq;
                }
            })
            .or_insert(seq);
    }
}
