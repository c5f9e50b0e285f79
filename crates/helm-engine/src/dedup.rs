//! Time-bounded idempotency cache over command ids.
//!
//! At-least-once delivery means the same command can arrive more than once;
//! this cache is what turns that into at-most-one execution while its entry
//! lives. Entries expire after `ttl`; a crash that strands an entry in
//! `Processing` therefore unblocks itself at TTL expiry, at which point the
//! command is treated as unseen and may re-execute. That narrow window is
//! the protocol's accepted consistency boundary, not a bug.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use helm_core::{ActionResult, CommandId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DedupStatus {
    Processing,
    Processed,
}

struct DedupEntry {
    status: DedupStatus,
    marked_at: Instant,
    /// Terminal result of the original execution, kept so a confirmed
    /// duplicate can republish it.
    result: Option<ActionResult>,
}

pub struct DedupCache {
    entries: DashMap<CommandId, DedupEntry>,
    ttl: Duration,
    sweep_interval: Duration,
    last_sweep: Mutex<Instant>,
}

impl DedupCache {
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            sweep_interval,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Whether `id` has already been fully processed. Expires the entry
    /// lazily when its TTL has passed.
    pub fn is_processed(&self, id: &CommandId) -> bool {
        self.maybe_sweep();
        let expired = match self.entries.get(id) {
            Some(entry) => {
                if entry.marked_at.elapsed() > self.ttl {
                    true
                } else {
                    return entry.status == DedupStatus::Processed;
                }
            }
            None => return false,
        };
        if expired {
            self.entries.remove(id);
        }
        false
    }

    /// Record that execution of `id` has begun.
    pub fn mark_processing(&self, id: &CommandId) {
        self.entries.insert(
            id.clone(),
            DedupEntry {
                status: DedupStatus::Processing,
                marked_at: Instant::now(),
                result: None,
            },
        );
    }

    /// Transition `id` to processed, retaining `result` for duplicate
    /// republish. Inserts when no `Processing` entry exists (e.g. the entry
    /// expired mid-flight).
    pub fn mark_processed(&self, id: &CommandId, result: Option<ActionResult>) {
        self.entries.insert(
            id.clone(),
            DedupEntry {
                status: DedupStatus::Processed,
                marked_at: Instant::now(),
                result,
            },
        );
    }

    /// Stored terminal result for a processed, unexpired entry.
    pub fn stored_result(&self, id: &CommandId) -> Option<ActionResult> {
        let entry = self.entries.get(id)?;
        if entry.marked_at.elapsed() > self.ttl || entry.status != DedupStatus::Processed {
            return None;
        }
        entry.result.clone()
    }

    /// Number of live entries (tests and gauges).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, at most once per `sweep_interval` so a hot
    /// read path never pays the full-scan cost repeatedly.
    fn maybe_sweep(&self) {
        {
            let mut last = self.last_sweep.lock();
            if last.elapsed() < self.sweep_interval {
                return;
            }
            *last = Instant::now();
        }
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.marked_at.elapsed() <= ttl);
    }
}
