//! The command-consumption and state-synchronization engine.
//!
//! Per session: reclaim stalled pending entries, read new commands through
//! a consumer group, validate sequencing, dedup, execute, diff the session
//! state around the execution, publish the update, acknowledge.

pub mod consumer;
pub mod dedup;
pub mod diff;
pub mod error;
pub mod executor;
pub mod publisher;
pub mod registry;
pub mod sim;
pub mod snapshotter;
pub mod tracker;

pub use consumer::{CommandConsumer, ConsumerConfig, ProcessOutcome};
pub use dedup::{DedupCache, DedupStatus};
pub use diff::StateDiffEngine;
pub use error::EngineError;
pub use executor::{ActionExecutor, MockExecutor};
pub use publisher::StatePublisher;
pub use registry::{MemorySessionStore, SessionHandle, SessionStore};
pub use snapshotter::{SnapshotError, StateSnapshotter};
pub use tracker::{SequenceCheck, SequenceTracker};
