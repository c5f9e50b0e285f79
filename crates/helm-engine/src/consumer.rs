//! The per-session command consume loop.
//!
//! One loop per session, spawned on `start_consuming` and cancelled (with
//! drain) on `stop_consuming`. Each iteration reclaims stalled
//! pending entries, block-reads new commands through the consumer group,
//! and processes them: sequence check, dedup, snapshot, execute, snapshot,
//! diff, publish, acknowledge. Processing returns an explicit
//! [`ProcessOutcome`] and the loop performs the matching ack/advance, so
//! the ack discipline is data, not control flow.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use helm_core::{CommandEnvelope, ConsumerEvent, SessionId, StateUpdateEnvelope, UpdateId};
use helm_stream::{command_stream_key, CommandLog, StreamMessage};

use crate::dedup::DedupCache;
use crate::diff::StateDiffEngine;
use crate::error::EngineError;
use crate::executor::ActionExecutor;
use crate::publisher::StatePublisher;
use crate::registry::{SessionHandle, SessionStore};
use crate::snapshotter::StateSnapshotter;
use crate::tracker::{SequenceCheck, SequenceTracker};

/// Tunables for the consume loops. The group name is the cluster identity:
/// every process instance sharing it splits the command streams between
/// themselves; the consumer name must be unique per instance.
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub group: String,
    pub consumer_name: String,
    /// Upper bound on one blocking read. Short so the loop notices
    /// cancellation and re-runs reclaim; not correctness-relevant.
    pub block_timeout: Duration,
    /// Pending entries idle at least this long are claimed from their
    /// (presumed dead) owner.
    pub claim_min_idle: Duration,
    pub dedup_ttl: Duration,
    pub dedup_sweep_interval: Duration,
    /// Approximate cap on each session's outbound state stream.
    pub update_maxlen: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: "helm_cluster".to_string(),
            consumer_name: format!("consumer_{:08x}", rand::random::<u32>()),
            block_timeout: Duration::from_secs(1),
            claim_min_idle: Duration::from_secs(60),
            dedup_ttl: Duration::from_secs(300),
            dedup_sweep_interval: Duration::from_secs(60),
            update_maxlen: 10_000,
        }
    }
}

/// What the loop must do with a message after the processing step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Side effects are committed: acknowledge and advance the tracker.
    Acknowledge { sequence_number: u64 },
    /// Confirmed duplicate: acknowledge without executing. The tracker
    /// advance is a no-op for below-expected replays and a real advance for
    /// dedup hits at the expected sequence.
    DropAsDuplicate { sequence_number: u64 },
    /// Leave unacknowledged; redelivery happens via reclaim.
    Retry,
}

struct ActiveLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ConsumerInner {
    log: Arc<dyn CommandLog>,
    sessions: Arc<dyn SessionStore>,
    executor: Arc<dyn ActionExecutor>,
    snapshotter: Arc<dyn StateSnapshotter>,
    diff_engine: StateDiffEngine,
    publisher: StatePublisher,
    tracker: SequenceTracker,
    dedup: DedupCache,
    config: ConsumerConfig,
    event_tx: broadcast::Sender<ConsumerEvent>,
    active: DashMap<SessionId, ActiveLoop>,
}

/// Orchestrates one consume loop per session over a shared transport.
pub struct CommandConsumer {
    inner: Arc<ConsumerInner>,
}

impl CommandConsumer {
    pub fn new(
        log: Arc<dyn CommandLog>,
        sessions: Arc<dyn SessionStore>,
        executor: Arc<dyn ActionExecutor>,
        snapshotter: Arc<dyn StateSnapshotter>,
        config: ConsumerConfig,
    ) -> Self {
        Self::with_diff_engine(
            log,
            sessions,
            executor,
            snapshotter,
            StateDiffEngine::with_default_classifiers(),
            config,
        )
    }

    /// Like [`Self::new`] but with a caller-built diff engine (custom
    /// semantic-event classifiers).
    pub fn with_diff_engine(
        log: Arc<dyn CommandLog>,
        sessions: Arc<dyn SessionStore>,
        executor: Arc<dyn ActionExecutor>,
        snapshotter: Arc<dyn StateSnapshotter>,
        diff_engine: StateDiffEngine,
        config: ConsumerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        let publisher = StatePublisher::new(Arc::clone(&log), config.update_maxlen);
        let dedup = DedupCache::new(config.dedup_ttl, config.dedup_sweep_interval);
        Self {
            inner: Arc::new(ConsumerInner {
                log,
                sessions,
                executor,
                snapshotter,
                diff_engine,
                publisher,
                tracker: SequenceTracker::new(),
                dedup,
                config,
                event_tx,
                active: DashMap::new(),
            }),
        }
    }

    /// Subscribe to consumer lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Start the consume loop for `session_id`. No-op when already
    /// consuming; errors when the session store does not know the session.
    pub async fn start_consuming(&self, session_id: &SessionId) -> Result<(), EngineError> {
        if self.inner.active.contains_key(session_id) {
            return Ok(());
        }
        let session = self
            .inner
            .sessions
            .lookup(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;

        self.inner
            .log
            .ensure_group(&command_stream_key(session_id), &self.inner.config.group)
            .await?;

        let cancel = CancellationToken::new();
        match self.inner.active.entry(session_id.clone()) {
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(vacant) => {
                let inner = Arc::clone(&self.inner);
                let loop_cancel = cancel.clone();
                let handle = tokio::spawn(async move {
                    inner.consume_loop(session, loop_cancel).await;
                });
                vacant.insert(ActiveLoop { cancel, handle });
            }
        }

        self.inner.emit(ConsumerEvent::ConsumerStarted {
            session_id: session_id.clone(),
        });
        Ok(())
    }

    /// Cancel and drain the session's loop. In-flight processing finishes
    /// before this returns. Returns false when no loop was active.
    pub async fn stop_consuming(&self, session_id: &SessionId) -> bool {
        let Some((_, active)) = self.inner.active.remove(session_id) else {
            return false;
        };
        active.cancel.cancel();
        if let Err(e) = active.handle.await {
            warn!(session_id = %session_id, error = %e, "consume loop join failed");
        }
        true
    }

    /// Stop every active loop; returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let session_ids: Vec<SessionId> =
            self.inner.active.iter().map(|entry| entry.key().clone()).collect();
        let mut stopped = 0;
        for session_id in session_ids {
            if self.stop_consuming(&session_id).await {
                stopped += 1;
            }
        }
        stopped
    }

    pub fn is_consuming(&self, session_id: &SessionId) -> bool {
        self.inner.active.contains_key(session_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    /// Last processed sequence for a session, 0 if none.
    pub fn last_processed(&self, session_id: &SessionId) -> u64 {
        self.inner.tracker.get_last(session_id)
    }
}

impl ConsumerInner {
    fn emit(&self, event: ConsumerEvent) {
        // No receivers is fine; events are observability, not protocol.
        let _ = self.event_tx.send(event);
    }

    async fn consume_loop(self: Arc<Self>, session: SessionHandle, cancel: CancellationToken) {
        let session_id = session.session_id.clone();
        let stream = command_stream_key(&session_id);
        info!(session_id = %session_id, consumer = %self.config.consumer_name, "consume loop started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Reclaim before reading: a crashed peer's unacknowledged work
            // (or our own gap-deferred messages) gets retried here.
            match self
                .log
                .claim_idle(&stream, &self.config.group, &self.config.consumer_name, self.config.claim_min_idle)
                .await
            {
                Ok(reclaimed) if !reclaimed.is_empty() => {
                    self.emit(ConsumerEvent::MessagesReclaimed {
                        session_id: session_id.clone(),
                        count: reclaimed.len(),
                    });
                    for message in reclaimed {
                        if cancel.is_cancelled() {
                            break;
                        }
                        self.handle_message(&session, message).await;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "transport failure during reclaim, stopping loop");
                    break;
                }
            }

            let messages = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.log.read_group(
                    &stream,
                    &self.config.group,
                    &self.config.consumer_name,
                    1,
                    self.config.block_timeout,
                ) => match result {
                    Ok(messages) => messages,
                    Err(e) => {
                        error!(session_id = %session_id, error = %e, "transport failure during read, stopping loop");
                        break;
                    }
                },
            };

            for message in messages {
                self.handle_message(&session, message).await;
            }
        }

        self.active.remove(&session_id);
        self.emit(ConsumerEvent::ConsumerStopped {
            session_id: session_id.clone(),
        });
        info!(session_id = %session_id, "consume loop stopped");
    }

    async fn handle_message(&self, session: &SessionHandle, message: StreamMessage) {
        let stream = command_stream_key(&session.session_id);

        let envelope = match CommandEnvelope::from_fields(&message.fields) {
            Ok(envelope) if envelope.session_id == session.session_id => envelope,
            Ok(envelope) => {
                error!(
                    session_id = %session.session_id,
                    message_id = %message.id,
                    envelope_session = %envelope.session_id,
                    "command addressed to a different session, discarding"
                );
                self.ack(&stream, &message).await;
                return;
            }
            Err(e) => {
                // Poison: redelivery could never succeed.
                error!(
                    session_id = %session.session_id,
                    message_id = %message.id,
                    error = %e,
                    "discarding unparseable command"
                );
                self.ack(&stream, &message).await;
                return;
            }
        };

        match self.process(session, &envelope).await {
            ProcessOutcome::Acknowledge { sequence_number } => {
                self.ack(&stream, &message).await;
                self.tracker.advance(&session.session_id, sequence_number);
            }
            ProcessOutcome::DropAsDuplicate { sequence_number } => {
                self.ack(&stream, &message).await;
                self.tracker.advance(&session.session_id, sequence_number);
                self.emit(ConsumerEvent::DuplicateDropped {
                    session_id: session.session_id.clone(),
                    command_id: envelope.command_id.clone(),
                    sequence_number,
                });
            }
            ProcessOutcome::Retry => {
                // Left unacknowledged; reclaim redelivers it.
            }
        }
    }

    /// The processing step: everything between parse and ack/advance.
    async fn process(&self, session: &SessionHandle, envelope: &CommandEnvelope) -> ProcessOutcome {
        let session_id = &session.session_id;
        let seq = envelope.sequence_number;

        match self.tracker.validate(session_id, seq) {
            SequenceCheck::Duplicate { last } => {
                debug!(
                    session_id = %session_id,
                    sequence = seq,
                    last,
                    "sequence at or below last processed, dropping duplicate"
                );
                self.republish_stored(envelope).await;
                return ProcessOutcome::DropAsDuplicate { sequence_number: seq };
            }
            SequenceCheck::Gap { expected } => {
                warn!(
                    session_id = %session_id,
                    sequence = seq,
                    expected,
                    "sequence gap, leaving message for reclaim"
                );
                self.emit(ConsumerEvent::SequenceGap {
                    session_id: session_id.clone(),
                    expected,
                    received: seq,
                });
                return ProcessOutcome::Retry;
            }
            SequenceCheck::InOrder => {}
        }

        if self.dedup.is_processed(&envelope.command_id) {
            debug!(
                session_id = %session_id,
                command_id = %envelope.command_id,
                "command already applied, dropping duplicate"
            );
            self.republish_stored(envelope).await;
            return ProcessOutcome::DropAsDuplicate { sequence_number: seq };
        }
        self.dedup.mark_processing(&envelope.command_id);

        let pre = match self.snapshotter.capture(session).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "pre-execution snapshot failed, will retry");
                return ProcessOutcome::Retry;
            }
        };

        let started = std::time::Instant::now();
        let result = self.executor.execute(session_id, &envelope.action).await;
        let execute_ms = started.elapsed().as_millis() as u64;
        if !result.success {
            // A failed action is a valid outcome, not a protocol error; it
            // still gets published, acknowledged and advanced.
            debug!(
                session_id = %session_id,
                command_id = %envelope.command_id,
                error = result.error.as_deref().unwrap_or(""),
                "action reported failure"
            );
        }

        let post = match self.snapshotter.capture(session).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "post-execution snapshot failed, will retry");
                return ProcessOutcome::Retry;
            }
        };

        let diff = self.diff_engine.diff(&pre, &post);
        let update = StateUpdateEnvelope {
            update_id: UpdateId::new(),
            session_id: session_id.clone(),
            command_id: envelope.command_id.clone(),
            sequence_number: seq,
            action_result: result.clone(),
            state_diff: Some(diff),
            current_state_summary: Some(post.summary()),
            published_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.publisher.publish(&update).await {
            warn!(session_id = %session_id, error = %e, "state update publish failed, continuing");
        }

        self.dedup.mark_processed(&envelope.command_id, Some(result.clone()));
        self.emit(ConsumerEvent::CommandProcessed {
            session_id: session_id.clone(),
            command_id: envelope.command_id.clone(),
            sequence_number: seq,
            success: result.success,
        });
        debug!(session_id = %session_id, sequence = seq, execute_ms, "command processed");

        ProcessOutcome::Acknowledge { sequence_number: seq }
    }

    /// Republish the stored result for a confirmed duplicate, when the
    /// dedup cache still holds one. Best-effort, like all publication.
    async fn republish_stored(&self, envelope: &CommandEnvelope) {
        let Some(result) = self.dedup.stored_result(&envelope.command_id) else {
            return;
        };
        let update = StateUpdateEnvelope {
            update_id: UpdateId::new(),
            session_id: envelope.session_id.clone(),
            command_id: envelope.command_id.clone(),
            sequence_number: envelope.sequence_number,
            action_result: result,
            state_diff: None,
            current_state_summary: None,
            published_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.publisher.publish(&update).await {
            warn!(
                session_id = %envelope.session_id,
                error = %e,
                "duplicate republish failed, continuing"
            );
        }
    }

    async fn ack(&self, stream: &str, message: &StreamMessage) {
        if let Err(e) = self.log.ack(stream, &self.config.group, &message.id).await {
            warn!(message_id = %message.id, error = %e, "failed to acknowledge message");
        }
    }
}
