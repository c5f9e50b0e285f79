//! In-process implementation of [`CommandLog`].
//!
//! Backs single-process deployments and every test in the workspace. One
//! shard per stream: a mutex-guarded entry list plus group bookkeeping,
//! with a `Notify` to wake blocked readers on append.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::StreamError;
use crate::log::{CommandLog, MessageId, PendingInfo, StreamMessage};

#[derive(Default)]
pub struct MemoryLog {
    streams: DashMap<String, Arc<Shard>>,
}

struct Shard {
    state: Mutex<ShardState>,
    notify: Notify,
}

#[derive(Default)]
struct ShardState {
    entries: VecDeque<Entry>,
    /// Monotonic per-stream position; survives trimming (offsets are never
    /// reused, so group cursors stay valid after old entries are dropped).
    next_offset: u64,
    last_id_ms: i64,
    last_id_seq: u64,
    groups: HashMap<String, GroupState>,
}

struct Entry {
    offset: u64,
    id: MessageId,
    fields: Vec<(String, String)>,
}

#[derive(Default)]
struct GroupState {
    /// Offset of the last entry handed to any member of this group.
    last_delivered: u64,
    pending: HashMap<MessageId, PendingEntry>,
}

struct PendingEntry {
    offset: u64,
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, stream: &str) -> Arc<Shard> {
        self.streams
            .entry(stream.to_string())
            .or_insert_with(|| {
                Arc::new(Shard {
                    state: Mutex::new(ShardState::default()),
                    notify: Notify::new(),
                })
            })
            .clone()
    }
}

impl ShardState {
    fn mint_id(&mut self) -> MessageId {
        let ms = chrono::Utc::now().timestamp_millis();
        if ms == self.last_id_ms {
            self.last_id_seq += 1;
        } else {
            self.last_id_ms = ms;
            self.last_id_seq = 0;
        }
        MessageId::from(format!("{}-{}", self.last_id_ms, self.last_id_seq))
    }

    fn entry_by_offset(&self, offset: u64) -> Option<&Entry> {
        // Entries are offset-ordered; binary search keeps claim cheap.
        let idx = self
            .entries
            .binary_search_by_key(&offset, |e| e.offset)
            .ok()?;
        self.entries.get(idx)
    }

    fn group_mut(
        &mut self,
        stream: &str,
        group: &str,
    ) -> Result<&mut GroupState, StreamError> {
        self.groups
            .get_mut(group)
            .ok_or_else(|| StreamError::NoSuchGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })
    }

    /// Deliver up to `count` not-yet-delivered entries to `consumer`.
    fn deliver_new(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        // Collect first: delivering mutates the group while reading entries.
        let cursor = self.group_mut(stream, group)?.last_delivered;
        let batch: Vec<(u64, MessageId, Vec<(String, String)>)> = self
            .entries
            .iter()
            .filter(|e| e.offset > cursor)
            .take(count)
            .map(|e| (e.offset, e.id.clone(), e.fields.clone()))
            .collect();

        let now = Instant::now();
        let state = self.groups.get_mut(group).expect("group checked above");
        let mut messages = Vec::with_capacity(batch.len());
        for (offset, id, fields) in batch {
            state.last_delivered = offset;
            state.pending.insert(
                id.clone(),
                PendingEntry {
                    offset,
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            messages.push(StreamMessage { id, fields });
        }
        Ok(messages)
    }
}

#[async_trait::async_trait]
impl CommandLog for MemoryLog {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StreamError> {
        let shard = self.shard(stream);
        let mut state = shard.state.lock();
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn append(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
        maxlen: Option<u64>,
    ) -> Result<MessageId, StreamError> {
        let shard = self.shard(stream);
        let id = {
            let mut state = shard.state.lock();
            let id = state.mint_id();
            state.next_offset += 1;
            let offset = state.next_offset;
            state.entries.push_back(Entry {
                offset,
                id: id.clone(),
                fields,
            });
            if let Some(maxlen) = maxlen {
                while state.entries.len() as u64 > maxlen {
                    state.entries.pop_front();
                }
            }
            id
        };
        shard.notify.notify_waiters();
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        let shard = self.shard(stream);
        let deadline = tokio::time::Instant::now() + block;
        loop {
            // Arm the wakeup before checking state so an append between the
            // check and the await is not missed.
            let notified = shard.notify.notified();
            {
                let mut state = shard.state.lock();
                let messages = state.deliver_new(stream, group, consumer, count)?;
                if !messages.is_empty() {
                    return Ok(messages);
                }
            }
            if block.is_zero() || tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        let shard = self.shard(stream);
        let mut state = shard.state.lock();
        let now = Instant::now();

        let group_state = state.group_mut(stream, group)?;
        let mut idle_ids: Vec<(u64, MessageId)> = group_state
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.delivered_at) >= min_idle)
            .map(|(id, p)| (p.offset, id.clone()))
            .collect();
        idle_ids.sort();

        let mut claimed = Vec::new();
        for (offset, id) in idle_ids {
            let found = state.entry_by_offset(offset).map(|entry| StreamMessage {
                id: entry.id.clone(),
                fields: entry.fields.clone(),
            });
            let group_state = state.groups.get_mut(group).expect("group checked above");
            match found {
                Some(message) => {
                    let pending = group_state.pending.get_mut(&id).expect("id from pending set");
                    pending.consumer = consumer.to_string();
                    pending.delivered_at = now;
                    pending.delivery_count += 1;
                    claimed.push(message);
                }
                None => {
                    // Trimmed out from under the PEL; nothing left to retry.
                    group_state.pending.remove(&id);
                }
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, id: &MessageId) -> Result<(), StreamError> {
        let shard = self.shard(stream);
        let mut state = shard.state.lock();
        state.group_mut(stream, group)?.pending.remove(id);
        Ok(())
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingInfo>, StreamError> {
        let shard = self.shard(stream);
        let mut state = shard.state.lock();
        let now = Instant::now();
        let group_state = state.group_mut(stream, group)?;
        let mut infos: Vec<(u64, PendingInfo)> = group_state
            .pending
            .iter()
            .map(|(id, p)| {
                (
                    p.offset,
                    PendingInfo {
                        id: id.clone(),
                        consumer: p.consumer.clone(),
                        delivery_count: p.delivery_count,
                        idle: now.duration_since(p.delivered_at),
                    },
                )
            })
            .collect();
        infos.sort_by_key(|(offset, _)| *offset);
        Ok(infos.into_iter().map(|(_, info)| info).collect())
    }

    async fn len(&self, stream: &str) -> Result<usize, StreamError> {
        let shard = self.shard(stream);
        let state = shard.state.lock();
        Ok(state.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    const NO_BLOCK: Duration = Duration::ZERO;

    #[tokio::test]
    async fn append_and_read_group() {
        let log = MemoryLog::new();
        log.ensure_group("s", "g").await.unwrap();
        log.append("s", fields(&[("k", "v")]), None).await.unwrap();

        let messages = log.read_group("s", "g", "c1", 10, NO_BLOCK).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].fields, fields(&[("k", "v")]));

        // Already delivered; nothing new.
        let again = log.read_group("s", "g", "c1", 10, NO_BLOCK).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn read_requires_group() {
        let log = MemoryLog::new();
        let err = log.read_group("s", "missing", "c1", 1, NO_BLOCK).await.unwrap_err();
        assert!(matches!(err, StreamError::NoSuchGroup { .. }));
    }

    #[tokio::test]
    async fn ensure_group_is_idempotent() {
        let log = MemoryLog::new();
        log.ensure_group("s", "g").await.unwrap();
        log.append("s", fields(&[("n", "1")]), None).await.unwrap();
        // Re-creating must not reset the delivery cursor or drop the PEL.
        let delivered = log.read_group("s", "g", "c1", 10, NO_BLOCK).await.unwrap();
        assert_eq!(delivered.len(), 1);
        log.ensure_group("s", "g").await.unwrap();
        assert!(log.read_group("s", "g", "c1", 10, NO_BLOCK).await.unwrap().is_empty());
        assert_eq!(log.pending("s", "g").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn each_entry_delivered_to_one_consumer() {
        let log = MemoryLog::new();
        log.ensure_group("s", "g").await.unwrap();
        log.append("s", fields(&[("n", "1")]), None).await.unwrap();
        log.append("s", fields(&[("n", "2")]), None).await.unwrap();

        let a = log.read_group("s", "g", "alpha", 1, NO_BLOCK).await.unwrap();
        let b = log.read_group("s", "g", "beta", 1, NO_BLOCK).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_ne!(a[0].id, b[0].id);
    }

    #[tokio::test]
    async fn ack_clears_pending() {
        let log = MemoryLog::new();
        log.ensure_group("s", "g").await.unwrap();
        log.append("s", fields(&[("n", "1")]), None).await.unwrap();

        let messages = log.read_group("s", "g", "c1", 1, NO_BLOCK).await.unwrap();
        assert_eq!(log.pending("s", "g").await.unwrap().len(), 1);

        log.ack("s", "g", &messages[0].id).await.unwrap();
        assert!(log.pending("s", "g").await.unwrap().is_empty());

        // Double-ack is a no-op.
        log.ack("s", "g", &messages[0].id).await.unwrap();
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_append() {
        let log = Arc::new(MemoryLog::new());
        log.ensure_group("s", "g").await.unwrap();

        let writer = Arc::clone(&log);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.append("s", fields(&[("n", "1")]), None).await.unwrap();
        });

        let messages = log
            .read_group("s", "g", "c1", 1, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn blocking_read_times_out_empty() {
        let log = MemoryLog::new();
        log.ensure_group("s", "g").await.unwrap();
        let start = std::time::Instant::now();
        let messages = log
            .read_group("s", "g", "c1", 1, Duration::from_millis(40))
            .await
            .unwrap();
        assert!(messages.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn claim_idle_takes_over_stalled_entries() {
        let log = MemoryLog::new();
        log.ensure_group("s", "g").await.unwrap();
        log.append("s", fields(&[("n", "1")]), None).await.unwrap();

        // "alpha" reads but never acks (crashed mid-processing).
        let delivered = log.read_group("s", "g", "alpha", 1, NO_BLOCK).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let claimed = log
            .claim_idle("s", "g", "beta", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, delivered[0].id);

        let pending = log.pending("s", "g").await.unwrap();
        assert_eq!(pending[0].consumer, "beta");
        assert_eq!(pending[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn claim_idle_respects_min_idle() {
        let log = MemoryLog::new();
        log.ensure_group("s", "g").await.unwrap();
        log.append("s", fields(&[("n", "1")]), None).await.unwrap();
        log.read_group("s", "g", "alpha", 1, NO_BLOCK).await.unwrap();

        let claimed = log
            .claim_idle("s", "g", "beta", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn maxlen_trims_oldest() {
        let log = MemoryLog::new();
        for i in 0..5 {
            log.append("s", fields(&[("n", &i.to_string())]), Some(3)).await.unwrap();
        }
        assert_eq!(log.len("s").await.unwrap(), 3);

        // A group created before the trim only sees retained entries.
        log.ensure_group("s", "g").await.unwrap();
        let messages = log.read_group("s", "g", "c1", 10, NO_BLOCK).await.unwrap();
        let values: Vec<&str> = messages
            .iter()
            .map(|m| m.fields[0].1.as_str())
            .collect();
        assert_eq!(values, vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn claim_drops_entries_trimmed_from_under_the_pel() {
        let log = MemoryLog::new();
        log.ensure_group("s", "g").await.unwrap();
        log.append("s", fields(&[("n", "0")]), None).await.unwrap();
        log.read_group("s", "g", "alpha", 1, NO_BLOCK).await.unwrap();

        // Trim the pending entry away.
        for i in 1..=4 {
            log.append("s", fields(&[("n", &i.to_string())]), Some(2)).await.unwrap();
        }

        let claimed = log.claim_idle("s", "g", "beta", Duration::ZERO).await.unwrap();
        assert!(claimed.is_empty());
        assert!(log.pending("s", "g").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn message_ids_are_unique_and_ordered_by_arrival() {
        let log = MemoryLog::new();
        log.ensure_group("s", "g").await.unwrap();
        let a = log.append("s", fields(&[("n", "1")]), None).await.unwrap();
        let b = log.append("s", fields(&[("n", "2")]), None).await.unwrap();
        assert_ne!(a, b);

        let messages = log.read_group("s", "g", "c1", 10, NO_BLOCK).await.unwrap();
        assert_eq!(messages[0].id, a);
        assert_eq!(messages[1].id, b);
    }
}
