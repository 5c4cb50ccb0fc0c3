// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batching Engine
//!
//! Aggregates many small groups into `BatchedEvents` sized for one network
//! call. One open batch is kept per `(logstore, shard_hash_key)`; a batch
//! closes when it crosses the byte, count or age threshold, or when a flush
//! is forced during shutdown and config rotation.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use super::batched_events::BatchedEvents;
use crate::core::event::PipelineEventGroup;

pub const DEFAULT_MAX_BATCH_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_MAX_BATCH_EVENTS: usize = 4000;
pub const DEFAULT_MAX_BATCH_AGE_SECS: i64 = 3;

#[derive(Clone, Debug)]
pub struct BatcherConfig {
    pub max_batch_bytes: usize,
    pub max_batch_events: usize,
    pub max_batch_age_secs: i64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            max_batch_events: DEFAULT_MAX_BATCH_EVENTS,
            max_batch_age_secs: DEFAULT_MAX_BATCH_AGE_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub logstore: String,
    pub shard_hash_key: String,
}

struct OpenBatch {
    batch: BatchedEvents,
    create_time: i64,
}

pub struct Batcher {
    config: BatcherConfig,
    batches: Mutex<HashMap<BatchKey, OpenBatch>>,
}

impl Batcher {
    pub fn new(config: BatcherConfig) -> Self {
        Self {
            config,
            batches: Mutex::new(HashMap::new()),
        }
    }

    /// Folds `group` into the open batch for `key`, closing batches into
    /// `out` as thresholds trip. Exactly-once groups become their own batch
    /// immediately and are never merged across input groups.
    pub fn add(
        &self,
        key: BatchKey,
        group: PipelineEventGroup,
        now: i64,
        out: &mut Vec<BatchedEvents>,
    ) {
        if group.exactly_once_checkpoint().is_some() {
            out.push(BatchedEvents::from_group(group, Self::new_pack_id_prefix()));
            return;
        }

        let mut batches = self.batches.lock().expect("batcher lock");
        let open = batches.entry(key.clone()).or_insert_with(|| OpenBatch {
            batch: BatchedEvents {
                pack_id_prefix: Self::new_pack_id_prefix(),
                shard_hash_key: key.shard_hash_key.clone(),
                ..Default::default()
            },
            create_time: now,
        });
        open.batch.merge(group);

        if open.batch.size_bytes >= self.config.max_batch_bytes
            || open.batch.event_count() >= self.config.max_batch_events
        {
            let closed = batches.remove(&key).map(|o| o.batch);
            if let Some(batch) = closed {
                out.push(batch);
            }
        }
    }

    /// Closes every batch older than the age threshold.
    pub fn flush_expired(&self, now: i64, out: &mut Vec<BatchedEvents>) {
        let mut batches = self.batches.lock().expect("batcher lock");
        let expired: Vec<BatchKey> = batches
            .iter()
            .filter(|(_, open)| now - open.create_time >= self.config.max_batch_age_secs)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(open) = batches.remove(&key) {
                if !open.batch.is_empty() {
                    out.push(open.batch);
                }
            }
        }
    }

    /// Closes every open batch regardless of policy.
    pub fn flush_all(&self, out: &mut Vec<BatchedEvents>) {
        let mut batches = self.batches.lock().expect("batcher lock");
        for (_, open) in batches.drain() {
            if !open.batch.is_empty() {
                out.push(open.batch);
            }
        }
    }

    pub fn open_batch_count(&self) -> usize {
        self.batches.lock().expect("batcher lock").len()
    }

    fn new_pack_id_prefix() -> String {
        Uuid::new_v4().simple().to_string().to_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{SourceBuffer, StringView};
    use crate::core::sender::checkpoint::RangeCheckpoint;
    use std::sync::Arc;

    fn key() -> BatchKey {
        BatchKey {
            logstore: "store".to_string(),
            shard_hash_key: String::new(),
        }
    }

    fn group_with_events(n: usize) -> PipelineEventGroup {
        let mut group = PipelineEventGroup::new(SourceBuffer::new());
        for _ in 0..n {
            group
                .add_metric_event()
                .set_name(StringView::from_static("metric_name"));
        }
        group
    }

    #[test]
    fn test_count_threshold_closes_batch() {
        let batcher = Batcher::new(BatcherConfig {
            max_batch_events: 4,
            ..Default::default()
        });
        let mut out = Vec::new();
        batcher.add(key(), group_with_events(2), 0, &mut out);
        assert!(out.is_empty());
        assert_eq!(batcher.open_batch_count(), 1);

        batcher.add(key(), group_with_events(2), 0, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event_count(), 4);
        assert_eq!(batcher.open_batch_count(), 0);
        // Closed because the count threshold tripped.
        assert!(out[0].event_count() >= 4);
    }

    #[test]
    fn test_size_threshold_closes_batch() {
        let batcher = Batcher::new(BatcherConfig {
            max_batch_bytes: 20,
            ..Default::default()
        });
        let mut out = Vec::new();
        batcher.add(key(), group_with_events(2), 0, &mut out);
        assert_eq!(out.len(), 1);
        assert!(out[0].size_bytes >= 20);
    }

    #[test]
    fn test_age_flush() {
        let batcher = Batcher::new(BatcherConfig {
            max_batch_age_secs: 3,
            ..Default::default()
        });
        let mut out = Vec::new();
        batcher.add(key(), group_with_events(1), 100, &mut out);
        batcher.flush_expired(102, &mut out);
        assert!(out.is_empty());
        batcher.flush_expired(103, &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_flush_all_ignores_policy() {
        let batcher = Batcher::new(BatcherConfig::default());
        let mut out = Vec::new();
        batcher.add(key(), group_with_events(1), 0, &mut out);
        assert!(out.is_empty());
        batcher.flush_all(&mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(batcher.open_batch_count(), 0);
    }

    #[test]
    fn test_exactly_once_groups_never_merge() {
        let batcher = Batcher::new(BatcherConfig::default());
        let mut out = Vec::new();
        batcher.add(key(), group_with_events(1), 0, &mut out);

        let mut group = group_with_events(1);
        group.set_exactly_once_checkpoint(Arc::new(RangeCheckpoint::new("H", 7)));
        batcher.add(key(), group, 0, &mut out);

        // The checkpointed group bypassed the open batch entirely.
        assert_eq!(out.len(), 1);
        assert!(out[0].exactly_once_checkpoint.is_some());
        assert_eq!(out[0].event_count(), 1);
        assert_eq!(batcher.open_batch_count(), 1);
    }

    #[test]
    fn test_distinct_keys_do_not_merge() {
        let batcher = Batcher::new(BatcherConfig::default());
        let mut out = Vec::new();
        batcher.add(key(), group_with_events(1), 0, &mut out);
        let other = BatchKey {
            logstore: "store".to_string(),
            shard_hash_key: "H2".to_string(),
        };
        batcher.add(other, group_with_events(1), 0, &mut out);
        assert_eq!(batcher.open_batch_count(), 2);
    }
}
