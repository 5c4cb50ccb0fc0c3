// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batched Events
//!
//! Immutable aggregation of one or more groups' events, ready to flush.
//! Merging moves events and arena handles only; no bytes are copied, and a
//! batch may therefore reference several arenas.

use std::sync::Arc;

use crate::core::event::{PipelineEvent, PipelineEventGroup, SizedMap, SourceBuffer};
use crate::core::sender::checkpoint::RangeCheckpoint;

#[derive(Debug, Default)]
pub struct BatchedEvents {
    pub events: Vec<PipelineEvent>,
    pub tags: SizedMap,
    pub source_buffers: Vec<SourceBuffer>,
    /// Cached on mutation so completion checks never rescan events.
    pub size_bytes: usize,
    pub pack_id_prefix: String,
    pub shard_hash_key: String,
    pub exactly_once_checkpoint: Option<Arc<RangeCheckpoint>>,
}

impl BatchedEvents {
    pub fn from_group(mut group: PipelineEventGroup, pack_id_prefix: String) -> Self {
        let exactly_once_checkpoint = group.take_exactly_once_checkpoint();
        let events = group.take_events();
        let source_buffer = group.take_source_buffer();
        let tags = std::mem::take(group.tags_mut());
        let size_bytes =
            tags.data_size() + events.iter().map(PipelineEvent::data_size).sum::<usize>();
        let shard_hash_key = exactly_once_checkpoint
            .as_ref()
            .map(|cpt| cpt.hash_key().to_string())
            .unwrap_or_default();
        Self {
            events,
            tags,
            source_buffers: vec![source_buffer],
            size_bytes,
            pack_id_prefix,
            shard_hash_key,
            exactly_once_checkpoint,
        }
    }

    /// Moves another group's events and arena into this batch. Tags of the
    /// first group win; aggregation only merges groups batched under the
    /// same key, so tags agree by construction.
    pub fn merge(&mut self, mut group: PipelineEventGroup) {
        let mut events = group.take_events();
        self.size_bytes += events.iter().map(PipelineEvent::data_size).sum::<usize>();
        if self.events.is_empty() {
            let tags = std::mem::take(group.tags_mut());
            self.size_bytes += tags.data_size();
            self.tags = tags;
        }
        self.events.append(&mut events);
        self.source_buffers.push(group.take_source_buffer());
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::StringView;

    fn group_with_metrics(n: usize) -> PipelineEventGroup {
        let mut group = PipelineEventGroup::new(SourceBuffer::new());
        for i in 0..n {
            let name = group.copy_string(format!("metric_{i}"));
            group.add_metric_event().set_name(name);
        }
        group
    }

    #[test]
    fn test_from_group_takes_ownership() {
        let mut group = group_with_metrics(2);
        group.set_tag_copy("job", "test");
        let batch = BatchedEvents::from_group(group, "prefix".to_string());

        assert_eq!(batch.event_count(), 2);
        assert_eq!(batch.source_buffers.len(), 1);
        assert!(batch.size_bytes > 0);
        assert_eq!(batch.tags.get(b"job").map(|v| v.as_str()), Some("test"));
    }

    #[test]
    fn test_merge_appends_arena_and_events() {
        let batch_group = group_with_metrics(1);
        let mut batch = BatchedEvents::from_group(batch_group, String::new());
        let before = batch.size_bytes;

        batch.merge(group_with_metrics(3));
        assert_eq!(batch.event_count(), 4);
        assert_eq!(batch.source_buffers.len(), 2);
        assert!(batch.size_bytes > before);

        // Every view in the batch resolves to one of its arenas.
        for event in &batch.events {
            let m = event.as_metric().expect("metric");
            assert!(batch.source_buffers.iter().any(|b| b.contains(m.name())));
        }
    }

    #[test]
    fn test_merge_into_empty_adopts_tags() {
        let mut batch = BatchedEvents::default();
        let mut group = group_with_metrics(1);
        group.set_tag(StringView::from_static("k"), StringView::from_static("v"));
        batch.merge(group);
        assert_eq!(batch.tags.get(b"k").map(|v| v.as_str()), Some("v"));
    }
}
