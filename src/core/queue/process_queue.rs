// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process Queues
//!
//! Bounded, keyed queues between the input runtime and the processor
//! workers. Validity-to-push combines the queue's own capacity with the
//! downstream sender queues' readiness, so saturation propagates backwards
//! and the input stops reading instead of the pipeline dropping data.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::queue_key::QueueKey;
use super::sender_queue::SenderQueueManager;
use super::signal::QueueSignal;
use super::PushError;
use crate::core::event::PipelineEventGroup;
use crate::core::pipeline::pipeline::Pipeline;

pub const DEFAULT_PROCESS_QUEUE_CAPACITY: usize = 20;

pub struct ProcessQueueItem {
    pub group: PipelineEventGroup,
    /// Kept so a config swap never substitutes a processor chain while the
    /// item is in flight.
    pub pipeline: Option<Arc<Pipeline>>,
    pub input_index: usize,
}

impl ProcessQueueItem {
    pub fn new(group: PipelineEventGroup, input_index: usize) -> Self {
        Self {
            group,
            pipeline: None,
            input_index,
        }
    }
}

impl std::fmt::Debug for ProcessQueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessQueueItem")
            .field("events", &self.group.events().len())
            .field("has_pipeline", &self.pipeline.is_some())
            .field("input_index", &self.input_index)
            .finish()
    }
}

pub struct ProcessQueue {
    items: VecDeque<ProcessQueueItem>,
    capacity: usize,
    /// Sender queue keys downstream of this pipeline.
    downstream: Vec<QueueKey>,
}

impl ProcessQueue {
    fn new(capacity: usize, downstream: Vec<QueueKey>) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
            downstream,
        }
    }
}

pub struct ProcessQueueManager {
    queues: Mutex<BTreeMap<QueueKey, ProcessQueue>>,
    signal: QueueSignal,
    sender_queues: Arc<SenderQueueManager>,
    default_capacity: usize,
}

impl ProcessQueueManager {
    pub fn new(sender_queues: Arc<SenderQueueManager>, default_capacity: usize) -> Self {
        Self {
            queues: Mutex::new(BTreeMap::new()),
            signal: QueueSignal::new(),
            sender_queues,
            default_capacity,
        }
    }

    pub fn create_queue(&self, key: QueueKey, downstream: Vec<QueueKey>) {
        let mut queues = self.queues.lock().expect("process queues lock");
        queues
            .entry(key)
            .or_insert_with(|| ProcessQueue::new(self.default_capacity, downstream));
    }

    pub fn delete_queue(&self, key: &QueueKey) -> Vec<ProcessQueueItem> {
        let mut queues = self.queues.lock().expect("process queues lock");
        queues
            .remove(key)
            .map(|q| q.items.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn has_queue(&self, key: &QueueKey) -> bool {
        self.queues.lock().expect("process queues lock").contains_key(key)
    }

    /// Non-blocking push. Capacity only; backpressure from downstream is
    /// surfaced through `valid_to_push`, which inputs consult before
    /// reading more data. Failure hands the item back for a bounded retry.
    pub fn push(
        &self,
        key: &QueueKey,
        item: ProcessQueueItem,
    ) -> Result<(), (PushError, ProcessQueueItem)> {
        let mut queues = self.queues.lock().expect("process queues lock");
        let Some(queue) = queues.get_mut(key) else {
            return Err((PushError::NoSuchKey, item));
        };
        if queue.items.len() >= queue.capacity {
            return Err((PushError::QueueFull, item));
        }
        queue.items.push_back(item);
        drop(queues);
        self.signal.signal();
        Ok(())
    }

    pub fn pop(&self, key: &QueueKey) -> Option<ProcessQueueItem> {
        let mut queues = self.queues.lock().expect("process queues lock");
        queues.get_mut(key).and_then(|q| q.items.pop_front())
    }

    /// Pops at most one item per key, round-robin-ish over the key space.
    pub fn pop_all(&self, out: &mut Vec<ProcessQueueItem>) {
        let mut queues = self.queues.lock().expect("process queues lock");
        for queue in queues.values_mut() {
            if let Some(item) = queue.items.pop_front() {
                out.push(item);
            }
        }
    }

    pub fn keys(&self) -> Vec<QueueKey> {
        let queues = self.queues.lock().expect("process queues lock");
        queues.keys().cloned().collect()
    }

    /// Binds `pipeline` to every queued item that has none yet, so a
    /// config swap never substitutes a processor chain mid-flight.
    pub fn attach_pipeline(&self, key: &QueueKey, pipeline: &Arc<Pipeline>) {
        let mut queues = self.queues.lock().expect("process queues lock");
        if let Some(queue) = queues.get_mut(key) {
            for item in queue.items.iter_mut() {
                if item.pipeline.is_none() {
                    item.pipeline = Some(Arc::clone(pipeline));
                }
            }
        }
    }

    /// The feedback edge: capacity available here and on every downstream
    /// sender queue.
    pub fn valid_to_push(&self, key: &QueueKey) -> bool {
        let queues = self.queues.lock().expect("process queues lock");
        let Some(queue) = queues.get(key) else {
            return false;
        };
        if queue.items.len() >= queue.capacity {
            return false;
        }
        queue
            .downstream
            .iter()
            .all(|sk| self.sender_queues.valid_to_push(sk))
    }

    pub fn queue_len(&self, key: &QueueKey) -> usize {
        let queues = self.queues.lock().expect("process queues lock");
        queues.get(key).map(|q| q.items.len()).unwrap_or(0)
    }

    pub fn all_empty(&self) -> bool {
        let queues = self.queues.lock().expect("process queues lock");
        queues.values().all(|q| q.items.is_empty())
    }

    pub fn signal(&self) {
        self.signal.signal();
    }

    pub fn wait(&self, timeout: Duration) -> bool {
        self.signal.wait(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::SourceBuffer;
    use crate::core::flusher::compress::{CompressType, RawDataType};
    use crate::core::queue::sender_queue::SenderQueueItem;

    fn group() -> PipelineEventGroup {
        PipelineEventGroup::new(SourceBuffer::new())
    }

    fn sender_item(key: &QueueKey) -> SenderQueueItem {
        SenderQueueItem {
            queue_key: key.clone(),
            data: Vec::new(),
            raw_size: 0,
            data_type: RawDataType::EventGroup,
            compress_type: CompressType::None,
            project: String::new(),
            logstore: String::new(),
            region: String::new(),
            shard_hash_key: String::new(),
            enqueue_time: 0,
            last_send_time: 0,
            retry_times: 0,
            exactly_once_checkpoint: None,
        }
    }

    #[test]
    fn test_push_pop_fifo() {
        let sender = Arc::new(SenderQueueManager::new(4));
        let mgr = ProcessQueueManager::new(sender, 4);
        let key = QueueKey::new("p1");
        mgr.create_queue(key.clone(), vec![]);

        for i in 0..3 {
            let mut g = group();
            g.set_tag_copy("idx", i.to_string());
            mgr.push(&key, ProcessQueueItem::new(g, 0)).expect("push");
        }
        let first = mgr.pop(&key).expect("item");
        assert_eq!(first.group.get_tag(b"idx").map(|v| v.as_str()), Some("0"));
    }

    #[test]
    fn test_capacity_bound() {
        let sender = Arc::new(SenderQueueManager::new(4));
        let mgr = ProcessQueueManager::new(sender, 1);
        let key = QueueKey::new("p1");
        mgr.create_queue(key.clone(), vec![]);

        assert!(mgr.push(&key, ProcessQueueItem::new(group(), 0)).is_ok());
        let err = mgr
            .push(&key, ProcessQueueItem::new(group(), 0))
            .expect_err("over capacity");
        assert_eq!(err.0, PushError::QueueFull);
    }

    #[test]
    fn test_backpressure_from_sender_queue() {
        let sender = Arc::new(SenderQueueManager::new(1));
        let sender_key = QueueKey::new("p#store");
        sender.create_queue(sender_key.clone(), "r1");

        let mgr = ProcessQueueManager::new(Arc::clone(&sender), 4);
        let key = QueueKey::new("p1");
        mgr.create_queue(key.clone(), vec![sender_key.clone()]);
        assert!(mgr.valid_to_push(&key));

        // Saturate the downstream sender queue; the process queue stops
        // being valid to push even though it has capacity itself.
        sender
            .push(&sender_key, sender_item(&sender_key))
            .expect("push sender item");
        assert!(!mgr.valid_to_push(&key));
    }
}
