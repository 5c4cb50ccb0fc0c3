// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sender Queues
//!
//! Bounded, keyed queues between the batching engine and the send
//! scheduler. Each queue tracks three orthogonal states: valid-to-push
//! (capacity), valid-to-pop (retry backoff driven by send outcomes) and an
//! urgent override used during drain and shutdown.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::queue_key::QueueKey;
use super::signal::QueueSignal;
use super::PushError;
use crate::core::flusher::compress::{CompressType, RawDataType};
use crate::core::sender::checkpoint::RangeCheckpoint;

pub const DEFAULT_SENDER_QUEUE_CAPACITY: usize = 20;

const NETWORK_RETRY_BASE_SECS: i64 = 1;
const NETWORK_RETRY_MAX_SECS: i64 = 300;
const QUOTA_RETRY_BASE_SECS: i64 = 3;
const QUOTA_RETRY_MAX_SECS: i64 = 60;

/// Outcome reported back to a queue after a send attempt finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    NetworkFail,
    QuotaFail,
    DiscardFail,
    Buffered,
}

/// One serialized batch waiting to be sent.
#[derive(Clone, Debug)]
pub struct SenderQueueItem {
    pub queue_key: QueueKey,
    pub data: Vec<u8>,
    pub raw_size: usize,
    pub data_type: RawDataType,
    pub compress_type: CompressType,
    pub project: String,
    pub logstore: String,
    pub region: String,
    pub shard_hash_key: String,
    pub enqueue_time: i64,
    pub last_send_time: i64,
    pub retry_times: u32,
    pub exactly_once_checkpoint: Option<Arc<RangeCheckpoint>>,
}

pub struct SenderQueue {
    items: VecDeque<SenderQueueItem>,
    capacity: usize,
    valid_to_push: bool,
    urgent: bool,
    region: String,
    in_flight: usize,
    // Backoff state fed by send outcomes.
    network_valid_time: i64,
    network_retry_interval: i64,
    quota_valid_time: i64,
    quota_retry_interval: i64,
}

impl SenderQueue {
    fn new(region: String, capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
            valid_to_push: true,
            urgent: false,
            region,
            in_flight: 0,
            network_valid_time: 0,
            network_retry_interval: NETWORK_RETRY_BASE_SECS,
            quota_valid_time: 0,
            quota_retry_interval: QUOTA_RETRY_BASE_SECS,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn valid_to_push(&self) -> bool {
        self.valid_to_push && self.items.len() < self.capacity
    }

    fn valid_to_pop(&self, now: i64) -> bool {
        if self.items.is_empty() {
            return false;
        }
        if self.urgent {
            return true;
        }
        now >= self.network_valid_time && now >= self.quota_valid_time
    }

    fn on_done(&mut self, outcome: SendOutcome, now: i64) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match outcome {
            SendOutcome::Ok | SendOutcome::Buffered | SendOutcome::DiscardFail => {
                self.network_valid_time = 0;
                self.network_retry_interval = NETWORK_RETRY_BASE_SECS;
                self.quota_valid_time = 0;
                self.quota_retry_interval = QUOTA_RETRY_BASE_SECS;
            }
            SendOutcome::NetworkFail => {
                self.network_valid_time = now + self.network_retry_interval;
                self.network_retry_interval =
                    (self.network_retry_interval * 2).min(NETWORK_RETRY_MAX_SECS);
            }
            SendOutcome::QuotaFail => {
                self.quota_valid_time = now + self.quota_retry_interval;
                self.quota_retry_interval =
                    (self.quota_retry_interval * 2).min(QUOTA_RETRY_MAX_SECS);
            }
        }
    }
}

pub struct SenderQueueManager {
    queues: Mutex<BTreeMap<QueueKey, SenderQueue>>,
    rr_cursor: Mutex<usize>,
    signal: QueueSignal,
    default_capacity: usize,
}

impl SenderQueueManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            queues: Mutex::new(BTreeMap::new()),
            rr_cursor: Mutex::new(0),
            signal: QueueSignal::new(),
            default_capacity,
        }
    }

    pub fn create_queue(&self, key: QueueKey, region: impl Into<String>) {
        self.create_queue_with_capacity(key, region, self.default_capacity);
    }

    pub fn create_queue_with_capacity(
        &self,
        key: QueueKey,
        region: impl Into<String>,
        capacity: usize,
    ) {
        let mut queues = self.queues.lock().expect("sender queues lock");
        queues
            .entry(key)
            .or_insert_with(|| SenderQueue::new(region.into(), capacity));
    }

    /// Removes a queue once it is drained; returns the leftover items.
    pub fn delete_queue(&self, key: &QueueKey) -> Vec<SenderQueueItem> {
        let mut queues = self.queues.lock().expect("sender queues lock");
        queues
            .remove(key)
            .map(|q| q.items.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn has_queue(&self, key: &QueueKey) -> bool {
        self.queues.lock().expect("sender queues lock").contains_key(key)
    }

    /// Non-blocking push; succeeds iff the queue exists, is below capacity
    /// and valid to push. Failure hands the item back so the producer can
    /// retry or divert it to disk.
    pub fn push(
        &self,
        key: &QueueKey,
        item: SenderQueueItem,
    ) -> Result<(), (PushError, SenderQueueItem)> {
        let mut queues = self.queues.lock().expect("sender queues lock");
        let Some(queue) = queues.get_mut(key) else {
            return Err((PushError::NoSuchKey, item));
        };
        if !queue.valid_to_push() {
            return Err((PushError::QueueFull, item));
        }
        queue.items.push_back(item);
        drop(queues);
        self.signal.signal();
        Ok(())
    }

    /// Re-inserts an item at the queue head, used for retries. Capacity is
    /// deliberately ignored: the item already held a slot.
    pub fn push_front(
        &self,
        key: &QueueKey,
        item: SenderQueueItem,
    ) -> Result<(), (PushError, SenderQueueItem)> {
        let mut queues = self.queues.lock().expect("sender queues lock");
        let Some(queue) = queues.get_mut(key) else {
            return Err((PushError::NoSuchKey, item));
        };
        queue.items.push_front(item);
        drop(queues);
        self.signal.signal();
        Ok(())
    }

    /// Pops ready items round-robin across keys, FIFO within a key. `allow`
    /// is consulted per item with the queue's region and acquires the
    /// region slot when it returns true; a false stops popping that queue.
    pub fn pop_ready(&self, now: i64, mut allow: impl FnMut(&str) -> bool) -> Vec<SenderQueueItem> {
        let mut queues = self.queues.lock().expect("sender queues lock");
        let keys: Vec<QueueKey> = queues.keys().cloned().collect();
        if keys.is_empty() {
            return Vec::new();
        }
        let mut cursor = self.rr_cursor.lock().expect("sender rr cursor lock");
        let start = *cursor % keys.len();
        let mut popped = Vec::new();
        for offset in 0..keys.len() {
            let key = &keys[(start + offset) % keys.len()];
            let Some(queue) = queues.get_mut(key) else {
                continue;
            };
            while queue.valid_to_pop(now) {
                if !allow(&queue.region) {
                    break;
                }
                if let Some(item) = queue.items.pop_front() {
                    queue.in_flight += 1;
                    popped.push(item);
                } else {
                    break;
                }
            }
        }
        *cursor = (start + 1) % keys.len();
        popped
    }

    /// Drains every queue regardless of validity, for shutdown.
    pub fn pop_all(&self) -> Vec<SenderQueueItem> {
        let mut queues = self.queues.lock().expect("sender queues lock");
        let mut popped = Vec::new();
        for queue in queues.values_mut() {
            popped.extend(queue.items.drain(..));
        }
        popped
    }

    pub fn on_done(&self, key: &QueueKey, outcome: SendOutcome, now: i64) {
        let mut queues = self.queues.lock().expect("sender queues lock");
        if let Some(queue) = queues.get_mut(key) {
            queue.on_done(outcome, now);
        }
        drop(queues);
        if outcome == SendOutcome::Ok {
            self.signal.signal();
        }
    }

    pub fn valid_to_push(&self, key: &QueueKey) -> bool {
        let queues = self.queues.lock().expect("sender queues lock");
        queues.get(key).map(|q| q.valid_to_push()).unwrap_or(false)
    }

    pub fn is_urgent(&self, key: &QueueKey) -> bool {
        let queues = self.queues.lock().expect("sender queues lock");
        queues.get(key).map(|q| q.urgent).unwrap_or(false)
    }

    pub fn set_urgent_all(&self, urgent: bool) {
        let mut queues = self.queues.lock().expect("sender queues lock");
        for queue in queues.values_mut() {
            queue.urgent = urgent;
        }
        drop(queues);
        self.signal.signal();
    }

    pub fn queue_len(&self, key: &QueueKey) -> usize {
        let queues = self.queues.lock().expect("sender queues lock");
        queues.get(key).map(|q| q.len()).unwrap_or(0)
    }

    pub fn all_empty(&self) -> bool {
        let queues = self.queues.lock().expect("sender queues lock");
        queues.values().all(|q| q.is_empty())
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

    fn item(key: &QueueKey) -> SenderQueueItem {
        SenderQueueItem {
            queue_key: key.clone(),
            data: vec![1, 2, 3],
            raw_size: 3,
            data_type: RawDataType::EventGroup,
            compress_type: CompressType::Lz4,
            project: "p".to_string(),
            logstore: "store".to_string(),
            region: "cn-test".to_string(),
            shard_hash_key: String::new(),
            enqueue_time: 0,
            last_send_time: 0,
            retry_times: 0,
            exactly_once_checkpoint: None,
        }
    }

    #[test]
    fn test_push_respects_capacity_and_key() {
        let mgr = SenderQueueManager::new(2);
        let key = QueueKey::new("p#store");
        let err = mgr.push(&key, item(&key)).expect_err("no queue yet");
        assert_eq!(err.0, PushError::NoSuchKey);

        mgr.create_queue(key.clone(), "cn-test");
        assert!(mgr.push(&key, item(&key)).is_ok());
        assert!(mgr.push(&key, item(&key)).is_ok());
        let err = mgr.push(&key, item(&key)).expect_err("full");
        assert_eq!(err.0, PushError::QueueFull);
        assert_eq!(mgr.queue_len(&key), 2);
    }

    #[test]
    fn test_pop_round_robin_fifo() {
        let mgr = SenderQueueManager::new(10);
        let a = QueueKey::new("a");
        let b = QueueKey::new("b");
        mgr.create_queue(a.clone(), "r1");
        mgr.create_queue(b.clone(), "r2");
        for _ in 0..2 {
            mgr.push(&a, item(&a)).expect("push a");
            mgr.push(&b, item(&b)).expect("push b");
        }

        let popped = mgr.pop_ready(100, |_| true);
        assert_eq!(popped.len(), 4);
        assert!(mgr.all_empty());
    }

    #[test]
    fn test_network_fail_backs_off_until_deadline() {
        let mgr = SenderQueueManager::new(10);
        let key = QueueKey::new("a");
        mgr.create_queue(key.clone(), "r1");
        mgr.push(&key, item(&key)).expect("push");

        let popped = mgr.pop_ready(100, |_| true);
        assert_eq!(popped.len(), 1);
        mgr.push_front(&key, popped.into_iter().next().expect("popped item"))
            .expect("push front");
        mgr.on_done(&key, SendOutcome::NetworkFail, 100);

        // Backoff of 1s: not ready at t=100, ready at t=101.
        assert!(mgr.pop_ready(100, |_| true).is_empty());
        assert_eq!(mgr.pop_ready(101, |_| true).len(), 1);
    }

    #[test]
    fn test_urgent_overrides_backoff() {
        let mgr = SenderQueueManager::new(10);
        let key = QueueKey::new("a");
        mgr.create_queue(key.clone(), "r1");
        mgr.push(&key, item(&key)).expect("push");
        mgr.on_done(&key, SendOutcome::QuotaFail, 100);

        assert!(mgr.pop_ready(100, |_| true).is_empty());
        mgr.set_urgent_all(true);
        assert_eq!(mgr.pop_ready(100, |_| true).len(), 1);
    }

    #[test]
    fn test_region_budget_stops_popping() {
        let mgr = SenderQueueManager::new(10);
        let key = QueueKey::new("a");
        mgr.create_queue(key.clone(), "r1");
        for _ in 0..5 {
            mgr.push(&key, item(&key)).expect("push");
        }
        let mut budget = 2;
        let popped = mgr.pop_ready(100, |_region| {
            if budget == 0 {
                false
            } else {
                budget -= 1;
                true
            }
        });
        assert_eq!(popped.len(), 2);
        assert_eq!(mgr.queue_len(&key), 3);
    }
}
