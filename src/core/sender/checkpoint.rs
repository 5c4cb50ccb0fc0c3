// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exactly-Once Checkpoints
//!
//! Per shard-hash-key sequence state the receiver uses to de-duplicate.
//! `sequence_id` increments on commit; an `InvalidSequenceId` response makes
//! the sender commit, advance and drop the batch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckpointData {
    pub sequence_id: u64,
    pub read_offset: u64,
    pub data_size: u64,
    pub committed: bool,
}

#[derive(Debug)]
pub struct RangeCheckpoint {
    hash_key: String,
    data: Mutex<CheckpointData>,
}

impl RangeCheckpoint {
    pub fn new(hash_key: impl Into<String>, sequence_id: u64) -> Self {
        Self {
            hash_key: hash_key.into(),
            data: Mutex::new(CheckpointData {
                sequence_id,
                ..Default::default()
            }),
        }
    }

    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }

    pub fn sequence_id(&self) -> u64 {
        self.data.lock().expect("checkpoint lock").sequence_id
    }

    pub fn set_range(&self, read_offset: u64, data_size: u64) {
        let mut data = self.data.lock().expect("checkpoint lock");
        data.read_offset = read_offset;
        data.data_size = data_size;
        data.committed = false;
    }

    pub fn commit(&self) {
        self.data.lock().expect("checkpoint lock").committed = true;
    }

    /// Starts the next range: bumps the sequence and clears the commit flag.
    pub fn increase_sequence_id(&self) {
        let mut data = self.data.lock().expect("checkpoint lock");
        data.sequence_id += 1;
        data.committed = false;
    }

    pub fn snapshot(&self) -> CheckpointData {
        self.data.lock().expect("checkpoint lock").clone()
    }
}

#[derive(Default)]
pub struct CheckpointManager {
    inner: Mutex<HashMap<String, Arc<RangeCheckpoint>>>,
}

impl CheckpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, hash_key: &str, initial_sequence_id: u64) -> Arc<RangeCheckpoint> {
        let mut inner = self.inner.lock().expect("checkpoint manager lock");
        inner
            .entry(hash_key.to_string())
            .or_insert_with(|| Arc::new(RangeCheckpoint::new(hash_key, initial_sequence_id)))
            .clone()
    }

    pub fn get(&self, hash_key: &str) -> Option<Arc<RangeCheckpoint>> {
        self.inner
            .lock()
            .expect("checkpoint manager lock")
            .get(hash_key)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_and_advance() {
        let cpt = RangeCheckpoint::new("H", 7);
        cpt.set_range(100, 4096);
        assert_eq!(cpt.sequence_id(), 7);
        assert!(!cpt.snapshot().committed);

        cpt.commit();
        assert!(cpt.snapshot().committed);

        cpt.increase_sequence_id();
        assert_eq!(cpt.sequence_id(), 8);
        assert!(!cpt.snapshot().committed);
    }

    #[test]
    fn test_manager_is_keyed() {
        let mgr = CheckpointManager::new();
        let a = mgr.get_or_create("H", 1);
        let b = mgr.get_or_create("H", 99);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.sequence_id(), 1);
        assert!(mgr.get("missing").is_none());
    }
}
