// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exactly-once sequencing: an InvalidSequenceId response commits and
//! advances the checkpoint, drops the batch, and the next batch for the
//! same hash key goes out with the advanced sequence id.

use std::sync::Arc;

use logflux_rust::core::config::context::AgentContext;
use logflux_rust::core::config::settings::Settings;
use logflux_rust::core::flusher::compress::{CompressType, RawDataType};
use logflux_rust::core::queue::{QueueKey, SenderQueueItem, SenderQueueManager};
use logflux_rust::core::sender::checkpoint::CheckpointManager;
use logflux_rust::core::sender::endpoint_registry::RegionEndpointRegistry;
use logflux_rust::core::sender::scheduler::SendScheduler;
use logflux_rust::core::sender::send_client::testing::ScriptedClient;
use logflux_rust::core::sender::send_client::SendResult;

fn item(key: &QueueKey, cpt: Arc<logflux_rust::core::sender::checkpoint::RangeCheckpoint>) -> SenderQueueItem {
    SenderQueueItem {
        queue_key: key.clone(),
        data: b"payload".to_vec(),
        raw_size: 7,
        data_type: RawDataType::EventGroup,
        compress_type: CompressType::Lz4,
        project: "p".to_string(),
        logstore: "s".to_string(),
        region: "cn-test".to_string(),
        shard_hash_key: cpt.hash_key().to_string(),
        enqueue_time: 1000,
        last_send_time: 1000,
        retry_times: 0,
        exactly_once_checkpoint: Some(cpt),
    }
}

#[test]
fn test_invalid_sequence_advances_checkpoint() {
    let ctx = AgentContext::new(Settings::default(), "10.0.0.1", "cn-test");
    let queues = Arc::new(SenderQueueManager::new(20));
    let key = QueueKey::new("p#s");
    queues.create_queue(key.clone(), "cn-test");
    let regions = Arc::new(RegionEndpointRegistry::new(10, 5));
    regions.register_endpoint("cn-test", "ep", true);

    let client = Arc::new(ScriptedClient::new(vec![SendResult::InvalidSequenceId]));
    let scheduler = SendScheduler::new(ctx, Arc::clone(&queues), regions, client.clone(), None);

    let checkpoints = CheckpointManager::new();
    let cpt = checkpoints.get_or_create("H", 7);

    // Batch with seq=7 is rejected as a duplicate sequence.
    queues.push(&key, item(&key, cpt.clone())).expect("push");
    scheduler.run_once(1000);
    assert!(queues.all_empty(), "rejected batch must be dropped");
    assert_eq!(cpt.sequence_id(), 8);

    // The next batch with the same hash key carries seq=8 and succeeds.
    let cpt_again = checkpoints.get_or_create("H", 0);
    assert_eq!(cpt_again.sequence_id(), 8);
    queues.push(&key, item(&key, cpt_again)).expect("push");
    scheduler.run_once(1001);

    let sequence_ids = client.sequence_ids.lock().expect("sequence ids");
    assert_eq!(sequence_ids.as_slice(), &[Some(7), Some(8)]);
    // Success committed seq 8 and opened the next range.
    let cpt_final = checkpoints.get_or_create("H", 0);
    assert_eq!(cpt_final.sequence_id(), 9);
    assert!(!cpt_final.snapshot().committed);
}
