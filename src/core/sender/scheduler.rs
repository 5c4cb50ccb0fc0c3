// SPDX-License-Identifier: MIT OR Apache-2.0

//! Send Scheduler
//!
//! Daemon selecting ready sender-queue items under per-region concurrency
//! caps, dispatching them through the send client and classifying every
//! outcome: retry, requeue with backoff, divert to disk, or discard with
//! an alarm. Exactly-once checkpoints advance here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::alarm::AlarmType;
use crate::core::buffer::DiskBufferWriter;
use crate::core::config::context::AgentContext;
use crate::core::queue::{SendOutcome, SenderQueueItem, SenderQueueManager};
use crate::core::sender::endpoint_registry::{NetworkProber, RegionEndpointRegistry};
use crate::core::sender::flow_control::RateLimiter;
use crate::core::sender::send_client::{SendClient, SendRequest, SendResult};
use crate::core::sender::statistics::SendStatistics;

pub struct SendScheduler {
    ctx: AgentContext,
    queues: Arc<SenderQueueManager>,
    regions: Arc<RegionEndpointRegistry>,
    client: Arc<dyn SendClient>,
    disk: Option<Arc<DiskBufferWriter>>,
    stats: SendStatistics,
    limiter: RateLimiter,
    running: AtomicBool,
}

impl SendScheduler {
    pub fn new(
        ctx: AgentContext,
        queues: Arc<SenderQueueManager>,
        regions: Arc<RegionEndpointRegistry>,
        client: Arc<dyn SendClient>,
        disk: Option<Arc<DiskBufferWriter>>,
    ) -> Self {
        let limiter = RateLimiter::new(ctx.settings().send_flow_bytes_per_second);
        Self {
            ctx,
            queues,
            regions,
            client,
            disk,
            stats: SendStatistics::new(),
            limiter,
            running: AtomicBool::new(true),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.queues.signal();
    }

    pub fn run_loop(&self) {
        tracing::info!("send scheduler started");
        while self.running.load(Ordering::Relaxed) {
            self.queues.wait(Duration::from_secs(1));
            self.run_once(unix_now());
        }
        tracing::info!("send scheduler stopped");
    }

    /// One selection+dispatch pass; returns how many items were attempted.
    pub fn run_once(&self, now: i64) -> usize {
        let regions = Arc::clone(&self.regions);
        let items = self
            .queues
            .pop_ready(now, |region| regions.try_acquire_slot(region));
        let count = items.len();
        for item in items {
            self.send_item(item, now);
        }
        count
    }

    fn send_item(&self, mut item: SenderQueueItem, now: i64) {
        self.limiter.flow_control(item.raw_size);
        let endpoint = self
            .regions
            .pick_endpoint(&item.region)
            .unwrap_or_else(|| item.region.clone());
        let sequence_id = item
            .exactly_once_checkpoint
            .as_ref()
            .map(|cpt| cpt.sequence_id());
        let request = SendRequest {
            project: &item.project,
            logstore: &item.logstore,
            region: &item.region,
            endpoint: &endpoint,
            compress_type: item.compress_type,
            data_type: item.data_type,
            data: &item.data,
            raw_size: item.raw_size,
            shard_hash_key: if item.shard_hash_key.is_empty() {
                None
            } else {
                Some(&item.shard_hash_key)
            },
            sequence_id,
        };
        let result = self.client.send(&request);
        self.regions.release_slot(&item.region);
        item.last_send_time = now;
        self.handle_send_result(item, result, &endpoint, now);
    }

    fn handle_send_result(
        &self,
        mut item: SenderQueueItem,
        result: SendResult,
        endpoint: &str,
        now: i64,
    ) {
        let key = item.queue_key.clone();

        if result == SendResult::Ok {
            if let Some(cpt) = &item.exactly_once_checkpoint {
                cpt.commit();
                cpt.increase_sequence_id();
            }
            self.stats.inc_total(&item.project, &item.logstore, now);
            self.regions.on_send_success(&item.region);
            self.queues.on_done(&key, SendOutcome::Ok, now);
            return;
        }

        item.retry_times += 1;

        // Anything that has been failing past the discard interval goes.
        if now - item.enqueue_time > self.ctx.settings().discard_send_fail_interval_secs {
            self.discard(item, result, now);
            return;
        }

        match result {
            SendResult::NetworkError | SendResult::ServerError => {
                let ratio = self.stats.inc_server_error(&item.project, &item.logstore, now);
                self.regions.on_send_error(&item.region);
                if ratio < self.ctx.settings().send_server_error_retry_ratio
                    && item.retry_times < self.ctx.settings().send_retrytimes
                {
                    self.retry_async(item, now);
                    return;
                }
                if result == SendResult::NetworkError {
                    self.regions.set_endpoint_status(&item.region, endpoint, false, 0);
                }
                // Over threshold: spill to disk when possible, otherwise
                // keep it queued under backoff.
                if item.exactly_once_checkpoint.is_none() {
                    if let Some(disk) = &self.disk {
                        if disk.push_to_disk_buffer(&item, 3) {
                            self.queues.on_done(&key, SendOutcome::Buffered, now);
                            return;
                        }
                    }
                }
                self.requeue(item, SendOutcome::NetworkFail, now);
            }
            SendResult::QuotaExceed => {
                self.ctx.alarms().send_alarm_for(
                    AlarmType::SendQuotaExceed,
                    "write quota exceed",
                    &item.project,
                    &item.logstore,
                    &item.region,
                );
                self.stats.inc_total(&item.project, &item.logstore, now);
                self.requeue(item, SendOutcome::QuotaFail, now);
            }
            SendResult::Unauthorized => {
                self.stats.inc_total(&item.project, &item.logstore, now);
                if item.retry_times < self.ctx.settings().unauthorized_send_retrytimes {
                    self.client.refresh_auth("");
                    self.retry_async(item, now);
                } else if now - item.enqueue_time
                    > self.ctx.settings().unauthorized_allowed_delay_after_reset_secs
                {
                    self.discard(item, result, now);
                } else {
                    self.requeue(item, SendOutcome::NetworkFail, now);
                }
            }
            SendResult::InvalidSequenceId => {
                match item.exactly_once_checkpoint.take() {
                    Some(cpt) => {
                        // Hash keys are unique enough that a duplicate
                        // sequence means the server already has this range.
                        cpt.commit();
                        cpt.increase_sequence_id();
                        self.ctx.alarms().send_alarm(
                            AlarmType::ExactlyOnce,
                            format!(
                                "drop exactly once log group because of invalid sequence ID, cpt: {}",
                                cpt.hash_key()
                            ),
                        );
                        self.queues.on_done(&key, SendOutcome::DiscardFail, now);
                    }
                    None => self.discard(item, result, now),
                }
            }
            SendResult::RequestTimeExpired => {
                if self.ctx.settings().enable_log_time_auto_adjust {
                    self.retry_async(item, now);
                } else {
                    self.unknown_error(item, now);
                }
            }
            SendResult::Discardable => self.discard(item, result, now),
            SendResult::Ok => unreachable!("handled above"),
        }
    }

    /// Unknown-error ladder: first retry immediately, then requeue a few
    /// times, then discard.
    fn unknown_error(&self, item: SenderQueueItem, now: i64) {
        if item.retry_times == 1 {
            self.retry_async(item, now);
        } else if item.retry_times > self.ctx.settings().unknown_error_try_max {
            self.discard(item, SendResult::Discardable, now);
        } else {
            self.requeue(item, SendOutcome::NetworkFail, now);
        }
    }

    fn retry_async(&self, item: SenderQueueItem, now: i64) {
        let key = item.queue_key.clone();
        if self.queues.push_front(&key, item).is_err() {
            tracing::warn!(queue = %key, "retry target queue vanished, dropping item");
        }
        self.queues.on_done(&key, SendOutcome::Ok, now);
    }

    fn requeue(&self, item: SenderQueueItem, outcome: SendOutcome, now: i64) {
        let key = item.queue_key.clone();
        if self.queues.push_front(&key, item).is_err() {
            tracing::warn!(queue = %key, "requeue target queue vanished, dropping item");
        }
        self.queues.on_done(&key, outcome, now);
    }

    fn discard(&self, item: SenderQueueItem, result: SendResult, now: i64) {
        tracing::error!(
            project = %item.project,
            logstore = %item.logstore,
            region = %item.region,
            retry_times = item.retry_times,
            result = ?result,
            "send data fail, discard data"
        );
        self.ctx.alarms().send_alarm_for(
            AlarmType::SendDataFail,
            format!("discard data after send failure: {result:?}"),
            &item.project,
            &item.logstore,
            &item.region,
        );
        self.queues.on_done(&item.queue_key, SendOutcome::DiscardFail, now);
    }
}

/// Probe actor: the only writer flipping endpoints back to healthy. On any
/// region recovery it signals the sender so queued data moves immediately.
pub fn probe_loop(
    regions: Arc<RegionEndpointRegistry>,
    queues: Arc<SenderQueueManager>,
    prober: Arc<dyn NetworkProber>,
    interval: Duration,
    running: Arc<AtomicBool>,
) {
    tracing::info!("network probe started");
    while running.load(Ordering::Relaxed) {
        let recovered = regions.probe_unavailable(prober.as_ref());
        if !recovered.is_empty() {
            queues.signal();
        }
        std::thread::sleep(interval);
    }
    tracing::info!("network probe stopped");
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::settings::Settings;
    use crate::core::flusher::compress::{CompressType, RawDataType};
    use crate::core::queue::QueueKey;
    use crate::core::sender::checkpoint::RangeCheckpoint;
    use crate::core::sender::send_client::testing::ScriptedClient;

    fn scheduler(
        results: Vec<SendResult>,
        queues: &Arc<SenderQueueManager>,
    ) -> (SendScheduler, Arc<ScriptedClient>) {
        let ctx = AgentContext::new(Settings::default(), "10.0.0.1", "cn-test");
        let regions = Arc::new(RegionEndpointRegistry::new(10, 5));
        regions.register_endpoint("cn-test", "ep-1", true);
        let client = Arc::new(ScriptedClient::new(results));
        let scheduler = SendScheduler::new(
            ctx,
            Arc::clone(queues),
            regions,
            client.clone(),
            None,
        );
        (scheduler, client)
    }

    fn item(key: &QueueKey, cpt: Option<Arc<RangeCheckpoint>>) -> SenderQueueItem {
        SenderQueueItem {
            queue_key: key.clone(),
            data: vec![1, 2, 3],
            raw_size: 3,
            data_type: RawDataType::EventGroup,
            compress_type: CompressType::Lz4,
            project: "p".to_string(),
            logstore: "s".to_string(),
            region: "cn-test".to_string(),
            shard_hash_key: cpt
                .as_ref()
                .map(|c| c.hash_key().to_string())
                .unwrap_or_default(),
            enqueue_time: 1000,
            last_send_time: 1000,
            retry_times: 0,
            exactly_once_checkpoint: cpt,
        }
    }

    #[test]
    fn test_successful_send_drains_queue() {
        let queues = Arc::new(SenderQueueManager::new(20));
        let key = QueueKey::new("p#s");
        queues.create_queue(key.clone(), "cn-test");
        let (scheduler, client) = scheduler(vec![], &queues);

        queues.push(&key, item(&key, None)).expect("push");
        assert_eq!(scheduler.run_once(1000), 1);
        assert_eq!(client.sent_count(), 1);
        assert!(queues.all_empty());
    }

    #[test]
    fn test_network_error_under_threshold_retries() {
        let queues = Arc::new(SenderQueueManager::new(20));
        let key = QueueKey::new("p#s");
        queues.create_queue(key.clone(), "cn-test");
        // Seed statistics so one error keeps the ratio under 0.3.
        let (scheduler, client) = scheduler(vec![SendResult::NetworkError], &queues);
        for _ in 0..10 {
            scheduler.stats.inc_total("p", "s", 1000);
        }

        queues.push(&key, item(&key, None)).expect("push");
        scheduler.run_once(1000);
        // Item was pushed back for an async retry; next pass sends fine.
        assert_eq!(queues.queue_len(&key), 1);
        scheduler.run_once(1000);
        assert_eq!(client.sent_count(), 2);
        assert!(queues.all_empty());
    }

    #[test]
    fn test_discardable_drops_item() {
        let queues = Arc::new(SenderQueueManager::new(20));
        let key = QueueKey::new("p#s");
        queues.create_queue(key.clone(), "cn-test");
        let (scheduler, _client) = scheduler(vec![SendResult::Discardable], &queues);

        queues.push(&key, item(&key, None)).expect("push");
        scheduler.run_once(1000);
        assert!(queues.all_empty());
    }

    #[test]
    fn test_quota_exceed_requeues_with_backoff() {
        let queues = Arc::new(SenderQueueManager::new(20));
        let key = QueueKey::new("p#s");
        queues.create_queue(key.clone(), "cn-test");
        let (scheduler, _client) = scheduler(vec![SendResult::QuotaExceed], &queues);

        queues.push(&key, item(&key, None)).expect("push");
        scheduler.run_once(1000);
        assert_eq!(queues.queue_len(&key), 1);
        // Quota backoff (3s) gates the queue.
        assert_eq!(scheduler.run_once(1000), 0);
        assert_eq!(scheduler.run_once(1003), 1);
    }

    #[test]
    fn test_invalid_sequence_commits_and_drops() {
        let queues = Arc::new(SenderQueueManager::new(20));
        let key = QueueKey::new("p#s");
        queues.create_queue(key.clone(), "cn-test");
        let (scheduler, _client) = scheduler(vec![SendResult::InvalidSequenceId], &queues);

        let cpt = Arc::new(RangeCheckpoint::new("H", 7));
        queues.push(&key, item(&key, Some(cpt.clone()))).expect("push");
        scheduler.run_once(1000);

        assert!(queues.all_empty());
        assert_eq!(cpt.sequence_id(), 8);
        assert!(!cpt.snapshot().committed);
    }

    #[test]
    fn test_old_items_discarded() {
        let queues = Arc::new(SenderQueueManager::new(20));
        let key = QueueKey::new("p#s");
        queues.create_queue(key.clone(), "cn-test");
        let (scheduler, _client) = scheduler(vec![SendResult::NetworkError], &queues);

        queues.push(&key, item(&key, None)).expect("push");
        // More than discard_send_fail_interval (21600s) after enqueue.
        scheduler.run_once(1000 + 21601);
        assert!(queues.all_empty());
    }

    #[test]
    fn test_success_grows_region_concurrency() {
        let queues = Arc::new(SenderQueueManager::new(20));
        let key = QueueKey::new("p#s");
        queues.create_queue(key.clone(), "cn-test");
        let (scheduler, _client) = scheduler(vec![], &queues);

        for _ in 0..3 {
            queues.push(&key, item(&key, None)).expect("push");
            scheduler.run_once(1000);
        }
        assert_eq!(scheduler.regions.concurrency("cn-test"), Some(4));
    }
}
