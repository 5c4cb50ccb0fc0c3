// SPDX-License-Identifier: MIT OR Apache-2.0

//! Log-Store Flusher
//!
//! Built-in flusher for the project/logstore-addressed backend: batches
//! groups per `(logstore, shard_hash_key)`, serializes closed batches to
//! `LogGroup` bytes, compresses them and pushes the result onto its sender
//! queue. A saturated queue retries with backoff, then diverts to the disk
//! buffer; exactly-once items are never spilled.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::core::alarm::AlarmType;
use crate::core::batch::{BatchKey, BatchedEvents, Batcher, BatcherConfig};
use crate::core::buffer::DiskBufferWriter;
use crate::core::config::context::AgentContext;
use crate::core::event::PipelineEventGroup;
use crate::core::exception::{LogFluxError, LogFluxResult};
use crate::core::flusher::compress::{compress, CompressType, RawDataType};
use crate::core::flusher::serializer::{LogGroupSerializer, Serializer};
use crate::core::flusher::{Flusher, SinkType};
use crate::core::queue::{PushError, QueueKey, SenderQueueItem, SenderQueueManager};

const PUSH_RETRY_SLEEP_MS: u64 = 10;
const DEFAULT_PUSH_RETRY_TIMES: u32 = 100;

pub struct FlusherLogStore {
    project: String,
    logstore: String,
    region: String,
    endpoint: String,
    aliuid: String,
    compress_type: CompressType,
    shard_hash_tag_keys: Vec<String>,
    push_retry_times: u32,
    max_send_group_size: usize,
    batcher: Batcher,
    serializer: LogGroupSerializer,
    queue_key: QueueKey,
    queues: Option<Arc<SenderQueueManager>>,
    disk_writer: Option<Arc<DiskBufferWriter>>,
    ctx: Option<AgentContext>,
}

impl Default for FlusherLogStore {
    fn default() -> Self {
        Self {
            project: String::new(),
            logstore: String::new(),
            region: String::new(),
            endpoint: String::new(),
            aliuid: String::new(),
            compress_type: CompressType::Lz4,
            shard_hash_tag_keys: Vec::new(),
            push_retry_times: DEFAULT_PUSH_RETRY_TIMES,
            max_send_group_size: crate::core::batch::batcher::DEFAULT_MAX_BATCH_BYTES,
            batcher: Batcher::new(BatcherConfig::default()),
            serializer: LogGroupSerializer::default(),
            queue_key: QueueKey::new(""),
            queues: None,
            disk_writer: None,
            ctx: None,
        }
    }
}

impl FlusherLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn logstore(&self) -> &str {
        &self.logstore
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn shard_hash_key(&self, group: &PipelineEventGroup) -> String {
        if self.shard_hash_tag_keys.is_empty() {
            return String::new();
        }
        let mut hasher = DefaultHasher::new();
        for key in &self.shard_hash_tag_keys {
            if let Some(v) = group.get_tag(key.as_bytes()) {
                v.as_bytes().hash(&mut hasher);
            }
        }
        format!("{:016x}", hasher.finish())
    }

    fn dispatch_batches(&self, batches: Vec<BatchedEvents>) -> LogFluxResult<()> {
        for batch in batches {
            self.dispatch_batch(batch)?;
        }
        Ok(())
    }

    fn dispatch_batch(&self, batch: BatchedEvents) -> LogFluxResult<()> {
        let queues = self
            .queues
            .as_ref()
            .ok_or_else(|| LogFluxError::internal("flusher not initialized"))?;
        let shard_hash_key = batch.shard_hash_key.clone();

        let raw = self.serializer.serialize(&batch)?;
        if raw.len() > self.max_send_group_size {
            tracing::warn!(
                project = %self.project,
                logstore = %self.logstore,
                size = raw.len(),
                "serialized batch exceeds send size limit"
            );
        }
        let data = compress(&raw, self.compress_type)?;

        let now = unix_now();
        let mut item = SenderQueueItem {
            queue_key: self.queue_key.clone(),
            data,
            raw_size: raw.len(),
            data_type: RawDataType::EventGroup,
            compress_type: self.compress_type,
            project: self.project.clone(),
            logstore: self.logstore.clone(),
            region: self.region.clone(),
            shard_hash_key,
            enqueue_time: now,
            last_send_time: now,
            retry_times: 0,
            exactly_once_checkpoint: batch.exactly_once_checkpoint.clone(),
        };

        for attempt in 0..self.push_retry_times {
            match queues.push(&self.queue_key, item) {
                Ok(()) => return Ok(()),
                Err((PushError::NoSuchKey, _lost)) => {
                    return Err(LogFluxError::NoSuchQueue {
                        key: self.queue_key.to_string(),
                    });
                }
                Err((_, returned)) => {
                    item = returned;
                    if queues.is_urgent(&self.queue_key) {
                        break;
                    }
                    if attempt + 1 < self.push_retry_times {
                        std::thread::sleep(Duration::from_millis(PUSH_RETRY_SLEEP_MS));
                    }
                }
            }
        }

        // Queue stayed full: divert to disk unless the item carries an
        // exactly-once checkpoint.
        if item.exactly_once_checkpoint.is_none() {
            if let Some(writer) = &self.disk_writer {
                if writer.push_to_disk_buffer(&item, 3) {
                    return Ok(());
                }
            }
        }
        if let Some(ctx) = &self.ctx {
            ctx.alarms().send_alarm_for(
                AlarmType::DiscardData,
                "failed to push batch to sender queue: queue is full, discard data",
                &self.project,
                &self.logstore,
                &self.region,
            );
        }
        Err(LogFluxError::QueueFull {
            key: self.queue_key.to_string(),
        })
    }
}

impl Flusher for FlusherLogStore {
    fn name(&self) -> &'static str {
        "flusher_log_store"
    }

    fn init(
        &mut self,
        config: &serde_json::Value,
        _pipeline_name: &str,
        ctx: &AgentContext,
        queues: &Arc<SenderQueueManager>,
    ) -> LogFluxResult<Option<serde_json::Value>> {
        let project = config
            .get("Project")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LogFluxError::plugin_init(self.name(), "missing Project"))?;
        let logstore = config
            .get("Logstore")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LogFluxError::plugin_init(self.name(), "missing Logstore"))?;
        self.project = project.to_string();
        self.logstore = logstore.to_string();
        self.region = config
            .get("Region")
            .and_then(|v| v.as_str())
            .unwrap_or(ctx.default_region())
            .to_string();
        self.endpoint = config
            .get("Endpoint")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        self.aliuid = config
            .get("Aliuid")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        self.compress_type = CompressType::from_str(
            config
                .get("CompressType")
                .and_then(|v| v.as_str())
                .unwrap_or("lz4"),
        );
        if let Some(keys) = config.get("ShardHashKeys").and_then(|v| v.as_array()) {
            self.shard_hash_tag_keys = keys
                .iter()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect();
        }
        if let Some(retries) = config.get("PushRetryTimes").and_then(|v| v.as_u64()) {
            self.push_retry_times = retries as u32;
        }

        self.max_send_group_size = ctx.settings().max_send_log_group_size;
        self.batcher = Batcher::new(BatcherConfig {
            max_batch_bytes: ctx.settings().max_send_log_group_size,
            max_batch_events: ctx.settings().merge_log_count_limit,
            max_batch_age_secs: ctx.settings().batch_expire_interval_secs,
        });
        self.serializer = LogGroupSerializer {
            category: Some(self.logstore.clone()),
            topic: None,
            source: Some(ctx.host_ip().to_string()),
        };
        self.queue_key = self.build_queue_key(logstore);
        queues.create_queue_with_capacity(
            self.queue_key.clone(),
            self.region.clone(),
            ctx.settings().sender_queue_capacity,
        );
        self.queues = Some(Arc::clone(queues));
        self.ctx = Some(ctx.clone());
        Ok(None)
    }

    fn send(&self, group: PipelineEventGroup) -> LogFluxResult<()> {
        let key = BatchKey {
            logstore: self.logstore.clone(),
            shard_hash_key: self.shard_hash_key(&group),
        };
        let mut closed = Vec::new();
        self.batcher.add(key, group, unix_now(), &mut closed);
        self.dispatch_batches(closed)
    }

    fn flush(&self, _pipeline_id: &str) -> LogFluxResult<()> {
        self.flush_all()
    }

    fn flush_all(&self) -> LogFluxResult<()> {
        let mut closed = Vec::new();
        self.batcher.flush_all(&mut closed);
        self.dispatch_batches(closed)
    }

    fn flush_expired(&self, now: i64) {
        let mut closed = Vec::new();
        self.batcher.flush_expired(now, &mut closed);
        if let Err(e) = self.dispatch_batches(closed) {
            tracing::warn!(error = %e, "failed to dispatch expired batches");
        }
    }

    fn sink_type(&self) -> SinkType {
        SinkType::LogStore
    }

    fn queue_key(&self) -> QueueKey {
        self.queue_key.clone()
    }

    fn build_queue_key(&self, target: &str) -> QueueKey {
        QueueKey::new(format!("{}#{}#{}", self.project, self.region, target))
    }

    fn set_disk_writer(&mut self, writer: Arc<DiskBufferWriter>) {
        self.disk_writer = Some(writer);
    }

    fn region_endpoint(&self) -> Option<(String, String)> {
        if self.endpoint.is_empty() {
            None
        } else {
            Some((self.region.clone(), self.endpoint.clone()))
        }
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
