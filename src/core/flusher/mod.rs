// logflux_rust/src/core/flusher/mod.rs

pub mod compress;
pub mod log_store;
pub mod serializer;

pub use compress::{CompressType, RawDataType};
pub use log_store::FlusherLogStore;
pub use serializer::{LogGroupSerializer, Serializer};

use std::sync::Arc;

use crate::core::buffer::DiskBufferWriter;
use crate::core::config::context::AgentContext;
use crate::core::event::PipelineEventGroup;
use crate::core::exception::LogFluxResult;
use crate::core::queue::{QueueKey, SenderQueueManager};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkType {
    None,
    LogStore,
}

/// Destination plugin contract: serialize batches and hand them to the
/// sending subsystem. `send` must be non-blocking beyond the queue push; a
/// full queue is retried internally with backoff and then reported back to
/// the caller as back-pressure.
pub trait Flusher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns an opaque sidecar config for an external helper when the
    /// destination still needs one.
    fn init(
        &mut self,
        config: &serde_json::Value,
        pipeline_name: &str,
        ctx: &AgentContext,
        queues: &Arc<SenderQueueManager>,
    ) -> LogFluxResult<Option<serde_json::Value>>;

    fn send(&self, group: PipelineEventGroup) -> LogFluxResult<()>;

    /// Force-closes this pipeline's open batches.
    fn flush(&self, pipeline_id: &str) -> LogFluxResult<()>;

    fn flush_all(&self) -> LogFluxResult<()>;

    /// Timer hook: closes batches past their age threshold.
    fn flush_expired(&self, _now: i64) {}

    fn sink_type(&self) -> SinkType {
        SinkType::None
    }

    fn queue_key(&self) -> QueueKey;

    fn build_queue_key(&self, target: &str) -> QueueKey;

    /// Wires the disk spill path for flushers that support it.
    fn set_disk_writer(&mut self, _writer: Arc<DiskBufferWriter>) {}

    /// The `(region, endpoint)` this flusher talks to, for registration
    /// with the endpoint health registry.
    fn region_endpoint(&self) -> Option<(String, String)> {
        None
    }
}
