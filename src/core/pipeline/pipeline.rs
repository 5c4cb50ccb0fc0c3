// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline
//!
//! One built pipeline: the ordered processor chain and the flushers it
//! feeds, attached to its process-queue key. Built from a parsed config,
//! swapped atomically by the manager.

use std::sync::Arc;

use crate::core::buffer::DiskBufferWriter;
use crate::core::config::context::AgentContext;
use crate::core::config::pipeline_config::{plugin_type, PipelineConfig};
use crate::core::event::PipelineEventGroup;
use crate::core::exception::{LogFluxError, LogFluxResult};
use crate::core::flusher::Flusher;
use crate::core::pipeline::processor::ProcessorInstance;
use crate::core::pipeline::registry::PluginRegistry;
use crate::core::queue::{QueueKey, SenderQueueManager};
use crate::core::sender::endpoint_registry::RegionEndpointRegistry;

pub struct Pipeline {
    name: String,
    detail: serde_json::Value,
    create_time: i64,
    processors: Vec<ProcessorInstance>,
    flushers: Vec<Arc<dyn Flusher>>,
    process_queue_key: QueueKey,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("name", &self.name).finish()
    }
}

impl Pipeline {
    pub fn build(
        config: PipelineConfig,
        ctx: &AgentContext,
        registry: &PluginRegistry,
        sender_queues: &Arc<SenderQueueManager>,
        disk_writer: Option<&Arc<DiskBufferWriter>>,
        regions: Option<&Arc<RegionEndpointRegistry>>,
    ) -> LogFluxResult<Self> {
        let mut processors = Vec::with_capacity(config.processors.len());
        for processor_config in &config.processors {
            let type_name = plugin_type(processor_config)
                .ok_or_else(|| LogFluxError::config_parse(&config.name, "processor without Type"))?;
            let mut processor = registry.create_processor(type_name)?;
            processor.init(processor_config, ctx)?;
            processors.push(ProcessorInstance::new(processor));
        }

        let mut flushers: Vec<Arc<dyn Flusher>> = Vec::with_capacity(config.flushers.len());
        for flusher_config in &config.flushers {
            let type_name = plugin_type(flusher_config)
                .ok_or_else(|| LogFluxError::config_parse(&config.name, "flusher without Type"))?;
            let mut flusher = registry.create_flusher(type_name)?;
            flusher.init(flusher_config, &config.name, ctx, sender_queues)?;
            if let Some(writer) = disk_writer {
                flusher.set_disk_writer(Arc::clone(writer));
            }
            if let (Some(regions), Some((region, endpoint))) = (regions, flusher.region_endpoint())
            {
                regions.register_endpoint(&region, &endpoint, true);
            }
            flushers.push(Arc::from(flusher));
        }

        Ok(Self {
            process_queue_key: QueueKey::new(&config.name),
            name: config.name,
            detail: config.detail,
            create_time: config.create_time,
            processors,
            flushers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn detail(&self) -> &serde_json::Value {
        &self.detail
    }

    pub fn create_time(&self) -> i64 {
        self.create_time
    }

    pub fn process_queue_key(&self) -> &QueueKey {
        &self.process_queue_key
    }

    pub fn flusher_queue_keys(&self) -> Vec<QueueKey> {
        self.flushers.iter().map(|f| f.queue_key()).collect()
    }

    /// Runs the processor chain over the groups, in configured order.
    pub fn process(&self, groups: &mut Vec<PipelineEventGroup>) {
        for processor in &self.processors {
            processor.process(groups);
        }
    }

    /// Hands the processed groups to every flusher.
    pub fn send(&self, groups: Vec<PipelineEventGroup>) -> LogFluxResult<()> {
        for group in groups {
            if group.is_empty() {
                continue;
            }
            let Some((last, rest)) = self.flushers.split_last() else {
                continue;
            };
            for flusher in rest {
                flusher.send(group.clone())?;
            }
            last.send(group)?;
        }
        Ok(())
    }

    pub fn flush_all(&self) -> LogFluxResult<()> {
        for flusher in &self.flushers {
            flusher.flush_all()?;
        }
        Ok(())
    }

    pub fn flush_expired(&self, now: i64) {
        for flusher in &self.flushers {
            flusher.flush_expired(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::settings::Settings;
    use crate::core::event::{EventGroupMetaKey, SourceBuffer};
    use serde_json::json;

    fn build_pipeline(queues: &Arc<SenderQueueManager>) -> Pipeline {
        let ctx = AgentContext::new(Settings::default(), "10.0.0.1", "cn-test");
        let registry = PluginRegistry::new();
        let mut config = PipelineConfig::new(
            "scrape-1",
            json!({
                "inputs": [{"Type": "input_prometheus"}],
                "processors": [
                    {"Type": "processor_prom_parse_metric_native"},
                    {"Type": "processor_prom_relabel_metric_native", "job_name": "job-a",
                     "honor_labels": true}
                ],
                "flushers": [
                    {"Type": "flusher_log_store", "Project": "p", "Logstore": "s",
                     "Region": "cn-test", "PushRetryTimes": 1}
                ],
                "createTime": 7,
            }),
        );
        config.parse().expect("parse");
        Pipeline::build(config, &ctx, &registry, queues, None, None).expect("build")
    }

    #[test]
    fn test_build_and_run_chain() {
        let queues = Arc::new(SenderQueueManager::new(20));
        let pipeline = build_pipeline(&queues);
        assert_eq!(pipeline.name(), "scrape-1");
        assert_eq!(pipeline.create_time(), 7);
        assert_eq!(pipeline.flusher_queue_keys().len(), 1);

        let mut group = PipelineEventGroup::new(SourceBuffer::new());
        group.set_metadata_copy(EventGroupMetaKey::PrometheusStreamId, "s1");
        group.set_metadata_copy(EventGroupMetaKey::PrometheusScrapeTimestampMillisec, "1000");
        let content = group.copy_string("metric_a 1\nmetric_b 2\n");
        group.add_raw_event().set_content(content);

        let mut groups = vec![group];
        pipeline.process(&mut groups);
        assert_eq!(groups[0].events().len(), 2);
        assert!(groups[0].events().iter().all(|e| e.is_metric()));

        pipeline.send(groups.drain(..).collect()).expect("send");
        pipeline.flush_all().expect("flush");
        let key = pipeline.flusher_queue_keys().remove(0);
        assert_eq!(queues.queue_len(&key), 1);
    }

    #[test]
    fn test_unknown_plugin_fails_build() {
        let queues = Arc::new(SenderQueueManager::new(20));
        let ctx = AgentContext::new(Settings::default(), "10.0.0.1", "cn-test");
        let registry = PluginRegistry::new();
        let mut config = PipelineConfig::new(
            "bad",
            json!({
                "inputs": [{"Type": "input_prometheus"}],
                "processors": [{"Type": "processor_does_not_exist"}],
                "flushers": [{"Type": "flusher_log_store", "Project": "p", "Logstore": "s"}],
            }),
        );
        config.parse().expect("parse");
        let err = Pipeline::build(config, &ctx, &registry, &queues, None, None)
            .expect_err("must fail");
        assert!(matches!(err, LogFluxError::UnknownPlugin { .. }));
    }
}
