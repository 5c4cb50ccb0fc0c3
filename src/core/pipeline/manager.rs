// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline Manager
//!
//! Consumes config diffs, builds pipelines and swaps them in atomically.
//! Before a swap, queued items are bound to their old pipeline so no
//! processor chain is substituted mid-flight. A build failure keeps the
//! running pipeline untouched.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::core::alarm::AlarmType;
use crate::core::buffer::DiskBufferWriter;
use crate::core::config::context::AgentContext;
use crate::core::config::diff::{PipelineConfigDiff, TaskConfigDiff};
use crate::core::config::pipeline_config::PipelineConfig;
use crate::core::pipeline::pipeline::Pipeline;
use crate::core::pipeline::registry::PluginRegistry;
use crate::core::queue::{ProcessQueueManager, QueueKey, SenderQueueManager};
use crate::core::sender::endpoint_registry::RegionEndpointRegistry;

pub struct PipelineManager {
    ctx: AgentContext,
    registry: Arc<PluginRegistry>,
    process_queues: Arc<ProcessQueueManager>,
    sender_queues: Arc<SenderQueueManager>,
    disk_writer: RwLock<Option<Arc<DiskBufferWriter>>>,
    regions: RwLock<Option<Arc<RegionEndpointRegistry>>>,
    pipelines: RwLock<HashMap<String, Arc<Pipeline>>>,
    tasks: RwLock<HashMap<String, serde_json::Value>>,
}

impl PipelineManager {
    pub fn new(
        ctx: AgentContext,
        registry: Arc<PluginRegistry>,
        process_queues: Arc<ProcessQueueManager>,
        sender_queues: Arc<SenderQueueManager>,
    ) -> Self {
        Self {
            ctx,
            registry,
            process_queues,
            sender_queues,
            disk_writer: RwLock::new(None),
            regions: RwLock::new(None),
            pipelines: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_disk_writer(&self, writer: Arc<DiskBufferWriter>) {
        *self.disk_writer.write().expect("manager disk writer lock") = Some(writer);
    }

    pub fn set_endpoint_registry(&self, regions: Arc<RegionEndpointRegistry>) {
        *self.regions.write().expect("manager regions lock") = Some(regions);
    }

    pub fn find_config_by_name(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.pipelines
            .read()
            .expect("manager pipelines lock")
            .get(name)
            .cloned()
    }

    pub fn all_config_names(&self) -> Vec<String> {
        self.pipelines
            .read()
            .expect("manager pipelines lock")
            .keys()
            .cloned()
            .collect()
    }

    pub fn find_task_by_name(&self, name: &str) -> Option<serde_json::Value> {
        self.tasks
            .read()
            .expect("manager tasks lock")
            .get(name)
            .cloned()
    }

    pub fn all_task_names(&self) -> Vec<String> {
        self.tasks
            .read()
            .expect("manager tasks lock")
            .keys()
            .cloned()
            .collect()
    }

    pub fn process_queues(&self) -> &Arc<ProcessQueueManager> {
        &self.process_queues
    }

    pub fn update_pipelines(&self, diff: PipelineConfigDiff) {
        for name in diff.removed {
            self.stop_pipeline(&name);
        }
        for config in diff.modified {
            let name = config.name.clone();
            match self.build_pipeline(config) {
                Ok(pipeline) => {
                    let key = QueueKey::new(&name);
                    if let Some(old) = self.find_config_by_name(&name) {
                        self.process_queues.attach_pipeline(&key, &old);
                    }
                    self.pipelines
                        .write()
                        .expect("manager pipelines lock")
                        .insert(name.clone(), pipeline);
                    tracing::info!(config = %name, "pipeline rebuilt and swapped in");
                }
                Err(e) => {
                    tracing::error!(config = %name, error = %e, "pipeline rebuild failed, keep current pipeline running");
                    self.ctx.alarms().send_alarm(
                        AlarmType::CategoryConfig,
                        format!("pipeline rebuild failed: {name}: {e}"),
                    );
                }
            }
        }
        for config in diff.added {
            let name = config.name.clone();
            match self.build_pipeline(config) {
                Ok(pipeline) => {
                    self.pipelines
                        .write()
                        .expect("manager pipelines lock")
                        .insert(name.clone(), pipeline);
                    tracing::info!(config = %name, "pipeline built and started");
                }
                Err(e) => {
                    tracing::error!(config = %name, error = %e, "pipeline build failed, skip config");
                    self.ctx.alarms().send_alarm(
                        AlarmType::CategoryConfig,
                        format!("pipeline build failed: {name}: {e}"),
                    );
                }
            }
        }
    }

    pub fn update_tasks(&self, diff: TaskConfigDiff) {
        let mut tasks = self.tasks.write().expect("manager tasks lock");
        for name in diff.removed {
            tasks.remove(&name);
            tracing::info!(config = %name, "task stopped");
        }
        for task in diff.added.into_iter().chain(diff.modified) {
            tracing::info!(config = %task.name, "task started");
            tasks.insert(task.name, task.detail);
        }
    }

    fn build_pipeline(&self, config: PipelineConfig) -> crate::core::exception::LogFluxResult<Arc<Pipeline>> {
        let disk_writer = self.disk_writer.read().expect("manager disk writer lock").clone();
        let regions = self.regions.read().expect("manager regions lock").clone();
        let pipeline = Pipeline::build(
            config,
            &self.ctx,
            &self.registry,
            &self.sender_queues,
            disk_writer.as_ref(),
            regions.as_ref(),
        )?;
        let key = pipeline.process_queue_key().clone();
        self.process_queues
            .create_queue(key, pipeline.flusher_queue_keys());
        Ok(Arc::new(pipeline))
    }

    fn stop_pipeline(&self, name: &str) {
        let Some(pipeline) = self
            .pipelines
            .write()
            .expect("manager pipelines lock")
            .remove(name)
        else {
            return;
        };
        let key = QueueKey::new(name);
        // Drain what is still queued through the outgoing chain, then close
        // its batches.
        let leftovers = self.process_queues.delete_queue(&key);
        let mut groups: Vec<_> = leftovers.into_iter().map(|item| item.group).collect();
        if !groups.is_empty() {
            pipeline.process(&mut groups);
            if let Err(e) = pipeline.send(groups) {
                tracing::warn!(config = name, error = %e, "failed to drain removed pipeline");
            }
        }
        if let Err(e) = pipeline.flush_all() {
            tracing::warn!(config = name, error = %e, "failed to flush removed pipeline");
        }
        tracing::info!(config = name, "pipeline stopped");
    }

    pub fn flush_all_pipelines(&self) {
        let pipelines: Vec<Arc<Pipeline>> = self
            .pipelines
            .read()
            .expect("manager pipelines lock")
            .values()
            .cloned()
            .collect();
        for pipeline in pipelines {
            if let Err(e) = pipeline.flush_all() {
                tracing::warn!(config = pipeline.name(), error = %e, "flush failed");
            }
        }
    }

    pub fn flush_expired_batches(&self, now: i64) {
        let pipelines: Vec<Arc<Pipeline>> = self
            .pipelines
            .read()
            .expect("manager pipelines lock")
            .values()
            .cloned()
            .collect();
        for pipeline in pipelines {
            pipeline.flush_expired(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::settings::Settings;
    use serde_json::json;

    fn manager() -> PipelineManager {
        let ctx = AgentContext::new(Settings::default(), "10.0.0.1", "cn-test");
        let sender = Arc::new(SenderQueueManager::new(20));
        let process = Arc::new(ProcessQueueManager::new(Arc::clone(&sender), 20));
        PipelineManager::new(ctx, Arc::new(PluginRegistry::new()), process, sender)
    }

    fn config(name: &str, job: &str) -> PipelineConfig {
        let mut config = PipelineConfig::new(
            name,
            json!({
                "inputs": [{"Type": "input_prometheus"}],
                "processors": [
                    {"Type": "processor_prom_relabel_metric_native", "job_name": job,
                     "honor_labels": true}
                ],
                "flushers": [
                    {"Type": "flusher_log_store", "Project": "p", "Logstore": name,
                     "Region": "cn-test"}
                ],
            }),
        );
        config.parse().expect("parse");
        config
    }

    #[test]
    fn test_add_modify_remove_lifecycle() {
        let mgr = manager();
        mgr.update_pipelines(PipelineConfigDiff {
            added: vec![config("p1", "job-a")],
            ..Default::default()
        });
        assert!(mgr.find_config_by_name("p1").is_some());
        assert!(mgr.process_queues().has_queue(&QueueKey::new("p1")));

        let before = mgr.find_config_by_name("p1").expect("pipeline");
        mgr.update_pipelines(PipelineConfigDiff {
            modified: vec![config("p1", "job-b")],
            ..Default::default()
        });
        let after = mgr.find_config_by_name("p1").expect("pipeline");
        assert!(!Arc::ptr_eq(&before, &after));

        mgr.update_pipelines(PipelineConfigDiff {
            removed: vec!["p1".to_string()],
            ..Default::default()
        });
        assert!(mgr.find_config_by_name("p1").is_none());
        assert!(!mgr.process_queues().has_queue(&QueueKey::new("p1")));
    }

    #[test]
    fn test_failed_build_keeps_running_pipeline() {
        let mgr = manager();
        mgr.update_pipelines(PipelineConfigDiff {
            added: vec![config("p1", "job-a")],
            ..Default::default()
        });
        let running = mgr.find_config_by_name("p1").expect("pipeline");

        let mut broken = PipelineConfig::new(
            "p1",
            json!({
                "inputs": [{"Type": "input_prometheus"}],
                "processors": [{"Type": "processor_missing"}],
                "flushers": [{"Type": "flusher_log_store", "Project": "p", "Logstore": "s"}],
            }),
        );
        broken.parse().expect("parse");
        mgr.update_pipelines(PipelineConfigDiff {
            modified: vec![broken],
            ..Default::default()
        });

        let still = mgr.find_config_by_name("p1").expect("pipeline");
        assert!(Arc::ptr_eq(&running, &still));
    }

    #[test]
    fn test_task_lifecycle() {
        let mgr = manager();
        mgr.update_tasks(TaskConfigDiff {
            added: vec![crate::core::config::pipeline_config::TaskConfig::new(
                "t1",
                json!({"task": {"Type": "task_upgrade"}}),
            )],
            ..Default::default()
        });
        assert!(mgr.find_task_by_name("t1").is_some());
        mgr.update_tasks(TaskConfigDiff {
            removed: vec!["t1".to_string()],
            ..Default::default()
        });
        assert!(mgr.find_task_by_name("t1").is_none());
    }
}
