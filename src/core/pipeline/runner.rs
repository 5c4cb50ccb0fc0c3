// SPDX-License-Identifier: MIT OR Apache-2.0

//! Processor Worker
//!
//! Pops groups from the process queues and runs them through their
//! pipeline's chain, one group at a time to preserve order. Items bound to
//! an old pipeline during a swap keep using it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::event::ThreadedEventPool;
use crate::core::pipeline::manager::PipelineManager;
use crate::core::queue::ProcessQueueManager;

pub struct ProcessorRunner {
    process_queues: Arc<ProcessQueueManager>,
    manager: Arc<PipelineManager>,
    event_pools: ThreadedEventPool,
}

impl ProcessorRunner {
    pub fn new(process_queues: Arc<ProcessQueueManager>, manager: Arc<PipelineManager>) -> Self {
        Self {
            process_queues,
            manager,
            event_pools: ThreadedEventPool::new(),
        }
    }

    /// Drains every process queue once; returns how many groups ran.
    pub fn run_once(&self, now: i64) -> usize {
        let mut processed = 0;
        for key in self.process_queues.keys() {
            while let Some(item) = self.process_queues.pop(&key) {
                let pipeline = item
                    .pipeline
                    .clone()
                    .or_else(|| self.manager.find_config_by_name(key.as_str()));
                let Some(pipeline) = pipeline else {
                    tracing::warn!(queue = %key, "dropping group without pipeline");
                    continue;
                };
                let mut groups = vec![item.group];
                pipeline.process(&mut groups);
                if let Err(e) = pipeline.send(groups) {
                    tracing::warn!(pipeline = pipeline.name(), error = %e, "send failed");
                }
                processed += 1;
            }
        }
        self.event_pools.get().check_gc(now);
        processed
    }

    pub fn run_loop(&self, stop: &AtomicBool) {
        tracing::info!("processor runner started");
        while !stop.load(Ordering::Relaxed) {
            self.process_queues.wait(Duration::from_secs(1));
            self.run_once(unix_now());
        }
        // Final drain so shutdown loses nothing queued.
        self.run_once(unix_now());
        tracing::info!("processor runner stopped");
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
