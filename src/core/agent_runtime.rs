// SPDX-License-Identifier: MIT OR Apache-2.0

//! Agent Runtime
//!
//! Builds the component graph and owns the long-lived threads: processor
//! workers, batch timer, sender daemon, disk buffer writer and replayer,
//! network probe and config watcher. `flush_out` drains everything with a
//! deadline on shutdown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::core::alarm::AlarmType;
use crate::core::buffer::DiskBufferWriter;
use crate::core::config::context::AgentContext;
use crate::core::config::watcher::ConfigWatcher;
use crate::core::pipeline::manager::PipelineManager;
use crate::core::pipeline::registry::PluginRegistry;
use crate::core::pipeline::runner::ProcessorRunner;
use crate::core::queue::{ProcessQueueManager, SenderQueueManager};
use crate::core::sender::endpoint_registry::{NetworkProber, RegionEndpointRegistry};
use crate::core::sender::scheduler::{probe_loop, SendScheduler};
use crate::core::sender::send_client::SendClient;

const JOIN_STAGE_ONE_TIMEOUT: Duration = Duration::from_secs(3);
const JOIN_STAGE_TWO_TIMEOUT: Duration = Duration::from_secs(1);

pub struct AgentRuntime {
    ctx: AgentContext,
    sender_queues: Arc<SenderQueueManager>,
    process_queues: Arc<ProcessQueueManager>,
    regions: Arc<RegionEndpointRegistry>,
    manager: Arc<PipelineManager>,
    disk_writer: Arc<DiskBufferWriter>,
    scheduler: Arc<SendScheduler>,
    watcher: Arc<ConfigWatcher>,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl AgentRuntime {
    pub fn new(
        ctx: AgentContext,
        client: Arc<dyn SendClient>,
        config_dirs: Vec<PathBuf>,
    ) -> Self {
        let settings = ctx.settings();
        let sender_queues = Arc::new(SenderQueueManager::new(settings.sender_queue_capacity));
        let process_queues = Arc::new(ProcessQueueManager::new(
            Arc::clone(&sender_queues),
            settings.process_queue_capacity,
        ));
        let regions = Arc::new(RegionEndpointRegistry::new(
            settings.send_request_concurrency,
            settings.reset_region_concurrency_error_count,
        ));
        let registry = Arc::new(PluginRegistry::new());
        let manager = Arc::new(PipelineManager::new(
            ctx.clone(),
            registry,
            Arc::clone(&process_queues),
            Arc::clone(&sender_queues),
        ));
        let disk_writer = Arc::new(DiskBufferWriter::new(ctx.clone()));
        disk_writer.set_send_client(Arc::clone(&client));
        disk_writer.set_endpoint_registry(Arc::clone(&regions));
        manager.set_disk_writer(Arc::clone(&disk_writer));
        manager.set_endpoint_registry(Arc::clone(&regions));

        let scheduler = Arc::new(SendScheduler::new(
            ctx.clone(),
            Arc::clone(&sender_queues),
            Arc::clone(&regions),
            client,
            Some(Arc::clone(&disk_writer)),
        ));
        let watcher = Arc::new(ConfigWatcher::new(
            ctx.clone(),
            Arc::clone(&manager),
            config_dirs,
        ));

        Self {
            ctx,
            sender_queues,
            process_queues,
            regions,
            manager,
            disk_writer,
            scheduler,
            watcher,
            running: Arc::new(AtomicBool::new(true)),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn manager(&self) -> &Arc<PipelineManager> {
        &self.manager
    }

    pub fn watcher(&self) -> &Arc<ConfigWatcher> {
        &self.watcher
    }

    pub fn process_queues(&self) -> &Arc<ProcessQueueManager> {
        &self.process_queues
    }

    pub fn sender_queues(&self) -> &Arc<SenderQueueManager> {
        &self.sender_queues
    }

    pub fn regions(&self) -> &Arc<RegionEndpointRegistry> {
        &self.regions
    }

    pub fn disk_writer(&self) -> &Arc<DiskBufferWriter> {
        &self.disk_writer
    }

    /// Spawns every long-lived thread. Idempotence is not required; call
    /// once at boot.
    pub fn start(&self, prober: Option<Arc<dyn NetworkProber>>) {
        let mut threads = self.threads.lock().expect("runtime threads lock");

        {
            let watcher = Arc::clone(&self.watcher);
            let manager = Arc::clone(&self.manager);
            let running = Arc::clone(&self.running);
            let interval = self.ctx.settings().config_scan_interval_secs.max(1) as u64;
            threads.push(std::thread::spawn(move || {
                let ticker = crossbeam_channel::tick(Duration::from_secs(interval));
                while running.load(Ordering::Relaxed) {
                    let (pipeline_diff, task_diff) = watcher.check_config_diff();
                    if !pipeline_diff.is_empty() {
                        manager.update_pipelines(pipeline_diff);
                    }
                    if !task_diff.is_empty() {
                        manager.update_tasks(task_diff);
                    }
                    if ticker.recv().is_err() {
                        break;
                    }
                }
            }));
        }

        {
            let runner = ProcessorRunner::new(
                Arc::clone(&self.process_queues),
                Arc::clone(&self.manager),
            );
            let running = Arc::clone(&self.running);
            threads.push(std::thread::spawn(move || {
                runner.run_loop(&running);
            }));
        }

        {
            let manager = Arc::clone(&self.manager);
            let running = Arc::clone(&self.running);
            threads.push(std::thread::spawn(move || {
                let ticker = crossbeam_channel::tick(Duration::from_secs(1));
                while running.load(Ordering::Relaxed) {
                    manager.flush_expired_batches(unix_now());
                    if ticker.recv().is_err() {
                        break;
                    }
                }
            }));
        }

        {
            let scheduler = Arc::clone(&self.scheduler);
            threads.push(std::thread::spawn(move || {
                scheduler.run_loop();
            }));
        }

        {
            let writer = Arc::clone(&self.disk_writer);
            threads.push(std::thread::spawn(move || {
                writer.writer_loop();
            }));
        }
        {
            let writer = Arc::clone(&self.disk_writer);
            threads.push(std::thread::spawn(move || {
                writer.replayer_loop();
            }));
        }

        if let Some(prober) = prober {
            let regions = Arc::clone(&self.regions);
            let queues = Arc::clone(&self.sender_queues);
            let running = Arc::clone(&self.running);
            threads.push(std::thread::spawn(move || {
                probe_loop(regions, queues, prober, Duration::from_secs(3), running);
            }));
        }
    }

    /// Drains the pipeline within `deadline`: producers stop, batches are
    /// force-closed, in-memory queues and the disk secondary drain, then
    /// threads join with per-stage timeouts. Returns whether everything
    /// made it out; on timeout the shutdown alarm fires.
    pub fn flush_out(&self, deadline: Duration) -> bool {
        let start = Instant::now();
        self.running.store(false, Ordering::SeqCst);
        self.sender_queues.set_urgent_all(true);
        self.process_queues.signal();

        // Drain loop: keep force-closing batches while the workers and the
        // sender empty the queues. Two consecutive all-empty observations
        // guard against a group that was mid-chain on the first one.
        let mut empty_rounds = 0;
        while start.elapsed() < deadline {
            let process_empty = self.process_queues.all_empty();
            if process_empty {
                self.manager.flush_all_pipelines();
            }
            if process_empty && self.sender_queues.all_empty() {
                empty_rounds += 1;
                if empty_rounds >= 2 {
                    break;
                }
            } else {
                empty_rounds = 0;
            }
            self.sender_queues.signal();
            std::thread::sleep(Duration::from_millis(20));
        }

        self.disk_writer.stop();
        while start.elapsed() < deadline && !self.disk_writer.secondary_empty() {
            std::thread::sleep(Duration::from_millis(20));
        }
        self.scheduler.stop();

        let drained = self.process_queues.all_empty()
            && self.sender_queues.all_empty()
            && self.disk_writer.secondary_empty();
        if !drained {
            self.ctx.alarms().send_alarm(
                AlarmType::Shutdown,
                "shutdown deadline reached with data still in flight",
            );
        }

        let mut threads = self.threads.lock().expect("runtime threads lock");
        let handles: Vec<JoinHandle<()>> = threads.drain(..).collect();
        drop(threads);
        join_with_timeouts(handles);
        drained
    }
}

fn join_with_timeouts(handles: Vec<JoinHandle<()>>) {
    for timeout in [JOIN_STAGE_ONE_TIMEOUT, JOIN_STAGE_TWO_TIMEOUT] {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if handles.iter().all(|h| h.is_finished()) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
    for handle in handles {
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            tracing::warn!("runtime thread forced to stop");
        }
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
