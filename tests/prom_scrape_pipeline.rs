// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scrape pipeline: raw chunks through parse and relabel into
//! the sender queue, verified down to the decoded wire bytes.

use std::sync::Arc;

use prost::Message;
use serde_json::json;

use logflux_rust::core::config::context::AgentContext;
use logflux_rust::core::config::diff::PipelineConfigDiff;
use logflux_rust::core::config::pipeline_config::PipelineConfig;
use logflux_rust::core::config::settings::Settings;
use logflux_rust::core::event::{EventGroupMetaKey, PipelineEventGroup, SourceBuffer};
use logflux_rust::core::flusher::compress::{decompress, CompressType};
use logflux_rust::core::pipeline::manager::PipelineManager;
use logflux_rust::core::pipeline::registry::PluginRegistry;
use logflux_rust::core::pipeline::runner::ProcessorRunner;
use logflux_rust::core::protocol::models::LogGroup;
use logflux_rust::core::queue::{ProcessQueueItem, ProcessQueueManager, QueueKey, SenderQueueManager};

fn scrape_group(stream_id: &str, content: &str, last_chunk: bool) -> PipelineEventGroup {
    let mut group = PipelineEventGroup::new(SourceBuffer::new());
    group.set_metadata_copy(EventGroupMetaKey::PrometheusStreamId, stream_id);
    group.set_metadata_copy(
        EventGroupMetaKey::PrometheusScrapeTimestampMillisec,
        "1715829785083",
    );
    if last_chunk {
        group.set_metadata_copy(EventGroupMetaKey::PrometheusUpState, "true");
        group.set_metadata_copy(EventGroupMetaKey::PrometheusScrapeDuration, "1.5");
        group.set_metadata_copy(EventGroupMetaKey::PrometheusScrapeResponseSize, "2325");
        group.set_metadata_copy(EventGroupMetaKey::PrometheusInstance, "localhost:8080");
    }
    let view = group.copy_string(content);
    group.add_raw_event().set_content(view);
    group
}

fn setup() -> (
    Arc<PipelineManager>,
    Arc<ProcessQueueManager>,
    Arc<SenderQueueManager>,
) {
    let ctx = AgentContext::new(Settings::default(), "10.0.0.1", "cn-test");
    let sender = Arc::new(SenderQueueManager::new(20));
    let process = Arc::new(ProcessQueueManager::new(Arc::clone(&sender), 20));
    let manager = Arc::new(PipelineManager::new(
        ctx,
        Arc::new(PluginRegistry::new()),
        Arc::clone(&process),
        Arc::clone(&sender),
    ));

    let mut config = PipelineConfig::new(
        "scrape",
        json!({
            "inputs": [{"Type": "input_prometheus"}],
            "processors": [
                {"Type": "processor_prom_parse_metric_native"},
                {"Type": "processor_prom_relabel_metric_native",
                 "job_name": "test_job", "honor_labels": true,
                 "sample_limit": 1000, "scrape_timeout": "15s"}
            ],
            "flushers": [
                {"Type": "flusher_log_store", "Project": "proj", "Logstore": "store",
                 "Region": "cn-test", "PushRetryTimes": 1}
            ],
        }),
    );
    config.parse().expect("parse config");
    manager.update_pipelines(PipelineConfigDiff {
        added: vec![config],
        ..Default::default()
    });
    (manager, process, sender)
}

fn decoded_sender_payload(sender: &SenderQueueManager) -> LogGroup {
    let items = sender.pop_ready(i64::MAX - 1, |_| true);
    assert_eq!(items.len(), 1, "expected one closed batch");
    let item = &items[0];
    assert_eq!(item.compress_type, CompressType::Lz4);
    let raw = decompress(&item.data, item.raw_size, item.compress_type).expect("decompress");
    LogGroup::decode(raw.as_slice()).expect("decode log group")
}

fn content_value<'a>(log: &'a LogGroup, index: usize, key: &str) -> Option<&'a str> {
    log.logs[index]
        .contents
        .iter()
        .find(|c| c.key == key)
        .map(|c| c.value.as_str())
}

#[test]
fn test_chunked_scrape_parses_like_monolithic() {
    let (manager, process, sender) = setup();
    let key = QueueKey::new("scrape");
    let runner = ProcessorRunner::new(Arc::clone(&process), Arc::clone(&manager));

    // A chunk boundary splits go_goroutines in the middle.
    process
        .push(
            &key,
            ProcessQueueItem::new(
                scrape_group(
                    "s1",
                    "go_gc_duration_seconds{quantile=\"0\"} 1.5e-05\n# HELP x\ngo_go",
                    false,
                ),
                0,
            ),
        )
        .expect("push chunk 1");
    process
        .push(
            &key,
            ProcessQueueItem::new(scrape_group("s1", "routines 7\n", true), 0),
        )
        .expect("push chunk 2");

    assert_eq!(runner.run_once(0), 2);
    manager.flush_all_pipelines();

    let log_group = decoded_sender_payload(&sender);
    let names: Vec<&str> = log_group
        .logs
        .iter()
        .map(|log| {
            log.contents
                .iter()
                .find(|c| c.key == "__name__")
                .map(|c| c.value.as_str())
                .expect("metric name")
        })
        .collect();

    // The split line was rejoined from the stream cache.
    assert!(names.contains(&"go_gc_duration_seconds"));
    assert!(names.contains(&"go_goroutines"));
    let goroutines_idx = names.iter().position(|n| *n == "go_goroutines").expect("idx");
    assert_eq!(
        content_value(&log_group, goroutines_idx, "__value__"),
        Some("7")
    );
}

#[test]
fn test_relabel_drop_and_auto_metrics_on_the_wire() {
    let ctx = AgentContext::new(Settings::default(), "10.0.0.1", "cn-test");
    let sender = Arc::new(SenderQueueManager::new(20));
    let process = Arc::new(ProcessQueueManager::new(Arc::clone(&sender), 20));
    let manager = Arc::new(PipelineManager::new(
        ctx,
        Arc::new(PluginRegistry::new()),
        Arc::clone(&process),
        Arc::clone(&sender),
    ));
    let mut config = PipelineConfig::new(
        "scrape",
        json!({
            "inputs": [{"Type": "input_prometheus"}],
            "processors": [
                {"Type": "processor_prom_parse_metric_native"},
                {"Type": "processor_prom_relabel_metric_native",
                 "job_name": "test_job", "honor_labels": true,
                 "sample_limit": 1000, "scrape_timeout": "15s",
                 "metric_relabel_configs": [
                     {"action": "drop", "source_labels": ["k3"], "regex": "v.*"}
                 ]}
            ],
            "flushers": [
                {"Type": "flusher_log_store", "Project": "proj", "Logstore": "store",
                 "Region": "cn-test", "PushRetryTimes": 1}
            ],
        }),
    );
    config.parse().expect("parse config");
    manager.update_pipelines(PipelineConfigDiff {
        added: vec![config],
        ..Default::default()
    });

    // 8 samples, one of them with k3="v2"; the count cache publishes
    // samples_scraped=8 when the up-state chunk lands.
    let mut text = String::new();
    for i in 0..8 {
        if i == 3 {
            text.push_str(&format!("metric_{i}{{k3=\"v2\"}} 1\n"));
        } else {
            text.push_str(&format!("metric_{i}{{k3=\"x\"}} 1\n"));
        }
    }
    let key = QueueKey::new("scrape");
    let runner = ProcessorRunner::new(Arc::clone(&process), Arc::clone(&manager));
    process
        .push(&key, ProcessQueueItem::new(scrape_group("s2", &text, true), 0))
        .expect("push");
    runner.run_once(0);
    manager.flush_all_pipelines();

    let log_group = decoded_sender_payload(&sender);
    assert_eq!(log_group.logs.len(), 14, "7 user + 7 auto metrics");

    let expectations = [
        ("scrape_duration_seconds", "1.5"),
        ("scrape_response_size_bytes", "2325"),
        ("scrape_samples_limit", "1000"),
        ("scrape_samples_post_metric_relabeling", "7"),
        ("scrape_samples_scraped", "8"),
        ("scrape_timeout_seconds", "15"),
        ("up", "1"),
    ];
    for (name, value) in expectations {
        let idx = log_group
            .logs
            .iter()
            .position(|log| {
                log.contents
                    .iter()
                    .any(|c| c.key == "__name__" && c.value == name)
            })
            .unwrap_or_else(|| panic!("auto metric {name} missing"));
        assert_eq!(content_value(&log_group, idx, "__value__"), Some(value), "{name}");
        let labels = content_value(&log_group, idx, "__labels__").expect("labels");
        assert!(labels.contains("job#$#test_job"), "{name}: {labels}");
        assert!(labels.contains("instance#$#localhost:8080"), "{name}: {labels}");
    }
}
