// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus Relabel Processor
//!
//! Applies the ordered metric relabel rules to every metric event, then
//! appends the scrape self-metrics once the group carries the up-state
//! marker. With `honor_labels` off, an event label colliding with a
//! group-level tag is renamed to `exported_<label>` so the target's label
//! wins on the wire.

use std::collections::BTreeMap;

use super::relabel::RelabelConfigList;
use super::NAME_LABEL;
use crate::core::config::context::AgentContext;
use crate::core::event::{
    EventGroupMetaKey, MetricEvent, MetricValue, PipelineEvent, PipelineEventGroup, StringView,
};
use crate::core::exception::{LogFluxError, LogFluxResult};
use crate::core::pipeline::processor::Processor;

const SCRAPE_DURATION_SECONDS: &str = "scrape_duration_seconds";
const SCRAPE_RESPONSE_SIZE_BYTES: &str = "scrape_response_size_bytes";
const SCRAPE_SAMPLES_LIMIT: &str = "scrape_samples_limit";
const SCRAPE_SAMPLES_POST_METRIC_RELABELING: &str = "scrape_samples_post_metric_relabeling";
const SCRAPE_SAMPLES_SCRAPED: &str = "scrape_samples_scraped";
const SCRAPE_TIMEOUT_SECONDS: &str = "scrape_timeout_seconds";
const UP: &str = "up";
const JOB: &str = "job";
const INSTANCE: &str = "instance";

#[derive(Default)]
pub struct ProcessorPromRelabel {
    metric_relabel_configs: RelabelConfigList,
    honor_labels: bool,
    job_name: String,
    scrape_timeout_seconds: f64,
    sample_limit: i64,
}

impl ProcessorPromRelabel {
    fn process_event(&self, event: &mut MetricEvent, group: &mut PipelineEventGroup) -> bool {
        let mut labels: BTreeMap<String, String> = event
            .tags()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels
            .entry(NAME_LABEL.to_string())
            .or_insert_with(|| event.name().to_string());

        if !self.metric_relabel_configs.process(&mut labels) {
            return false;
        }

        let Some(name) = labels.remove(NAME_LABEL).filter(|n| !n.is_empty()) else {
            tracing::error!("metric relabel: metric event name is empty");
            return false;
        };

        if !self.honor_labels {
            // The group-level tag wins on the wire; the event's own value
            // survives under the exported_ prefix.
            let collisions: Vec<String> = group
                .tags()
                .keys()
                .filter(|k| labels.contains_key(k.as_str()))
                .map(|k| k.as_str().to_string())
                .collect();
            for key in collisions {
                if let Some(value) = labels.remove(&key) {
                    labels.insert(format!("exported_{key}"), value);
                }
            }
        }

        let name_view = group.copy_string(&name);
        let label_views: Vec<(StringView, StringView)> = labels
            .iter()
            .map(|(k, v)| (group.copy_string(k), group.copy_string(v)))
            .collect();
        event.set_name(name_view);
        event.tags_mut().clear();
        for (k, v) in label_views {
            event.set_tag(k, v);
        }
        true
    }

    fn add_auto_metrics(&self, group: &mut PipelineEventGroup) {
        let Some(up_state) = group
            .get_metadata(EventGroupMetaKey::PrometheusUpState)
            .map(|v| v.as_str().to_string())
        else {
            return;
        };

        let timestamp_ms: u64 = group
            .get_metadata(EventGroupMetaKey::PrometheusScrapeTimestampMillisec)
            .and_then(|v| v.as_str().parse().ok())
            .unwrap_or(0);
        let seconds = (timestamp_ms / 1000) as i64;
        let nanos = (timestamp_ms % 1000 * 1_000_000) as u32;

        let instance = group
            .get_metadata(EventGroupMetaKey::PrometheusInstance)
            .cloned()
            .unwrap_or_default();
        let samples_post_relabel = group.events().len() as f64;
        let scrape_duration: f64 = group
            .get_metadata(EventGroupMetaKey::PrometheusScrapeDuration)
            .and_then(|v| v.as_str().parse().ok())
            .unwrap_or(0.0);
        let response_size: f64 = group
            .get_metadata(EventGroupMetaKey::PrometheusScrapeResponseSize)
            .and_then(|v| v.as_str().parse().ok())
            .unwrap_or(0.0);
        let samples_scraped: f64 = group
            .get_metadata(EventGroupMetaKey::PrometheusSamplesScraped)
            .and_then(|v| v.as_str().parse().ok())
            .unwrap_or(0.0);
        let job = group.copy_string(&self.job_name);

        let mut add = |group: &mut PipelineEventGroup, name: &'static str, value: f64| {
            let event = group.add_metric_event();
            event.set_name(StringView::from_static(name));
            event.set_value(MetricValue::UntypedSingle(value));
            event.set_timestamp(seconds, Some(nanos));
            event.set_tag(StringView::from_static(JOB), job.clone());
            event.set_tag(StringView::from_static(INSTANCE), instance.clone());
        };

        add(group, SCRAPE_DURATION_SECONDS, scrape_duration);
        add(group, SCRAPE_RESPONSE_SIZE_BYTES, response_size);
        if self.sample_limit > 0 {
            add(group, SCRAPE_SAMPLES_LIMIT, self.sample_limit as f64);
        }
        add(group, SCRAPE_SAMPLES_POST_METRIC_RELABELING, samples_post_relabel);
        add(group, SCRAPE_SAMPLES_SCRAPED, samples_scraped);
        add(group, SCRAPE_TIMEOUT_SECONDS, self.scrape_timeout_seconds);
        // The up metric must be the last one.
        add(group, UP, if up_state == "true" { 1.0 } else { 0.0 });
    }
}

fn parse_timeout_seconds(value: &serde_json::Value) -> Option<f64> {
    if let Some(n) = value.as_f64() {
        return Some(n);
    }
    let s = value.as_str()?;
    s.strip_suffix('s').unwrap_or(s).parse().ok()
}

impl Processor for ProcessorPromRelabel {
    fn name(&self) -> &'static str {
        "processor_prom_relabel_metric_native"
    }

    fn init(&mut self, config: &serde_json::Value, _ctx: &AgentContext) -> LogFluxResult<()> {
        if let Some(rules) = config.get("metric_relabel_configs") {
            self.metric_relabel_configs = RelabelConfigList::from_json(rules)?;
        }
        self.honor_labels = config
            .get("honor_labels")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        self.job_name = config
            .get("job_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LogFluxError::plugin_init(self.name(), "missing job_name"))?
            .to_string();
        self.scrape_timeout_seconds = config
            .get("scrape_timeout")
            .and_then(parse_timeout_seconds)
            .unwrap_or(10.0);
        self.sample_limit = config
            .get("sample_limit")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Ok(())
    }

    fn supports(&self, event: &PipelineEvent) -> bool {
        event.is_metric()
    }

    fn process(&self, group: &mut PipelineEventGroup) {
        if !self.metric_relabel_configs.is_empty() || !self.honor_labels {
            let events = group.take_events();
            let mut kept = Vec::with_capacity(events.len());
            for mut event in events {
                match &mut event {
                    PipelineEvent::Metric(m) => {
                        if self.process_event(m, group) {
                            kept.push(event);
                        }
                    }
                    // Unsupported events pass through untouched.
                    _ => kept.push(event),
                }
            }
            *group.events_mut() = kept;
        }
        self.add_auto_metrics(group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::SourceBuffer;
    use serde_json::json;

    fn build(config: serde_json::Value) -> ProcessorPromRelabel {
        let ctx = AgentContext::default();
        let mut p = ProcessorPromRelabel::default();
        p.init(&config, &ctx).expect("init");
        p
    }

    fn add_metric(group: &mut PipelineEventGroup, name: &str, tags: &[(&str, &str)]) {
        let name = group.copy_string(name);
        let tag_views: Vec<(StringView, StringView)> = tags
            .iter()
            .map(|(k, v)| (group.copy_string(k), group.copy_string(v)))
            .collect();
        let e = group.add_metric_event();
        e.set_name(name.clone());
        e.set_value(MetricValue::UntypedSingle(1.0));
        for (k, v) in tag_views {
            e.set_tag(k, v);
        }
    }

    #[test]
    fn test_drop_rule_and_auto_metrics() {
        let p = build(json!({
            "job_name": "test_job",
            "honor_labels": true,
            "sample_limit": 1000,
            "scrape_timeout": "15s",
            "metric_relabel_configs": [
                {"action": "drop", "source_labels": ["k3"], "regex": "v.*"}
            ]
        }));

        let mut group = PipelineEventGroup::new(SourceBuffer::new());
        group.set_metadata_copy(EventGroupMetaKey::PrometheusUpState, "true");
        group.set_metadata_copy(EventGroupMetaKey::PrometheusScrapeTimestampMillisec, "1715829785083");
        group.set_metadata_copy(EventGroupMetaKey::PrometheusScrapeDuration, "1.5");
        group.set_metadata_copy(EventGroupMetaKey::PrometheusScrapeResponseSize, "2325");
        group.set_metadata_copy(EventGroupMetaKey::PrometheusSamplesScraped, "8");
        group.set_metadata_copy(EventGroupMetaKey::PrometheusInstance, "localhost:8080");

        for i in 0..8 {
            if i == 3 {
                add_metric(&mut group, &format!("metric_{i}"), &[("k3", "v2")]);
            } else {
                add_metric(&mut group, &format!("metric_{i}"), &[("k3", "x")]);
            }
        }

        p.process(&mut group);

        // 7 user metrics survive, 7 auto metrics appended.
        assert_eq!(group.events().len(), 14);
        let names: Vec<String> = group
            .events()
            .iter()
            .filter_map(|e| e.as_metric().map(|m| m.name().as_str().to_string()))
            .collect();
        assert!(!names.contains(&"metric_3".to_string()));
        assert_eq!(
            &names[7..],
            &[
                SCRAPE_DURATION_SECONDS.to_string(),
                SCRAPE_RESPONSE_SIZE_BYTES.to_string(),
                SCRAPE_SAMPLES_LIMIT.to_string(),
                SCRAPE_SAMPLES_POST_METRIC_RELABELING.to_string(),
                SCRAPE_SAMPLES_SCRAPED.to_string(),
                SCRAPE_TIMEOUT_SECONDS.to_string(),
                UP.to_string(),
            ]
        );

        let expectations = [
            (SCRAPE_DURATION_SECONDS, 1.5),
            (SCRAPE_RESPONSE_SIZE_BYTES, 2325.0),
            (SCRAPE_SAMPLES_LIMIT, 1000.0),
            (SCRAPE_SAMPLES_POST_METRIC_RELABELING, 7.0),
            (SCRAPE_SAMPLES_SCRAPED, 8.0),
            (SCRAPE_TIMEOUT_SECONDS, 15.0),
            (UP, 1.0),
        ];
        for event in &group.events()[7..] {
            let m = event.as_metric().expect("metric");
            let expected = expectations
                .iter()
                .find(|(n, _)| *n == m.name().as_str())
                .expect("known auto metric");
            assert_eq!(m.value(), &MetricValue::UntypedSingle(expected.1));
            assert_eq!(m.get_tag(b"job").map(|v| v.as_str()), Some("test_job"));
            assert_eq!(
                m.get_tag(b"instance").map(|v| v.as_str()),
                Some("localhost:8080")
            );
            assert_eq!(m.timestamp(), 1_715_829_785);
        }
    }

    #[test]
    fn test_no_auto_metrics_without_up_state() {
        let p = build(json!({"job_name": "j", "honor_labels": true}));
        let mut group = PipelineEventGroup::new(SourceBuffer::new());
        add_metric(&mut group, "m", &[]);
        p.process(&mut group);
        assert_eq!(group.events().len(), 1);
    }

    #[test]
    fn test_exported_prefix_on_collision() {
        let p = build(json!({"job_name": "j", "honor_labels": false}));
        let mut group = PipelineEventGroup::new(SourceBuffer::new());
        group.set_tag_copy("host", "group-host");
        add_metric(&mut group, "m", &[("host", "event-host"), ("other", "x")]);

        p.process(&mut group);
        let m = group.events()[0].as_metric().expect("metric");
        assert!(m.get_tag(b"host").is_none());
        assert_eq!(
            m.get_tag(b"exported_host").map(|v| v.as_str()),
            Some("event-host")
        );
        assert_eq!(m.get_tag(b"other").map(|v| v.as_str()), Some("x"));
    }

    #[test]
    fn test_honor_labels_keeps_event_labels() {
        let p = build(json!({"job_name": "j", "honor_labels": true}));
        let mut group = PipelineEventGroup::new(SourceBuffer::new());
        group.set_tag_copy("host", "group-host");
        add_metric(&mut group, "m", &[("host", "event-host")]);

        p.process(&mut group);
        let m = group.events()[0].as_metric().expect("metric");
        assert_eq!(m.get_tag(b"host").map(|v| v.as_str()), Some("event-host"));
    }

    #[test]
    fn test_relabel_renaming_reseats_event_name() {
        let p = build(json!({
            "job_name": "j",
            "honor_labels": true,
            "metric_relabel_configs": [
                {"action": "replace", "source_labels": ["__name__"], "regex": "(.*)",
                 "target_label": "__name__", "replacement": "renamed_$1"}
            ]
        }));
        let mut group = PipelineEventGroup::new(SourceBuffer::new());
        add_metric(&mut group, "m", &[]);
        p.process(&mut group);
        let m = group.events()[0].as_metric().expect("metric");
        assert_eq!(m.name().as_str(), "renamed_m");
    }
}
