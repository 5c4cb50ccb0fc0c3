// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus Parse Processor
//!
//! Turns raw scrape chunks into metric events. An incomplete trailing line
//! is cached per stream id and rejoined with the next chunk, so a chunked
//! scrape response yields exactly the same events as a monolithic one.
//! Per-stream sample counts accumulate until the final chunk (the one
//! carrying the up-state) publishes them as group metadata.

use std::collections::HashMap;
use std::sync::Mutex;

use super::text_parser::{is_valid_metric, TextParser};
use super::NAME_LABEL;
use crate::core::config::context::AgentContext;
use crate::core::event::{
    EventGroupMetaKey, MetricEvent, PipelineEvent, PipelineEventGroup, StringView,
};
use crate::core::exception::LogFluxResult;
use crate::core::pipeline::processor::Processor;

#[derive(Default)]
pub struct ProcessorPromParse {
    honor_timestamps: bool,
    raw_cache: Mutex<HashMap<String, Vec<u8>>>,
    count_cache: Mutex<HashMap<String, usize>>,
}

impl ProcessorPromParse {
    pub fn new(honor_timestamps: bool) -> Self {
        Self {
            honor_timestamps,
            ..Default::default()
        }
    }

    fn parse_chunk(
        &self,
        stream_id: &str,
        content: StringView,
        parser: &TextParser,
        group: &mut PipelineEventGroup,
        events: &mut Vec<PipelineEvent>,
    ) {
        let cached = {
            let mut cache = self.raw_cache.lock().expect("prom raw cache lock");
            cache.remove(stream_id).unwrap_or_default()
        };

        let data = content.as_bytes();
        let mut begin = 0usize;
        for end in 0..data.len() {
            if data[end] != b'\n' {
                continue;
            }
            if begin == 0 && !cached.is_empty() {
                // Rejoin the split line from the previous chunk.
                let mut joined = cached.clone();
                joined.extend_from_slice(&data[..end]);
                let line = group.copy_string(&joined);
                self.add_event(&line, parser, group, events);
            } else if begin != end {
                let line = content.slice(begin..end);
                self.add_event(&line, parser, group, events);
            }
            begin = end + 1;
        }
        if begin == 0 && !cached.is_empty() && !data.is_empty() {
            // Chunk without any newline extends the cached partial line.
            let mut joined = cached;
            joined.extend_from_slice(data);
            let mut cache = self.raw_cache.lock().expect("prom raw cache lock");
            cache.insert(stream_id.to_string(), joined);
            return;
        }
        if begin < data.len() {
            let mut cache = self.raw_cache.lock().expect("prom raw cache lock");
            cache
                .entry(stream_id.to_string())
                .or_default()
                .extend_from_slice(&data[begin..]);
        }
    }

    fn add_event(
        &self,
        line: &StringView,
        parser: &TextParser,
        group: &mut PipelineEventGroup,
        events: &mut Vec<PipelineEvent>,
    ) {
        if !is_valid_metric(line.as_bytes()) {
            return;
        }
        let mut event = MetricEvent::default();
        if parser.parse_line(line, group, &mut event) {
            let name = event.name().clone();
            event.set_tag(StringView::from_static(NAME_LABEL), name);
            events.push(PipelineEvent::Metric(event));
        }
    }
}

impl Processor for ProcessorPromParse {
    fn name(&self) -> &'static str {
        "processor_prom_parse_metric_native"
    }

    fn init(&mut self, config: &serde_json::Value, _ctx: &AgentContext) -> LogFluxResult<()> {
        self.honor_timestamps = config
            .get("honor_timestamps")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        Ok(())
    }

    fn supports(&self, event: &PipelineEvent) -> bool {
        event.is_raw()
    }

    fn process(&self, group: &mut PipelineEventGroup) {
        let Some(stream_id) = group
            .get_metadata(EventGroupMetaKey::PrometheusStreamId)
            .map(|v| v.as_str().to_string())
        else {
            tracing::warn!("unexpected event group: need prom stream id");
            return;
        };

        let timestamp_ms: u64 = group
            .get_metadata(EventGroupMetaKey::PrometheusScrapeTimestampMillisec)
            .and_then(|v| v.as_str().parse().ok())
            .unwrap_or(0);
        let mut parser = TextParser::new(self.honor_timestamps);
        parser.set_default_timestamp(
            (timestamp_ms / 1000) as i64,
            (timestamp_ms % 1000 * 1_000_000) as u32,
        );

        let raw_events = group.take_events();
        let mut events = Vec::new();
        for raw in raw_events {
            match raw {
                PipelineEvent::Raw(e) => {
                    self.parse_chunk(&stream_id, e.content().clone(), &parser, group, &mut events);
                }
                other => {
                    tracing::warn!(event_type = ?other.event_type(), "unexpected event type: need raw event");
                }
            }
        }
        let parsed = events.len();
        *group.events_mut() = events;

        let up_state_present = group.has_metadata(EventGroupMetaKey::PrometheusUpState);
        {
            let mut counts = self.count_cache.lock().expect("prom count cache lock");
            let count = counts.entry(stream_id.clone()).or_insert(0);
            *count += parsed;
            if up_state_present {
                let total = *count;
                counts.remove(&stream_id);
                group.set_metadata_copy(
                    EventGroupMetaKey::PrometheusSamplesScraped,
                    total.to_string(),
                );
            }
        }
        if up_state_present {
            let mut cache = self.raw_cache.lock().expect("prom raw cache lock");
            cache.remove(&stream_id);
        }
    }
}
